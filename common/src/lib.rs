//! Common code shared between `cone_cam` and `control_server`.
pub mod protocol;

/// Error type.
pub type Error = Box<dyn std::error::Error>;
