pub mod app;
pub mod camera;
pub mod canvas;
pub mod detect_loop;
pub mod device;
pub mod endpoints;
pub mod loader;
pub mod meter;
pub mod nn;
pub mod pages;
pub mod reporter;

pub type Error = Box<dyn std::error::Error>;
