//! Wire format of the detection reports sent to the control server.
//!
use serde::{Deserialize, Serialize};

/// Path of the reporting endpoint, relative to the control server base.
pub const CONE_DETECTIONS_PATH: &str = "/cone_detections";

/// Axis-aligned box with its top-left corner at `(x, y)`.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct BoxXywh {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// A single reported detection.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ConeDetection {
    #[serde(rename = "className")]
    pub class_name: String,
    pub score: f32,
    #[serde(rename = "box")]
    pub bbox: BoxXywh,
}

/// Body of `POST /cone_detections`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct DetectionReport {
    pub detections: Vec<ConeDetection>,
}

impl DetectionReport {
    pub fn new(detections: Vec<ConeDetection>) -> Self {
        Self { detections }
    }
}

/// Acknowledgement returned by the control server.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ack {
    #[serde(default)]
    pub status: String,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            status: "OK".into(),
        }
    }
}

/// Join a server base such as `https://host:8000/` with an endpoint path.
pub fn endpoint_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}
