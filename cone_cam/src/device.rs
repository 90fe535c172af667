//! Camera device selection by label heuristics.
//!
//! Platforms do not expose which lens a camera uses, only a free-text label
//! such as "Back Telephoto Camera". The selection below relies on that text
//! and falls back to any video input when no label matches.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of an enumerated media device.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeviceKind {
    Video,
    Audio,
}

/// Snapshot of a media device as reported by the camera backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VideoDevice {
    pub id: String,
    pub kind: DeviceKind,
    pub label: String,
}

impl VideoDevice {
    pub fn video(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: DeviceKind::Video,
            label: label.into(),
        }
    }
}

/// Back-facing lens to stream from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LensMode {
    Normal,
    Telephoto,
}

impl std::fmt::Display for LensMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LensMode::Normal => write!(f, "normal"),
            LensMode::Telephoto => write!(f, "telephoto"),
        }
    }
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum SelectError {
    #[error("no video input device found")]
    NotFound,
}

/// Label fragments that mark virtual multi-lens or wide-angle cameras.
const EXCLUDED_ALWAYS: [&str; 3] = ["wide", "dual", "triple"];

/// Pick the device streaming from the requested lens.
///
/// Order of preference: the first video device whose label matches the lens
/// strictly, then the first video device of any kind, then [`SelectError::NotFound`].
pub fn select_device(devices: &[VideoDevice], lens: LensMode) -> Result<&VideoDevice, SelectError> {
    let mut video_devices = devices.iter().filter(|d| d.kind == DeviceKind::Video);

    if let Some(device) = video_devices
        .clone()
        .find(|d| matches_lens(&d.label, lens))
    {
        log::debug!("Selected {} camera {:?}", lens, device.label);
        return Ok(device);
    }

    match video_devices.next() {
        Some(device) => {
            log::info!(
                "No {} back camera found, using video input {:?}",
                lens,
                device.label
            );
            Ok(device)
        }
        None => Err(SelectError::NotFound),
    }
}

fn matches_lens(label: &str, lens: LensMode) -> bool {
    let label = label.to_lowercase();
    if !label.contains("back") || EXCLUDED_ALWAYS.iter().any(|word| label.contains(word)) {
        return false;
    }

    match lens {
        LensMode::Normal => !label.contains("telephoto"),
        LensMode::Telephoto => label.contains("telephoto"),
    }
}
