//! Video4Linux cameras via `rscam`.
//!
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use image::RgbImage;
use rscam::{Camera, Config};

use super::{CameraBackend, CameraError, MediaStream};
use crate::device::VideoDevice;

const FORMAT: &[u8] = b"MJPG";

pub struct V4lBackend {
    sys_dir: PathBuf,
    dev_dir: PathBuf,
}

impl V4lBackend {
    pub fn new() -> Self {
        Self {
            sys_dir: PathBuf::from("/sys/class/video4linux"),
            dev_dir: PathBuf::from("/dev"),
        }
    }

    fn device_nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = std::fs::read_dir(&self.sys_dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.file_name().to_string_lossy().into_owned())
                    .filter(|name| name.starts_with("video"))
                    .collect()
            })
            .unwrap_or_default();
        nodes.sort();
        nodes
    }
}

impl Default for V4lBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraBackend for V4lBackend {
    async fn request_permission(&self) -> Result<(), CameraError> {
        let nodes = self.device_nodes();
        if nodes.is_empty() {
            return Err(CameraError::NoDeviceFound);
        }

        let mut denied = None;
        for node in nodes.iter() {
            match std::fs::File::open(self.dev_dir.join(node)) {
                Ok(_) => return Ok(()),
                Err(e) if e.kind() == ErrorKind::PermissionDenied => denied = Some(e),
                Err(e) => log::debug!("Cannot open {node}: {e}"),
            }
        }

        match denied {
            Some(e) => Err(CameraError::PermissionDenied(e.to_string())),
            None => Err(CameraError::NoDeviceFound),
        }
    }

    async fn enumerate_devices(&self) -> Result<Vec<VideoDevice>, CameraError> {
        let devices = self
            .device_nodes()
            .into_iter()
            .map(|node| {
                let label = read_label(&self.sys_dir.join(&node)).unwrap_or_else(|| node.clone());
                VideoDevice::video(self.dev_dir.join(&node).to_string_lossy(), label)
            })
            .collect();

        Ok(devices)
    }

    async fn open_stream(&self, device_id: &str) -> Result<Box<dyn MediaStream>, CameraError> {
        let id = device_id.to_owned();
        let cam = tokio::task::spawn_blocking(move || start_camera(&id))
            .await
            .map_err(|e| CameraError::acquisition(device_id, e))?
            .map_err(|e| CameraError::acquisition(device_id, e))?;

        Ok(Box::new(V4lStream { cam: Some(cam) }))
    }
}

fn read_label(sys_node: &Path) -> Option<String> {
    std::fs::read_to_string(sys_node.join("name"))
        .ok()
        .map(|name| name.trim().to_owned())
}

/// Start capturing MJPG at the best resolution and frame rate the device offers.
fn start_camera(device_name: &str) -> Result<Camera, String> {
    let mut cam = Camera::new(device_name).map_err(|e| e.to_string())?;
    log_supported_formats(&cam);

    let resolution = get_max_resolution(&cam)?;
    let frame_rate = get_max_frame_rate(&cam, resolution)?;
    log::info!(
        "Using camera {} at {:?} with interval {:?}",
        device_name,
        resolution,
        frame_rate
    );

    cam.start(&Config {
        interval: frame_rate,
        resolution,
        format: FORMAT,
        ..Default::default()
    })
    .map_err(|e| e.to_string())?;

    Ok(cam)
}

struct V4lStream {
    cam: Option<Camera>,
}

impl MediaStream for V4lStream {
    fn next_frame(&mut self) -> Option<RgbImage> {
        loop {
            let frame = self.cam.as_ref()?.capture().ok()?;
            match image::load_from_memory_with_format(&frame[..], image::ImageFormat::Jpeg) {
                Ok(image) => return Some(image.to_rgb8()),
                Err(e) => log::warn!("Dropping undecodable frame: {e}"),
            }
        }
    }

    fn stop(&mut self) {
        if let Some(mut cam) = self.cam.take() {
            if let Err(e) = cam.stop() {
                log::warn!("Error stopping camera: {e}");
            }
        }
    }
}

/// Get the maximum supported resolution for MJPG.
fn get_max_resolution(cam: &Camera) -> Result<(u32, u32), String> {
    let resolution_info = cam.resolutions(FORMAT).map_err(|e| e.to_string())?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Highest resolution in terms of number of pixels
            .max_by_key(|res| res.0 * res.1)
            .copied(),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| "no resolution found".to_owned())
}

/// Get the maximum supported frame rate for MJPG at the given resolution.
fn get_max_frame_rate(cam: &Camera, resolution: (u32, u32)) -> Result<(u32, u32), String> {
    let interval_info = cam
        .intervals(FORMAT, resolution)
        .map_err(|e| e.to_string())?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        // Intervals are (numerator, denominator) seconds per frame
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .max_by_key(|(num, denom)| denom / num.max(&1))
            .copied(),
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    }
    .ok_or_else(|| "no frame rate found".to_owned())
}

fn log_supported_formats(cam: &Camera) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!("Supported formats: {:?}, using format MJPG", formats);
}
