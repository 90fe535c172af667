//! Virtual cameras replaying still images from disk.
//!
//! Every sub-directory of the root is one video device labelled with the
//! directory name, e.g. `cameras/Back Telephoto Camera/*.jpg`.
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use image::RgbImage;

use super::{CameraBackend, CameraError, MediaStream};
use crate::device::VideoDevice;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub struct ReplayBackend {
    root: PathBuf,
    frame_interval: Duration,
}

impl ReplayBackend {
    pub fn new(root: impl Into<PathBuf>, fps: u32) -> Self {
        Self {
            root: root.into(),
            frame_interval: Duration::from_secs(1) / fps.max(1),
        }
    }
}

#[async_trait]
impl CameraBackend for ReplayBackend {
    async fn request_permission(&self) -> Result<(), CameraError> {
        match tokio::fs::read_dir(&self.root).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(CameraError::NoDeviceFound),
            Err(e) => Err(CameraError::PermissionDenied(format!(
                "{}: {e}",
                self.root.display()
            ))),
        }
    }

    async fn enumerate_devices(&self) -> Result<Vec<VideoDevice>, CameraError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| CameraError::PermissionDenied(e.to_string()))?;

        let mut devices = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let label = entry.file_name().to_string_lossy().into_owned();
            devices.push(VideoDevice::video(entry.path().to_string_lossy(), label));
        }
        devices.sort_by(|a, b| a.label.cmp(&b.label));
        log::debug!("Found replay devices: {:?}", &devices);

        Ok(devices)
    }

    async fn open_stream(&self, device_id: &str) -> Result<Box<dyn MediaStream>, CameraError> {
        let dir = PathBuf::from(device_id);
        let id = device_id.to_owned();
        let frames = tokio::task::spawn_blocking(move || load_frames(&dir))
            .await
            .map_err(|e| CameraError::acquisition(&id, e))?
            .map_err(|reason| CameraError::acquisition(&id, reason))?;

        log::info!("Replaying {} frames from {}", frames.len(), device_id);

        Ok(Box::new(ReplayStream {
            frames,
            next: 0,
            interval: self.frame_interval,
            last_frame: None,
            stopped: false,
        }))
    }
}

fn load_frames(dir: &Path) -> Result<Vec<RgbImage>, String> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| e.to_string())?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let frames = paths
        .iter()
        .map(|path| image::open(path).map(|image| image.to_rgb8()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    if frames.is_empty() {
        return Err(format!("no images in {}", dir.display()));
    }

    Ok(frames)
}

struct ReplayStream {
    frames: Vec<RgbImage>,
    next: usize,
    interval: Duration,
    last_frame: Option<Instant>,
    stopped: bool,
}

impl MediaStream for ReplayStream {
    fn next_frame(&mut self) -> Option<RgbImage> {
        if self.stopped {
            return None;
        }

        if let Some(last_frame) = self.last_frame {
            let elapsed = last_frame.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());

        let frame = self.frames[self.next % self.frames.len()].clone();
        self.next += 1;

        Some(frame)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
