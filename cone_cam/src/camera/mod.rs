//! Camera backends and the live frame sink.
//!
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use image::RgbImage;
use thiserror::Error;
use tokio::sync::watch;

use crate::device::VideoDevice;

pub mod replay;
pub mod session;
#[cfg(feature = "v4l")]
pub mod v4l;

pub use session::{CameraManager, Session, StreamingState};

/// Errors surfaced to the user when opening a camera.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("no camera found")]
    NoDeviceFound,
    #[error("failed to acquire camera {device_id}: {reason}")]
    AcquisitionFailed { device_id: String, reason: String },
}

impl CameraError {
    pub fn acquisition(device_id: &str, reason: impl ToString) -> Self {
        CameraError::AcquisitionFailed {
            device_id: device_id.to_owned(),
            reason: reason.to_string(),
        }
    }
}

/// Platform access to cameras.
#[async_trait]
pub trait CameraBackend: Send + Sync {
    /// Ask for camera access. Resolves once access is granted or denied.
    async fn request_permission(&self) -> Result<(), CameraError>;

    /// List the media devices currently available.
    async fn enumerate_devices(&self) -> Result<Vec<VideoDevice>, CameraError>;

    /// Start a live stream bound to exactly the device with `device_id`.
    async fn open_stream(&self, device_id: &str) -> Result<Box<dyn MediaStream>, CameraError>;
}

/// A live camera stream. Capturing blocks until the next frame is decoded.
pub trait MediaStream: Send {
    /// Capture the next frame, `None` once the stream has ended.
    fn next_frame(&mut self) -> Option<RgbImage>;

    /// Stop every track of the stream. Calling it twice is harmless.
    fn stop(&mut self);
}

/// Current decoded frame of the sink.
#[derive(Clone, Debug)]
pub struct Frame {
    pub seq: u64,
    pub image: Arc<RgbImage>,
}

pub type FrameReceiver = watch::Receiver<Option<Frame>>;

/// Destination of live camera frames.
///
/// Only the latest frame is kept. A detached sink holds `None`, which tells
/// readers that no stream is bound to it anymore.
#[derive(Clone)]
pub struct VideoSink {
    tx: Arc<watch::Sender<Option<Frame>>>,
    seq: Arc<AtomicU64>,
}

impl VideoSink {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> FrameReceiver {
        self.tx.subscribe()
    }

    /// Replace the current frame.
    pub fn publish(&self, image: RgbImage) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        self.tx.send_replace(Some(Frame {
            seq,
            image: Arc::new(image),
        }));
    }

    pub fn detach(&self) {
        self.tx.send_replace(None);
    }

    pub fn is_attached(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl Default for VideoSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {

    use super::*;

    #[tokio::test]
    async fn test_sink_keeps_latest_frame() {
        let sink = VideoSink::new();
        let mut rx = sink.subscribe();
        assert!(!sink.is_attached());

        sink.publish(RgbImage::new(2, 2));
        sink.publish(RgbImage::new(4, 4));
        rx.changed().await.unwrap();

        let frame = rx.borrow_and_update().clone().unwrap();
        assert_eq!(frame.seq, 2);
        assert_eq!(frame.image.width(), 4);

        sink.detach();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }
}
