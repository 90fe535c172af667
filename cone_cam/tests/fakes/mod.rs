//! Fake camera backend and model shared by the integration tests.
#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use common::protocol::BoxXywh;
use cone_cam::{
    camera::{CameraBackend, CameraError, MediaStream},
    device::{DeviceKind, VideoDevice},
    nn::{Detection, InferModel, InferenceError},
};
use image::{Rgb, RgbImage};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CameraEvent {
    Permission,
    Enumerate,
    Open(String),
    Stop(String),
}

pub type EventLog = Arc<Mutex<Vec<CameraEvent>>>;

pub fn phone_devices() -> Vec<VideoDevice> {
    vec![
        VideoDevice::video("1", "Back Camera"),
        VideoDevice::video("2", "Back Telephoto Camera"),
    ]
}

pub struct FakeBackend {
    devices: Vec<VideoDevice>,
    events: EventLog,
    deny_permission: bool,
    fail_open: bool,
    frame_limit: Option<u8>,
}

impl FakeBackend {
    pub fn new(devices: Vec<VideoDevice>) -> Self {
        Self {
            devices,
            events: Arc::new(Mutex::new(Vec::new())),
            deny_permission: false,
            fail_open: false,
            frame_limit: None,
        }
    }

    pub fn denying() -> Self {
        Self {
            deny_permission: true,
            ..Self::new(phone_devices())
        }
    }

    pub fn busy() -> Self {
        Self {
            fail_open: true,
            ..Self::new(phone_devices())
        }
    }

    /// Streams that end on their own after `frames` frames.
    pub fn ending_after(frames: u8) -> Self {
        Self {
            frame_limit: Some(frames),
            ..Self::new(phone_devices())
        }
    }

    pub fn audio_only() -> Self {
        Self::new(vec![VideoDevice {
            id: "mic".into(),
            kind: DeviceKind::Audio,
            label: "Back Microphone".into(),
        }])
    }

    pub fn events(&self) -> EventLog {
        self.events.clone()
    }
}

/// Only the open and stop events, in order.
pub fn stream_events(events: &EventLog) -> Vec<CameraEvent> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter(|event| matches!(event, CameraEvent::Open(_) | CameraEvent::Stop(_)))
        .cloned()
        .collect()
}

#[async_trait]
impl CameraBackend for FakeBackend {
    async fn request_permission(&self) -> Result<(), CameraError> {
        self.events.lock().unwrap().push(CameraEvent::Permission);
        if self.deny_permission {
            return Err(CameraError::PermissionDenied("user declined".into()));
        }
        Ok(())
    }

    async fn enumerate_devices(&self) -> Result<Vec<VideoDevice>, CameraError> {
        self.events.lock().unwrap().push(CameraEvent::Enumerate);
        Ok(self.devices.clone())
    }

    async fn open_stream(&self, device_id: &str) -> Result<Box<dyn MediaStream>, CameraError> {
        if self.fail_open {
            return Err(CameraError::acquisition(device_id, "device busy"));
        }
        self.events
            .lock()
            .unwrap()
            .push(CameraEvent::Open(device_id.to_owned()));

        Ok(Box::new(FakeStream {
            device_id: device_id.to_owned(),
            events: self.events.clone(),
            frames: 0,
            frame_limit: self.frame_limit,
            stopped: false,
        }))
    }
}

struct FakeStream {
    device_id: String,
    events: EventLog,
    frames: u8,
    frame_limit: Option<u8>,
    stopped: bool,
}

impl MediaStream for FakeStream {
    fn next_frame(&mut self) -> Option<RgbImage> {
        if self.stopped || self.frame_limit == Some(self.frames) {
            return None;
        }
        std::thread::sleep(Duration::from_millis(2));
        self.frames = self.frames.wrapping_add(1);
        Some(marked_frame(self.frames))
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.events
                .lock()
                .unwrap()
                .push(CameraEvent::Stop(self.device_id.clone()));
        }
    }
}

/// A small frame whose top-left red value identifies it.
pub fn marked_frame(marker: u8) -> RgbImage {
    RgbImage::from_pixel(16, 12, Rgb([marker, 0, 0]))
}

pub fn marker_of(frame: &RgbImage) -> u8 {
    frame.get_pixel(0, 0)[0]
}

/// Model finding one cone per frame, failing on frames with a given marker.
pub struct FakeModel {
    fail_on: Option<u8>,
    delay: Duration,
    calls: Mutex<Vec<u8>>,
}

impl FakeModel {
    pub fn new() -> Self {
        Self {
            fail_on: None,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(marker: u8) -> Self {
        Self {
            fail_on: Some(marker),
            ..Self::new()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<u8> {
        self.calls.lock().unwrap().clone()
    }
}

impl InferModel for FakeModel {
    fn input_shape(&self) -> [usize; 4] {
        [1, 64, 64, 3]
    }

    fn run(&self, frame: &RgbImage) -> Result<Vec<Detection>, InferenceError> {
        let marker = marker_of(frame);
        self.calls.lock().unwrap().push(marker);
        std::thread::sleep(self.delay);

        if self.fail_on == Some(marker) {
            return Err(InferenceError::Execution(format!("bad tensor on frame {marker}")));
        }

        Ok(vec![cone(0.92)])
    }
}

pub fn cone(score: f32) -> Detection {
    Detection {
        class_id: 0,
        class_name: "cone".into(),
        score,
        bbox: BoxXywh {
            x: 10.0,
            y: 20.0,
            w: 30.0,
            h: 40.0,
        },
    }
}

/// Poll `condition` until it holds, panicking after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
