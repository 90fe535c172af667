//! Camera session manager.
//!
//! The manager owns at most one live stream. Switching the lens always stops
//! the tracks of the running stream before the next device is requested, so
//! a device is never held twice.
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{CameraBackend, CameraError, MediaStream, VideoSink};
use crate::{
    device::{select_device, LensMode},
    meter::METER,
};

/// Observable state of the manager.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamingState {
    Idle,
    Streaming(LensMode),
}

impl StreamingState {
    pub fn lens(&self) -> Option<LensMode> {
        match self {
            StreamingState::Idle => None,
            StreamingState::Streaming(lens) => Some(*lens),
        }
    }
}

/// One open camera stream bound to a device and lens.
///
/// The cancel token fires when the session is closed or its stream ends,
/// which is how the detection loop attached to the session learns to stop.
#[derive(Clone, Debug)]
pub struct Session {
    device_id: String,
    lens: LensMode,
    cancel: CancellationToken,
}

impl Session {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn lens(&self) -> LensMode {
        self.lens
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

struct ActiveSession {
    session: Session,
    pump: JoinHandle<()>,
}

pub struct CameraManager {
    backend: Arc<dyn CameraBackend>,
    sink: VideoSink,
    active: Option<ActiveSession>,
}

impl CameraManager {
    pub fn new(backend: Arc<dyn CameraBackend>, sink: VideoSink) -> Self {
        Self {
            backend,
            sink,
            active: None,
        }
    }

    pub fn sink(&self) -> &VideoSink {
        &self.sink
    }

    /// The open session. A session whose stream has ended is not returned.
    pub fn session(&self) -> Option<&Session> {
        self.active
            .as_ref()
            .map(|active| &active.session)
            .filter(|session| session.is_active())
    }

    pub fn state(&self) -> StreamingState {
        match self.session() {
            None => StreamingState::Idle,
            Some(session) => StreamingState::Streaming(session.lens),
        }
    }

    /// Open the back camera for `lens` and bind its frames to the sink.
    ///
    /// A running session for another lens is closed first. Asking for the lens
    /// that is already streaming returns the running session, while a session
    /// whose stream ended is cleaned up and the device acquired again. On
    /// error the manager is left idle.
    pub async fn open(&mut self, lens: LensMode) -> Result<Session, CameraError> {
        if let Some(session) = self.session() {
            if session.lens == lens {
                return Ok(session.clone());
            }
        }
        self.close().await;

        self.backend.request_permission().await?;
        let devices = self.backend.enumerate_devices().await?;
        let device = select_device(&devices, lens)
            .map_err(|_| CameraError::NoDeviceFound)?
            .clone();

        let stream = self.backend.open_stream(&device.id).await?;

        let session = Session {
            device_id: device.id,
            lens,
            cancel: CancellationToken::new(),
        };
        let pump = spawn_frame_pump(stream, self.sink.clone(), session.cancel.clone());
        log::info!(
            "Streaming {} camera {:?} ({})",
            lens,
            device.label,
            &session.device_id
        );

        self.active = Some(ActiveSession {
            session: session.clone(),
            pump,
        });

        Ok(session)
    }

    /// Stop every track of the running session and detach the sink.
    ///
    /// Does nothing when no session is open.
    pub async fn close(&mut self) {
        let active = match self.active.take() {
            Some(active) => active,
            None => return,
        };

        active.session.cancel.cancel();
        if let Err(e) = active.pump.await {
            log::warn!("Frame pump of {} ended abnormally: {e}", &active.session.device_id);
        }
        self.sink.detach();

        log::info!(
            "Closed {} camera ({})",
            active.session.lens,
            &active.session.device_id
        );
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        if let Some(active) = &self.active {
            active.session.cancel.cancel();
        }
    }
}

/// Move frames from the stream into the sink until the session is cancelled.
///
/// The stream is stopped on the pump thread before the task completes.
fn spawn_frame_pump(
    mut stream: Box<dyn MediaStream>,
    sink: VideoSink,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !cancel.is_cancelled() {
            match stream.next_frame() {
                Some(frame) => {
                    METER.tick_captured();
                    if cancel.is_cancelled() {
                        break;
                    }
                    sink.publish(frame);
                }
                None => {
                    log::warn!("Camera stream ended");
                    sink.detach();
                    cancel.cancel();
                    break;
                }
            }
        }
        stream.stop();
    })
}
