//! Wiring of camera, model, canvas and reporter.
//!
use std::sync::Arc;

use serde::Serialize;
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    camera::{CameraError, CameraManager, Session},
    canvas::Canvas,
    detect_loop::{spawn_detection_loop, LoopExit},
    device::LensMode,
    loader::{LoadProgress, LoadTracker, ModelSlot},
    reporter::ReporterHandle,
};

/// Snapshot of the detector for the pages.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Status {
    pub streaming: Option<LensMode>,
    pub device_id: Option<String>,
    pub model_name: String,
    pub model_loaded: bool,
    pub progress: LoadProgress,
    pub reporting: bool,
}

struct Running {
    camera: CameraManager,
    detection: Option<JoinHandle<LoopExit>>,
}

/// The cone detector.
///
/// Starting a lens opens a camera session and attaches a detection loop to
/// it. The loop lives exactly as long as the session.
pub struct ConeCam {
    running: Mutex<Running>,
    models: Arc<ModelSlot>,
    progress: Arc<LoadTracker>,
    model_name: String,
    canvas: Arc<Canvas>,
    reporter: Option<ReporterHandle>,
}

impl ConeCam {
    pub fn new(
        camera: CameraManager,
        models: Arc<ModelSlot>,
        progress: Arc<LoadTracker>,
        model_name: impl Into<String>,
        canvas: Arc<Canvas>,
        reporter: Option<ReporterHandle>,
    ) -> Self {
        Self {
            running: Mutex::new(Running {
                camera,
                detection: None,
            }),
            models,
            progress,
            model_name: model_name.into(),
            canvas,
            reporter,
        }
    }

    pub fn canvas(&self) -> &Arc<Canvas> {
        &self.canvas
    }

    /// Stream from `lens` and detect on its frames.
    ///
    /// A session streaming another lens is stopped first.
    pub async fn start(&self, lens: LensMode) -> Result<Session, CameraError> {
        let mut running = self.running.lock().await;

        if let Some(session) = running.camera.session() {
            if session.lens() == lens {
                return Ok(session.clone());
            }
        }
        Self::stop_running(&mut running).await;

        let session = running.camera.open(lens).await?;
        running.detection = Some(spawn_detection_loop(
            running.camera.sink().subscribe(),
            self.models.clone(),
            self.canvas.clone(),
            self.reporter.clone(),
            session.cancel_token(),
        ));

        Ok(session)
    }

    /// Close the camera session. Does nothing when idle.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        Self::stop_running(&mut running).await;
    }

    async fn stop_running(running: &mut Running) {
        running.camera.close().await;

        if let Some(detection) = running.detection.take() {
            match detection.await {
                Ok(exit) => log::debug!("Detection loop ended: {:?}", exit),
                Err(e) => log::warn!("Detection loop failed: {e}"),
            }
        }
    }

    pub async fn status(&self) -> Status {
        let running = self.running.lock().await;
        let session = running.camera.session();

        Status {
            streaming: running.camera.state().lens(),
            device_id: session.map(|session| session.device_id().to_owned()),
            model_name: self.model_name.clone(),
            model_loaded: self.models.is_loaded(),
            progress: self.progress.get(),
            reporting: self.reporter.is_some(),
        }
    }
}
