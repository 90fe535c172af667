//! Frame-by-frame detection loop.
//!
//! One cycle reads the current frame, runs the model on it, redraws the
//! canvas and hands the detections to the reporter. The next cycle starts as
//! soon as the sink holds a newer frame.
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    camera::{Frame, FrameReceiver},
    canvas::Canvas,
    loader::ModelSlot,
    meter::METER,
    nn::InferenceError,
    reporter::ReporterHandle,
};

/// Why a detection loop ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoopExit {
    /// The session was closed.
    Cancelled,
    /// The sink was detached or dropped, no more frames will come.
    SinkStopped,
}

pub struct DetectionLoop {
    frames: FrameReceiver,
    models: Arc<ModelSlot>,
    canvas: Arc<Canvas>,
    reporter: Option<ReporterHandle>,
    cancel: CancellationToken,
}

impl DetectionLoop {
    pub fn new(
        frames: FrameReceiver,
        models: Arc<ModelSlot>,
        canvas: Arc<Canvas>,
        reporter: Option<ReporterHandle>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            frames,
            models,
            canvas,
            reporter,
            cancel,
        }
    }

    pub async fn run(mut self) -> LoopExit {
        loop {
            if self.cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return LoopExit::Cancelled,
                changed = self.frames.changed() => {
                    if changed.is_err() {
                        return LoopExit::SinkStopped;
                    }
                }
            }

            let frame = self.frames.borrow_and_update().clone();
            match frame {
                Some(frame) => self.cycle(frame).await,
                None => return LoopExit::SinkStopped,
            }
        }
    }

    async fn cycle(&self, frame: Frame) {
        let model = match self.models.current() {
            Some(model) => model,
            None => {
                log::debug!("Skipping frame {}: {}", frame.seq, InferenceError::NotLoaded);
                return;
            }
        };

        let seq = frame.seq;
        let canvas = self.canvas.clone();
        let reporter = self.reporter.clone();
        let cancel = self.cancel.clone();

        // Inference and rendering both block, so they share one blocking task.
        let result = tokio::task::spawn_blocking(move || {
            let detections = model.run(&frame.image)?;

            // The session may have been closed while the model was running.
            if cancel.is_cancelled() {
                return Ok(());
            }
            METER.tick_inferred();
            log::debug!("Frame {}: {} detections", frame.seq, detections.len());

            if let Some(reporter) = &reporter {
                reporter.submit(detections.clone());
            }

            if let Err(e) = canvas.render(&frame, detections, model.input_shape()) {
                log::warn!("Failed to render frame {}: {e}", frame.seq);
            }
            Ok::<_, InferenceError>(())
        })
        .await;

        match result {
            Ok(Ok(())) => (),
            Ok(Err(e)) => log::warn!("Skipping frame {seq}: {e}"),
            Err(e) => log::warn!("Skipping frame {seq}: detection task failed: {e}"),
        }
    }
}

/// Run a detection loop until `cancel` fires or the sink stops.
pub fn spawn_detection_loop(
    frames: FrameReceiver,
    models: Arc<ModelSlot>,
    canvas: Arc<Canvas>,
    reporter: Option<ReporterHandle>,
    cancel: CancellationToken,
) -> JoinHandle<LoopExit> {
    tokio::spawn(DetectionLoop::new(frames, models, canvas, reporter, cancel).run())
}
