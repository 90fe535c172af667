//! Best-effort forwarding of detections to the control server.
//!
//! Every report is a single POST. There is no retry and no ordering between
//! reports; failures are logged and dropped.
use std::sync::Arc;

use common::protocol::{Ack, DetectionReport};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        Semaphore,
    },
    task::JoinHandle,
};

use crate::nn::Detection;

/// Reports waiting to be picked up by the reporter task.
const QUEUE_SIZE: usize = 8;

/// Requests in flight at once. Reports beyond that are dropped.
pub const MAX_IN_FLIGHT: usize = 4;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Server(StatusCode),
}

/// POST `detections` as `{"detections": [...]}` to `endpoint`.
pub async fn report(
    client: &Client,
    detections: &[Detection],
    endpoint: &str,
) -> Result<Ack, ReportError> {
    let body = DetectionReport::new(detections.iter().map(Detection::to_wire).collect());

    let response = client.post(endpoint).json(&body).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ReportError::Server(status));
    }

    Ok(response.json::<Ack>().await?)
}

/// Like [`report`], but logs and swallows any error.
pub async fn send_detections(
    client: &Client,
    detections: &[Detection],
    endpoint: &str,
) -> Option<Ack> {
    match report(client, detections, endpoint).await {
        Ok(ack) => {
            log::debug!("Reported {} detections: {:?}", detections.len(), ack);
            Some(ack)
        }
        Err(e) => {
            log::error!("Error sending detections to {endpoint}: {e}");
            None
        }
    }
}

/// Queue side of the reporter. Never blocks the caller.
#[derive(Clone)]
pub struct ReporterHandle {
    tx: mpsc::Sender<Vec<Detection>>,
}

impl ReporterHandle {
    /// Hand detections over for reporting. Empty lists are not reported.
    pub fn submit(&self, detections: Vec<Detection>) {
        if detections.is_empty() {
            return;
        }

        match self.tx.try_send(detections) {
            Ok(()) => (),
            Err(TrySendError::Full(_)) => log::debug!("Report queue full, dropping detections"),
            Err(TrySendError::Closed(_)) => log::debug!("Reporter stopped, dropping detections"),
        }
    }
}

/// Spawn the reporter task posting to `endpoint`.
///
/// Each report is sent on its own task so a slow server never holds up the
/// queue. While [`MAX_IN_FLIGHT`] requests are pending, new reports are dropped.
pub fn spawn_reporter(client: Client, endpoint: String) -> (ReporterHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Vec<Detection>>(QUEUE_SIZE);
    let in_flight = Arc::new(Semaphore::new(MAX_IN_FLIGHT));

    let handle = tokio::spawn(async move {
        log::info!("Reporting detections to {endpoint}");
        while let Some(detections) = rx.recv().await {
            let permit = match in_flight.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    log::debug!("{MAX_IN_FLIGHT} reports in flight, dropping detections");
                    continue;
                }
            };

            let client = client.clone();
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                send_detections(&client, &detections, &endpoint).await;
                drop(permit);
            });
        }
    });

    (ReporterHandle { tx }, handle)
}
