//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    body::StreamBody,
    extract::Query,
    http::header,
    response::IntoResponse,
    Extension, Json,
};
use bytes::Bytes;
use common::protocol::{Ack, DetectionReport};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_stream::wrappers::BroadcastStream;

use crate::{gps::GpsFix, pubsub::NamedPubSub, DETECTIONS_TOPIC, GPS_TOPIC};

#[derive(Debug, Deserialize)]
pub struct SubscribeParams {
    #[serde(default)]
    name: Option<String>,
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

pub async fn test_get() -> Json<Value> {
    Json(json!({ "Request type": "GET", "status": "OK" }))
}

pub async fn cone_detections(
    Extension(pubsub): Extension<Arc<NamedPubSub>>,
    Json(report): Json<DetectionReport>,
) -> Json<Ack> {
    log::info!("Received {} cone detections", report.detections.len());
    for detection in &report.detections {
        log::debug!("{:?}", detection);
    }

    if let Err(e) = pubsub.publish_json(DETECTIONS_TOPIC, &report).await {
        log::warn!("Error publishing detections: {e}");
    }

    Json(Ack::ok())
}

pub async fn sensor_data(
    Extension(pubsub): Extension<Arc<NamedPubSub>>,
    Json(frame): Json<Map<String, Value>>,
) -> Json<Ack> {
    log::debug!("Sensor frame with {} fields", frame.len());

    if let Some(fix) = GpsFix::from_sensor_frame(&frame) {
        log::info!("Publishing GPS fix: {:?}", fix);
        if let Err(e) = pubsub.publish_json(GPS_TOPIC, &fix).await {
            log::warn!("Error publishing GPS fix: {e}");
        }
    }

    Json(Ack::ok())
}

/// Messages of a topic as newline-delimited JSON.
pub async fn subscribe(
    Extension(pubsub): Extension<Arc<NamedPubSub>>,
    Query(params): Query<SubscribeParams>,
) -> impl IntoResponse {
    let name = params.name.unwrap_or_else(|| DETECTIONS_TOPIC.into());
    log::info!("New subscriber for topic {name}");

    let rx = pubsub.subscribe(&name).await;
    let stream = BroadcastStream::new(rx).filter_map(|message| async move {
        // Lagging subscribers skip what they missed.
        message
            .ok()
            .map(|data| Ok::<_, std::io::Error>(Bytes::from([&data[..], b"\n"].concat())))
    });

    let headers = [(header::CONTENT_TYPE, "application/x-ndjson")];
    (headers, StreamBody::new(stream))
}
