//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    body::StreamBody,
    extract::Query,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    app::{ConeCam, Status},
    camera::{CameraError, Session},
    canvas::as_jpeg_stream_item,
    device::LensMode,
    pages::{self, CONTROL_PATH, DETECTOR_PATH, HOME_PATH},
};

/// Search parameters of the camera open request.
#[derive(Debug, Deserialize)]
pub struct OpenParams {
    lens: LensMode,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    lens: LensMode,
    device_id: String,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            lens: session.lens(),
            device_id: session.device_id().to_owned(),
        }
    }
}

impl IntoResponse for CameraError {
    fn into_response(self) -> Response {
        let status = match &self {
            CameraError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            CameraError::NoDeviceFound => StatusCode::NOT_FOUND,
            CameraError::AcquisitionFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}

/// Build the router of the detector.
pub fn router(cone_cam: Arc<ConeCam>) -> Router {
    Router::new()
        .route(HOME_PATH, get(home))
        .route(DETECTOR_PATH, get(detector))
        .route(CONTROL_PATH, get(control))
        .route("/healthcheck", get(healthcheck))
        .route("/status", get(status))
        .route("/camera/open", post(open_camera))
        .route("/camera/close", post(close_camera))
        .route("/stream", get(detections_stream))
        .layer(Extension(cone_cam))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

pub async fn home() -> Html<String> {
    Html(pages::home_page())
}

pub async fn detector() -> Html<String> {
    Html(pages::detector_page())
}

pub async fn control() -> Html<String> {
    Html(pages::control_page())
}

pub async fn status(Extension(cone_cam): Extension<Arc<ConeCam>>) -> Json<Status> {
    Json(cone_cam.status().await)
}

pub async fn open_camera(
    Extension(cone_cam): Extension<Arc<ConeCam>>,
    Query(params): Query<OpenParams>,
) -> Result<Json<SessionInfo>, CameraError> {
    log::info!("Opening {} camera", params.lens);
    match cone_cam.start(params.lens).await {
        Ok(session) => Ok(Json(SessionInfo::from(&session))),
        Err(e) => {
            log::error!("Error accessing camera: {e}");
            Err(e)
        }
    }
}

pub async fn close_camera(Extension(cone_cam): Extension<Arc<ConeCam>>) -> Json<Status> {
    cone_cam.stop().await;
    Json(cone_cam.status().await)
}

/// Annotated frames as multipart JPEG stream.
pub async fn detections_stream(Extension(cone_cam): Extension<Arc<ConeCam>>) -> impl IntoResponse {
    log::info!("Detection stream requested");

    let stream = BroadcastStream::new(cone_cam.canvas().subscribe()).filter_map(|rendered| async move {
        // Lagging subscribers skip to the latest frame.
        rendered
            .ok()
            .map(|rendered| Ok::<_, std::io::Error>(as_jpeg_stream_item(&rendered.jpeg)))
    });

    // Set body and headers for multipart streaming
    let body = StreamBody::new(stream);
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}
