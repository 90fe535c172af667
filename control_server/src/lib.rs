//! Receiving end of the cone detector.
//!
//! Detection reports and phone sensor frames arrive over HTTP and are
//! republished on named topics for anyone subscribed.
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use common::protocol::CONE_DETECTIONS_PATH;

pub mod endpoints;
pub mod gps;
pub mod pubsub;

use pubsub::NamedPubSub;

pub const DETECTIONS_TOPIC: &str = "cone_detections";
pub const GPS_TOPIC: &str = "gps";

/// Build the router of the control server.
pub fn router(pubsub: Arc<NamedPubSub>) -> Router {
    Router::new()
        .route("/healthcheck", get(endpoints::healthcheck))
        .route("/test_get", get(endpoints::test_get))
        .route(CONE_DETECTIONS_PATH, post(endpoints::cone_detections))
        .route("/sensor_data", post(endpoints::sensor_data))
        .route("/subscribe", get(endpoints::subscribe))
        .layer(Extension(pubsub))
}
