mod fakes;

use std::{
    net::TcpListener,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    http::{header, HeaderMap, StatusCode},
    routing::post,
    Extension, Json, Router,
};
use common::protocol::CONE_DETECTIONS_PATH;
use cone_cam::reporter::{report, send_detections, spawn_reporter, ReportError, MAX_IN_FLIGHT};
use fakes::cone;
use serde_json::{json, Value};
use tokio::sync::mpsc;

type Received = mpsc::UnboundedSender<(Option<String>, Value)>;

async fn collect(
    Extension(received): Extension<Received>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    received.send((content_type, body)).unwrap();
    Json(json!({ "status": "OK" }))
}

/// Count the request, then never answer.
async fn hang(Extension(requests): Extension<Arc<AtomicUsize>>) -> StatusCode {
    requests.fetch_add(1, Ordering::SeqCst);
    futures::future::pending::<()>().await;
    StatusCode::OK
}

async fn fail() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Serve `router` on a free local port and return its base URL.
fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(router.into_make_service())
            .await
            .unwrap();
    });
    format!("http://{addr}")
}

fn collecting_server() -> (String, mpsc::UnboundedReceiver<(Option<String>, Value)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let router = Router::new()
        .route(CONE_DETECTIONS_PATH, post(collect))
        .layer(Extension(tx));
    (serve(router), rx)
}

#[tokio::test]
async fn test_report_posts_json_body() {
    let (base, mut received) = collecting_server();
    let client = reqwest::Client::new();

    let ack = report(
        &client,
        &[cone(0.92)],
        &format!("{base}{CONE_DETECTIONS_PATH}"),
    )
    .await
    .unwrap();
    assert_eq!(ack.status, "OK");

    let (content_type, body) = received.recv().await.unwrap();
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(
        body,
        json!({
            "detections": [{
                "className": "cone",
                "score": 0.92,
                "box": { "x": 10.0, "y": 20.0, "w": 30.0, "h": 40.0 }
            }]
        })
    );
}

#[tokio::test]
async fn test_server_error_is_reported_and_swallowed() {
    let base = serve(Router::new().route(CONE_DETECTIONS_PATH, post(fail)));
    let endpoint = format!("{base}{CONE_DETECTIONS_PATH}");
    let client = reqwest::Client::new();

    match report(&client, &[cone(0.5)], &endpoint).await {
        Err(ReportError::Server(status)) => assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(send_detections(&client, &[cone(0.5)], &endpoint).await.is_none());
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    // Bind and drop to get a port nobody listens on.
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let endpoint = format!("http://127.0.0.1:{port}{CONE_DETECTIONS_PATH}");

    let result = report(&reqwest::Client::new(), &[cone(0.5)], &endpoint).await;
    assert!(matches!(result, Err(ReportError::Network(_))));
}

#[tokio::test]
async fn test_reporter_task_posts_submitted_detections() {
    let (base, mut received) = collecting_server();
    let (reporter, _handle) = spawn_reporter(
        reqwest::Client::new(),
        format!("{base}{CONE_DETECTIONS_PATH}"),
    );

    reporter.submit(Vec::new());
    reporter.submit(vec![cone(0.8), cone(0.6)]);

    let (_, body) = tokio::time::timeout(Duration::from_secs(5), received.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(body["detections"].as_array().unwrap().len(), 2);

    // The empty submission never reaches the server.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(received.try_recv().is_err());
}

#[tokio::test]
async fn test_hanging_server_caps_requests_in_flight() {
    let requests = Arc::new(AtomicUsize::new(0));
    let base = serve(
        Router::new()
            .route(CONE_DETECTIONS_PATH, post(hang))
            .layer(Extension(requests.clone())),
    );
    let (reporter, _handle) = spawn_reporter(
        reqwest::Client::new(),
        format!("{base}{CONE_DETECTIONS_PATH}"),
    );

    for _ in 0..3 * MAX_IN_FLIGHT {
        reporter.submit(vec![cone(0.7)]);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while requests.load(Ordering::SeqCst) < MAX_IN_FLIGHT {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("reports never reached the server");

    // Later reports were dropped rather than piling up behind the hanging ones.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(requests.load(Ordering::SeqCst), MAX_IN_FLIGHT);
}
