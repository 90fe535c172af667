//! Cone detector binary.
//!
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use common::protocol::{endpoint_url, CONE_DETECTIONS_PATH};
use cone_cam::{
    app::ConeCam,
    camera::{replay::ReplayBackend, CameraBackend, CameraManager, VideoSink},
    canvas::{font_from_file, Canvas},
    endpoints::router,
    loader::{spawn_model_loader, LoadTracker, ModelLoader, ModelSlot, ModelSource},
    meter::spawn_meter_logger,
    nn::YoloParams,
    reporter::spawn_reporter,
};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address the HTTP server listens on
    #[clap(long, default_value = "127.0.0.1:3000")]
    server_address: String,

    /// Directory with one sub-directory of images per virtual camera
    #[clap(long, default_value = "cameras")]
    camera_root: PathBuf,

    /// Frame rate of the virtual cameras
    #[clap(long, default_value_t = 15)]
    replay_fps: u32,

    /// Use Video4Linux cameras instead of the virtual cameras
    #[clap(long)]
    v4l: bool,

    /// Path or URL of the YOLOv8 ONNX model
    #[clap(long, default_value = "cones_yolov8s.onnx")]
    model: String,

    /// Name of the model shown on the detector page
    #[clap(long, default_value = "cones_yolov8s")]
    model_name: String,

    /// Square input size of the model
    #[clap(long, default_value_t = 640)]
    input_size: u32,

    /// Class names in the order of the model output
    #[clap(long, value_delimiter = ',', default_value = "cone")]
    class_names: Vec<String>,

    /// Minimum score of a detection
    #[clap(long, default_value_t = 0.25)]
    confidence: f32,

    /// Maximum overlap of two detections of the same class
    #[clap(long, default_value_t = 0.45)]
    iou: f32,

    /// Base URL of the control server receiving detections, e.g. https://host:8000
    #[clap(long)]
    report_base: Option<String>,

    /// TrueType font used to label boxes
    #[clap(long)]
    font: Option<PathBuf>,

    /// Width of the annotated stream
    #[clap(long, default_value_t = 640)]
    canvas_width: u32,

    /// Height of the annotated stream
    #[clap(long, default_value_t = 480)]
    canvas_height: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    // Load the model in the background, the camera can stream before it is ready
    let models = Arc::new(ModelSlot::empty());
    let progress = Arc::new(LoadTracker::new());
    let params = YoloParams {
        width: args.input_size,
        height: args.input_size,
        min_confidence: args.confidence,
        max_iou: args.iou,
        class_names: args.class_names.clone(),
        ..Default::default()
    };
    spawn_model_loader(
        ModelLoader::new(client.clone(), ModelLoader::default_cache_dir()),
        ModelSource::from(args.model.as_str()),
        params,
        models.clone(),
        progress.clone(),
    );

    let font = args.font.as_deref().map(font_from_file).transpose()?;
    let canvas = Arc::new(Canvas::new(args.canvas_width, args.canvas_height).with_font(font));

    let reporter = args.report_base.as_deref().map(|base| {
        let (reporter, _handle) =
            spawn_reporter(client.clone(), endpoint_url(base, CONE_DETECTIONS_PATH));
        reporter
    });

    let camera = CameraManager::new(camera_backend(&args)?, VideoSink::new());
    let cone_cam = Arc::new(ConeCam::new(
        camera,
        models,
        progress,
        args.model_name.clone(),
        canvas,
        reporter,
    ));

    spawn_meter_logger();

    // Serve HTTP server
    let addr: SocketAddr = args.server_address.parse()?;
    log::info!("Serving cone detector on http://{addr}");
    axum::Server::bind(&addr)
        .serve(router(cone_cam).into_make_service())
        .await?;

    Ok(())
}

#[cfg(feature = "v4l")]
fn camera_backend(args: &Args) -> Result<Arc<dyn CameraBackend>> {
    if args.v4l {
        return Ok(Arc::new(cone_cam::camera::v4l::V4lBackend::new()));
    }
    Ok(Arc::new(ReplayBackend::new(&args.camera_root, args.replay_fps)))
}

#[cfg(not(feature = "v4l"))]
fn camera_backend(args: &Args) -> Result<Arc<dyn CameraBackend>> {
    if args.v4l {
        anyhow::bail!("built without Video4Linux support, rebuild with `--features v4l`");
    }
    Ok(Arc::new(ReplayBackend::new(&args.camera_root, args.replay_fps)))
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn test_default_args() {
        let args = Args::try_parse_from(["cone_cam"]).unwrap();
        assert_eq!(args.server_address, "127.0.0.1:3000");
        assert_eq!(args.class_names, vec!["cone".to_owned()]);
        assert!(args.report_base.is_none());
    }

    #[test]
    fn test_class_name_list() {
        let args = Args::try_parse_from([
            "cone_cam",
            "--class-names",
            "cone,ball",
            "--report-base",
            "https://host:8000",
        ])
        .unwrap();
        assert_eq!(args.class_names, vec!["cone".to_owned(), "ball".to_owned()]);
        assert_eq!(args.report_base.as_deref(), Some("https://host:8000"));
    }
}
