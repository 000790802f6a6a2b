//! CameraClient against an in-process fake camera service

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use obscam::camera_client::{
    CameraClient, CameraSettings, ClientOptions, FileFormat, SequenceStartRequest,
};
use obscam::directory_access::FsDirectoryAccess;
use obscam::error::{Error, ErrorKind};
use obscam::event_log_service::EventLogService;
use obscam::realtime_hub::RealtimeHub;
use obscam::sequence_orchestrator::{
    FsPhotoWriter, SequenceOrchestrator, SequenceRequest, SequenceStatus, SystemClock,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "observatory-secret";
const JPEG_A: [u8; 6] = [0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9];
const JPEG_B: [u8; 7] = [0xFF, 0xD8, 0x03, 0x04, 0x05, 0xFF, 0xD9];

/// Request bodies seen by the fake service
#[derive(Default)]
struct Recorded {
    settings: Option<Value>,
    batch: Option<Value>,
    sequence_start: Option<Value>,
}

type Shared = Arc<Mutex<Recorded>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(format!("Bearer {}", TOKEN).as_str())
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({"error": "invalid token"}))).into_response()
}

async fn status(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({
        "sensors": {
            "temperature": 12.5,
            "humidity": 71.0,
            "weatherCam": {"connected": true, "streaming": true, "lastSnapshot": "2024-08-12T21:04:05.123456"},
            "meteorCam": {"connected": false, "streaming": false, "fault": "USB reset"}
        },
        "alerts": [{"level": "warning", "message": "dew point close", "ts": "2024-08-12T21:00:00"}]
    }))
    .into_response()
}

async fn settings(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    shared.lock().unwrap().settings = Some(body.clone());
    Json(json!({
        "success": true,
        "gain": body.get("gain").cloned().unwrap_or(Value::Null),
        "exposure": body.get("photo_exposure").cloned().unwrap_or(Value::Null),
    }))
}

async fn snapshot_ok() -> Response {
    ([(header::CONTENT_TYPE, "image/jpeg")], JPEG_A.to_vec()).into_response()
}

async fn snapshot_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Failed to capture snapshot"})),
    )
        .into_response()
}

async fn connect_busy() -> Json<Value> {
    Json(json!({"success": false, "message": "No cameras found"}))
}

async fn batch(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    shared.lock().unwrap().batch = Some(body);
    let jpeg = base64::engine::general_purpose::STANDARD.encode(JPEG_A);
    Json(json!({
        "success": true,
        "count": 4,
        "photos": [jpeg, null, jpeg, jpeg],
    }))
}

async fn sequence_start(State(shared): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    shared.lock().unwrap().sequence_start = Some(body.clone());
    Json(json!({
        "success": true,
        "message": "Sequence started",
        "save_path": body["save_path"],
        "count": body["count"],
        "file_format": "PNG",
        "interval": body.get("interval"),
    }))
}

async fn sequence_status() -> Json<Value> {
    Json(json!({"active": true, "current_count": 2, "total_count": 5, "file_format": "jpeg"}))
}

async fn mjpeg() -> Response {
    let mut wire = Vec::new();
    wire.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    wire.extend_from_slice(&JPEG_A);
    wire.extend_from_slice(b"\r\n--frame\r\nContent-Type: image/jpeg\r\n\r\n");
    wire.extend_from_slice(&JPEG_B);
    wire.extend_from_slice(b"\r\n--frame\r\n\r\n");
    // truncated trailing frame
    wire.extend_from_slice(&[0xFF, 0xD8, 0x09]);

    // Uneven chunks that split markers
    let chunks: Vec<Result<Vec<u8>, std::io::Error>> =
        wire.chunks(5).map(|c| Ok(c.to_vec())).collect();
    (
        [(header::CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")],
        Body::from_stream(futures::stream::iter(chunks)),
    )
        .into_response()
}

async fn spawn_service(shared: Shared) -> String {
    let router = Router::new()
        .route("/status", get(status))
        .route("/camera/connect", post(connect_busy))
        .route("/camera/disconnect", post(|| async { "" }))
        .route("/camera/stream/start", post(|| async { "" }))
        .route("/camera/stream/stop", post(|| async { Json(json!({"success": false})) }))
        .route("/camera/stream", get(mjpeg))
        .route("/camera/settings", post(settings))
        .route("/camera/snapshot", get(snapshot_ok))
        .route("/broken/camera/snapshot", get(snapshot_error))
        .route("/camera/sequence/start", post(sequence_start))
        .route("/camera/sequence/stop", post(|| async { "" }))
        .route("/camera/sequence/status", get(sequence_status))
        .route("/camera/sequence/capture", post(batch))
        .with_state(shared);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("{}/", addr)
}

fn options() -> ClientOptions {
    ClientOptions {
        timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(2),
        settle_delay: Duration::from_millis(10),
    }
}

async fn client() -> (CameraClient, Shared) {
    let shared = Shared::default();
    let base = spawn_service(shared.clone()).await;
    let client = CameraClient::with_options(&base, Some(TOKEN.to_string()), options()).unwrap();
    (client, shared)
}

#[tokio::test]
async fn test_status_decodes_camel_case() {
    let (client, _) = client().await;
    assert!(client.base_url().starts_with("http://127.0.0.1:"));
    assert!(!client.base_url().ends_with('/'));

    let status = client.fetch_status().await.unwrap();
    assert_eq!(status.sensors.temperature, Some(12.5));
    assert!(status.sensors.weather_cam.connected);
    assert!(status.sensors.weather_cam.last_snapshot_time.is_some());
    assert!(!status.sensors.meteor_cam.connected);
    assert_eq!(status.sensors.meteor_cam.fault.as_deref(), Some("USB reset"));
    assert_eq!(status.alerts.len(), 1);
}

#[tokio::test]
async fn test_missing_token_is_rejected_with_message() {
    let shared = Shared::default();
    let base = spawn_service(shared).await;
    let client = CameraClient::with_options(&base, None, options()).unwrap();

    match client.fetch_status().await {
        Err(Error::HttpErrorWithMessage { status, message }) => {
            assert_eq!(status, 401);
            assert_eq!(message, "invalid token");
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_settings_cross_the_wire_in_microseconds() {
    let (client, shared) = client().await;
    let settings = CameraSettings {
        gain: Some(250),
        photo_exposure_seconds: Some(1.234),
        ..Default::default()
    };

    let (ack, status) = client.update_settings_and_refresh(&settings).await.unwrap();

    let body = shared.lock().unwrap().settings.clone().unwrap();
    assert_eq!(body["photo_exposure"], 1_234_000);
    assert_eq!(body["gain"], 250);
    assert!(body.get("video_exposure").is_none());
    assert_eq!(ack.gain, Some(250));
    assert!((ack.exposure_seconds.unwrap() - 1.234).abs() < 1e-9);
    assert!(status.sensors.weather_cam.streaming);
}

#[tokio::test]
async fn test_snapshot_bytes_and_error_body() {
    let (client, _) = client().await;
    assert_eq!(client.capture_snapshot().await.unwrap(), JPEG_A.to_vec());

    let shared = Shared::default();
    let base = spawn_service(shared).await;
    let broken =
        CameraClient::with_options(&format!("{}broken", base), Some(TOKEN.to_string()), options())
            .unwrap();
    let error = broken.capture_snapshot().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::RemoteRejected);
    assert!(matches!(
        error,
        Error::HttpErrorWithMessage { status: 500, ref message } if message == "Failed to capture snapshot"
    ));
}

#[tokio::test]
async fn test_commands() {
    let (client, _) = client().await;

    client.start_stream().await.unwrap();
    assert!(client.disconnect().await.unwrap().success);
    assert!(matches!(
        client.connect().await,
        Err(Error::HttpErrorWithMessage { ref message, .. }) if message == "No cameras found"
    ));
    assert!(matches!(
        client.stop_stream().await,
        Err(Error::HttpErrorWithMessage { .. })
    ));
    assert!(matches!(
        client.update_settings(&CameraSettings::default()).await,
        Err(Error::Validation(_))
    ));
}

#[tokio::test]
async fn test_sequence_endpoints() {
    let (client, shared) = client().await;

    let ack = client
        .start_sequence(&SequenceStartRequest {
            save_path: "/data/night".to_string(),
            count: 5,
            file_format: FileFormat::Png,
            interval: Some(2.5),
        })
        .await
        .unwrap();
    assert!(ack.success);
    assert_eq!(ack.file_format.as_deref(), Some("PNG"));

    let body = shared.lock().unwrap().sequence_start.clone().unwrap();
    assert_eq!(body["file_format"], "png");
    assert_eq!(body["interval"], 2.5);

    let status = client.sequence_status().await.unwrap();
    assert!(status.active);
    assert_eq!((status.current_count, status.total_count), (2, 5));

    client.stop_sequence().await.unwrap();
}

#[tokio::test]
async fn test_batch_keeps_null_positions() {
    let (client, shared) = client().await;
    let photos = client.capture_sequence_batch(4).await.unwrap();

    assert_eq!(photos.len(), 4);
    assert!(photos[1].is_none());
    assert_eq!(shared.lock().unwrap().batch.clone().unwrap()["count"], 4);
}

#[tokio::test]
async fn test_mjpeg_stream_frames() {
    let (client, _) = client().await;
    let mut stream = client.open_stream().await.unwrap();

    assert_eq!(stream.next_frame().await.unwrap(), Some(JPEG_A.to_vec()));
    assert_eq!(stream.next_frame().await.unwrap(), Some(JPEG_B.to_vec()));
    // Truncated trailing frame is dropped at end of stream
    assert_eq!(stream.next_frame().await.unwrap(), None);
    assert_eq!(stream.frames_emitted(), 2);
}

#[tokio::test]
async fn test_unreachable_is_transport() {
    let client = CameraClient::with_options("127.0.0.1:9", None, options()).unwrap();
    let error = client.fetch_status().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert!(error.is_fatal_for_sequence());
}

#[tokio::test]
async fn test_batch_sequence_end_to_end() {
    let (client, _) = client().await;
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = SequenceOrchestrator::new(
        Arc::new(client),
        Arc::new(FsDirectoryAccess::new()),
        Arc::new(FsPhotoWriter),
        Arc::new(SystemClock),
        Arc::new(EventLogService::default()),
        Arc::new(RealtimeHub::new()),
    );

    let outcome = orchestrator
        .run(SequenceRequest {
            save_dir: dir.path().to_path_buf(),
            count: 4,
            interval_seconds: 0.0,
            exposure_seconds: 0.5,
            gain: 100,
            file_format: FileFormat::Jpeg,
        })
        .await
        .unwrap();

    assert_eq!(outcome.status, SequenceStatus::Completed);
    assert_eq!(outcome.photos_saved, 3);
    assert_eq!(outcome.skipped.len(), 1);
    for file in &outcome.files {
        assert_eq!(std::fs::read(file).unwrap(), JPEG_A.to_vec());
    }
}
