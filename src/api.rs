//! HTTP surface: upload page, transcription endpoint, subtitle download.
//!
//! This module owns request parsing, input validation, scratch-file staging,
//! and response formatting while delegating inference to a backend
//! implementation.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::warn;

use crate::backend::{
    resolve_device, Device, DeviceRequest, ModelSize, TranscribeRequest, Transcriber,
};
use crate::error::AppError;
use crate::formats::build_subtitle_document;
use crate::session::{srt_filename, SessionStore};

/// Upper bound on upload request bodies. Media files run large; axum's
/// default 2 MB limit would reject nearly everything this tool is for.
pub const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// Shared state injected into all route handlers.
pub struct AppState {
    /// Active inference backend implementation.
    pub backend: Arc<dyn Transcriber>,
    /// Session store for finished subtitle documents.
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    /// Constructs shared handler state.
    pub fn new(backend: Arc<dyn Transcriber>, sessions: Arc<SessionStore>) -> Self {
        Self { backend, sessions }
    }
}

/// Builds the Axum router for all public endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/upload", post(upload))
        .route("/download/:session_id", get(download))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Serves the static upload page (`GET /`).
pub async fn index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

struct UploadForm {
    filename: String,
    bytes: Vec<u8>,
    model: String,
    device: String,
}

/// Handles one transcription request (`POST /upload`).
///
/// Validates the upload, stages it in a fresh scratch directory, runs
/// inference, formats segments, and registers the subtitle document for
/// download. The scratch directory is removed on every exit path; removal
/// errors are swallowed.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, AppError> {
    let form = parse_upload_form(&mut multipart).await?;

    let model = ModelSize::parse(&form.model)?;
    let requested = DeviceRequest::parse(&form.device);
    let (device, compute) = resolve_device(requested, state.backend.gpu_available());
    if requested == DeviceRequest::Gpu && device == Device::Cpu {
        warn!("gpu requested but no gpu runtime available; falling back to cpu");
    }

    let scratch = tempfile::Builder::new()
        .prefix("whisper-upload-")
        .tempdir()
        .map_err(|err| AppError::internal(format!("failed to create scratch directory: {err}")))?;
    let staged_path = scratch.path().join(staged_file_name(&form.filename));
    std::fs::write(&staged_path, &form.bytes)
        .map_err(|err| AppError::internal(format!("failed to stage uploaded file: {err}")))?;

    let result = state
        .backend
        .transcribe(TranscribeRequest {
            audio_path: staged_path,
            model,
            device,
            compute,
        })
        .await?;

    // Scratch dir is only needed for inference; drop removes it best-effort.
    drop(scratch);

    let (segments, document) = build_subtitle_document(&result.segments);
    let filename = srt_filename(&form.filename);
    let session_id = state.sessions.put(document, filename.clone());

    Ok(Json(json!({
        "success": true,
        "language": result.language,
        "language_probability": round2(result.language_probability),
        "segments": segments,
        "session_id": session_id,
        "srt_filename": filename,
    })))
}

/// Streams a stored subtitle document as an attachment (`GET /download/{id}`).
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Response, AppError> {
    let entry = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| AppError::not_found("Session expired or invalid"))?;

    let disposition = format!("attachment; filename=\"{}\"", entry.filename);
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        entry.document,
    )
        .into_response())
}

/// Parses the multipart form: `file` (required), `model`, `device`.
async fn parse_upload_form(multipart: &mut Multipart) -> Result<UploadForm, AppError> {
    let mut file_name: Option<String> = None;
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut model = String::new();
    let mut device = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_multipart(format!("invalid multipart body: {err}")))?
    {
        let Some(name) = field.name().map(ToOwned::to_owned) else {
            continue;
        };

        match name.as_str() {
            "file" => {
                file_name = field.file_name().map(ToOwned::to_owned);
                let bytes = field.bytes().await.map_err(|err| {
                    AppError::bad_multipart(format!("failed to read file bytes: {err}"))
                })?;
                file_bytes = Some(bytes.to_vec());
            }
            "model" => {
                model = field
                    .text()
                    .await
                    .map_err(|err| AppError::bad_multipart(format!("invalid model field: {err}")))?
                    .trim()
                    .to_string();
            }
            "device" => {
                device = field
                    .text()
                    .await
                    .map_err(|err| {
                        AppError::bad_multipart(format!("invalid device field: {err}"))
                    })?
                    .trim()
                    .to_string();
            }
            _ => {}
        }
    }

    let Some(bytes) = file_bytes else {
        return Err(AppError::invalid_request("No file part"));
    };
    let filename = file_name.unwrap_or_default();
    if filename.trim().is_empty() {
        return Err(AppError::invalid_request("No selected file"));
    }

    Ok(UploadForm {
        filename,
        bytes,
        model,
        device,
    })
}

/// Strips any path components from the client-provided filename before it is
/// used inside the scratch directory.
fn staged_file_name(filename: &str) -> String {
    std::path::Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| "upload".to_string())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::backend::{TranscribeRequest, Transcriber, TranscriptResult, TranscriptSegment};
    use crate::error::AppError;
    use crate::session::SessionStore;

    use super::{build_router, round2, staged_file_name, AppState};

    #[derive(Clone)]
    struct MockBackend {
        gpu: bool,
        fail: Option<&'static str>,
    }

    #[async_trait]
    impl Transcriber for MockBackend {
        fn gpu_available(&self) -> bool {
            self.gpu
        }

        async fn transcribe(&self, req: TranscribeRequest) -> Result<TranscriptResult, AppError> {
            if let Some(message) = self.fail {
                return Err(AppError::transcription(message));
            }
            if !req.audio_path.is_file() {
                return Err(AppError::transcription("staged file missing"));
            }
            Ok(TranscriptResult {
                segments: vec![
                    TranscriptSegment {
                        start_secs: 5.0,
                        end_secs: 67.0,
                        text: " Hello there. ".to_string(),
                    },
                    TranscriptSegment {
                        start_secs: 67.4,
                        end_secs: 72.9,
                        text: "General greetings.".to_string(),
                    },
                ],
                language: "en".to_string(),
                language_probability: 0.98765,
            })
        }
    }

    fn app(backend: MockBackend) -> (axum::Router, Arc<SessionStore>) {
        let sessions = Arc::new(SessionStore::new());
        let state = Arc::new(AppState::new(Arc::new(backend), Arc::clone(&sessions)));
        (build_router(state), sessions)
    }

    fn upload_body(boundary: &str, filename: Option<&str>, model: &str, device: &str) -> String {
        upload_body_with_content(boundary, filename, "RIFF____WAVE", model, device)
    }

    fn upload_body_with_content(
        boundary: &str,
        filename: Option<&str>,
        content: &str,
        model: &str,
        device: &str,
    ) -> String {
        let mut body = String::new();
        if let Some(filename) = filename {
            body.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: audio/wav\r\n\r\n{content}\r\n"
            ));
        }
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"model\"\r\n\r\n{model}\r\n"
        ));
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"device\"\r\n\r\n{device}\r\n"
        ));
        body.push_str(&format!("--{boundary}--\r\n"));
        body
    }

    fn upload_request(boundary: &str, body: String) -> Request<Body> {
        Request::builder()
            .uri("/upload")
            .method("POST")
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    async fn parse_json_response(res: axum::response::Response) -> Value {
        let bytes = to_bytes(res.into_body(), 1024 * 1024)
            .await
            .expect("body bytes");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn upload_returns_segments_session_and_filename() {
        let (app, sessions) = app(MockBackend { gpu: false, fail: None });
        let boundary = "X-BOUNDARY";
        let body = upload_body(boundary, Some("clip.mp4"), "tiny", "cpu");

        let res = app.oneshot(upload_request(boundary, body)).await.expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["success"], true);
        assert_eq!(payload["language"], "en");
        assert_eq!(payload["language_probability"], 0.99);
        assert_eq!(payload["srt_filename"], "clip.srt");
        assert!(payload["session_id"].as_str().is_some_and(|id| !id.is_empty()));

        let segments = payload["segments"].as_array().expect("segments");
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0]["id"], 1);
        assert_eq!(segments[1]["id"], 2);
        assert_eq!(segments[0]["start"], "0:00:05,000");
        assert_eq!(segments[0]["end"], "0:01:07,000");
        assert_eq!(segments[0]["text"], "Hello there.");
        assert_eq!(segments[1]["start"], "0:01:07,000");

        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn upload_accepts_multi_megabyte_files() {
        let (app, sessions) = app(MockBackend { gpu: false, fail: None });
        let boundary = "X-BOUNDARY";
        let content = "a".repeat(3 * 1024 * 1024);
        let body = upload_body_with_content(boundary, Some("long-talk.mp4"), &content, "tiny", "cpu");

        let res = app.oneshot(upload_request(boundary, body)).await.expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["success"], true);
        assert_eq!(payload["srt_filename"], "long-talk.srt");
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn upload_without_file_part_is_rejected() {
        let (app, sessions) = app(MockBackend { gpu: false, fail: None });
        let boundary = "X-BOUNDARY";
        let body = upload_body(boundary, None, "tiny", "cpu");

        let res = app.oneshot(upload_request(boundary, body)).await.expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["error"], "No file part");
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn upload_with_empty_filename_is_rejected() {
        let (app, sessions) = app(MockBackend { gpu: false, fail: None });
        let boundary = "X-BOUNDARY";
        let body = upload_body(boundary, Some(""), "tiny", "cpu");

        let res = app.oneshot(upload_request(boundary, body)).await.expect("response");
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["error"], "No selected file");
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn gpu_request_without_gpu_behaves_like_cpu() {
        let (app, _) = app(MockBackend { gpu: false, fail: None });
        let boundary = "X-BOUNDARY";

        let cpu_res = app
            .clone()
            .oneshot(upload_request(
                boundary,
                upload_body(boundary, Some("clip.wav"), "tiny", "cpu"),
            ))
            .await
            .expect("response");
        let gpu_res = app
            .oneshot(upload_request(
                boundary,
                upload_body(boundary, Some("clip.wav"), "tiny", "gpu"),
            ))
            .await
            .expect("response");

        assert_eq!(cpu_res.status(), StatusCode::OK);
        assert_eq!(gpu_res.status(), StatusCode::OK);

        let cpu_payload = parse_json_response(cpu_res).await;
        let gpu_payload = parse_json_response(gpu_res).await;
        assert_eq!(cpu_payload["segments"], gpu_payload["segments"]);
        assert_eq!(cpu_payload["language"], gpu_payload["language"]);
    }

    #[tokio::test]
    async fn backend_failure_forwards_message() {
        let (app, sessions) = app(MockBackend {
            gpu: false,
            fail: Some("model exploded"),
        });
        let boundary = "X-BOUNDARY";
        let body = upload_body(boundary, Some("clip.wav"), "tiny", "cpu");

        let res = app.oneshot(upload_request(boundary, body)).await.expect("response");
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["error"], "model exploded");
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn download_round_trips_subtitle_document() {
        let (app, _) = app(MockBackend { gpu: false, fail: None });
        let boundary = "X-BOUNDARY";
        let body = upload_body(boundary, Some("talk.mp3"), "tiny", "cpu");

        let res = app
            .clone()
            .oneshot(upload_request(boundary, body))
            .await
            .expect("response");
        let payload = parse_json_response(res).await;
        let session_id = payload["session_id"].as_str().expect("session id");

        let req = Request::builder()
            .uri(format!("/download/{session_id}"))
            .method("GET")
            .body(Body::empty())
            .expect("request");
        let res = app.oneshot(req).await.expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()["content-type"],
            "text/plain; charset=utf-8"
        );
        assert_eq!(
            res.headers()["content-disposition"],
            "attachment; filename=\"talk.srt\""
        );

        let bytes = to_bytes(res.into_body(), 1024 * 1024).await.expect("body");
        let expected = "1\n0:00:05,000 --> 0:01:07,000\nHello there.\n\n\
                        2\n0:01:07,000 --> 0:01:12,000\nGeneral greetings.\n\n";
        assert_eq!(std::str::from_utf8(&bytes).expect("utf-8"), expected);
    }

    #[tokio::test]
    async fn download_unknown_session_is_not_found() {
        let (app, _) = app(MockBackend { gpu: false, fail: None });

        let req = Request::builder()
            .uri("/download/3f1f9c3e-0000-0000-0000-000000000000")
            .method("GET")
            .body(Body::empty())
            .expect("request");
        let res = app.oneshot(req).await.expect("response");
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let payload = parse_json_response(res).await;
        assert_eq!(payload["error"], "Session expired or invalid");
    }

    #[tokio::test]
    async fn index_serves_upload_page() {
        let (app, _) = app(MockBackend { gpu: false, fail: None });

        let req = Request::builder()
            .uri("/")
            .method("GET")
            .body(Body::empty())
            .expect("request");
        let res = app.oneshot(req).await.expect("response");
        assert_eq!(res.status(), StatusCode::OK);

        let bytes = to_bytes(res.into_body(), 1024 * 1024).await.expect("body");
        let page = std::str::from_utf8(&bytes).expect("utf-8");
        assert!(page.contains("file-input"));
        assert!(page.contains("/upload"));
    }

    #[test]
    fn round2_rounds_half_up() {
        assert_eq!(round2(0.98765), 0.99);
        assert_eq!(round2(0.994), 0.99);
        assert_eq!(round2(1.0), 1.0);
    }

    #[test]
    fn staged_file_name_strips_path_components() {
        assert_eq!(staged_file_name("../../etc/passwd"), "passwd");
        assert_eq!(staged_file_name("clip.wav"), "clip.wav");
        assert_eq!(staged_file_name("/"), "upload");
    }
}
