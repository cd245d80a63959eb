//! HTTP surface: register and recognize faces from multipart uploads.

use crate::engine::{EngineHandle, Upload};
use crate::error::{ApiError, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_typed_multipart::{BaseMultipart, FieldData, TryFromMultipart};
use facegrab_store::{FaceRecord, Recognition};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
}

/// Multipart extractor whose rejections render as `{"detail": ...}`.
type Form<T> = BaseMultipart<T, ApiError>;

#[derive(TryFromMultipart)]
pub struct RegisterForm {
    pub name: String,
    pub file: FieldData<Bytes>,
}

#[derive(TryFromMultipart)]
pub struct RecognizeForm {
    pub file: FieldData<Bytes>,
}

#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    #[serde(rename = "match")]
    pub label: String,
    pub distance: Option<f32>,
}

impl From<Recognition> for RecognizeResponse {
    fn from(result: Recognition) -> Self {
        Self {
            label: result.label().to_string(),
            distance: result.distance(),
        }
    }
}

fn into_upload(field: FieldData<Bytes>) -> Upload {
    Upload {
        file_name: field.metadata.file_name,
        bytes: field.contents.to_vec(),
    }
}

/// Build the router. Uploads above `max_upload_bytes` are rejected with 413.
pub fn create_app(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/register", post(register_handler))
        .route("/register/", post(register_handler))
        .route("/recognize", post(recognize_handler))
        .route("/recognize/", post(recognize_handler))
        .route("/faces", get(faces_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn register_handler(
    State(state): State<AppState>,
    form: Form<RegisterForm>,
) -> Result<Json<Value>> {
    let form = form.data;
    let reg = state
        .engine
        .register(form.name, into_upload(form.file))
        .await?;
    Ok(Json(json!({
        "status": "success",
        "name": reg.name,
        "face_id": reg.face_id,
        "slot": reg.slot,
    })))
}

async fn recognize_handler(
    State(state): State<AppState>,
    form: Form<RecognizeForm>,
) -> Result<Json<RecognizeResponse>> {
    let result = state.engine.recognize(into_upload(form.data.file)).await?;
    Ok(Json(result.into()))
}

async fn faces_handler(State(state): State<AppState>) -> Result<Json<Vec<FaceRecord>>> {
    Ok(Json(state.engine.list_faces().await?))
}

async fn health_handler(State(state): State<AppState>) -> Result<Json<Value>> {
    let status = state.engine.status().await?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "faces": status.faces,
        "vectors": status.vectors,
        "dimension": status.dimension,
        "threshold": status.threshold,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::test_engine;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "facegrab-test-boundary";

    fn multipart(name: Option<&str>, file: Option<(&str, &[u8])>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some(name) = name {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\n{name}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some((file_name, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_form(name: Option<&str>, file_name: &str, bytes: &[u8]) -> Vec<u8> {
        multipart(name, Some((file_name, bytes)))
    }

    fn post_form(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn app(dir: &TempDir, threshold: Option<f32>) -> Router {
        let state = AppState {
            engine: test_engine(dir, threshold),
        };
        create_app(state, 1024 * 1024)
    }

    #[tokio::test]
    async fn test_register_then_recognize() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, Some(1.3));

        let (status, body) = send(
            &app,
            post_form("/register/", upload_form(Some("alice"), "a.jpg", b"0.6,0.8")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["name"], "alice");
        assert_eq!(body["slot"], 0);

        let (status, body) = send(
            &app,
            post_form("/recognize/", upload_form(None, "q.jpg", b"0.6,0.8")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["match"], "alice");
        assert_eq!(body["distance"].as_f64(), Some(0.0));
    }

    #[tokio::test]
    async fn test_recognize_empty_index_returns_null_distance() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, Some(1.3));
        let (status, body) = send(
            &app,
            post_form("/recognize/", upload_form(None, "q.png", b"1.0,0.0")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["match"], "No match");
        assert!(body["distance"].is_null());
    }

    #[tokio::test]
    async fn test_unsupported_extension_is_400() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, None);
        let (status, body) = send(
            &app,
            post_form("/register/", upload_form(Some("bob"), "b.gif", b"1.0")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("unsupported file type"));
        assert!(!dir.path().join("images").exists());
    }

    #[tokio::test]
    async fn test_no_face_is_400_for_both_endpoints() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, None);
        let (status, body) = send(
            &app,
            post_form("/register/", upload_form(Some("cy"), "c.jpg", b"noface")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "no face detected in the image");

        let (status, _) = send(
            &app,
            post_form("/recognize/", upload_form(None, "c.jpg", b"noface")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, health) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(health["faces"], 0);
    }

    #[tokio::test]
    async fn test_undecodable_image_is_json_400() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, None);
        let (status, body) = send(
            &app,
            post_form("/register/", upload_form(Some("gus"), "g.jpg", b"\xff\xd8 torn jpeg")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().starts_with("invalid image"));
    }

    #[tokio::test]
    async fn test_incomplete_form_is_json_400() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, None);

        let (status, body) = send(&app, post_form("/register/", multipart(Some("dee"), None))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("file"));

        let (status, body) = send(
            &app,
            post_form("/register/", upload_form(None, "d.jpg", b"1.0,0.0")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("name"));
    }

    #[tokio::test]
    async fn test_oversized_upload_is_413() {
        let dir = TempDir::new().unwrap();
        let state = AppState {
            engine: test_engine(&dir, None),
        };
        let app = create_app(state, 64);
        let big = vec![b'1'; 1024];
        let req = post_form("/recognize/", upload_form(None, "big.jpg", &big));
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_faces_and_health() {
        let dir = TempDir::new().unwrap();
        let app = app(&dir, Some(1.3));
        for (name, vec) in [("eve", b"1.0,0.0"), ("fay", b"0.0,1.0")] {
            let (status, _) = send(
                &app,
                post_form("/register", upload_form(Some(name), "x.webp", vec)),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }

        let (status, faces) = send(&app, Request::get("/faces").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(faces[0]["name"], "eve");
        assert_eq!(faces[1]["slot"], 1);

        let (_, health) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["faces"], 2);
        assert_eq!(health["dimension"], 2);
    }
}
