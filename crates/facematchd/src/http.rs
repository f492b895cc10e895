//! HTTP surface: `GET /`, `POST /train`, `POST /predict`.
//!
//! Bodies are JSON carrying base64 photos; responses are plain text
//! (the template name, or the distance as a decimal number).

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use facematch_core::{Embedder, ErrorKind, ImageSource, Pipeline, PipelineError};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const HEALTH_RESPONSE: &str = "facematchd is running";

#[derive(Debug, Deserialize)]
pub struct TrainRequest {
    pub images: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    pub model: String,
    pub image: String,
}

/// Request failure rendered as `{"error": {"code", "message"}}`.
pub enum ApiError {
    Pipeline(PipelineError),
    /// Body was not the expected JSON (malformed, missing fields, too large).
    Request(JsonRejection),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Pipeline(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Request(rejection)
    }
}

const INVALID_REQUEST: &str = "INVALID_REQUEST";

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::EmptyInput
        | ErrorKind::ImageDecodeError
        | ErrorKind::InvalidTemplateName
        | ErrorKind::DimensionMismatch => StatusCode::BAD_REQUEST,
        ErrorKind::NoFaceDetected | ErrorKind::MultipleFaces => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::TemplateNotFound => StatusCode::NOT_FOUND,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::CorruptTemplate | ErrorKind::NameCollision | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Pipeline(err) => {
                let kind = err.kind();
                (status_for(kind), kind.as_str(), err.to_string())
            }
            ApiError::Request(rejection) => (rejection.status(), INVALID_REQUEST, rejection.body_text()),
        };
        if status.is_server_error() {
            tracing::error!(error = %message, code, "request failed");
        } else {
            tracing::info!(error = %message, code, "request rejected");
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));
        (status, body).into_response()
    }
}

pub fn router<E: Embedder>(pipeline: Arc<Pipeline<E>>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/train", post(train::<E>))
        .route("/predict", post(predict::<E>))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

async fn health() -> &'static str {
    HEALTH_RESPONSE
}

async fn train<E: Embedder>(
    State(pipeline): State<Arc<Pipeline<E>>>,
    payload: Result<Json<TrainRequest>, JsonRejection>,
) -> Result<String, ApiError> {
    let Json(req) = payload?;
    let images = req.images.into_iter().map(ImageSource::Base64).collect();
    Ok(pipeline.train(images).await?)
}

async fn predict<E: Embedder>(
    State(pipeline): State<Arc<Pipeline<E>>>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<String, ApiError> {
    let Json(req) = payload?;
    let distance = pipeline.predict(&req.model, ImageSource::Base64(req.image)).await?;
    Ok(distance.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use base64::Engine;
    use facematch_core::{EmbedError, Embedding, Template, TemplateStore, Timeouts};
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use tower::ServiceExt;

    /// Red/green of the top-left pixel; black means no face.
    struct PixelEmbedder;

    impl Embedder for PixelEmbedder {
        async fn embed(&self, image: RgbImage) -> Result<Embedding, EmbedError> {
            let Rgb([r, g, b]) = *image.get_pixel(0, 0);
            if r == 0 && g == 0 && b == 0 {
                return Err(EmbedError::NoFaceDetected);
            }
            Ok(Embedding::new(vec![r as f64, g as f64]))
        }
    }

    fn photo_b64(r: u8, g: u8, b: u8) -> String {
        let img = RgbImage::from_pixel(2, 2, Rgb([r, g, b]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        base64::engine::general_purpose::STANDARD.encode(out.into_inner())
    }

    fn app(dir: &std::path::Path) -> (Router, TemplateStore) {
        let store = TemplateStore::open(dir).unwrap();
        let pipeline = Pipeline::new(PixelEmbedder, store.clone(), 2, Timeouts::default());
        (router(Arc::new(pipeline), 1024 * 1024), store)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let resp = app
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, HEALTH_RESPONSE);
    }

    #[tokio::test]
    async fn test_train_returns_template_name() {
        let dir = tempfile::tempdir().unwrap();
        let (app, store) = app(dir.path());
        let body = json!({ "images": [photo_b64(1, 1, 1), photo_b64(3, 3, 1)] });

        let resp = app.oneshot(post_json("/train", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let name = body_text(resp).await;

        assert_eq!(name.len(), "abcdefghij.json".len());
        assert_eq!(store.load(&name).unwrap().vector, vec![2.0, 2.0]);
    }

    #[tokio::test]
    async fn test_train_without_images() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let resp = app
            .oneshot(post_json("/train", json!({ "images": [] })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(body["error"]["code"], "EMPTY_INPUT");
    }

    #[tokio::test]
    async fn test_train_no_face() {
        let dir = tempfile::tempdir().unwrap();
        let (app, store) = app(dir.path());
        let resp = app
            .oneshot(post_json("/train", json!({ "images": [photo_b64(0, 0, 0)] })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(store.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_predict_returns_distance() {
        let dir = tempfile::tempdir().unwrap();
        let (app, store) = app(dir.path());
        let name = store
            .create(&Template {
                vector: vec![0.0, 0.0],
                sample_count: 1,
                model_version: None,
                created_at: None,
            })
            .unwrap();

        let body = json!({ "model": name, "image": photo_b64(3, 4, 1) });
        let resp = app.oneshot(post_json("/predict", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await.parse::<f64>().unwrap(), 5.0);
    }

    #[tokio::test]
    async fn test_predict_unknown_template() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let body = json!({ "model": "zzzzzzzzzz.json", "image": photo_b64(3, 4, 1) });
        let resp = app.oneshot(post_json("/predict", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_predict_bad_base64() {
        let dir = tempfile::tempdir().unwrap();
        let (app, store) = app(dir.path());
        let name = store
            .create(&Template {
                vector: vec![0.0, 0.0],
                sample_count: 1,
                model_version: None,
                created_at: None,
            })
            .unwrap();
        let body = json!({ "model": name, "image": "@@not base64@@" });
        let resp = app.oneshot(post_json("/predict", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_body_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(dir.path()).unwrap();
        let pipeline = Pipeline::new(PixelEmbedder, store, 2, Timeouts::default());
        let app = router(Arc::new(pipeline), 64);

        let body = json!({ "images": [photo_b64(1, 1, 1)] });
        let resp = app.oneshot(post_json("/train", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(error_code(resp).await, INVALID_REQUEST);
    }

    async fn error_code(resp: Response) -> String {
        let body: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        body["error"]["code"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_malformed_json_uses_error_body() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let req = Request::post("/train")
            .header("content-type", "application/json")
            .body(Body::from("{\"images\": ["))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_code(resp).await, INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_field_uses_error_body() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app(dir.path());
        let body = json!({ "image": photo_b64(3, 4, 1) });
        let resp = app.oneshot(post_json("/predict", body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error_code(resp).await, INVALID_REQUEST);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::CorruptTemplate), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(ErrorKind::NameCollision), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(ErrorKind::InvalidTemplateName), StatusCode::BAD_REQUEST);
    }
}
