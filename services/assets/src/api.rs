use crate::asset_store::{Asset, AssetStatus};
use crate::config::ApiConfig;
use crate::error::{ApiError, ApiResult, REQUEST_ID};
use crate::lifecycle::{AssetService, UploadRequest};
use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderName, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AssetService>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequestBody {
    pub file_name: String,
    pub content_type: String,
    pub file_size: i64,
}

#[derive(Debug, Serialize)]
pub struct UploadRequestResponse {
    pub image: ImageResponse,
    pub upload: UploadResponse,
}

/// Asset as returned right after an upload request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResponse {
    pub id: Uuid,
    pub object_key: String,
    pub original_name: String,
    pub mime_type: String,
    pub byte_size: i64,
    pub status: AssetStatus,
}

impl From<Asset> for ImageResponse {
    fn from(a: Asset) -> Self {
        Self {
            id: a.id,
            object_key: a.storage_key,
            original_name: a.original_name,
            mime_type: a.mime_type,
            byte_size: a.byte_size,
            status: a.status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub method: &'static str,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub expires_in_sec: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCompleteBody {
    pub id: Uuid,
    pub object_key: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

/// Visible asset metadata
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMeta {
    pub id: Uuid,
    pub object_key: String,
    pub original_name: String,
    pub mime_type: String,
    pub byte_size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl From<Asset> for ImageMeta {
    fn from(a: Asset) -> Self {
        Self {
            id: a.id,
            object_key: a.storage_key,
            original_name: a.original_name,
            mime_type: a.mime_type,
            byte_size: a.byte_size,
            uploaded_at: a.uploaded_at,
        }
    }
}

/// Raw query parameters; `limit` is parsed leniently
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<String>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageListResponse {
    pub items: Vec<ImageMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewUrlsBody {
    pub requests: Vec<ViewUrlRequest>,
    pub ttl_sec: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ViewUrlRequest {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ViewUrlsResponse {
    pub results: Vec<ViewUrlResult>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewUrlResult {
    pub id: Uuid,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// CORS for the single configured origin
pub fn cors_layer(allowed_origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
        .expose_headers([REQUEST_ID_HEADER]);

    match allowed_origin.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            warn!(origin = %allowed_origin, "Invalid allowed origin, cross-origin requests disabled");
            layer
        }
    }
}

/// Tag each request with an id (client-supplied or generated), make it
/// available to error responses and echo it back.
async fn request_id(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!("request", request_id = %request_id);
    let mut response = REQUEST_ID
        .scope(request_id.clone(), next.run(request))
        .instrument(span)
        .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    response
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/readyz", get(readiness_check))
        .route("/images", get(list_images))
        .route("/images/:id", get(get_image))
        .route("/images/upload-request", post(upload_request))
        .route("/images/upload-complete", post(upload_complete))
        .route("/images/view-urls", post(view_urls))
        .fallback(route_not_found)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.allowed_origin))
        .with_state(state)
}

async fn route_not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

/// Panics surface as the regular internal-error envelope
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = %detail, "Handler panicked");

    ApiError::internal("Internal server error").into_response()
}

/// Liveness
async fn health_check() -> impl IntoResponse {
    Json(StatusResponse { status: "ok" })
}

/// Readiness: the database must answer
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.store().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "database": "disconnected"
                })),
            )
        }
    }
}

#[instrument(skip_all)]
async fn upload_request(
    State(state): State<AppState>,
    body: Result<Json<UploadRequestBody>, JsonRejection>,
) -> ApiResult<Json<UploadRequestResponse>> {
    let Json(body) = body?;

    let ticket = state
        .service
        .request_upload(UploadRequest {
            file_name: body.file_name,
            content_type: body.content_type,
            file_size: body.file_size,
        })
        .await?;

    Ok(Json(UploadRequestResponse {
        image: ticket.asset.into(),
        upload: UploadResponse {
            method: ticket.upload.method,
            url: ticket.upload.url,
            headers: ticket.upload.headers,
            expires_in_sec: ticket.upload.expires_in_secs,
        },
    }))
}

#[instrument(skip_all)]
async fn upload_complete(
    State(state): State<AppState>,
    body: Result<Json<UploadCompleteBody>, JsonRejection>,
) -> ApiResult<Json<StatusResponse>> {
    let Json(body) = body?;

    state
        .service
        .confirm_upload(body.id, &body.object_key)
        .await?;

    Ok(Json(StatusResponse { status: "ok" }))
}

#[instrument(skip_all)]
async fn list_images(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<ImageListResponse>> {
    let Query(query) = query?;
    let limit = query.limit.as_deref().and_then(|l| l.parse().ok());
    let cursor = query.cursor.as_deref().filter(|c| !c.is_empty());

    let page = state.service.list_images(limit, cursor).await?;

    Ok(Json(ImageListResponse {
        items: page.items.into_iter().map(ImageMeta::from).collect(),
        next_cursor: page.next_cursor,
    }))
}

#[instrument(skip_all)]
async fn get_image(
    State(state): State<AppState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<Json<ImageMeta>> {
    let Path(id) = id?;
    let asset = state.service.get_image(id).await?;
    Ok(Json(asset.into()))
}

#[instrument(skip_all)]
async fn view_urls(
    State(state): State<AppState>,
    body: Result<Json<ViewUrlsBody>, JsonRejection>,
) -> ApiResult<Json<ViewUrlsResponse>> {
    let Json(body) = body?;
    let ids: Vec<Uuid> = body.requests.iter().map(|r| r.id).collect();

    let urls = state.service.issue_view_urls(&ids, body.ttl_sec).await?;

    Ok(Json(ViewUrlsResponse {
        results: urls
            .into_iter()
            .map(|u| ViewUrlResult {
                id: u.id,
                url: u.url,
                expires_at: u.expires_at,
            })
            .collect(),
    }))
}

/// Serve the API until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting asset API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_store::memory::MemoryAssetStore;
    use crate::config::UploadConfig;
    use crate::credentials::{CredentialIssuer, MockCredentialIssuer, ObjectHead};
    use crate::lifecycle::ServiceSettings;
    use crate::validation::UploadPolicy;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn router(store: &Arc<MemoryAssetStore>, issuer: Option<MockCredentialIssuer>) -> Router {
        let service = AssetService::new(
            store.clone(),
            issuer.map(|i| Arc::new(i) as Arc<dyn CredentialIssuer>),
            ServiceSettings {
                policy: UploadPolicy::from_config(&UploadConfig::default()),
                put_ttl: Duration::from_secs(300),
                get_ttl: Duration::from_secs(300),
                max_view_batch: 100,
            },
        );
        create_router(
            AppState {
                service: Arc::new(service),
            },
            &ApiConfig::default(),
        )
    }

    fn full_issuer() -> MockCredentialIssuer {
        let mut issuer = MockCredentialIssuer::new();
        issuer
            .expect_issue_put()
            .returning(|key, _, _| Ok(format!("https://bucket.example/{key}?sig=put")));
        issuer
            .expect_issue_get()
            .returning(|key, _| Ok(format!("https://bucket.example/{key}?sig=get")));
        issuer.expect_head_object().returning(|_| {
            Ok(Some(ObjectHead {
                integrity_tag: Some("\"etag\"".to_string()),
                content_length: Some(10),
            }))
        });
        issuer
    }

    fn post_json(uri: &str, body: Value) -> HttpRequest<Body> {
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn read_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let store = Arc::new(MemoryAssetStore::default());
        let response = router(&store, None).oneshot(get("/healthz")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_full_upload_flow() {
        let store = Arc::new(MemoryAssetStore::default());
        let app = router(&store, Some(full_issuer()));

        let response = app
            .clone()
            .oneshot(post_json(
                "/images/upload-request",
                json!({"fileName": "cat photo.png", "contentType": "image/png", "fileSize": 2048}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = read_json(response).await;
        assert_eq!(body["image"]["status"], "requested");
        assert_eq!(body["image"]["originalName"], "cat photo.png");
        assert_eq!(body["image"]["byteSize"], 2048);
        assert_eq!(body["upload"]["method"], "PUT");
        assert_eq!(body["upload"]["expiresInSec"], 300);
        assert_eq!(body["upload"]["headers"]["Content-Type"], "image/png");
        let id = body["image"]["id"].as_str().unwrap().to_string();
        let object_key = body["image"]["objectKey"].as_str().unwrap().to_string();
        assert!(object_key.ends_with("_cat_photo.png"));

        // Not visible until confirmed
        let response = app.clone().oneshot(get(&format!("/images/{id}"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(post_json(
                "/images/upload-complete",
                json!({"id": id, "objectKey": object_key}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await, json!({"status": "ok"}));

        let response = app
            .clone()
            .oneshot(post_json(
                "/images/upload-complete",
                json!({"id": id, "objectKey": object_key}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(read_json(response).await["error"]["code"], "Conflict");

        let response = app.clone().oneshot(get(&format!("/images/{id}"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let meta = read_json(response).await;
        assert_eq!(meta["objectKey"], object_key.as_str());
        assert!(meta["uploadedAt"].is_string());

        let response = app.clone().oneshot(get("/images?limit=abc")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let list = read_json(response).await;
        assert_eq!(list["items"].as_array().unwrap().len(), 1);
        assert!(list.get("nextCursor").is_none());

        let response = app
            .oneshot(post_json(
                "/images/view-urls",
                json!({"requests": [{"id": id}, {"id": Uuid::new_v4()}], "ttlSec": 99999}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let results = read_json(response).await["results"].clone();
        assert_eq!(results.as_array().unwrap().len(), 1);
        assert_eq!(results[0]["id"], id.as_str());
        assert!(results[0]["expiresAt"].is_string());
    }

    #[tokio::test]
    async fn test_error_envelope_carries_request_id() {
        let store = Arc::new(MemoryAssetStore::default());
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/images/upload-request")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-request-id", "req-123")
            .body(Body::from(
                json!({"fileName": "x.png", "contentType": "application/pdf", "fileSize": 10})
                    .to_string(),
            ))
            .unwrap();

        let response = router(&store, Some(full_issuer()))
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["x-request-id"], "req-123");
        assert_eq!(
            read_json(response).await,
            json!({"error": {
                "code": "BadRequest",
                "message": "Content type not allowed",
                "requestId": "req-123"
            }})
        );
    }

    #[tokio::test]
    async fn test_generated_request_id() {
        let store = Arc::new(MemoryAssetStore::default());
        let response = router(&store, None)
            .oneshot(get(&format!("/images/{}", Uuid::new_v4())))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let header_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
        assert!(Uuid::parse_str(&header_id).is_ok());
        let body = read_json(response).await;
        assert_eq!(body["error"]["code"], "NotFound");
        assert_eq!(body["error"]["requestId"], header_id.as_str());
    }

    #[tokio::test]
    async fn test_malformed_input_is_bad_request() {
        let store = Arc::new(MemoryAssetStore::default());
        let app = router(&store, Some(full_issuer()));

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/images/upload-request")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["error"]["message"], "Invalid request body");

        let response = app.clone().oneshot(get("/images/not-a-uuid")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["error"]["code"], "BadRequest");

        let response = app
            .clone()
            .oneshot(post_json("/images/view-urls", json!({"ttlSec": 60})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(post_json("/images/view-urls", json!({"requests": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(get("/images?cursor=%21%21")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(read_json(response).await["error"]["message"], "Invalid cursor");
    }

    #[tokio::test]
    async fn test_metadata_only_mode_is_internal_error() {
        let store = Arc::new(MemoryAssetStore::default());
        let response = router(&store, None)
            .oneshot(post_json(
                "/images/upload-request",
                json!({"fileName": "a.png", "contentType": "image/png", "fileSize": 10}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = read_json(response).await;
        assert_eq!(body["error"]["code"], "InternalError");
        assert_eq!(body["error"]["message"], "object-store client not available");
    }

    #[tokio::test]
    async fn test_unknown_route_uses_error_envelope() {
        let store = Arc::new(MemoryAssetStore::default());
        let request = HttpRequest::builder()
            .uri("/nope")
            .header("x-request-id", "req-404")
            .body(Body::empty())
            .unwrap();

        let response = router(&store, None).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-request-id"], "req-404");
        let body = read_json(response).await;
        assert_eq!(body["error"]["code"], "NotFound");
        assert_eq!(body["error"]["requestId"], "req-404");
    }

    #[tokio::test]
    async fn test_handler_panic_uses_error_envelope() {
        let store = Arc::new(MemoryAssetStore::default());
        // No expectations: signing the upload URL panics inside the handler
        let issuer = MockCredentialIssuer::new();
        let mut request = post_json(
            "/images/upload-request",
            json!({"fileName": "a.png", "contentType": "image/png", "fileSize": 10}),
        );
        request
            .headers_mut()
            .insert("x-request-id", HeaderValue::from_static("req-panic"));

        let response = router(&store, Some(issuer)).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = read_json(response).await;
        assert_eq!(body["error"]["code"], "InternalError");
        assert_eq!(body["error"]["message"], "Internal server error");
        assert_eq!(body["error"]["requestId"], "req-panic");
    }

    #[tokio::test]
    async fn test_cors_preflight_for_allowed_origin() {
        let store = Arc::new(MemoryAssetStore::default());
        let request = HttpRequest::builder()
            .method("OPTIONS")
            .uri("/images/upload-request")
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = router(&store, None).oneshot(request).await.unwrap();

        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:5173"
        );
    }
}
