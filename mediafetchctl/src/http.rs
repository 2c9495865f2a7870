use std::path::Path;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use mediafetch_core::{
    FetchService, MediaRequest, PoolOccupancy, ProgressSink, ServiceError, StoreSummary,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct HttpState {
    service: FetchService,
    default_quality: String,
}

impl HttpState {
    pub fn new(service: FetchService, default_quality: impl Into<String>) -> Self {
        Self {
            service,
            default_quality: default_quality.into(),
        }
    }
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/download", get(download))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadParams {
    pub url: Option<String>,
    pub quality: Option<String>,
}

#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    Internal(String),
}

impl From<ServiceError> for HttpError {
    fn from(err: ServiceError) -> Self {
        HttpError::Internal(err.to_string())
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        match self {
            HttpError::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            HttpError::Internal(message) => {
                (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
            }
        }
    }
}

async fn download(
    State(state): State<HttpState>,
    Query(params): Query<DownloadParams>,
) -> Result<Response, HttpError> {
    let source = params
        .url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| HttpError::BadRequest("missing url parameter".to_string()))?;
    let quality = params
        .quality
        .map(|quality| quality.trim().to_string())
        .filter(|quality| !quality.is_empty())
        .unwrap_or_else(|| state.default_quality.clone());

    let request = MediaRequest::new(source, quality);
    info!(source = %request.source, quality = %request.quality, "http download requested");
    let outcome = state
        .service
        .fetch(request, ProgressSink::none())
        .await
        .map_err(|err| {
            warn!(error = %err, "http download failed");
            HttpError::from(err)
        })?;

    stream_file(&outcome.path).await
}

async fn stream_file(path: &Path) -> Result<Response, HttpError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|err| HttpError::Internal(format!("failed to open {}: {err}", path.display())))?;
    let size = file
        .metadata()
        .await
        .map_err(|err| HttpError::Internal(err.to_string()))?
        .len();
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().replace('"', ""))
        .unwrap_or_else(|| "download".to_string());
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .map_err(|err| HttpError::Internal(err.to_string()))?;

    let body = Body::from_stream(ReaderStream::new(file));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(path))
        .header(header::CONTENT_LENGTH, size.to_string())
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(body)
        .map_err(|err| HttpError::Internal(err.to_string()))
}

pub fn content_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub pool: PoolOccupancy,
    pub tasks: StoreSummary,
}

async fn health(State(state): State<HttpState>) -> Result<Json<HealthResponse>, HttpError> {
    let tasks = state
        .service
        .store()
        .summary()
        .map_err(|err| HttpError::Internal(err.to_string()))?;
    Ok(Json(HealthResponse {
        status: "ok",
        pool: state.service.occupancy(),
        tasks,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for(Path::new("/d/a_merged.mp4")), "video/mp4");
        assert_eq!(content_type_for(Path::new("/d/a.MP3")), "audio/mpeg");
        assert_eq!(content_type_for(Path::new("/d/a")), "application/octet-stream");
    }
}
