use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::TrackError;
use crate::service::{DeleteAllOutcome, DeleteOutcome, TrackService, UploadOutcome};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    service: TrackService,
}

#[derive(Deserialize)]
struct SecretQuery {
    pw: Option<String>,
}

/// Builds the HTTP surface over a [`TrackService`].
pub fn router(service: TrackService, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/upload", post(upload_track))
        .route("/tracks/:filename", get(serve_track).delete(delete_track))
        .route("/tracks-all", delete(delete_all_tracks))
        .route("/tracks-list", get(list_tracks))
        .route("/health", get(|| async { "OK" }))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}

// --- Handlers ---

/// Accepts a multipart form and stores its `file` field.
async fn upload_track(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadOutcome>, Response> {
    while let Some(field) = multipart.next_field().await.map_err(IntoResponse::into_response)? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().map(str::to_owned).unwrap_or_default();
        // Body limit violations surface here as 413.
        let data = field.bytes().await.map_err(IntoResponse::into_response)?;
        let outcome = state
            .service
            .upload(&data, &name)
            .await
            .map_err(IntoResponse::into_response)?;
        return Ok(Json(outcome));
    }
    Err(TrackError::BadRequest("No file uploaded".to_string()).into_response())
}

async fn serve_track(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<TrackStreamResponse, TrackError> {
    let (file, len) = state.service.open_track(&filename).await?;
    let content_type = content_type_for(state.service.store().extension());
    Ok(TrackStreamResponse {
        content_type,
        len,
        stream: Box::pin(read_chunks(file)),
    })
}

async fn delete_track(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<SecretQuery>,
) -> Result<Json<DeleteOutcome>, TrackError> {
    let outcome = state.service.delete_one(&filename, query.pw.as_deref()).await?;
    Ok(Json(outcome))
}

async fn delete_all_tracks(
    State(state): State<AppState>,
    Query(query): Query<SecretQuery>,
) -> Result<Json<DeleteAllOutcome>, TrackError> {
    let outcome = state.service.delete_all(query.pw.as_deref()).await?;
    Ok(Json(outcome))
}

async fn list_tracks(State(state): State<AppState>) -> Result<Json<Vec<String>>, TrackError> {
    let names = state.service.list().await?.into_iter().map(|t| t.name).collect();
    Ok(Json(names))
}

// --- Streaming ---

fn read_chunks(mut file: tokio::fs::File) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    async_stream::try_stream! {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    }
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "mp3" => "audio/mpeg",
        "ogg" | "oga" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "m4a" | "aac" => "audio/mp4",
        _ => "application/octet-stream",
    }
}

struct TrackStreamResponse {
    content_type: &'static str,
    len: u64,
    stream: std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>,
}

impl IntoResponse for TrackStreamResponse {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, HeaderValue::from_static(self.content_type)),
                (header::CONTENT_LENGTH, HeaderValue::from(self.len)),
            ],
            Body::from_stream(self.stream),
        )
            .into_response()
    }
}
