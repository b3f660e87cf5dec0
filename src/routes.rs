use std::{path::Path, sync::Arc};

use axum::{
    Form, Json, Router,
    body::Body,
    extract::{State, rejection::FormRejection},
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use futures_util::StreamExt;
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{
    config::AppConfig,
    download::Downloader,
    engine::MediaEngine,
    error::ApiError,
    formats::{FormatLister, FormatListing},
};

const INDEX_HTML: &str = include_str!("../templates/index.html");

#[derive(Clone)]
pub struct AppState {
    pub formats: FormatLister,
    pub downloader: Downloader,
}

impl AppState {
    pub fn new(engine: Arc<dyn MediaEngine>, config: &AppConfig) -> Self {
        Self {
            formats: FormatLister::new(Arc::clone(&engine), config),
            downloader: Downloader::new(engine, config),
        }
    }
}

/// Raw `application/x-www-form-urlencoded` pairs in request order.
///
/// Repeated keys are allowed; lookups read the first occurrence.
pub type FormPairs = Vec<(String, String)>;

pub fn first_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.as_str())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/formats", post(list_formats))
        .route("/download", post(download))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// An unreadable form body is treated the same as a form without fields.
pub async fn list_formats(
    State(state): State<AppState>,
    form: Result<Form<FormPairs>, FormRejection>,
) -> Result<Json<FormatListing>, ApiError> {
    let pairs = form.map(|Form(pairs)| pairs).unwrap_or_default();
    let listing = state.formats.list(first_value(&pairs, "url")).await?;
    Ok(Json(listing))
}

pub async fn download(
    State(state): State<AppState>,
    form: Result<Form<FormPairs>, FormRejection>,
) -> Result<Response, ApiError> {
    let pairs = form.map(|Form(pairs)| pairs).unwrap_or_default();
    let audio_only = first_value(&pairs, "audio") == Some("1");

    let fetched = state
        .downloader
        .fetch(
            first_value(&pairs, "url"),
            first_value(&pairs, "format_id"),
            audio_only,
        )
        .await
        .map_err(|error| ApiError::from(error).as_text())?;

    let filename = fetched.file_name();
    let file = tokio::fs::File::open(fetched.path()).await.map_err(|error| {
        warn!("could not open produced file {:?}: {error}", fetched.path());
        ApiError::internal("No file produced").as_text()
    })?;
    let content_length = file.metadata().await.ok().map(|metadata| metadata.len());

    // The job rides along with the stream so its files go away once the
    // body is finished or dropped.
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _job = &fetched;
        chunk
    });

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&filename)),
    );
    if let Some(length) = content_length {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }
    let disposition = HeaderValue::from_str(&build_content_disposition(&filename))
        .map_err(|_| ApiError::internal("could not build download headers").as_text())?;
    headers.insert(CONTENT_DISPOSITION, disposition);

    Ok((headers, Body::from_stream(stream)).into_response())
}

/// Extension to media type for the files yt-dlp and ffmpeg commonly emit.
const MEDIA_TYPES: &[(&str, &str)] = &[
    ("mp4", "video/mp4"),
    ("m4v", "video/mp4"),
    ("webm", "video/webm"),
    ("mkv", "video/x-matroska"),
    ("mov", "video/quicktime"),
    ("flv", "video/x-flv"),
    ("3gp", "video/3gpp"),
    ("mp3", "audio/mpeg"),
    ("m4a", "audio/mp4"),
    ("aac", "audio/aac"),
    ("wav", "audio/wav"),
    ("ogg", "audio/ogg"),
    ("opus", "audio/ogg"),
    ("flac", "audio/flac"),
];

pub fn content_type_for_filename(filename: &str) -> &'static str {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| {
            MEDIA_TYPES
                .iter()
                .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        })
        .map_or("application/octet-stream", |(_, media_type)| *media_type)
}

pub fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

fn sanitize_ascii_filename(value: &str) -> String {
    let sanitized: String = value
        .chars()
        .map(|character| {
            if character.is_ascii_alphanumeric() || matches!(character, '.' | '-' | '_' | ' ') {
                character
            } else {
                '_'
            }
        })
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        "download.bin".to_string()
    } else {
        compact.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_follows_extension() {
        assert_eq!(content_type_for_filename("a.MP4"), "video/mp4");
        assert_eq!(content_type_for_filename("a.mp3"), "audio/mpeg");
        assert_eq!(content_type_for_filename("a.opus"), "audio/ogg");
        assert_eq!(content_type_for_filename("a.M4V"), "video/mp4");
        assert_eq!(content_type_for_filename("noext"), "application/octet-stream");
        assert_eq!(content_type_for_filename("a.vtt"), "application/octet-stream");
    }

    #[test]
    fn first_value_wins_for_repeated_keys() {
        let pairs: FormPairs = vec![
            ("url".to_string(), "https://a.example/v".to_string()),
            ("audio".to_string(), "1".to_string()),
            ("url".to_string(), "https://b.example/v".to_string()),
        ];
        assert_eq!(first_value(&pairs, "url"), Some("https://a.example/v"));
        assert_eq!(first_value(&pairs, "audio"), Some("1"));
        assert_eq!(first_value(&pairs, "format_id"), None);
    }

    #[test]
    fn disposition_has_ascii_fallback_and_utf8_name() {
        let header = build_content_disposition("clip \"ñ\".mp4");
        assert_eq!(
            header,
            "attachment; filename=\"clip ___.mp4\"; filename*=UTF-8''clip%20%22%C3%B1%22.mp4"
        );
        assert!(HeaderValue::from_str(&header).is_ok());
    }

    #[test]
    fn empty_names_get_placeholder() {
        assert_eq!(sanitize_ascii_filename("   "), "download.bin");
    }
}
