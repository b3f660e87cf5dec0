use std::{collections::HashSet, path::PathBuf, sync::Arc};

use serde::Serialize;
use tracing::debug;

use crate::{
    config::{AppConfig, non_empty},
    engine::{ExtractRequest, MediaEngine, RawFormat, RawMediaInfo},
    error::FetchError,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormatDescriptor {
    pub format_id: String,
    pub ext: Option<String>,
    #[serde(rename = "acodec")]
    pub audio_codec: Option<String>,
    #[serde(rename = "vcodec")]
    pub video_codec: Option<String>,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub filesize: Option<u64>,
    #[serde(rename = "format_note")]
    pub note: Option<String>,
}

impl FormatDescriptor {
    fn from_raw(raw: RawFormat) -> Option<Self> {
        Some(Self {
            format_id: raw.format_id?,
            ext: raw.ext,
            audio_codec: raw.acodec,
            video_codec: raw.vcodec,
            height: raw.height,
            width: raw.width,
            filesize: raw
                .filesize
                .filter(|bytes| bytes.is_finite() && *bytes >= 0.0)
                .map(|bytes| bytes as u64),
            note: raw.format_note,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FormatListing {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    pub formats: Vec<FormatDescriptor>,
}

/// Metadata-only lookups against the engine.
#[derive(Clone)]
pub struct FormatLister {
    engine: Arc<dyn MediaEngine>,
    cookie_file: Option<PathBuf>,
}

impl FormatLister {
    pub fn new(engine: Arc<dyn MediaEngine>, config: &AppConfig) -> Self {
        Self {
            engine,
            cookie_file: config.cookie_file.clone(),
        }
    }

    pub async fn list(&self, source_url: Option<&str>) -> Result<FormatListing, FetchError> {
        let url = source_url
            .and_then(non_empty)
            .ok_or(FetchError::InvalidInput("No URL provided"))?;

        let request = ExtractRequest {
            url: url.to_string(),
            cookie_file: self.cookie_file.clone(),
        };
        let info = self
            .engine
            .extract_info(&request)
            .await
            .map_err(FetchError::Extraction)?;

        let listing = normalize_listing(info);
        debug!(
            "{} reported {} distinct formats for {url}",
            self.engine.name(),
            listing.formats.len()
        );
        Ok(listing)
    }
}

pub fn normalize_listing(info: RawMediaInfo) -> FormatListing {
    FormatListing {
        title: info.title,
        thumbnail: info.thumbnail,
        formats: normalize_formats(info.formats),
    }
}

/// First occurrence of each `format_id` survives; result runs tallest first
/// with unknown heights at the end. Equal heights keep engine order.
pub fn normalize_formats(raw: Vec<RawFormat>) -> Vec<FormatDescriptor> {
    let mut seen_ids = HashSet::new();
    let mut formats: Vec<FormatDescriptor> = raw
        .into_iter()
        .filter_map(FormatDescriptor::from_raw)
        .filter(|format| seen_ids.insert(format.format_id.clone()))
        .collect();

    formats.sort_by(|a, b| b.height.cmp(&a.height));
    formats
}
