use std::{
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MERGE_OUTPUT_FORMAT: &str = "mp4";
pub const DEFAULT_AUDIO_CODEC: &str = "mp3";
pub const DEFAULT_AUDIO_QUALITY: &str = "192K";
pub const DEFAULT_STALE_SCRATCH_SECONDS: u64 = 2 * 60 * 60;

/// Everything the adapters need, resolved once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub scratch_dir: PathBuf,
    pub cookie_file: Option<PathBuf>,
    pub engine_program: String,
    pub merge_output_format: String,
    pub audio_codec: String,
    pub audio_quality: String,
    pub engine_timeout: Option<Duration>,
    pub stale_scratch_after: Option<Duration>,
}

impl AppConfig {
    /// Defaults rooted at `base`: `downloads/` for scratch files and
    /// `cookies.txt` for the credential store.
    pub fn with_base_dir(base: &Path) -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            scratch_dir: base.join("downloads"),
            cookie_file: Some(base.join("cookies.txt")),
            engine_program: "yt-dlp".to_string(),
            merge_output_format: DEFAULT_MERGE_OUTPUT_FORMAT.to_string(),
            audio_codec: DEFAULT_AUDIO_CODEC.to_string(),
            audio_quality: DEFAULT_AUDIO_QUALITY.to_string(),
            engine_timeout: None,
            stale_scratch_after: Some(Duration::from_secs(DEFAULT_STALE_SCRATCH_SECONDS)),
        }
    }

    pub fn from_env() -> Self {
        let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        Self::from_lookup(&base, |name| std::env::var(name).ok())
    }

    fn from_lookup(base: &Path, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string))
        };
        let defaults = Self::with_base_dir(base);

        let bind_addr = read("APP_ADDR")
            .or_else(|| {
                read("PORT")
                    .and_then(|value| value.parse::<u16>().ok())
                    .map(|port| format!("0.0.0.0:{port}"))
            })
            .unwrap_or(defaults.bind_addr);

        let engine_timeout = read("ENGINE_TIMEOUT_SECONDS")
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs);

        let stale_scratch_after = match read("STALE_SCRATCH_SECONDS")
            .and_then(|value| value.parse::<u64>().ok())
        {
            Some(0) => None,
            Some(seconds) => Some(Duration::from_secs(seconds)),
            None => defaults.stale_scratch_after,
        };

        Self {
            bind_addr,
            scratch_dir: read("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.scratch_dir),
            // Set but blank means "run without cookies".
            cookie_file: match lookup("COOKIE_FILE") {
                Some(value) => non_empty(&value).map(PathBuf::from),
                None => defaults.cookie_file,
            },
            engine_program: read("YT_DLP_BIN").unwrap_or(defaults.engine_program),
            merge_output_format: read("MERGE_OUTPUT_FORMAT")
                .unwrap_or(defaults.merge_output_format),
            audio_codec: read("AUDIO_CODEC").unwrap_or(defaults.audio_codec),
            audio_quality: read("AUDIO_QUALITY").unwrap_or(defaults.audio_quality),
            engine_timeout,
            stale_scratch_after,
        }
    }
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
