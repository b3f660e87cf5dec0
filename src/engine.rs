//! The seam to the external extraction engine.
//!
//! Everything site specific lives in yt-dlp. This module only knows how to
//! phrase a metadata query or a download as a yt-dlp command line and how to
//! read back what it prints.

use std::{io::ErrorKind, path::PathBuf, process::Output, time::Duration};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::{process::Command, time::timeout};
use tracing::{debug, warn};

use crate::{config::AppConfig, error::EngineError};

/// Metadata as printed by `yt-dlp -J`. Only the fields the format list needs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawMediaInfo {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub acodec: Option<String>,
    pub vcodec: Option<String>,
    pub height: Option<u32>,
    pub width: Option<u32>,
    pub filesize: Option<f64>,
    pub format_note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractRequest {
    pub url: String,
    pub cookie_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioExtraction {
    pub codec: String,
    pub quality: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub format_id: String,
    /// Engine output template, e.g. `/srv/downloads/<job>.%(ext)s`.
    pub output_template: String,
    pub merge_output_format: String,
    pub audio: Option<AudioExtraction>,
    pub cookie_file: Option<PathBuf>,
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve a URL into its metadata without downloading anything.
    async fn extract_info(&self, request: &ExtractRequest) -> Result<RawMediaInfo, EngineError>;

    /// Download the selected format into `request.output_template`.
    async fn download(&self, request: &DownloadRequest) -> Result<(), EngineError>;
}

/// Production engine: the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
    timeout: Option<Duration>,
}

impl YtDlp {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.engine_program.clone(), config.engine_timeout)
    }

    async fn run(&self, args: Vec<String>) -> Result<Output, EngineError> {
        debug!("running {} {:?}", self.program, args);

        let mut command = Command::new(&self.program);
        command.args(&args).kill_on_drop(true);
        let command_future = command.output();

        let output = match self.timeout {
            Some(limit) => timeout(limit, command_future)
                .await
                .map_err(|_| EngineError::Timeout {
                    program: self.program.clone(),
                    limit,
                })?,
            None => command_future.await,
        }
        .map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                warn!("{} is not installed or not on PATH", self.program);
            }
            EngineError::Spawn {
                program: self.program.clone(),
                source,
            }
        })?;

        if !output.status.success() {
            let message = run_error_message(&output.stderr);
            warn!("{} exited with {}: {message}", self.program, output.status);
            return Err(EngineError::Failed(message));
        }

        Ok(output)
    }
}

#[async_trait]
impl MediaEngine for YtDlp {
    fn name(&self) -> &str {
        &self.program
    }

    async fn extract_info(&self, request: &ExtractRequest) -> Result<RawMediaInfo, EngineError> {
        let output = self.run(metadata_args(request)).await?;
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    async fn download(&self, request: &DownloadRequest) -> Result<(), EngineError> {
        self.run(download_args(request)).await.map(|_| ())
    }
}

pub fn metadata_args(request: &ExtractRequest) -> Vec<String> {
    let mut args = vec![
        "-J".to_string(),
        "--skip-download".to_string(),
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
    ];
    push_cookie_args(&mut args, request.cookie_file.as_ref());
    args.push("--".to_string());
    args.push(request.url.clone());
    args
}

pub fn download_args(request: &DownloadRequest) -> Vec<String> {
    let mut args = vec![
        "--quiet".to_string(),
        "--no-warnings".to_string(),
        "--no-playlist".to_string(),
        "-f".to_string(),
        request.format_id.clone(),
        "-o".to_string(),
        request.output_template.clone(),
        "--merge-output-format".to_string(),
        request.merge_output_format.clone(),
    ];

    if let Some(audio) = &request.audio {
        args.push("-x".to_string());
        args.push("--audio-format".to_string());
        args.push(audio.codec.clone());
        args.push("--audio-quality".to_string());
        args.push(audio.quality.clone());
    }

    push_cookie_args(&mut args, request.cookie_file.as_ref());
    args.push("--".to_string());
    args.push(request.url.clone());
    args
}

fn push_cookie_args(args: &mut Vec<String>, cookie_file: Option<&PathBuf>) {
    if let Some(path) = cookie_file {
        args.push("--cookies".to_string());
        args.push(path.to_string_lossy().into_owned());
    }
}

/// Last non-empty stderr line, which is where yt-dlp puts its `ERROR:` text.
fn run_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the operation")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn download_request(audio: Option<AudioExtraction>) -> DownloadRequest {
        DownloadRequest {
            url: "https://example.com/watch?v=abc".to_string(),
            format_id: "137".to_string(),
            output_template: "/tmp/scratch/job.%(ext)s".to_string(),
            merge_output_format: "mp4".to_string(),
            audio,
            cookie_file: Some(PathBuf::from("/srv/cookies.txt")),
        }
    }

    #[test]
    fn metadata_query_skips_download_and_passes_cookies() {
        let args = metadata_args(&ExtractRequest {
            url: "https://example.com/v".to_string(),
            cookie_file: Some(PathBuf::from("/srv/cookies.txt")),
        });
        assert_eq!(args[0], "-J");
        assert!(args.contains(&"--skip-download".to_string()));
        let cookies = args.iter().position(|arg| arg == "--cookies").unwrap();
        assert_eq!(args[cookies + 1], "/srv/cookies.txt");
        assert_eq!(args.last().unwrap(), "https://example.com/v");
    }

    #[test]
    fn video_download_selects_exact_format_without_extraction() {
        let args = download_args(&download_request(None));
        let format = args.iter().position(|arg| arg == "-f").unwrap();
        assert_eq!(args[format + 1], "137");
        let merge = args
            .iter()
            .position(|arg| arg == "--merge-output-format")
            .unwrap();
        assert_eq!(args[merge + 1], "mp4");
        assert!(!args.contains(&"-x".to_string()));
        assert!(!args.contains(&"--audio-format".to_string()));
    }

    #[test]
    fn audio_download_appends_extraction_step() {
        let args = download_args(&download_request(Some(AudioExtraction {
            codec: "mp3".to_string(),
            quality: "192K".to_string(),
        })));
        let extract = args.iter().position(|arg| arg == "-x").unwrap();
        assert_eq!(
            &args[extract..extract + 5],
            ["-x", "--audio-format", "mp3", "--audio-quality", "192K"]
        );
        let format = args.iter().position(|arg| arg == "-f").unwrap();
        assert_eq!(args[format + 1], "137");
    }

    #[test]
    fn url_is_passed_after_option_terminator() {
        let mut request = download_request(None);
        request.url = "-malicious".to_string();
        request.cookie_file = None;
        let args = download_args(&request);
        assert_eq!(&args[args.len() - 2..], ["--", "-malicious"]);
        assert!(!args.contains(&"--cookies".to_string()));
    }

    #[test]
    fn error_message_uses_last_stderr_line() {
        let stderr = b"WARNING: something\n\nERROR: [generic] 'nope' is not a valid URL\n\n";
        assert_eq!(
            run_error_message(stderr),
            "ERROR: [generic] 'nope' is not a valid URL"
        );
        assert_eq!(
            run_error_message(b""),
            "yt-dlp could not complete the operation"
        );
    }

    #[test]
    fn metadata_tolerates_missing_fields() {
        let info: RawMediaInfo = serde_json::from_str(
            r#"{"title":"clip","formats":[{"format_id":"18","height":360,"filesize":null},{"format_id":"sb0","filesize":1234.0}]}"#,
        )
        .unwrap();
        assert_eq!(info.title.as_deref(), Some("clip"));
        assert!(info.thumbnail.is_none());
        assert_eq!(info.formats.len(), 2);
        assert_eq!(info.formats[0].height, Some(360));
        assert_eq!(info.formats[1].filesize, Some(1234.0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_engine_hits_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow-engine");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let engine = YtDlp::new(
            script.to_string_lossy().into_owned(),
            Some(Duration::from_millis(200)),
        );
        let started = std::time::Instant::now();
        let error = engine
            .download(&download_request(None))
            .await
            .unwrap_err();

        assert!(
            matches!(error, EngineError::Timeout { limit, .. } if limit == Duration::from_millis(200))
        );
        assert!(error.to_string().ends_with("timed out after 200ms"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let engine = YtDlp::new("clipfetch-no-such-engine-binary", None);
        let error = engine
            .extract_info(&ExtractRequest {
                url: "https://example.com".to_string(),
                cookie_file: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::Spawn { .. }));
    }
}
