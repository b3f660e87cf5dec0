use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, info, warn};

use crate::{
    config::{AppConfig, non_empty},
    engine::{AudioExtraction, DownloadRequest, MediaEngine},
    error::FetchError,
    scratch::{DownloadJob, ScratchDir},
};

/// A finished download. The file is removed when this value is dropped.
#[derive(Debug)]
pub struct FetchedFile {
    path: PathBuf,
    job: DownloadJob,
}

impl FetchedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("{}.bin", self.job.id()))
    }
}

/// Downloads one chosen format into the scratch directory.
#[derive(Clone)]
pub struct Downloader {
    engine: Arc<dyn MediaEngine>,
    scratch: ScratchDir,
    cookie_file: Option<PathBuf>,
    merge_output_format: String,
    audio: AudioExtraction,
}

impl Downloader {
    pub fn new(engine: Arc<dyn MediaEngine>, config: &AppConfig) -> Self {
        Self {
            engine,
            scratch: ScratchDir::new(&config.scratch_dir),
            cookie_file: config.cookie_file.clone(),
            merge_output_format: config.merge_output_format.clone(),
            audio: AudioExtraction {
                codec: config.audio_codec.clone(),
                quality: config.audio_quality.clone(),
            },
        }
    }

    pub async fn fetch(
        &self,
        source_url: Option<&str>,
        format_id: Option<&str>,
        audio_only: bool,
    ) -> Result<FetchedFile, FetchError> {
        let (Some(url), Some(format_id)) = (
            source_url.and_then(non_empty),
            format_id.and_then(non_empty),
        ) else {
            return Err(FetchError::InvalidInput("Missing url or format_id"));
        };

        let mut job = self.scratch.new_job(url, format_id, audio_only);
        let request = self.request_for(&job);
        info!(
            "job {} fetching format {} of {} (audio_only={})",
            job.id(),
            job.format_id(),
            job.source_url(),
            job.audio_only()
        );

        self.engine
            .download(&request)
            .await
            .map_err(FetchError::Download)?;

        let expected_ext = if audio_only {
            self.audio.codec.as_str()
        } else {
            self.merge_output_format.as_str()
        };
        let path = job
            .locate_output(expected_ext)
            .await
            .map_err(FetchError::Scratch)?
            .ok_or_else(|| {
                warn!(
                    "{} reported success for job {} but wrote nothing",
                    self.engine.name(),
                    job.id()
                );
                FetchError::NoOutputProduced
            })?;

        debug!("job {} produced {:?}", job.id(), path);
        Ok(FetchedFile { path, job })
    }

    fn request_for(&self, job: &DownloadJob) -> DownloadRequest {
        DownloadRequest {
            url: job.source_url().to_string(),
            format_id: job.format_id().to_string(),
            output_template: job.output_template(),
            merge_output_format: self.merge_output_format.clone(),
            audio: job.audio_only().then(|| self.audio.clone()),
            cookie_file: self.cookie_file.clone(),
        }
    }
}
