//! Scratch directory bookkeeping for in-flight downloads.
//!
//! Each download gets a [`DownloadJob`] whose UUID is the filename prefix of
//! everything the engine writes for it. Dropping the job removes those files,
//! so cleanup follows the job through every exit path of a request,
//! including the response body being dropped mid-stream.

use std::{
    ffi::OsStr,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tracing::{debug, info, warn};
use uuid::Uuid;

/// Suffixes yt-dlp uses for partial or bookkeeping files.
const ENGINE_TEMP_SUFFIXES: [&str; 3] = ["part", "ytdl", "temp"];

#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn ensure(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    pub fn new_job(
        &self,
        source_url: impl Into<String>,
        format_id: impl Into<String>,
        audio_only: bool,
    ) -> DownloadJob {
        DownloadJob {
            id: Uuid::new_v4(),
            source_url: source_url.into(),
            format_id: format_id.into(),
            audio_only,
            root: self.root.clone(),
            output: None,
        }
    }

    /// Remove entries whose modification time is older than `max_age`.
    pub async fn sweep_stale(&self, max_age: Duration) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(error) => {
                if error.kind() != ErrorKind::NotFound {
                    warn!("could not open scratch directory for cleanup: {error}");
                }
                return 0;
            }
        };

        let now = SystemTime::now();
        let mut removed = 0;

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(error) => {
                    warn!("could not iterate scratch directory for cleanup: {error}");
                    break;
                }
            };

            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }

            let result = if metadata.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => warn!("could not remove stale scratch entry {:?}: {error}", path),
            }
        }

        if removed > 0 {
            info!("removed {removed} stale scratch entries from {:?}", self.root);
        }
        removed
    }
}

/// One download request's claim on the scratch directory.
#[derive(Debug)]
pub struct DownloadJob {
    id: Uuid,
    source_url: String,
    format_id: String,
    audio_only: bool,
    root: PathBuf,
    output: Option<PathBuf>,
}

impl DownloadJob {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn format_id(&self) -> &str {
        &self.format_id
    }

    pub fn audio_only(&self) -> bool {
        self.audio_only
    }

    fn prefix(&self) -> String {
        format!("{}.", self.id)
    }

    /// Engine output template: `<scratch>/<uuid>.%(ext)s`.
    pub fn output_template(&self) -> String {
        self.root
            .join(format!("{}%(ext)s", self.prefix()))
            .to_string_lossy()
            .into_owned()
    }

    /// Every regular file in the scratch directory that belongs to this job.
    pub async fn produced_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let prefix = self.prefix();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut files = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let belongs = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(&prefix));
            if belongs && entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }

        Ok(files)
    }

    /// Pick the file to hand back to the client and remember it as the
    /// job's output.
    ///
    /// Engine temp files never qualify. A file with `expected_ext` beats any
    /// other extension, then the newest file wins, then the smallest name.
    pub async fn locate_output(
        &mut self,
        expected_ext: &str,
    ) -> std::io::Result<Option<PathBuf>> {
        let mut candidates = Vec::new();
        for path in self.produced_files().await? {
            if is_engine_temp_file(&path) {
                continue;
            }
            let modified = tokio::fs::metadata(&path)
                .await
                .and_then(|metadata| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            candidates.push((has_extension(&path, expected_ext), modified, path));
        }

        candidates.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| a.2.cmp(&b.2))
        });

        self.output = candidates.into_iter().next().map(|(_, _, path)| path);
        Ok(self.output.clone())
    }
}

impl Drop for DownloadJob {
    fn drop(&mut self) {
        // The served file goes right away; a single unlink is cheap enough
        // for the thread that drops the response body.
        if let Some(output) = self.output.take() {
            remove_scratch_file(&output);
        }

        let root = std::mem::take(&mut self.root);
        let prefix = self.prefix();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_prefixed(&root, &prefix));
            }
            Err(_) => remove_prefixed(&root, &prefix),
        }
    }
}

/// Remove leftovers such as partial downloads, thumbnails and subtitle
/// sidecars that share a job prefix.
fn remove_prefixed(root: &Path, prefix: &str) {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(error) => {
            debug!("could not list scratch directory {:?}: {error}", root);
            return;
        }
    };

    for entry in entries.flatten() {
        let belongs = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(prefix));
        if belongs {
            remove_scratch_file(&entry.path());
        }
    }
}

fn remove_scratch_file(path: &Path) {
    if let Err(error) = std::fs::remove_file(path)
        && error.kind() != ErrorKind::NotFound
    {
        debug!("could not remove scratch file {:?}: {error}", path);
    }
}

fn has_extension(path: &Path, expected: &str) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case(expected))
}

fn is_engine_temp_file(path: &Path) -> bool {
    ENGINE_TEMP_SUFFIXES
        .iter()
        .any(|suffix| has_extension(path, suffix))
}
