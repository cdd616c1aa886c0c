//! Bounded-concurrency segment downloads with retry, partial-file
//! acceptance, and cancellation cleanup.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::http::RetryPolicy;

/// Segment fetches across all video/live jobs share one permit pool.
pub const SEGMENT_CONCURRENCY: usize = 50;
const WRITE_BUFFER_BYTES: usize = (1.5 * 1024.0 * 1024.0) as usize;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("segment download exhausted retries: {0}")]
    Exhausted(String),
    #[error("init segment download failed: {0}")]
    Init(String),
    #[error("download cancelled")]
    Cancelled,
}

pub type DownloadResult<T> = Result<T, DownloadError>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> DownloadError + '_ {
    move |source| DownloadError::Io {
        source,
        path: path.to_path_buf(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        }
    }
}

/// One track's worth of work: optional init segment plus ordered media
/// segments. `extension` includes the dot.
#[derive(Debug, Clone)]
pub struct TrackDownload {
    pub kind: TrackKind,
    pub init_url: Option<String>,
    pub segment_urls: Vec<String>,
    pub extension: String,
}

/// DASH mime types map onto local file extensions; HLS tracks land as
/// `.bin` parts and are identified by index alone.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let mime = mime_type.to_ascii_lowercase();
    if mime.contains("application/dash+xml") {
        ".m4v"
    } else if mime.contains("video/mp4") {
        ".mp4"
    } else if mime.contains("audio/mp4") {
        ".m4a"
    } else if mime.contains("video/webm") {
        ".webm"
    } else if mime.contains("audio/webm") {
        ".weba"
    } else if mime.contains("text/vtt") {
        ".vtt"
    } else if mime.contains("text/ttml") {
        ".ttml"
    } else if mime.contains("application/octet-stream") {
        ".m4s"
    } else {
        ".bin"
    }
}

pub struct SegmentDownloader {
    http: reqwest::Client,
    base_dir: PathBuf,
    semaphore: Arc<Semaphore>,
    cancel: watch::Receiver<bool>,
    policy: RetryPolicy,
}

impl SegmentDownloader {
    pub fn new(
        user_agent: &str,
        base_dir: PathBuf,
        semaphore: Arc<Semaphore>,
        cancel: watch::Receiver<bool>,
    ) -> DownloadResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(600))
            .build()?;
        Ok(Self {
            http,
            base_dir,
            semaphore,
            cancel,
            policy: RetryPolicy::default(),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Downloads a whole track into `<base>/<video|audio>/`. Files are named
    /// `init_<kind><ext>` and `seg_<kind>_<index><ext>`.
    pub async fn download_track(&self, track: &TrackDownload) -> DownloadResult<Vec<PathBuf>> {
        let track_dir = self.base_dir.join(track.kind.as_str());
        fs::create_dir_all(&track_dir)
            .await
            .map_err(io_err(&track_dir))?;

        // Init URLs shorter than five characters mean "no init segment"
        // (the HLS path).
        if let Some(init_url) = track.init_url.as_deref().filter(|url| url.len() > 4) {
            let init_path = track_dir.join(format!("init_{}{}", track.kind.as_str(), track.extension));
            if let Err(err) = self.fetch_one(init_url, &init_path, None).await {
                return Err(DownloadError::Init(format!(
                    "{} init segment: {err}",
                    track.kind.as_str()
                )));
            }
        }

        info!(
            track = track.kind.as_str(),
            segments = track.segment_urls.len(),
            "starting segment download"
        );
        let progress = track_progress_bar(track.segment_urls.len() as u64, track.kind.as_str());

        let mut tasks = futures::stream::FuturesUnordered::new();
        for (index, url) in track.segment_urls.iter().enumerate() {
            let path = track_dir.join(format!(
                "seg_{}_{}{}",
                track.kind.as_str(),
                index,
                track.extension
            ));
            let url = url.clone();
            let progress = progress.clone();
            tasks.push(async move {
                let _permit = self
                    .semaphore
                    .acquire()
                    .await
                    .map_err(|_| DownloadError::Cancelled)?;
                let result = self.fetch_one(&url, &path, None).await;
                progress.inc(1);
                result.map(|_| path)
            });
        }

        let mut written = Vec::with_capacity(track.segment_urls.len());
        while let Some(result) = tasks.next().await {
            if self.cancelled() {
                drop(tasks);
                progress.abandon();
                self.cleanup_parent().await;
                return Err(DownloadError::Cancelled);
            }
            written.push(result?);
        }
        progress.finish();
        info!(
            track = track.kind.as_str(),
            done = written.len(),
            "segment download complete"
        );
        written.sort();
        Ok(written)
    }

    /// Single file download used for thumbnails and photo images as well.
    pub async fn fetch_one(
        &self,
        url: &str,
        path: &Path,
        progress: Option<&ProgressBar>,
    ) -> DownloadResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }
        let mut last_error: Option<DownloadError> = None;
        for attempt in 0..=self.policy.max_attempts {
            if self.cancelled() {
                return Err(DownloadError::Cancelled);
            }
            match self.try_fetch(url, path, progress).await {
                Ok(()) => return Ok(()),
                Err(DownloadError::Cancelled) => return Err(DownloadError::Cancelled),
                Err(err) => {
                    if attempt < self.policy.max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        warn!(url, attempt = attempt + 1, error = %err, wait = ?delay, "segment retry");
                        tokio::time::sleep(delay).await;
                    }
                    last_error = Some(err);
                }
            }
        }

        // Last resort: a previous attempt may have written the whole file
        // even though the connection died. Accept it when the size matches.
        if self.matches_remote_length(url, path).await {
            info!(url, "accepting partial download with matching length");
            return Ok(());
        }
        let _ = fs::remove_file(path).await;
        Err(DownloadError::Exhausted(format!(
            "{url}: {}",
            last_error.map(|err| err.to_string()).unwrap_or_default()
        )))
    }

    async fn try_fetch(
        &self,
        url: &str,
        path: &Path,
        progress: Option<&ProgressBar>,
    ) -> DownloadResult<()> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::PARTIAL_CONTENT {
            return Err(DownloadError::Exhausted(format!(
                "{url} returned status {status}"
            )));
        }
        let file = fs::File::create(path).await.map_err(io_err(path))?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if self.cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let chunk = chunk?;
            writer.write_all(&chunk).await.map_err(io_err(path))?;
            if let Some(bar) = progress {
                bar.inc(chunk.len() as u64);
            }
        }
        writer.flush().await.map_err(io_err(path))?;
        Ok(())
    }

    async fn matches_remote_length(&self, url: &str, path: &Path) -> bool {
        let Ok(metadata) = fs::metadata(path).await else {
            return false;
        };
        let Ok(response) = self.http.head(url).send().await else {
            return false;
        };
        if !response.status().is_success() {
            return false;
        }
        response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .map(|remote| remote == metadata.len())
            .unwrap_or(false)
    }

    /// Removes the per-job parent directory after a cancellation.
    pub async fn cleanup_parent(&self) {
        if let Err(err) = fs::remove_dir_all(&self.base_dir).await {
            if err.kind() != io::ErrorKind::NotFound {
                error!(path = %self.base_dir.display(), error = %err, "failed to remove download dir");
            }
        }
    }
}

fn track_progress_bar(total: u64, label: &str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    bar.set_style(
        ProgressStyle::with_template(
            "{prefix:>6} [{bar:32}] {pos}/{len} segments ({eta})",
        )
        .expect("static template")
        .progress_chars("=> "),
    );
    bar.set_prefix(label.to_string());
    bar
}

/// Parses the numeric index out of `seg_<kind>_<n>.<ext>` names; files that
/// do not match the shape are ignored by the merge step.
pub fn segment_index(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    let mut parts = stem.split('_');
    let (prefix, _kind, index) = (parts.next()?, parts.next()?, parts.next()?);
    if prefix != "seg" || parts.next().is_some() {
        return None;
    }
    index.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_extension_mapping() {
        assert_eq!(extension_for_mime("video/mp4"), ".mp4");
        assert_eq!(extension_for_mime("audio/mp4"), ".m4a");
        assert_eq!(extension_for_mime("application/dash+xml"), ".m4v");
        assert_eq!(extension_for_mime("application/octet-stream"), ".m4s");
        assert_eq!(extension_for_mime("something/else"), ".bin");
    }

    #[test]
    fn segment_index_parsing() {
        assert_eq!(segment_index(Path::new("seg_video_0.mp4")), Some(0));
        assert_eq!(segment_index(Path::new("seg_audio_17.m4a")), Some(17));
        assert_eq!(segment_index(Path::new("init_video_.mp4")), None);
        assert_eq!(segment_index(Path::new("seg_video_x.mp4")), None);
        assert_eq!(segment_index(Path::new("seg_video_1_extra.mp4")), None);
    }
}
