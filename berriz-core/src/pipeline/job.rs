//! One unit of pipeline work and its filesystem lifecycle.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::api::types::MediaDescriptor;
use crate::auth::AuthError;
use crate::community::CommunityError;
use crate::cookies::CookieError;
use crate::download::DownloadError;
use crate::drm::DrmError;
use crate::http::HttpError;
use crate::ledger::LedgerError;
use crate::manifest::ManifestError;
use crate::merge::MergeError;
use crate::tools::ToolError;
use crate::vault::VaultError;

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Cookie(#[from] CookieError),
    #[error(transparent)]
    Community(#[from] CommunityError),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Drm(#[from] DrmError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Vault(#[from] VaultError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("playback context is unusable: {0}")]
    BadPlayback(String),
    #[error("job cancelled")]
    Cancelled,
}

impl JobError {
    /// Domain errors from the service mark the job skipped rather than
    /// failed; the pipeline keeps going either way.
    pub fn is_skip(&self) -> bool {
        matches!(self, JobError::Http(err) if err.is_domain())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobError::Cancelled)
            | matches!(self, JobError::Download(DownloadError::Cancelled))
    }
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Fetching,
    Downloading,
    Merging,
    Decrypting,
    Muxing,
    Renaming,
    Done,
    Failed,
    Skipped,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Fetching => "fetching",
            JobState::Downloading => "downloading",
            JobState::Merging => "merging",
            JobState::Decrypting => "decrypting",
            JobState::Muxing => "muxing",
            JobState::Renaming => "renaming",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Skipped => "skipped",
        }
    }
}

/// A dequeued media item bound to its resolved output location.
#[derive(Debug)]
pub struct Job {
    pub descriptor: MediaDescriptor,
    pub community_name: String,
    pub artist_list: Vec<String>,
    pub output_root: PathBuf,
    pub state: JobState,
}

impl Job {
    pub fn new(
        descriptor: MediaDescriptor,
        community_name: String,
        output_root: PathBuf,
    ) -> Self {
        Self {
            descriptor,
            community_name,
            artist_list: Vec::new(),
            output_root,
            state: JobState::Queued,
        }
    }

    pub fn advance(&mut self, state: JobState) {
        self.state = state;
    }

    /// Working directory for intermediate files, removed on failure or
    /// after a clean finish.
    pub fn temp_dir(&self, folder: &Path) -> PathBuf {
        folder.join(format!("temp_{}", self.descriptor.id))
    }
}

/// Removes a job's partial artifacts; failures only warn since cleanup runs
/// on already-failing paths.
pub async fn remove_temp_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            warn!(path = %dir.display(), error = %err, "failed to remove temp dir");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::MediaKind;
    use chrono::Utc;

    #[test]
    fn temp_dir_is_scoped_by_media_id() {
        let job = Job::new(
            MediaDescriptor {
                id: "abcd-123".into(),
                kind: MediaKind::Vod,
                community_id: 1,
                is_fanclub_only: false,
                published_at: Utc::now(),
                title: "t".into(),
            },
            "ive".into(),
            PathBuf::from("/out"),
        );
        assert_eq!(
            job.temp_dir(Path::new("/out/ive/Videos/show")),
            PathBuf::from("/out/ive/Videos/show/temp_abcd-123")
        );
    }
}
