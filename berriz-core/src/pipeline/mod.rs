//! End-to-end orchestration: selection → dedup → per-type processors with
//! bounded concurrency and cancellation cleanup.

pub mod job;
mod photo;
mod posts;
mod vod;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::api::types::{MediaDescriptor, MediaKind, NoticeDetail, PostItem};
use crate::config::BerrizConfig;
use crate::download::SEGMENT_CONCURRENCY;
use crate::drm::resolver::KeyResolver;
use crate::http::HttpClient;
use crate::ledger::DedupLedger;
use crate::manifest::TrackPrompt;
use crate::tools::decrypt::Decryptor;
use crate::tools::mux::Muxer;

pub use job::{Job, JobError, JobResult, JobState};

/// Concurrent image downloads inside one photo job.
pub const PHOTO_CONCURRENCY: usize = 7;
/// Concurrent post/notice jobs.
pub const POST_CONCURRENCY: usize = 40;

/// Stage toggles and filters handed over by the CLI.
#[derive(Debug, Clone)]
pub struct RunFlags {
    pub key_only: bool,
    pub no_cookie: bool,
    pub hls_only: bool,
    pub clean_dl: bool,
    pub skip_merge: bool,
    pub skip_mux: bool,
    pub no_download: bool,
    pub no_json: bool,
    pub no_thumbnails: bool,
    pub no_playlist: bool,
    pub no_html: bool,
    pub no_subfolder: bool,
}

impl Default for RunFlags {
    fn default() -> Self {
        Self {
            key_only: false,
            no_cookie: false,
            hls_only: false,
            clean_dl: true,
            skip_merge: false,
            skip_mux: false,
            no_download: false,
            no_json: false,
            no_thumbnails: false,
            no_playlist: false,
            no_html: false,
            no_subfolder: false,
        }
    }
}

/// What the (external) selection step produced for one run.
#[derive(Debug, Clone, Default)]
pub struct SelectedMedia {
    pub vods: Vec<MediaDescriptor>,
    pub photos: Vec<MediaDescriptor>,
    pub lives: Vec<MediaDescriptor>,
    pub posts: Vec<PostItem>,
    pub notices: Vec<i64>,
}

impl SelectedMedia {
    pub fn is_empty(&self) -> bool {
        self.vods.is_empty()
            && self.photos.is_empty()
            && self.lives.is_empty()
            && self.posts.is_empty()
            && self.notices.is_empty()
    }
}

/// HTML generation for posts and notices lives outside this crate.
pub trait PostRenderer: Send + Sync {
    fn render_post(&self, post: &PostItem, translations: &[serde_json::Value]) -> String;
    fn render_notice(&self, notice: &NoticeDetail) -> String;
}

/// Renderer used when HTML output is disabled.
pub struct NullRenderer;

impl PostRenderer for NullRenderer {
    fn render_post(&self, _post: &PostItem, _translations: &[serde_json::Value]) -> String {
        String::new()
    }

    fn render_notice(&self, _notice: &NoticeDetail) -> String {
        String::new()
    }
}

/// Cooperative cancellation shared by every job. Ctrl-C flips the flag; the
/// downloader and the dispatch loops observe it.
#[derive(Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunReport {
    fn record(&mut self, outcome: &JobResult<PathBuf>, label: &str) {
        match outcome {
            Ok(path) => {
                self.done += 1;
                info!(target = %path.display(), "{label} finished");
            }
            Err(err) if err.is_skip() => {
                self.skipped += 1;
                warn!(error = %err, "{label} skipped");
            }
            Err(err) if err.is_cancelled() => {
                warn!("{label} cancelled");
            }
            Err(err) => {
                self.failed += 1;
                error!(error = %err, "{label} failed");
            }
        }
    }
}

pub struct Pipeline {
    pub(crate) config: BerrizConfig,
    pub(crate) flags: RunFlags,
    pub(crate) http: Arc<HttpClient>,
    pub(crate) resolver: Arc<KeyResolver>,
    pub(crate) ledger: Arc<DedupLedger>,
    pub(crate) decryptor: Arc<Decryptor>,
    pub(crate) muxer: Arc<Muxer>,
    pub(crate) prompt: Arc<dyn TrackPrompt>,
    pub(crate) renderer: Arc<dyn PostRenderer>,
    pub(crate) cancel: CancelToken,
    pub(crate) segment_semaphore: Arc<Semaphore>,
    pub(crate) photo_semaphore: Arc<Semaphore>,
    pub(crate) post_semaphore: Arc<Semaphore>,
    pub(crate) community_id: i64,
    pub(crate) community_name: String,
    pub(crate) output_root: PathBuf,
}

#[allow(clippy::too_many_arguments)]
impl Pipeline {
    pub fn new(
        config: BerrizConfig,
        flags: RunFlags,
        http: Arc<HttpClient>,
        resolver: Arc<KeyResolver>,
        ledger: Arc<DedupLedger>,
        decryptor: Arc<Decryptor>,
        muxer: Arc<Muxer>,
        prompt: Arc<dyn TrackPrompt>,
        renderer: Arc<dyn PostRenderer>,
        cancel: CancelToken,
        community_id: i64,
        community_name: String,
        output_root: PathBuf,
    ) -> Self {
        Self {
            config,
            flags,
            http,
            resolver,
            ledger,
            decryptor,
            muxer,
            prompt,
            renderer,
            cancel,
            segment_semaphore: Arc::new(Semaphore::new(SEGMENT_CONCURRENCY)),
            photo_semaphore: Arc::new(Semaphore::new(PHOTO_CONCURRENCY)),
            post_semaphore: Arc::new(Semaphore::new(POST_CONCURRENCY)),
            community_id,
            community_name,
            output_root,
        }
    }

    /// One full run over the selection. Every category is consulted against
    /// the dedup ledger before dispatch; successful ids are recorded when
    /// that category's dedup is active.
    pub async fn run(&self, selection: SelectedMedia) -> RunReport {
        let mut report = RunReport::default();
        if selection.is_empty() {
            info!("nothing selected, 0 jobs");
            return report;
        }

        for descriptor in selection.vods.iter().chain(selection.lives.iter()) {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.should_skip_duplicate(descriptor.kind, &descriptor.id) {
                report.skipped += 1;
                continue;
            }
            let outcome = vod::process_video(self, descriptor).await;
            if outcome.is_ok() && self.dedup_active(descriptor.kind) {
                self.ledger.add(&descriptor.id);
            }
            report.record(&outcome, descriptor.kind.as_str());
        }

        for descriptor in &selection.photos {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.should_skip_duplicate(MediaKind::Photo, &descriptor.id) {
                report.skipped += 1;
                continue;
            }
            let outcome = photo::process_photo(self, descriptor).await;
            if outcome.is_ok() && self.dedup_active(MediaKind::Photo) {
                self.ledger.add(&descriptor.id);
            }
            report.record(&outcome, "PHOTO");
        }

        report = posts::process_posts(self, &selection.posts, report).await;
        report = posts::process_notices(self, &selection.notices, report).await;

        self.ledger.flush_and_stop();
        info!(
            done = report.done,
            skipped = report.skipped,
            failed = report.failed,
            "run complete"
        );
        report
    }

    /// "Skip duplicates" is active for a category when its override (or the
    /// default) is false.
    pub(crate) fn dedup_active(&self, kind: MediaKind) -> bool {
        let allow_duplicates = match kind {
            MediaKind::Photo => self.config.duplicate.image(),
            MediaKind::Vod | MediaKind::Live => self.config.duplicate.video(),
            MediaKind::Post => self.config.duplicate.post(),
            MediaKind::Notice => self.config.duplicate.notice(),
        };
        !allow_duplicates
    }

    fn should_skip_duplicate(&self, kind: MediaKind, id: &str) -> bool {
        if self.dedup_active(kind) && self.ledger.exists(id) {
            info!(id, "already exists, skip download");
            return true;
        }
        false
    }

    /// Published-at rendered in the configured zone and date format.
    pub(crate) fn date_string(&self, at: DateTime<Utc>, format: &str) -> String {
        let offset_hours = self.config.timezone.time as i32;
        let zone = FixedOffset::east_opt(offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("utc offset"));
        at.with_timezone(&zone).format(format).to_string()
    }

    pub(crate) fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_flips_for_all_subscribers() {
        let token = CancelToken::new();
        let receiver = token.subscribe();
        assert!(!token.is_cancelled());
        assert!(!*receiver.borrow());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(*receiver.borrow());
    }

    #[test]
    fn default_flags_clean_up_intermediates() {
        let flags = RunFlags::default();
        assert!(flags.clean_dl);
        assert!(!flags.skip_mux);
    }
}
