#![allow(
    clippy::redundant_closure,
    clippy::needless_question_mark,
    clippy::result_large_err
)]

pub mod api;
pub mod auth;
pub mod community;
pub mod config;
pub mod cookies;
pub mod download;
pub mod drm;
pub mod enumerate;
pub mod error;
pub mod http;
pub mod ledger;
pub mod manifest;
pub mod merge;
pub mod paths;
pub mod pipeline;
mod sqlite;
pub mod tools;
pub mod vault;

pub use api::types::{
    MediaDescriptor, MediaKind, NoticeDetail, PlaybackContext, PostItem, PublicContextData,
};
pub use auth::{AuthClient, AuthError, AuthResult, UnbanFlow};
pub use community::{CommunityError, CommunityResolver};
pub use config::{load_config, BerrizConfig, DecryptionEngine, MuxTool};
pub use cookies::{CookieError, CookieStore, NetscapeJar, TokenCache};
pub use download::{SegmentDownloader, TrackDownload, TrackKind, SEGMENT_CONCURRENCY};
pub use drm::resolver::{KeyResolver, LicenseBackend};
pub use drm::{DrmError, DrmResult, DrmSource};
pub use enumerate::{FanclubFilter, MediaEnumerator, MediaSelection, TimeWindow};
pub use error::{ConfigError, Result};
pub use http::{HttpClient, HttpError, HttpResult, ProxyPool, RetryPolicy};
pub use ledger::{DedupLedger, LedgerError};
pub use manifest::{
    hls::HlsMaster, mpd::MpdDocument, pssh::PsshSet, ManifestError, TrackChoice, TrackPrompt,
};
pub use merge::{MergeError, MergeMode, Merger};
pub use paths::{expand_template, resolve_collision, sanitize_filename, TemplateValues};
pub use pipeline::{
    CancelToken, Job, JobError, JobState, NullRenderer, Pipeline, PostRenderer, RunFlags,
    RunReport, SelectedMedia,
};
pub use tools::decrypt::Decryptor;
pub use tools::mux::Muxer;
pub use tools::{CommandExecutor, SystemCommandExecutor, ToolError, ToolPaths};
pub use vault::{KeyVault, KeyVaultBuilder, VaultError, VaultValue};
