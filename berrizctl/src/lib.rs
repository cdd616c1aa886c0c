#![allow(clippy::result_large_err)]

mod render;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{ArgAction, Parser};
use thiserror::Error;
use tokio::runtime::Builder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};

use berriz_core::drm::playready::PlayReadyClient;
use berriz_core::drm::remote::{CdrmClient, WatoraClient};
use berriz_core::drm::resolver::CdrmBackend;
use berriz_core::drm::widevine::WidevineClient;
use berriz_core::manifest::LastOptionPrompt;
use berriz_core::{
    load_config, AuthClient, AuthError, BerrizConfig, CancelToken, CommunityError,
    CommunityResolver, CookieStore, DedupLedger, Decryptor, DrmSource, FanclubFilter, HttpClient,
    KeyResolver, KeyVault, LicenseBackend, MediaEnumerator, MuxTool, Muxer, NullRenderer,
    Pipeline, PostRenderer, RunFlags, SelectedMedia, SystemCommandExecutor, TimeWindow, ToolPaths,
};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FATAL: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] berriz_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error("http error: {0}")]
    Http(#[from] berriz_core::HttpError),
    #[error("community error: {0}")]
    Community(#[from] CommunityError),
    #[error("key vault error: {0}")]
    Vault(#[from] berriz_core::VaultError),
    #[error("dedup ledger error: {0}")]
    Ledger(#[from] berriz_core::LedgerError),
    #[error("drm error: {0}")]
    Drm(#[from] berriz_core::DrmError),
    #[error("tool error: {0}")]
    Tool(#[from] berriz_core::ToolError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Berriz media acquisition pipeline", long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, default_value = "config/berrizconfig.yaml")]
    pub config: PathBuf,
    /// Community key or numeric id
    #[arg(long)]
    pub group: Option<String>,
    /// Print decryption keys and skip the download stages
    #[arg(long)]
    pub key: bool,
    /// Run without cookies (public media only)
    #[arg(long = "no-cookie")]
    pub no_cookie: bool,
    /// Prefer HLS over MPEG-DASH even when DRM keys are available
    #[arg(long = "hls-only-dl")]
    pub hls_only_dl: bool,
    /// Only fanclub-exclusive media
    #[arg(long, conflicts_with = "nofanclub")]
    pub fanclub: bool,
    /// Exclude fanclub-exclusive media
    #[arg(long)]
    pub nofanclub: bool,
    /// Only live replays
    #[arg(long, conflicts_with_all = ["mediaonly", "photoonly", "noticeonly"])]
    pub liveonly: bool,
    /// Only VOD media
    #[arg(long, conflicts_with_all = ["photoonly", "noticeonly"])]
    pub mediaonly: bool,
    /// Only photo posts
    #[arg(long, conflicts_with = "noticeonly")]
    pub photoonly: bool,
    /// Only notices
    #[arg(long)]
    pub noticeonly: bool,
    /// Board id to pull posts from
    #[arg(long)]
    pub board: Option<i64>,
    /// Delete intermediate files after muxing
    #[arg(long = "clean-dl", default_value_t = true, action = ArgAction::Set)]
    pub clean_dl: bool,
    /// Skip the merge stage
    #[arg(long = "skip-merge")]
    pub skip_merge: bool,
    /// Skip the mux stage
    #[arg(long = "skip-mux")]
    pub skip_mux: bool,
    /// Resolve everything but download nothing
    #[arg(long)]
    pub nodl: bool,
    /// Do not persist media JSON
    #[arg(long)]
    pub nojson: bool,
    /// Do not download thumbnails
    #[arg(long)]
    pub nothumbnails: bool,
    /// Do not persist playlists
    #[arg(long)]
    pub notplaylist: bool,
    /// Do not generate HTML for posts and notices
    #[arg(long)]
    pub nohtml: bool,
    /// Flatten output, no per-media subfolder
    #[arg(long)]
    pub nosubfolder: bool,
    /// Join the community before enumerating
    #[arg(long = "join-community")]
    pub join_community: bool,
    /// Leave the community instead of downloading
    #[arg(long = "leave-community")]
    pub leave_community: bool,
    /// Inclusive time window: START END (RFC3339 or YYYY-MM-DD)
    #[arg(long, num_args = 2, value_names = ["START", "END"])]
    pub time: Option<Vec<String>>,
}

pub fn run(cli: Cli) -> i32 {
    let runtime = match Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to start runtime: {err}");
            return EXIT_FATAL;
        }
    };
    match runtime.block_on(run_async(cli)) {
        Ok(()) => EXIT_OK,
        Err(AppError::Cancelled) => EXIT_CANCELLED,
        Err(AppError::InvalidArgument(message)) => {
            eprintln!("error: {message}");
            EXIT_USAGE
        }
        Err(err) => {
            error!(error = %err, "run failed");
            eprintln!("error: {err}");
            EXIT_FATAL
        }
    }
}

async fn run_async(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    init_tracing(&config);

    let group = cli
        .group
        .clone()
        .ok_or_else(|| AppError::InvalidArgument("--group is required".into()))?;
    let window = parse_window(cli.time.as_deref())?;
    let flags = run_flags(&cli);

    // Persisted state lives under the working directory, matching the
    // layout existing installs already have.
    let cookie_store = Arc::new(CookieStore::new(
        "cookies/Berriz/default.txt",
        "cookies/cookie_temp.json",
    ));
    let vault = KeyVault::new("key/local_key_vault.db")?;
    vault.initialize()?;
    let ledger = Arc::new(DedupLedger::open("lock/download_info.bin")?);

    let auth = Arc::new(AuthClient::new(
        Arc::clone(&cookie_store),
        config.account.clone(),
        config.headers.user_agent.clone(),
    )?);
    let proxies = Arc::new(berriz_core::ProxyPool::from_config(
        &config.proxy,
        "proxy.txt",
    ));
    let http = Arc::new(HttpClient::new(
        Arc::clone(&auth),
        proxies,
        config.headers.user_agent.clone(),
        !cli.no_cookie,
        config.proxy.use_proxy.clone(),
    )?);

    let tools = ToolPaths::default();
    ensure_tools(&config, &flags, &tools).await?;

    let backend = build_backend(&config)?;
    let resolver = Arc::new(KeyResolver::new(vault.clone(), backend));
    let executor: Arc<dyn berriz_core::CommandExecutor> = Arc::new(SystemCommandExecutor);
    let decryptor = Arc::new(Decryptor::new(tools.clone(), Arc::clone(&executor)));
    let muxer = Arc::new(Muxer::new(tools, executor));

    let (community_id, community_name) = CommunityResolver::new("static")
        .resolve(&http, &group)
        .await?;
    info!(community_id, community_name = %community_name, "community resolved");

    if cli.leave_community {
        http.post_empty(
            &berriz_core::api::routes::community_leave(community_id),
            &serde_json::json!({}),
        )
        .await?;
        info!(community_name = %community_name, "left community");
        return Ok(());
    }
    if cli.join_community {
        http.post_empty(
            &berriz_core::api::routes::community_join(community_id),
            &serde_json::json!({}),
        )
        .await?;
        info!(community_name = %community_name, "joined community");
    }

    let selection = build_selection(&cli, &http, community_id, window).await?;
    if selection.is_empty() {
        info!("selection is empty, 0 jobs");
        return Ok(());
    }

    let renderer: Arc<dyn PostRenderer> = if flags.no_html {
        Arc::new(NullRenderer)
    } else {
        Arc::new(render::BasicRenderer)
    };
    let cancel = CancelToken::new();
    install_ctrl_c(cancel.clone());

    let pipeline = Pipeline::new(
        config,
        flags,
        http,
        resolver,
        Arc::clone(&ledger),
        decryptor,
        muxer,
        Arc::new(LastOptionPrompt),
        renderer,
        cancel.clone(),
        community_id,
        community_name,
        PathBuf::from("."),
    );
    let report = pipeline.run(selection).await;

    if cancel.is_cancelled() {
        return Err(AppError::Cancelled);
    }
    info!(
        done = report.done,
        skipped = report.skipped,
        failed = report.failed,
        "all jobs finished"
    );
    Ok(())
}

fn init_tracing(config: &BerrizConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    let builder = tracing_fmt().with_env_filter(filter);
    if config.logging.format.eq_ignore_ascii_case("json") {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

fn run_flags(cli: &Cli) -> RunFlags {
    RunFlags {
        key_only: cli.key,
        no_cookie: cli.no_cookie,
        hls_only: cli.hls_only_dl,
        clean_dl: cli.clean_dl,
        skip_merge: cli.skip_merge,
        skip_mux: cli.skip_mux,
        no_download: cli.nodl,
        no_json: cli.nojson,
        no_thumbnails: cli.nothumbnails,
        no_playlist: cli.notplaylist,
        no_html: cli.nohtml,
        no_subfolder: cli.nosubfolder,
    }
}

fn fanclub_filter(cli: &Cli) -> FanclubFilter {
    if cli.fanclub {
        FanclubFilter::Only
    } else if cli.nofanclub {
        FanclubFilter::Exclude
    } else {
        FanclubFilter::Entitled
    }
}

async fn build_selection(
    cli: &Cli,
    http: &HttpClient,
    community_id: i64,
    window: TimeWindow,
) -> Result<SelectedMedia> {
    let enumerator = MediaEnumerator::new(http);
    let mut selection = SelectedMedia::default();

    let wants_media = !cli.noticeonly && cli.board.is_none();
    if wants_media {
        let listed = enumerator
            .enumerate(community_id, window, fanclub_filter(cli))
            .await?;
        if !cli.photoonly && !cli.liveonly {
            selection.vods = listed.vods;
        }
        if !cli.liveonly && !cli.mediaonly && !cli.noticeonly {
            selection.photos = listed.photos;
        }
        if !cli.mediaonly && !cli.photoonly {
            selection.lives = listed.lives;
        }
    }
    if cli.noticeonly {
        selection.notices = enumerator
            .list_notices(community_id)
            .await?
            .into_iter()
            .map(|notice| notice.notice_id)
            .collect();
    }
    if let Some(board) = cli.board {
        selection.posts = enumerator.list_posts(community_id, board).await?;
    }
    Ok(selection)
}

async fn ensure_tools(
    config: &BerrizConfig,
    flags: &RunFlags,
    tools: &ToolPaths,
) -> Result<()> {
    if flags.key_only || flags.no_download {
        return Ok(());
    }
    let mut needed = Vec::new();
    if !flags.skip_mux {
        match config.container.mux {
            MuxTool::Ffmpeg => needed.push(&tools.ffmpeg),
            MuxTool::Mkvtoolnix => needed.push(&tools.mkvmerge),
        }
    }
    match config.container.decryption_engine {
        berriz_core::DecryptionEngine::Mp4decrypt => needed.push(&tools.mp4decrypt),
        berriz_core::DecryptionEngine::ShakaPackager => needed.push(&tools.packager),
    }
    tools.ensure_available(&needed).await?;
    Ok(())
}

fn build_backend(config: &BerrizConfig) -> Result<Box<dyn LicenseBackend>> {
    let user_agent = config.headers.user_agent.clone();
    let backend: Box<dyn LicenseBackend> = match DrmSource::from_config(&config.key_service.source)
    {
        DrmSource::Wv => {
            let path = WidevineClient::device_path_or_default(config.cdm.widevine.as_ref());
            Box::new(WidevineClient::from_wvd(&path, user_agent)?)
        }
        DrmSource::Mspr => {
            let path = PlayReadyClient::device_path_or_default(config.cdm.playready.as_ref());
            Box::new(PlayReadyClient::from_prd(&path, user_agent)?)
        }
        DrmSource::CdrmWv => Box::new(CdrmBackend {
            client: CdrmClient::new(user_agent)?,
            flavour: DrmSource::CdrmWv,
        }),
        DrmSource::CdrmMspr => Box::new(CdrmBackend {
            client: CdrmClient::new(user_agent)?,
            flavour: DrmSource::CdrmMspr,
        }),
        DrmSource::WatoraWv => {
            let api_key = std::env::var("WATORA_API_KEY").unwrap_or_default();
            Box::new(WatoraClient::new(api_key, user_agent)?)
        }
    };
    Ok(backend)
}

fn parse_window(values: Option<&[String]>) -> Result<TimeWindow> {
    let Some(values) = values else {
        return Ok(TimeWindow::default());
    };
    let [start, end] = values else {
        return Err(AppError::InvalidArgument(
            "--time takes exactly two timestamps".into(),
        ));
    };
    Ok(TimeWindow {
        start: Some(parse_timestamp(start)?),
        end: Some(parse_timestamp(end)?),
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        let at = date.and_hms_opt(0, 0, 0).expect("midnight is valid");
        return Ok(DateTime::from_naive_utc_and_offset(at, Utc));
    }
    Err(AppError::InvalidArgument(format!(
        "unreadable timestamp: {value}"
    )))
}

fn install_ctrl_c(cancel: CancelToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling jobs");
            cancel.cancel();
        }
    });
}
