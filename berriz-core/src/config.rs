use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Top-level YAML settings. Section and key names follow the platform's
/// published config file verbatim, misspellings included, so existing user
/// configs keep loading.
#[derive(Debug, Clone, Deserialize)]
pub struct BerrizConfig {
    #[serde(default)]
    pub duplicate: DuplicateSection,
    #[serde(default)]
    pub headers: HeadersSection,
    #[serde(default)]
    pub output_template: OutputTemplateSection,
    #[serde(rename = "Donwload_Dir_Name", default)]
    pub download_dir: DownloadDirSection,
    #[serde(rename = "Container", default)]
    pub container: ContainerSection,
    #[serde(rename = "HLS or MPEG-DASH", default)]
    pub stream: StreamSection,
    #[serde(rename = "TimeZone", default)]
    pub timezone: TimezoneSection,
    #[serde(rename = "KeyService", default)]
    pub key_service: KeyServiceSection,
    #[serde(rename = "CDM", default)]
    pub cdm: CdmSection,
    #[serde(rename = "berriz", default)]
    pub account: AccountSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(rename = "Proxy", default)]
    pub proxy: ProxySection,
}

impl BerrizConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            PathBuf::from(&self.download_dir.download_dir).join(path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DuplicateSection {
    #[serde(default = "default_true")]
    pub default: bool,
    #[serde(default)]
    pub overrides: DuplicateOverrides,
}

impl Default for DuplicateSection {
    fn default() -> Self {
        Self {
            default: true,
            overrides: DuplicateOverrides::default(),
        }
    }
}

/// Per-category dedup toggles. `false` means "record and skip duplicates".
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DuplicateOverrides {
    pub image: Option<bool>,
    pub video: Option<bool>,
    pub post: Option<bool>,
    pub notice: Option<bool>,
}

impl DuplicateSection {
    pub fn image(&self) -> bool {
        self.overrides.image.unwrap_or(self.default)
    }

    pub fn video(&self) -> bool {
        self.overrides.video.unwrap_or(self.default)
    }

    pub fn post(&self) -> bool {
        self.overrides.post.unwrap_or(self.default)
    }

    pub fn notice(&self) -> bool {
        self.overrides.notice.unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeadersSection {
    #[serde(rename = "User-Agent", default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HeadersSection {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputTemplateSection {
    #[serde(default = "default_video_template")]
    pub video: String,
    #[serde(default)]
    pub tag: String,
    #[serde(rename = "date_formact", default = "default_date_format")]
    pub date_format: String,
}

impl Default for OutputTemplateSection {
    fn default() -> Self {
        Self {
            video: default_video_template(),
            tag: String::new(),
            date_format: default_date_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadDirSection {
    #[serde(default = "default_download_dir")]
    pub download_dir: String,
    #[serde(default = "default_dir_template")]
    pub dir_name: String,
    #[serde(rename = "date_formact", default = "default_date_format")]
    pub date_format: String,
}

impl Default for DownloadDirSection {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            dir_name: default_dir_template(),
            date_format: default_date_format(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuxTool {
    Ffmpeg,
    Mkvtoolnix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecryptionEngine {
    Mp4decrypt,
    ShakaPackager,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSection {
    #[serde(default = "default_mux_tool")]
    pub mux: MuxTool,
    #[serde(default = "default_container")]
    pub video: String,
    #[serde(rename = "decryption-engine", default = "default_engine")]
    pub decryption_engine: DecryptionEngine,
}

impl Default for ContainerSection {
    fn default() -> Self {
        Self {
            mux: default_mux_tool(),
            video: default_container(),
            decryption_engine: default_engine(),
        }
    }
}

impl ContainerSection {
    /// mkvmerge can only emit Matroska; the configured extension is
    /// overridden in that case.
    pub fn effective_container(&self) -> &str {
        match self.mux {
            MuxTool::Mkvtoolnix => "mkv",
            MuxTool::Ffmpeg => &self.video,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamSection {
    #[serde(rename = "HLS", default)]
    pub prefer_hls: bool,
    #[serde(rename = "Video_Resolution_Choice", default = "default_choice")]
    pub video_choice: String,
    #[serde(rename = "Audio_Resolution_Choice", default = "default_choice")]
    pub audio_choice: String,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            prefer_hls: false,
            video_choice: default_choice(),
            audio_choice: default_choice(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimezoneSection {
    #[serde(default = "default_tz_offset")]
    pub time: i8,
}

impl Default for TimezoneSection {
    fn default() -> Self {
        Self {
            time: default_tz_offset(),
        }
    }
}

impl TimezoneSection {
    pub fn validated(&self) -> Result<i8> {
        if (-12..=14).contains(&self.time) {
            Ok(self.time)
        } else {
            Err(ConfigError::InvalidValue {
                key: "TimeZone.time",
                value: self.time.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyServiceSection {
    #[serde(default = "default_key_source")]
    pub source: String,
}

impl Default for KeyServiceSection {
    fn default() -> Self {
        Self {
            source: default_key_source(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CdmSection {
    pub widevine: Option<PathBuf>,
    pub playready: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AccountSection {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxySection {
    #[serde(rename = "Proxy_Enable", default)]
    pub enabled: bool,
    #[serde(default)]
    pub use_proxy_list: bool,
    #[serde(default = "default_proxy_scheme")]
    pub use_proxy: String,
    #[serde(default)]
    pub http: String,
    #[serde(default)]
    pub https: String,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            enabled: false,
            use_proxy_list: false,
            use_proxy: default_proxy_scheme(),
            http: String::new(),
            https: String::new(),
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BerrizConfig> {
    load_yaml(path)
}

fn load_yaml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

fn default_true() -> bool {
    true
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:130.0) Gecko/20100101 Firefox/130.0".to_string()
}

fn default_video_template() -> String {
    "{date} {community_name} {title}".to_string()
}

fn default_dir_template() -> String {
    "{date} {community_name} {title}".to_string()
}

fn default_date_format() -> String {
    "%y%m%d".to_string()
}

fn default_download_dir() -> String {
    ".".to_string()
}

fn default_mux_tool() -> MuxTool {
    MuxTool::Ffmpeg
}

fn default_container() -> String {
    "mp4".to_string()
}

fn default_engine() -> DecryptionEngine {
    DecryptionEngine::ShakaPackager
}

fn default_choice() -> String {
    "ask".to_string()
}

fn default_tz_offset() -> i8 {
    9
}

fn default_key_source() -> String {
    "wv".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "plain".to_string()
}

fn default_proxy_scheme() -> String {
    "http".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
duplicate:
  default: true
  overrides:
    video: false
headers:
  User-Agent: "test-agent/1.0"
output_template:
  video: "{date} {community_name} {artis} {title}"
  tag: "web"
  date_formact: "%Y%m%d"
Donwload_Dir_Name:
  download_dir: "downloads"
  dir_name: "{date} {title}"
  date_formact: "%y%m%d"
Container:
  mux: mkvtoolnix
  video: mp4
  decryption-engine: MP4DECRYPT
"HLS or MPEG-DASH":
  HLS: true
  Video_Resolution_Choice: "1080"
  Audio_Resolution_Choice: "128"
TimeZone:
  time: 9
KeyService:
  source: cdrm_wv
CDM:
  widevine: "devices/device.wvd"
berriz:
  account: "user@example.com"
  password: "hunter2"
logging:
  level: debug
  format: plain
Proxy:
  Proxy_Enable: false
"#;

    #[test]
    fn parses_full_sample() {
        let config: BerrizConfig = serde_yaml::from_str(SAMPLE).expect("sample should parse");
        assert!(!config.duplicate.video());
        assert!(config.duplicate.image());
        assert_eq!(config.headers.user_agent, "test-agent/1.0");
        assert_eq!(config.output_template.date_format, "%Y%m%d");
        assert_eq!(config.download_dir.download_dir, "downloads");
        assert_eq!(config.container.mux, MuxTool::Mkvtoolnix);
        assert_eq!(config.container.effective_container(), "mkv");
        assert!(config.stream.prefer_hls);
        assert_eq!(config.stream.video_choice, "1080");
        assert_eq!(config.key_service.source, "cdrm_wv");
        assert_eq!(
            config.cdm.widevine.as_deref(),
            Some(Path::new("devices/device.wvd"))
        );
        assert_eq!(config.timezone.validated().unwrap(), 9);
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config: BerrizConfig = serde_yaml::from_str("{}").expect("defaults should apply");
        assert!(config.duplicate.video());
        assert_eq!(config.container.mux, MuxTool::Ffmpeg);
        assert_eq!(config.container.effective_container(), "mp4");
        assert_eq!(config.key_service.source, "wv");
        assert_eq!(config.timezone.time, 9);
        assert_eq!(config.stream.video_choice, "ask");
    }

    #[test]
    fn timezone_out_of_range_is_rejected() {
        let section = TimezoneSection { time: 15 };
        assert!(section.validated().is_err());
    }
}
