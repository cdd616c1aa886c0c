pub mod playready;
pub mod remote;
pub mod resolver;
pub mod widevine;

use thiserror::Error;

use crate::vault::VaultError;

#[derive(Debug, Error)]
pub enum DrmError {
    #[error("license request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("license server returned status {0}")]
    LicenseStatus(u16),
    #[error("widevine cdm error: {0}")]
    Widevine(String),
    #[error("playready cdm error: {0}")]
    PlayReady(String),
    #[error("invalid pssh: {0}")]
    Pssh(String),
    #[error("remote cdm rejected request: {0}")]
    Remote(String),
    #[error("cdm device blob missing: {0}")]
    DeviceMissing(String),
    #[error("no decryption keys could be obtained")]
    NoKeys,
    #[error("key vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DrmResult<T> = Result<T, DrmError>;

/// Which backend answers license challenges. Stored as the `drm_type` label
/// in the key vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrmSource {
    /// Local Widevine CDM from a .wvd device blob.
    Wv,
    /// Local PlayReady CDM from a .prd device blob.
    Mspr,
    /// Remote Widevine proxy with bearer auth.
    WatoraWv,
    /// Remote decrypt proxy, Widevine flavour.
    CdrmWv,
    /// Remote decrypt proxy, PlayReady flavour.
    CdrmMspr,
}

impl DrmSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrmSource::Wv => "wv",
            DrmSource::Mspr => "mspr",
            DrmSource::WatoraWv => "watora_wv",
            DrmSource::CdrmWv => "cdrm_wv",
            DrmSource::CdrmMspr => "cdrm_mspr",
        }
    }

    /// Unrecognized config values fall back to the local Widevine CDM.
    pub fn from_config(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "mspr" => DrmSource::Mspr,
            "watora_wv" => DrmSource::WatoraWv,
            "cdrm_wv" => DrmSource::CdrmWv,
            "cdrm_mspr" => DrmSource::CdrmMspr,
            "wv" => DrmSource::Wv,
            other => {
                tracing::warn!(source = other, "unknown KeyService.source, using wv");
                DrmSource::Wv
            }
        }
    }
}

impl std::fmt::Display for DrmSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_parsing_with_fallback() {
        assert_eq!(DrmSource::from_config("wv"), DrmSource::Wv);
        assert_eq!(DrmSource::from_config("MSPR"), DrmSource::Mspr);
        assert_eq!(DrmSource::from_config("cdrm_mspr"), DrmSource::CdrmMspr);
        assert_eq!(DrmSource::from_config("watora_wv"), DrmSource::WatoraWv);
        assert_eq!(DrmSource::from_config("something-else"), DrmSource::Wv);
    }
}
