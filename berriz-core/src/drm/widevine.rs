//! Local Widevine CDM backend: device blob → session → challenge → license
//! → content keys.

use std::path::{Path, PathBuf};
use std::time::Duration;

use drm_widevine::{Device, LicenseType, PsshBox, Session};
use tracing::debug;

use super::{DrmError, DrmResult};

pub struct WidevineClient {
    device: Device,
    http: reqwest::Client,
    user_agent: String,
}

impl WidevineClient {
    pub fn from_wvd(path: &Path, user_agent: String) -> DrmResult<Self> {
        if !path.exists() {
            return Err(DrmError::DeviceMissing(path.display().to_string()));
        }
        let bytes = std::fs::read(path)?;
        let device =
            Device::from_bytes(&bytes).map_err(|err| DrmError::Widevine(err.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(13))
            .build()?;
        Ok(Self {
            device,
            http,
            user_agent,
        })
    }

    pub fn device_path_or_default(configured: Option<&PathBuf>) -> PathBuf {
        configured
            .cloned()
            .unwrap_or_else(|| PathBuf::from("devices/device.wvd"))
    }

    /// One license round-trip for a single PSSH. Returns `kid:key` strings
    /// for every content key in the license.
    pub async fn get_license_keys(
        &self,
        pssh_b64: &str,
        license_url: &str,
        assertion: &str,
    ) -> DrmResult<Vec<String>> {
        if pssh_b64.is_empty() {
            return Err(DrmError::Pssh("empty pssh".into()));
        }
        let pssh =
            PsshBox::from_base64(pssh_b64).map_err(|err| DrmError::Pssh(err.to_string()))?;

        let mut session = Session::new(self.device.clone());
        let challenge = session
            .build_license_challenge(&pssh, LicenseType::Streaming)
            .map_err(|err| DrmError::Widevine(err.to_string()))?;
        debug!(bytes = challenge.len(), "built widevine challenge");

        let response = self
            .http
            .post(license_url)
            .header("User-Agent", &self.user_agent)
            .header("Connection", "Keep-Alive")
            .header("Content-Type", "application/octet-stream")
            .header("acquirelicenseassertion", assertion)
            .body(challenge)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DrmError::LicenseStatus(status.as_u16()));
        }
        let license = response.bytes().await?;

        session
            .parse_license_response(&license)
            .map_err(|err| DrmError::Widevine(err.to_string()))?;
        let keys: Vec<String> = session
            .content_keys()
            .iter()
            .map(|key| key.to_string())
            .collect();
        if keys.is_empty() {
            return Err(DrmError::NoKeys);
        }
        Ok(keys)
    }
}
