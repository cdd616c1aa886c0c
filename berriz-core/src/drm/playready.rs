//! Local PlayReady CDM backend. Each WRM header yields one SOAP challenge;
//! the license response is XML rather than binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use drm_playready::{Device, Session};
use drm_playready::core::PsshBox;
use tracing::debug;

use super::{DrmError, DrmResult};

pub struct PlayReadyClient {
    /// Raw .prd contents; a fresh device/session pair is opened per
    /// license exchange.
    device_blob: Vec<u8>,
    http: reqwest::Client,
    user_agent: String,
}

impl PlayReadyClient {
    pub fn from_prd(path: &Path, user_agent: String) -> DrmResult<Self> {
        if !path.exists() {
            return Err(DrmError::DeviceMissing(path.display().to_string()));
        }
        let device_blob = std::fs::read(path)?;
        Device::from_bytes(&device_blob).map_err(|err| DrmError::PlayReady(err.to_string()))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(13))
            .build()?;
        Ok(Self {
            device_blob,
            http,
            user_agent,
        })
    }

    pub fn device_path_or_default(configured: Option<&PathBuf>) -> PathBuf {
        configured
            .cloned()
            .unwrap_or_else(|| PathBuf::from("devices/device.prd"))
    }

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

        let device = Device::from_bytes(&self.device_blob)
            .map_err(|err| DrmError::PlayReady(err.to_string()))?;
        let mut session = Session::new(device);
        let challenge = session
            .build_license_challenge(&pssh)
            .map_err(|err| DrmError::PlayReady(err.to_string()))?;
        debug!(bytes = challenge.len(), "built playready challenge");

        let response = self
            .http
            .post(license_url)
            .header("User-Agent", &self.user_agent)
            .header("Connection", "Keep-Alive")
            .header("Content-Type", "text/xml; charset=utf-8")
            .header("acquirelicenseassertion", assertion)
            .body(challenge)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DrmError::LicenseStatus(status.as_u16()));
        }
        let license = response.bytes().await?;

        let keys: Vec<String> = session
            .parse_license_response(&license)
            .map_err(|err| DrmError::PlayReady(err.to_string()))?
            .iter()
            .map(|key| key.to_string())
            .collect();
        if keys.is_empty() {
            return Err(DrmError::NoKeys);
        }
        Ok(keys)
    }
}
