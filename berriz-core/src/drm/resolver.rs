//! Key resolution: vault lookup first, license exchange on a miss, and the
//! resulting keys persisted under every PSSH they were derived from.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::api::types::PlaybackContext;
use crate::api::routes;
use crate::manifest::pssh::PsshSet;
use crate::vault::KeyVault;

use super::playready::PlayReadyClient;
use super::remote::{CdrmClient, WatoraClient};
use super::widevine::WidevineClient;
use super::{DrmError, DrmResult, DrmSource};

/// A license backend answers a challenge for one PSSH. The concrete clients
/// implement this; tests substitute their own.
#[async_trait]
pub trait LicenseBackend: Send + Sync {
    fn source(&self) -> DrmSource;
    async fn request_keys(&self, pssh: &str, context: &PlaybackContext)
        -> DrmResult<Vec<String>>;
}

pub struct KeyResolver {
    vault: KeyVault,
    backend: Box<dyn LicenseBackend>,
}

impl KeyResolver {
    pub fn new(vault: KeyVault, backend: Box<dyn LicenseBackend>) -> Self {
        Self { vault, backend }
    }

    /// The single entry point: returns `kid:key` strings for a protected
    /// playback context.
    pub async fn get_keys(
        &self,
        context: &PlaybackContext,
        pssh_set: &PsshSet,
    ) -> DrmResult<Vec<String>> {
        if pssh_set.is_empty() {
            return Err(DrmError::Pssh("manifest carries no pssh".into()));
        }

        for pssh in pssh_set.all() {
            if let Some(value) = self.vault.retrieve(pssh)? {
                info!(pssh = truncate(pssh), "key vault hit");
                return Ok(split_keys(&value.as_key_string()));
            }
        }

        let pool = self.pssh_pool(pssh_set);
        if pool.is_empty() {
            return Err(DrmError::Pssh(format!(
                "no {} pssh available for backend {}",
                pool_kind(self.backend.source()),
                self.backend.source()
            )));
        }

        let mut collected = Vec::new();
        for pssh in pool {
            debug!(pssh = truncate(pssh), backend = %self.backend.source(), "requesting license");
            let keys = self.backend.request_keys(pssh, context).await?;
            collected.extend(keys);
        }
        collected.dedup();
        if collected.is_empty() {
            return Err(DrmError::NoKeys);
        }

        let stored = collected.join(" ");
        for pssh in pool {
            self.vault
                .store_key(pssh, &stored, self.backend.source().as_str())?;
        }
        Ok(collected)
    }

    fn pssh_pool<'a>(&self, set: &'a PsshSet) -> &'a Vec<String> {
        match self.backend.source() {
            DrmSource::Wv | DrmSource::WatoraWv | DrmSource::CdrmWv => &set.widevine,
            DrmSource::Mspr | DrmSource::CdrmMspr => &set.playready,
        }
    }
}

fn pool_kind(source: DrmSource) -> &'static str {
    match source {
        DrmSource::Wv | DrmSource::WatoraWv | DrmSource::CdrmWv => "widevine",
        DrmSource::Mspr | DrmSource::CdrmMspr => "playready",
    }
}

fn split_keys(value: &str) -> Vec<String> {
    value
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

fn truncate(pssh: &str) -> &str {
    &pssh[..pssh.len().min(24)]
}

#[async_trait]
impl LicenseBackend for WidevineClient {
    fn source(&self) -> DrmSource {
        DrmSource::Wv
    }

    async fn request_keys(
        &self,
        pssh: &str,
        context: &PlaybackContext,
    ) -> DrmResult<Vec<String>> {
        let license_url = context
            .license_urls
            .widevine
            .clone()
            .unwrap_or_else(routes::widevine_license);
        self.get_license_keys(pssh, &license_url, &context.assertion)
            .await
    }
}

#[async_trait]
impl LicenseBackend for PlayReadyClient {
    fn source(&self) -> DrmSource {
        DrmSource::Mspr
    }

    async fn request_keys(
        &self,
        pssh: &str,
        context: &PlaybackContext,
    ) -> DrmResult<Vec<String>> {
        let license_url = context
            .license_urls
            .playready
            .clone()
            .unwrap_or_else(routes::playready_license);
        self.get_license_keys(pssh, &license_url, &context.assertion)
            .await
    }
}

/// Wrapper giving the shared decrypt proxy its two vault labels.
pub struct CdrmBackend {
    pub client: CdrmClient,
    pub flavour: DrmSource,
}

#[async_trait]
impl LicenseBackend for CdrmBackend {
    fn source(&self) -> DrmSource {
        self.flavour
    }

    async fn request_keys(
        &self,
        pssh: &str,
        context: &PlaybackContext,
    ) -> DrmResult<Vec<String>> {
        self.client.get_license_keys(pssh, &context.assertion).await
    }
}

#[async_trait]
impl LicenseBackend for WatoraClient {
    fn source(&self) -> DrmSource {
        DrmSource::WatoraWv
    }

    async fn request_keys(
        &self,
        pssh: &str,
        context: &PlaybackContext,
    ) -> DrmResult<Vec<String>> {
        self.get_license_keys(pssh, &context.assertion).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct CountingBackend {
        calls: Arc<AtomicUsize>,
        source: DrmSource,
    }

    #[async_trait]
    impl LicenseBackend for CountingBackend {
        fn source(&self) -> DrmSource {
            self.source
        }

        async fn request_keys(
            &self,
            _pssh: &str,
            _context: &PlaybackContext,
        ) -> DrmResult<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["1111:aaaa".to_string(), "2222:bbbb".to_string()])
        }
    }

    fn wv_set() -> PsshSet {
        let mut pssh = "A".repeat(75);
        pssh.push('=');
        PsshSet {
            widevine: vec![pssh],
            playready: vec![],
        }
    }

    #[tokio::test]
    async fn miss_requests_license_then_hits_vault() {
        let dir = tempdir().unwrap();
        let vault = KeyVault::new(dir.path().join("vault.db")).unwrap();
        vault.initialize().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = KeyResolver::new(
            vault.clone(),
            Box::new(CountingBackend {
                calls: Arc::clone(&calls),
                source: DrmSource::Wv,
            }),
        );
        let context = PlaybackContext {
            is_drm: true,
            assertion: "assert".into(),
            ..PlaybackContext::default()
        };
        let set = wv_set();

        let keys = resolver.get_keys(&context, &set).await.unwrap();
        assert_eq!(keys, vec!["1111:aaaa", "2222:bbbb"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let (value, drm) = vault
            .retrieve_with_drm(&set.widevine[0])
            .unwrap()
            .unwrap();
        assert_eq!(value.as_key_string(), "1111:aaaa 2222:bbbb");
        assert_eq!(drm, "wv");

        // Second resolution is served from the vault without a license POST.
        let keys = resolver.get_keys(&context, &set).await.unwrap();
        assert_eq!(keys, vec!["1111:aaaa", "2222:bbbb"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backend_without_matching_pssh_kind_fails() {
        let dir = tempdir().unwrap();
        let vault = KeyVault::new(dir.path().join("vault.db")).unwrap();
        vault.initialize().unwrap();
        let resolver = KeyResolver::new(
            vault,
            Box::new(CountingBackend {
                calls: Arc::new(AtomicUsize::new(0)),
                source: DrmSource::Mspr,
            }),
        );
        let context = PlaybackContext::default();
        let result = resolver.get_keys(&context, &wv_set()).await;
        assert!(matches!(result, Err(DrmError::Pssh(_))));
    }

    #[tokio::test]
    async fn empty_pssh_set_is_rejected() {
        let dir = tempdir().unwrap();
        let vault = KeyVault::new(dir.path().join("vault.db")).unwrap();
        vault.initialize().unwrap();
        let resolver = KeyResolver::new(
            vault,
            Box::new(CountingBackend {
                calls: Arc::new(AtomicUsize::new(0)),
                source: DrmSource::Wv,
            }),
        );
        let result = resolver
            .get_keys(&PlaybackContext::default(), &PsshSet::default())
            .await;
        assert!(matches!(result, Err(DrmError::Pssh(_))));
    }
}
