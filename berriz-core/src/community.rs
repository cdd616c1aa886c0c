//! Community name ↔ id resolution with on-disk JSON caches under
//! `static/`, falling back to the community-list endpoint.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::api::routes;
use crate::api::types::CommunityListData;
use crate::http::{HttpClient, HttpError};

#[derive(Debug, Error)]
pub enum CommunityError {
    #[error("community not found: {0}")]
    NotFound(String),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("cache is malformed: {0}")]
    Cache(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] HttpError),
}

pub type CommunityResult<T> = Result<T, CommunityError>;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CommunityCache {
    /// lowercase name or key → community id
    by_name: HashMap<String, i64>,
    /// community id → display name
    by_id: HashMap<i64, String>,
}

/// Resolves either direction of the community mapping, caching the list in
/// `static/community_keys.json`.
pub struct CommunityResolver {
    cache_path: PathBuf,
}

impl CommunityResolver {
    pub fn new(static_dir: impl AsRef<Path>) -> Self {
        Self {
            cache_path: static_dir.as_ref().join("community_keys.json"),
        }
    }

    pub async fn resolve(
        &self,
        http: &HttpClient,
        group: &str,
    ) -> CommunityResult<(i64, String)> {
        let mut cache = self.load_cache().await;
        if let Some(found) = lookup(&cache, group) {
            return Ok(found);
        }

        debug!(group, "community cache miss, fetching list");
        let data: CommunityListData = http
            .get(&routes::community_list(), &[("languageCode", "en".to_string())])
            .await?;
        for community in &data.communities {
            cache
                .by_name
                .insert(community.name.to_lowercase(), community.community_id);
            if let Some(key) = &community.community_key {
                cache
                    .by_name
                    .insert(key.to_lowercase(), community.community_id);
            }
            cache
                .by_id
                .insert(community.community_id, community.name.clone());
        }
        self.store_cache(&cache).await?;

        lookup(&cache, group).ok_or_else(|| CommunityError::NotFound(group.to_string()))
    }

    async fn load_cache(&self) -> CommunityCache {
        match tokio::fs::read_to_string(&self.cache_path).await {
            Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
            Err(_) => CommunityCache::default(),
        }
    }

    async fn store_cache(&self, cache: &CommunityCache) -> CommunityResult<()> {
        if let Some(parent) = self.cache_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CommunityError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
        }
        let content = serde_json::to_vec_pretty(cache)?;
        let tmp = self.cache_path.with_extension("tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|source| CommunityError::Io {
                source,
                path: tmp.clone(),
            })?;
        tokio::fs::rename(&tmp, &self.cache_path)
            .await
            .map_err(|source| CommunityError::Io {
                source,
                path: self.cache_path.clone(),
            })?;
        Ok(())
    }
}

fn lookup(cache: &CommunityCache, group: &str) -> Option<(i64, String)> {
    if let Ok(id) = group.parse::<i64>() {
        return cache.by_id.get(&id).map(|name| (id, name.clone()));
    }
    let id = *cache.by_name.get(&group.to_lowercase())?;
    let name = cache.by_id.get(&id).cloned().unwrap_or_else(|| group.to_string());
    Some((id, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name_and_id() {
        let mut cache = CommunityCache::default();
        cache.by_name.insert("ive".into(), 7);
        cache.by_id.insert(7, "IVE".into());
        assert_eq!(lookup(&cache, "IVE"), Some((7, "IVE".into())));
        assert_eq!(lookup(&cache, "7"), Some((7, "IVE".into())));
        assert_eq!(lookup(&cache, "unknown"), None);
    }
}
