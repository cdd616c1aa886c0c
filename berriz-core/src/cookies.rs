use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

/// Seed access token written when the side-car is reset after an account
/// change. The next refresh replaces it.
pub const PLACEHOLDER_ACCESS_TOKEN: &str =
    "eyJpc3MiOiJhY2NvdW50LmJlcnJpei5pbiIsImlkcE5hbWUiOiJHT09HTEUifQ";

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("malformed cookie line {line_no}: {line}")]
    MalformedLine { line_no: usize, line: String },
    #[error("cookie cache is malformed: {0}")]
    Cache(#[from] serde_json::Error),
    #[error("required cookie missing: {0}")]
    MissingCookie(&'static str),
}

pub type CookieResult<T> = Result<T, CookieError>;

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CookieError + '_ {
    move |source| CookieError::Io {
        source,
        path: path.to_path_buf(),
    }
}

/// One row of a Netscape-format cookie file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieLine {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub expiry: i64,
    pub name: String,
    pub value: String,
}

impl CookieLine {
    fn serialize(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            self.domain,
            if self.include_subdomains {
                "TRUE"
            } else {
                "FALSE"
            },
            self.path,
            if self.secure { "TRUE" } else { "FALSE" },
            self.expiry,
            self.name,
            self.value,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum JarLine {
    Raw(String),
    Cookie(CookieLine),
}

/// In-memory view of the Netscape cookie file. Comment and blank lines are
/// preserved byte-for-byte so a rewrite only touches cookie rows.
#[derive(Debug, Clone, Default)]
pub struct NetscapeJar {
    lines: Vec<JarLine>,
}

impl NetscapeJar {
    pub fn parse(content: &str) -> CookieResult<Self> {
        let mut lines = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.starts_with('#') || line.trim().is_empty() {
                lines.push(JarLine::Raw(line.to_string()));
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 7 {
                return Err(CookieError::MalformedLine {
                    line_no: index + 1,
                    line: line.to_string(),
                });
            }
            lines.push(JarLine::Cookie(CookieLine {
                domain: fields[0].to_string(),
                include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
                path: fields[2].to_string(),
                secure: fields[3].eq_ignore_ascii_case("TRUE"),
                expiry: fields[4].parse().unwrap_or(0),
                name: fields[5].to_string(),
                value: fields[6].to_string(),
            }));
        }
        Ok(Self { lines })
    }

    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                JarLine::Raw(raw) => out.push_str(raw),
                JarLine::Cookie(cookie) => out.push_str(&cookie.serialize()),
            }
            out.push('\n');
        }
        out
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            JarLine::Cookie(cookie) if cookie.name == name => Some(cookie.value.as_str()),
            _ => None,
        })
    }

    pub fn set(&mut self, name: &str, value: &str) -> bool {
        let mut updated = false;
        for line in &mut self.lines {
            if let JarLine::Cookie(cookie) = line {
                if cookie.name == name {
                    cookie.value = value.to_string();
                    updated = true;
                }
            }
        }
        updated
    }

    pub fn cookies(&self) -> HashMap<String, String> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                JarLine::Cookie(cookie) => Some((cookie.name.clone(), cookie.value.clone())),
                _ => None,
            })
            .collect()
    }
}

/// Token side-car. Authoritative for tokens during a run; the Netscape file
/// is authoritative across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCache {
    #[serde(default)]
    pub bz_a: String,
    #[serde(default)]
    pub bz_r: String,
    #[serde(default)]
    pub pcid: String,
    #[serde(default)]
    pub refresh_time: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheFile {
    cache_cookie: TokenCache,
}

/// On-disk cookie state: the Netscape jar plus the JSON token cache.
/// All writes go through write-to-temp-then-rename; a single async mutex
/// serializes writers within the process.
#[derive(Debug)]
pub struct CookieStore {
    netscape_path: PathBuf,
    cache_path: PathBuf,
    lock: Mutex<()>,
}

impl CookieStore {
    pub fn new(netscape_path: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            netscape_path: netscape_path.into(),
            cache_path: cache_path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn netscape_path(&self) -> &Path {
        &self.netscape_path
    }

    pub async fn read_jar(&self) -> CookieResult<NetscapeJar> {
        if !self.netscape_path.exists() {
            return Ok(NetscapeJar::default());
        }
        let content = fs::read_to_string(&self.netscape_path)
            .await
            .map_err(io_err(&self.netscape_path))?;
        NetscapeJar::parse(&content)
    }

    pub async fn read_cache(&self) -> CookieResult<TokenCache> {
        if !self.cache_path.exists() {
            return Ok(TokenCache::default());
        }
        let content = fs::read_to_string(&self.cache_path)
            .await
            .map_err(io_err(&self.cache_path))?;
        if content.trim().is_empty() {
            return Ok(TokenCache::default());
        }
        let file: CacheFile = serde_json::from_str(&content)?;
        Ok(file.cache_cookie)
    }

    pub async fn write_cache(&self, cache: &TokenCache) -> CookieResult<()> {
        let _guard = self.lock.lock().await;
        self.write_cache_locked(cache).await
    }

    async fn write_cache_locked(&self, cache: &TokenCache) -> CookieResult<()> {
        let file = CacheFile {
            cache_cookie: cache.clone(),
        };
        let content = serde_json::to_vec_pretty(&file)?;
        atomic_write(&self.cache_path, &content).await
    }

    /// Rewrites `bz_a`/`bz_r` in both files, leaving every other cookie row
    /// untouched.
    pub async fn update_tokens(&self, bz_a: &str, bz_r: &str) -> CookieResult<()> {
        let _guard = self.lock.lock().await;

        let mut jar = if self.netscape_path.exists() {
            let content = fs::read_to_string(&self.netscape_path)
                .await
                .map_err(io_err(&self.netscape_path))?;
            NetscapeJar::parse(&content)?
        } else {
            NetscapeJar::default()
        };
        jar.set("bz_a", bz_a);
        jar.set("bz_r", bz_r);
        atomic_write(&self.netscape_path, jar.serialize().as_bytes()).await?;

        let mut cache = match self.read_cache().await {
            Ok(cache) => cache,
            Err(CookieError::Cache(_)) => TokenCache::default(),
            Err(err) => return Err(err),
        };
        cache.bz_a = bz_a.to_string();
        cache.bz_r = bz_r.to_string();
        self.write_cache_locked(&cache).await
    }

    /// Merged cookie map for outbound requests: the jar, overlaid with the
    /// fresher side-car tokens.
    pub async fn request_cookies(&self) -> CookieResult<HashMap<String, String>> {
        let jar = self.read_jar().await?;
        let cache = self.read_cache().await?;
        let mut cookies = jar.cookies();
        if !cache.bz_a.is_empty() {
            cookies.insert("bz_a".to_string(), cache.bz_a.clone());
        }
        if !cache.bz_r.is_empty() {
            cookies.insert("bz_r".to_string(), cache.bz_r.clone());
        }
        if !cache.pcid.is_empty() {
            cookies.insert("pcid".to_string(), cache.pcid.clone());
        }
        if !cookies.contains_key("pcid") {
            return Err(CookieError::MissingCookie("pcid"));
        }
        Ok(cookies)
    }

    /// The refresh token, reconciling the side-car against the jar. When the
    /// jar carries a different long-lived `bz_r` (the account was switched
    /// outside this process), the side-car is reset and reseeded from it.
    pub async fn current_refresh_token(&self) -> CookieResult<String> {
        let jar = self.read_jar().await?;
        let jar_bz_r = jar.get("bz_r").unwrap_or_default().to_string();
        let cache = self.read_cache().await?;

        if cache.bz_r.len() > 79 && !jar_bz_r.is_empty() && cache.bz_r != jar_bz_r {
            info!("account change detected, resetting token cache");
            let reset = TokenCache {
                bz_a: PLACEHOLDER_ACCESS_TOKEN.to_string(),
                bz_r: jar_bz_r.clone(),
                pcid: jar.get("pcid").unwrap_or_default().to_string(),
                refresh_time: String::new(),
            };
            self.write_cache(&reset).await?;
            return Ok(jar_bz_r);
        }

        if !jar_bz_r.is_empty() {
            if cache.bz_r != jar_bz_r {
                let mut cache = cache;
                cache.bz_r = jar_bz_r.clone();
                self.write_cache(&cache).await?;
            }
            return Ok(jar_bz_r);
        }

        if !cache.bz_r.is_empty() {
            return Ok(cache.bz_r);
        }
        Err(CookieError::MissingCookie("bz_r"))
    }

    pub async fn set_refresh_time(&self, unix_seconds: f64) -> CookieResult<()> {
        let _guard = self.lock.lock().await;
        let mut cache = self.read_cache().await?;
        cache.refresh_time = format!("{unix_seconds}");
        self.write_cache_locked(&cache).await
    }
}

async fn atomic_write(path: &Path, content: &[u8]) -> CookieResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(io_err(parent))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content).await.map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).await.map_err(io_err(path))?;
    Ok(())
}
