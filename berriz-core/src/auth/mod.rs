pub mod pkce;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::api::error_codes::{ACCOUNT_SUSPENDED, REFRESH_TOKEN_INVALID};
use crate::api::types::{
    AuthenticateData, AuthorizeInitData, RefreshTokenData, TokenIssueData,
};
use crate::api::{routes, Envelope};
use crate::config::AccountSection;
use crate::cookies::{CookieError, CookieStore};

use self::pkce::PkceAuthorization;

/// Seconds before `refresh_time` at which the token counts as stale.
const REFRESH_MARGIN_SECS: f64 = 60.0;
/// Interval written after a successful refresh.
const REFRESH_PERIOD_MINS: i64 = 50;
/// Retries for every recoverable transition.
const MAX_AUTH_ATTEMPTS: usize = 5;

const AUTHORIZE_KEY_LEN: usize = 30;
const AUTH_CODE_LEN: usize = 30;
const ACCESS_TOKEN_LEN: usize = 598;
const MIN_REFRESH_TOKEN_LEN: usize = 80;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("account request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cookie state error: {0}")]
    Cookie(#[from] CookieError),
    #[error("account service returned {code}: {message}")]
    Domain { code: String, message: String },
    #[error("malformed account response: {0}")]
    Malformed(String),
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error("authentication is unrecoverable: {0}")]
    Terminal(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Hook for the interactive unban flow, which lives outside this crate.
/// The default (absent) handler turns a suspended account into a terminal
/// failure.
#[async_trait]
pub trait UnbanFlow: Send + Sync {
    async fn unban(&self, email: &str) -> AuthResult<()>;
}

/// Owns the session token lifecycle: refresh on schedule, full PKCE re-login
/// when the refresh token dies, and the 401/403 recovery path used by the
/// HTTP layer.
pub struct AuthClient {
    http: reqwest::Client,
    store: Arc<CookieStore>,
    credentials: AccountSection,
    user_agent: String,
    unban: Option<Arc<dyn UnbanFlow>>,
    recovery_lock: Mutex<()>,
}

impl AuthClient {
    pub fn new(
        store: Arc<CookieStore>,
        credentials: AccountSection,
        user_agent: String,
    ) -> AuthResult<Self> {
        // Redirects stay manual: the authorize step reads the Location
        // header instead of following it.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            store,
            credentials,
            user_agent,
            unban: None,
            recovery_lock: Mutex::new(()),
        })
    }

    pub fn with_unban_flow(mut self, flow: Arc<dyn UnbanFlow>) -> Self {
        self.unban = Some(flow);
        self
    }

    pub fn cookie_store(&self) -> &Arc<CookieStore> {
        &self.store
    }

    /// Entry point for the pipeline: guarantees a usable session, refreshing
    /// or re-logging-in as needed, and returns the request cookies.
    pub async fn ensure_session(&self) -> AuthResult<HashMap<String, String>> {
        if self.store.read_jar().await?.get("bz_r").is_none() {
            self.recover().await?;
        } else if self.should_refresh().await? {
            self.refresh_with_recovery().await?;
        }
        Ok(self.store.request_cookies().await?)
    }

    /// True when `refresh_time` is missing or within 60 s of now.
    pub async fn should_refresh(&self) -> AuthResult<bool> {
        let cache = self.store.read_cache().await?;
        if cache.refresh_time.is_empty() {
            return Ok(true);
        }
        let Ok(stamp) = cache.refresh_time.parse::<f64>() else {
            warn!(
                refresh_time = %cache.refresh_time,
                "unreadable refresh_time, forcing refresh"
            );
            return Ok(true);
        };
        let remaining = stamp - Utc::now().timestamp() as f64;
        Ok(remaining < REFRESH_MARGIN_SECS)
    }

    /// One refresh round-trip. `FS_AU4021` surfaces as a domain error for
    /// the caller to escalate.
    pub async fn refresh(&self) -> AuthResult<String> {
        let bz_r = self.store.current_refresh_token().await?;
        let cookies = self.store.request_cookies().await.unwrap_or_default();
        let body = serde_json::json!({ "clientId": routes::CLIENT_ID });

        let response = self
            .http
            .post(routes::token_refresh())
            .header("User-Agent", &self.user_agent)
            .header("Referer", format!("{}/", routes::BASE_HOST))
            .header("Origin", routes::BASE_HOST)
            .header("bz_r", &bz_r)
            .header("Cookie", cookie_header(&cookies))
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<RefreshTokenData> = decode(response).await?;
        let data = expect_data(envelope)?;

        if let Some(expiry) = decode_jwt_expiry(&data.access_token) {
            info!(expires_at = %expiry, "access token refreshed");
        }
        self.store.update_tokens(&data.access_token, &bz_r).await?;
        let next = Utc::now() + chrono::Duration::minutes(REFRESH_PERIOD_MINS);
        self.store
            .set_refresh_time(next.timestamp() as f64)
            .await?;
        Ok(data.access_token)
    }

    async fn refresh_with_recovery(&self) -> AuthResult<()> {
        match self.refresh().await {
            Ok(_) => Ok(()),
            Err(AuthError::Domain { code, .. }) if code == REFRESH_TOKEN_INVALID => {
                warn!("refresh token rejected, falling back to password login");
                self.recover().await
            }
            Err(err) => Err(err),
        }
    }

    /// 401/403 recovery used by the HTTP layer. Serialized so that parallel
    /// requests hitting an expired token trigger one refresh, not a stampede.
    pub async fn recover(&self) -> AuthResult<()> {
        let _guard = self.recovery_lock.lock().await;
        let mut last_error: Option<AuthError> = None;
        for attempt in 0..MAX_AUTH_ATTEMPTS {
            let result = match self.refresh().await {
                Ok(_) => return Ok(()),
                Err(AuthError::Domain { code, .. }) if code == REFRESH_TOKEN_INVALID => {
                    self.login_with_password().await
                }
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => return Ok(()),
                Err(err @ AuthError::Terminal(_)) => return Err(err),
                Err(err) => {
                    warn!(attempt = attempt + 1, error = %err, "auth recovery attempt failed");
                    last_error = Some(err);
                    sleep(Duration::from_secs(1)).await;
                }
            }
        }
        Err(AuthError::Terminal(format!(
            "authentication could not be recovered after {MAX_AUTH_ATTEMPTS} attempts: {}",
            last_error.map(|err| err.to_string()).unwrap_or_default()
        )))
    }

    /// Full PKCE login with the configured credentials.
    pub async fn login_with_password(&self) -> AuthResult<()> {
        if self.credentials.account.is_empty() || self.credentials.password.is_empty() {
            return Err(AuthError::Terminal(
                "no credentials configured for re-login".to_string(),
            ));
        }

        let pkce = PkceAuthorization::generate();

        let authorize_key = match self.authorize_init(&pkce).await {
            Err(AuthError::Domain { code, message }) if code == ACCOUNT_SUSPENDED => {
                let Some(flow) = &self.unban else {
                    return Err(AuthError::Terminal(format!(
                        "account suspended and no unban flow available: {message}"
                    )));
                };
                flow.unban(&self.credentials.account).await?;
                self.authorize_init(&pkce).await?
            }
            other => other?,
        };
        validate_key_len(&authorize_key, AUTHORIZE_KEY_LEN, "authorizeKey")?;

        let authenticate_key = self.authenticate(&pkce, &authorize_key).await?;
        validate_key_len(&authenticate_key, AUTHORIZE_KEY_LEN, "authenticateKey")?;

        let code = self.fetch_auth_code(&pkce, &authenticate_key).await?;
        validate_key_len(&code, AUTH_CODE_LEN, "code")?;

        let tokens = self.issue_tokens(&pkce, &code).await?;
        if tokens.access_token.len() != ACCESS_TOKEN_LEN {
            warn!(
                len = tokens.access_token.len(),
                "access token has unexpected length"
            );
        }
        if tokens.refresh_token.len() < MIN_REFRESH_TOKEN_LEN {
            return Err(AuthError::LoginFailed(format!(
                "refresh token too short ({} chars)",
                tokens.refresh_token.len()
            )));
        }

        self.store
            .update_tokens(&tokens.access_token, &tokens.refresh_token)
            .await?;
        let next = Utc::now() + chrono::Duration::minutes(REFRESH_PERIOD_MINS);
        self.store.set_refresh_time(next.timestamp() as f64).await?;
        info!("password login completed");
        Ok(())
    }

    async fn authorize_init(&self, pkce: &PkceAuthorization) -> AuthResult<String> {
        let body = serde_json::json!({
            "clientId": routes::CLIENT_ID,
            "challenge": pkce.challenge,
            "challengeMethod": "S256",
            "state": pkce.state,
        });
        let response = self
            .http
            .post(routes::authorize_init())
            .header("User-Agent", &self.user_agent)
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<AuthorizeInitData> = decode(response).await?;
        Ok(expect_data(envelope)?.authorize_key)
    }

    async fn authenticate(
        &self,
        pkce: &PkceAuthorization,
        authorize_key: &str,
    ) -> AuthResult<String> {
        let body = serde_json::json!({
            "clientId": routes::CLIENT_ID,
            "email": self.credentials.account,
            "password": self.credentials.password,
            "authorizeKey": authorize_key,
            "challenge": pkce.challenge,
            "state": pkce.state,
        });
        let response = self
            .http
            .post(routes::authenticate())
            .header("User-Agent", &self.user_agent)
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<AuthenticateData> = decode(response).await?;
        Ok(expect_data(envelope)?.authenticate_key)
    }

    async fn fetch_auth_code(
        &self,
        pkce: &PkceAuthorization,
        authenticate_key: &str,
    ) -> AuthResult<String> {
        let response = self
            .http
            .get(routes::authorize())
            .header("User-Agent", &self.user_agent)
            .query(&[
                ("clientId", routes::CLIENT_ID),
                ("challenge", &pkce.challenge),
                ("state", &pkce.state),
                ("authenticateKey", authenticate_key),
            ])
            .send()
            .await?;
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AuthError::Malformed("authorize redirect has no Location".into()))?;
        extract_auth_code(location)
    }

    async fn issue_tokens(
        &self,
        pkce: &PkceAuthorization,
        code: &str,
    ) -> AuthResult<TokenIssueData> {
        let body = serde_json::json!({
            "clientId": routes::CLIENT_ID,
            "code": code,
            "codeVerifier": pkce.verifier,
        });
        let response = self
            .http
            .post(routes::token_issue())
            .header("User-Agent", &self.user_agent)
            .json(&body)
            .send()
            .await?;
        let envelope: Envelope<TokenIssueData> = decode(response).await?;
        expect_data(envelope)
    }
}

fn cookie_header(cookies: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = cookies
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    pairs.sort();
    pairs.join("; ")
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> AuthResult<Envelope<T>> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|err| AuthError::Malformed(format!("{err}: {body}")))
}

fn expect_data<T>(envelope: Envelope<T>) -> AuthResult<T> {
    if !envelope.is_success() {
        return Err(AuthError::Domain {
            code: envelope.code,
            message: envelope.message.unwrap_or_default(),
        });
    }
    envelope
        .data
        .ok_or_else(|| AuthError::Malformed("success envelope without data".into()))
}

fn extract_auth_code(location: &str) -> AuthResult<String> {
    let prefix = routes::auth_code_prefix();
    let rest = location
        .strip_prefix(prefix.as_str())
        .ok_or_else(|| AuthError::Malformed(format!("unexpected redirect target: {location}")))?;
    let code = rest.split('&').next().unwrap_or_default();
    if code.is_empty() {
        return Err(AuthError::Malformed("redirect carries empty code".into()));
    }
    Ok(code.to_string())
}

fn validate_key_len(value: &str, expected: usize, label: &str) -> AuthResult<()> {
    if value.len() == expected {
        Ok(())
    } else {
        Err(AuthError::LoginFailed(format!(
            "{label} has length {} (expected {expected})",
            value.len()
        )))
    }
}

/// Reads `exp` from the JWT payload without verifying the signature; the
/// token is only inspected to log its expiry.
pub fn decode_jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_code_is_extracted_from_redirect() {
        let code = "x".repeat(30);
        let location = format!("https://berriz.in/auth/token?code={code}&state=abc");
        assert_eq!(extract_auth_code(&location).unwrap(), code);
    }

    #[test]
    fn foreign_redirect_is_rejected() {
        assert!(extract_auth_code("https://evil.example/?code=zzz").is_err());
    }

    #[test]
    fn jwt_expiry_decodes_unverified() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"exp": 1700000000}"#);
        let token = format!("eyJhbGciOiJub25lIn0.{payload}.sig");
        let expiry = decode_jwt_expiry(&token).unwrap();
        assert_eq!(expiry.timestamp(), 1_700_000_000);
    }

    #[test]
    fn key_length_validation() {
        assert!(validate_key_len(&"a".repeat(30), 30, "authorizeKey").is_ok());
        assert!(validate_key_len("short", 30, "authorizeKey").is_err());
    }
}
