use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::credentials::Credentials;
use crate::errors::{ChanjingError, Result};

/// Tokens are treated as valid for this long after issuance.
pub(crate) const TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Refresh this long before the recorded expiry.
pub(crate) const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

const TOKEN_CACHE_FILE: &str = "token.json";

/// On-disk shape of `token.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CachedToken {
    pub access_token: String,
    /// Unix seconds.
    pub expire_time: f64,
    pub config_hash: String,
}

impl CachedToken {
    pub fn is_usable(&self, fingerprint: &str, now: f64) -> bool {
        !self.access_token.is_empty()
            && self.config_hash == fingerprint
            && now < self.expire_time - REFRESH_MARGIN.as_secs_f64()
    }
}

pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Owns the credentials and the current access token.
///
/// The token lives in memory and in `<cache_dir>/token.json`, so a fresh
/// process reuses it until it nears expiry.
pub(crate) struct AuthManager {
    credentials: Credentials,
    fingerprint: String,
    cache_file: PathBuf,
    state: Mutex<TokenState>,
}

#[derive(Default)]
struct TokenState {
    current: Option<CachedToken>,
    /// Token the server refused; never reloaded from disk.
    rejected: Option<String>,
}

impl AuthManager {
    pub fn new(credentials: Credentials, cache_dir: &Path) -> Self {
        Self {
            fingerprint: credentials.fingerprint(),
            credentials,
            cache_file: cache_dir.join(TOKEN_CACHE_FILE),
            state: Mutex::new(TokenState::default()),
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Return a usable token, issuing a new one through `issue` only when
    /// neither memory nor disk holds a valid token for these credentials.
    pub async fn get_token<F, Fut>(&self, issue: F) -> Result<String>
    where
        F: FnOnce(Credentials) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let mut state = self.state.lock().await;
        let now = unix_now();

        if let Some(token) = state.current.as_ref() {
            if token.is_usable(&self.fingerprint, now) {
                return Ok(token.access_token.clone());
            }
        }

        if let Some(token) = self.load().await {
            let rejected = state.rejected.as_deref() == Some(token.access_token.as_str());
            if !rejected && token.is_usable(&self.fingerprint, now) {
                debug!("using cached access token");
                let access_token = token.access_token.clone();
                state.current = Some(token);
                return Ok(access_token);
            }
        }
        state.current = None;

        info!("requesting access token");
        let access_token = issue(self.credentials.clone()).await?;
        if access_token.is_empty() {
            return Err(ChanjingError::Api {
                code: 0,
                message: "access_token in response is empty, check app_id / secret_key".into(),
            });
        }

        let token = CachedToken {
            access_token: access_token.clone(),
            expire_time: unix_now() + TOKEN_TTL.as_secs_f64(),
            config_hash: self.fingerprint.clone(),
        };
        self.save(&token).await;
        state.current = Some(token);
        state.rejected = None;
        info!("access token issued and cached");

        Ok(access_token)
    }

    /// Forget the current token after the server rejected it. The next
    /// [`get_token`](Self::get_token) issues a new one instead of reloading
    /// the rejected token from disk.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        if let Some(token) = state.current.take() {
            state.rejected = Some(token.access_token);
        }
    }

    async fn load(&self) -> Option<CachedToken> {
        let raw = tokio::fs::read(&self.cache_file).await.ok()?;
        serde_json::from_slice(&raw).ok()
    }

    async fn save(&self, token: &CachedToken) {
        let write = async {
            if let Some(dir) = self.cache_file.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            let body = serde_json::to_vec_pretty(token)?;
            tokio::fs::write(&self.cache_file, body).await?;
            Ok::<_, ChanjingError>(())
        };
        if let Err(e) = write.await {
            warn!(error = %e, "failed to persist token cache");
        }
    }
}
