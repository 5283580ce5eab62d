use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::errors::{ChanjingError, Result};

pub(crate) const ENV_APP_ID: &str = "CHANJING_APP_ID";
pub(crate) const ENV_SECRET_KEY: &str = "CHANJING_SECRET_KEY";

/// An `(app_id, secret_key)` pair issued by the Chanjing platform.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    app_id: String,
    secret_key: String,
}

impl Credentials {
    /// Build credentials from explicit values. Whitespace is trimmed.
    pub fn new(app_id: impl AsRef<str>, secret_key: impl AsRef<str>) -> Self {
        Self {
            app_id: app_id.as_ref().trim().to_string(),
            secret_key: secret_key.as_ref().trim().to_string(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    /// Hex SHA-256 of `app_id:secret_key`. Cached tokens carry this so a
    /// credential change invalidates them.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(format!("{}:{}", self.app_id, self.secret_key).as_bytes());
        let mut out = String::with_capacity(digest.len() * 2);
        for b in digest {
            out.push_str(&format!("{:02x}", b));
        }
        out
    }

    fn complete(app_id: &str, secret_key: &str) -> Option<Self> {
        let creds = Self::new(app_id, secret_key);
        (!creds.app_id.is_empty() && !creds.secret_key.is_empty()).then_some(creds)
    }

    /// Resolve credentials in priority order: explicit values, then the
    /// `CHANJING_APP_ID` / `CHANJING_SECRET_KEY` environment variables, then
    /// the JSON config file (`~/.chanjing/config.json` unless overridden).
    pub fn resolve(
        app_id: Option<&str>,
        secret_key: Option<&str>,
        config_file: Option<&Path>,
    ) -> Result<Self> {
        let default_config = default_config_file();
        let config_file = config_file.or(default_config.as_deref());
        Self::resolve_with(app_id, secret_key, |key| std::env::var(key).ok(), config_file)
    }

    /// Same as [`resolve`](Self::resolve) with an injectable environment lookup.
    pub fn resolve_with<E>(
        app_id: Option<&str>,
        secret_key: Option<&str>,
        env: E,
        config_file: Option<&Path>,
    ) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        if let (Some(id), Some(key)) = (app_id, secret_key) {
            if let Some(creds) = Self::complete(id, key) {
                return Ok(creds);
            }
        }

        let env_id = env(ENV_APP_ID).unwrap_or_default();
        let env_key = env(ENV_SECRET_KEY).unwrap_or_default();
        if let Some(creds) = Self::complete(&env_id, &env_key) {
            return Ok(creds);
        }

        if let Some(creds) = config_file.and_then(read_config_file) {
            return Ok(creds);
        }

        Err(ChanjingError::Config {
            message: format!(
                "no Chanjing credentials found. Configure one of:\n  \
                 1. ClientBuilder::credentials(app_id, secret_key)\n  \
                 2. the {ENV_APP_ID} and {ENV_SECRET_KEY} environment variables\n  \
                 3. a config file at {} with app_id / secret_key\n\
                 Get credentials at https://www.chanjing.cc/platform/api_keys",
                config_file
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "~/.chanjing/config.json".to_string())
            ),
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("secret_key", &"***")
            .finish()
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    app_id: String,
    #[serde(default)]
    secret_key: String,
}

/// Missing, unreadable or malformed files all count as "no credentials here".
fn read_config_file(path: &Path) -> Option<Credentials> {
    let raw = std::fs::read_to_string(path).ok()?;
    let config: ConfigFile = serde_json::from_str(&raw).ok()?;
    Credentials::complete(&config.app_id, &config.secret_key)
}

/// `~/.chanjing`
pub(crate) fn default_home_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".chanjing"))
}

/// `~/.chanjing/config.json`
pub fn default_config_file() -> Option<PathBuf> {
    default_home_dir().map(|dir| dir.join("config.json"))
}
