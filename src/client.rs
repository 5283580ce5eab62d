use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::api::{
    Api, CONNECT_TIMEOUT, DEFAULT_BASE_URL, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY,
    DEFAULT_TIMEOUT, READ_TIMEOUT,
};
use crate::auth::AuthManager;
use crate::cache::VoiceCloneCache;
use crate::credentials::{default_home_dir, Credentials};
use crate::errors::{ChanjingError, Result};
use crate::models::{CloneOptions, LipSyncOptions, LipSyncResult, Timings, TtsOptions, TtsResult};
use crate::probe::{default_probe, MediaProbe};
use crate::rate_limit::{RateLimiter, RateLimits};
use crate::{lip_sync, tts, voice_clone};

/// Builder for constructing a [`Client`] with custom configuration.
///
/// # Example
///
/// ```no_run
/// use chanjing::ClientBuilder;
/// use std::time::Duration;
///
/// # fn example() -> chanjing::Result<()> {
/// let client = ClientBuilder::new()
///     .credentials("your-app-id", "your-secret-key")
///     .cache_dir("/tmp/chanjing-cache")
///     .max_retries(5)
///     .timeout(Duration::from_secs(60))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    app_id: Option<String>,
    secret_key: Option<String>,
    config_file: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
    timeout: Duration,
    connect_timeout: Duration,
    read_timeout: Duration,
    rate_limits: RateLimits,
    timings: Timings,
    probe: Option<Arc<dyn MediaProbe>>,
}

impl ClientBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            app_id: None,
            secret_key: None,
            config_file: None,
            cache_dir: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: CONNECT_TIMEOUT,
            read_timeout: READ_TIMEOUT,
            rate_limits: RateLimits::default(),
            timings: Timings::default(),
            probe: None,
        }
    }

    /// Set both halves of the platform credentials.
    pub fn credentials(mut self, app_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    /// Read fallback credentials from this file instead of `~/.chanjing/config.json`.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Where `token.json` and `voice_clone.json` live (defaults to `~/.chanjing/cache`).
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    /// Override the base URL (defaults to `https://open-api.chanjing.cc`).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Attempts per request for connection errors and timeouts (defaults to 3).
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Pause between those attempts (defaults to 3 seconds).
    pub fn retry_delay(mut self, d: Duration) -> Self {
        self.retry_delay = d;
        self
    }

    /// Set the per-request timeout of API calls (defaults to 30 seconds).
    ///
    /// Uploads and result downloads are not bound by it; they only give up
    /// when the connection stalls.
    pub fn timeout(mut self, d: Duration) -> Self {
        self.timeout = d;
        self
    }

    /// How long establishing a connection may take (defaults to 15 seconds).
    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    /// How long a single read may stall, uploads and downloads included
    /// (defaults to 120 seconds).
    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.read_timeout = d;
        self
    }

    /// Replace the per-category request spacing.
    pub fn rate_limits(mut self, limits: RateLimits) -> Self {
        self.rate_limits = limits;
        self
    }

    /// Replace the polling intervals and maximum waits.
    pub fn timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    /// Use this media probe instead of auto-detecting ffprobe.
    pub fn probe(mut self, probe: Arc<dyn MediaProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Build the [`Client`].
    ///
    /// Credentials not given via [`credentials`](Self::credentials) are read
    /// from `CHANJING_APP_ID` / `CHANJING_SECRET_KEY`, then from the config
    /// file. Returns [`ChanjingError::Config`] if none is complete.
    pub fn build(self) -> Result<Client> {
        let credentials = Credentials::resolve(
            self.app_id.as_deref(),
            self.secret_key.as_deref(),
            self.config_file.as_deref(),
        )?;

        let cache_dir = self
            .cache_dir
            .or_else(|| default_home_dir().map(|home| home.join("cache")))
            .ok_or_else(|| ChanjingError::Config {
                message: "cannot determine a home directory; set ClientBuilder::cache_dir()"
                    .into(),
            })?;

        let http = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .read_timeout(self.read_timeout)
            .build()
            .map_err(ChanjingError::Http)?;

        let api = Api::new(
            http,
            self.base_url,
            AuthManager::new(credentials, &cache_dir),
            RateLimiter::new(self.rate_limits),
            self.max_retries,
            self.retry_delay,
            self.timeout,
            self.timings,
        );

        Ok(Client {
            api,
            voice_cache: VoiceCloneCache::new(&cache_dir),
            probe: self.probe.unwrap_or_else(default_probe),
            cache_dir,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The Chanjing API client.
///
/// Use [`Client::new`] for quick construction or [`ClientBuilder`] for full control.
///
/// # Example
///
/// ```no_run
/// use chanjing::Client;
///
/// # async fn example() -> chanjing::Result<()> {
/// let client = Client::new("your-app-id", "your-secret-key")?;
///
/// let result = client.lip_sync("video.mp4", "audio.wav", None).await?;
/// result.download("out/lip_sync.mp4").await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    api: Api,
    voice_cache: VoiceCloneCache,
    probe: Arc<dyn MediaProbe>,
    cache_dir: PathBuf,
}

impl Client {
    /// Create a client with explicit credentials and default settings.
    ///
    /// For customization, use [`ClientBuilder`] instead.
    pub fn new(app_id: impl Into<String>, secret_key: impl Into<String>) -> Result<Self> {
        ClientBuilder::new().credentials(app_id, secret_key).build()
    }

    /// Create a client from environment variables or the config file.
    pub fn from_env() -> Result<Self> {
        ClientBuilder::new().build()
    }

    /// The app id in use.
    pub fn app_id(&self) -> &str {
        self.api.credentials().app_id()
    }

    /// Directory holding the token and voice clone caches.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// A valid access token, issuing and caching one if needed.
    pub async fn access_token(&self) -> Result<String> {
        self.api.access_token().await
    }

    /// Drive `video` with `audio` and wait for the lip-synced video.
    ///
    /// Uploads both files, creates the task, then polls every 5 seconds for up
    /// to 30 minutes.
    ///
    /// # Errors
    ///
    /// - [`ChanjingError::NotFound`] if either file is missing.
    /// - [`ChanjingError::Billing`] if the account balance is insufficient.
    /// - [`ChanjingError::Processing`] if the task fails.
    /// - [`ChanjingError::Timeout`] if polling exceeds the maximum wait.
    pub async fn lip_sync(
        &self,
        video: impl AsRef<Path>,
        audio: impl AsRef<Path>,
        opts: Option<LipSyncOptions>,
    ) -> Result<LipSyncResult> {
        let opts = opts.unwrap_or_default();
        lip_sync::create(&self.api, &self.probe, video.as_ref(), audio.as_ref(), &opts).await
    }

    /// Clone the voice of a 15s to 5min reference recording and return its
    /// voice id.
    ///
    /// With caching enabled (the default) the same audio content and model
    /// reuse the earlier voice id as long as the platform still accepts it.
    ///
    /// # Errors
    ///
    /// - [`ChanjingError::Validation`] if the audio is shorter than 15 seconds,
    ///   or longer than 5 minutes and cannot be trimmed.
    /// - [`ChanjingError::Processing`] if cloning fails, expires or is deleted.
    pub async fn clone_voice(
        &self,
        reference_audio: impl AsRef<Path>,
        opts: Option<CloneOptions>,
    ) -> Result<String> {
        let opts = opts.unwrap_or_default();
        voice_clone::clone(
            &self.api,
            &self.voice_cache,
            &self.probe,
            reference_audio.as_ref(),
            &opts,
        )
        .await
    }

    /// Synthesize up to 4000 characters of `text` with a cloned voice.
    ///
    /// # Errors
    ///
    /// - [`ChanjingError::Validation`] for empty or over-long text, or speed /
    ///   pitch out of range.
    /// - [`ChanjingError::Billing`] if the account balance is insufficient.
    pub async fn tts(
        &self,
        voice_id: &str,
        text: &str,
        opts: Option<TtsOptions>,
    ) -> Result<TtsResult> {
        let opts = opts.unwrap_or_default();
        tts::synthesize(&self.api, voice_id, text, &opts).await
    }

    /// [`clone_voice`](Self::clone_voice) followed by [`tts`](Self::tts) with
    /// the resulting voice.
    pub async fn voice_clone_and_speak(
        &self,
        reference_audio: impl AsRef<Path>,
        text: &str,
        clone_opts: Option<CloneOptions>,
        tts_opts: Option<TtsOptions>,
    ) -> Result<TtsResult> {
        let tts_opts = tts_opts.unwrap_or_default();
        tts::validate(text, &tts_opts)?;
        let voice_id = self.clone_voice(reference_audio, clone_opts).await?;
        self.tts(&voice_id, text, Some(tts_opts)).await
    }
}
