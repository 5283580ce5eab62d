use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::errors::Result;
use crate::util::infer_extension_from_url;

/// Progress callback: `(stage, percent, message)`.
///
/// Percentages are non-decreasing within one stage; a new stage may start
/// again from 0. See [`stage`] for the stage names.
pub type ProgressFn = Arc<dyn Fn(&str, u8, &str) + Send + Sync>;

/// Stage names passed to [`ProgressFn`].
pub mod stage {
    pub const PREPARE: &str = "prepare";
    pub const UPLOAD_VIDEO: &str = "upload video";
    pub const UPLOAD_AUDIO: &str = "upload audio";
    pub const LIP_SYNC: &str = "lip sync";
    pub const VOICE_CLONE: &str = "voice clone";
    pub const TTS: &str = "tts";
    pub const DONE: &str = "done";
}

/// Thin wrapper so services can report without checking for a callback.
#[derive(Clone, Default)]
pub(crate) struct Reporter(Option<ProgressFn>);

impl Reporter {
    pub fn new(callback: Option<ProgressFn>) -> Self {
        Self(callback)
    }

    pub fn report(&self, stage: &str, percent: u8, message: &str) {
        if let Some(cb) = &self.0 {
            cb(stage, percent.min(100), message);
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Lip-sync model quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LipSyncModel {
    Standard,
    /// Sharper lips and teeth.
    #[default]
    Pro,
}

impl LipSyncModel {
    pub(crate) fn wire(self) -> u8 {
        match self {
            LipSyncModel::Standard => 0,
            LipSyncModel::Pro => 1,
        }
    }
}

/// Playback direction of the source video while driving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backway {
    #[default]
    Forward,
    Reverse,
}

impl Backway {
    pub(crate) fn wire(self) -> u8 {
        match self {
            Backway::Forward => 1,
            Backway::Reverse => 2,
        }
    }
}

/// How source frames are picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveMode {
    #[default]
    Normal,
    Random,
}

impl DriveMode {
    pub(crate) fn wire(self) -> &'static str {
        match self {
            DriveMode::Normal => "",
            DriveMode::Random => "random",
        }
    }
}

/// Voice cloning model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VoiceModel {
    #[default]
    Cicada3Turbo,
    Cicada3,
    Cicada1,
}

impl VoiceModel {
    pub fn as_str(self) -> &'static str {
        match self {
            VoiceModel::Cicada3Turbo => "cicada3.0-turbo",
            VoiceModel::Cicada3 => "cicada3.0",
            VoiceModel::Cicada1 => "cicada1.0",
        }
    }
}

/// Options for [`Client::lip_sync`](crate::Client::lip_sync).
#[derive(Clone, Default)]
pub struct LipSyncOptions {
    pub model: LipSyncModel,
    pub backway: Backway,
    pub drive_mode: DriveMode,
    pub on_progress: Option<ProgressFn>,
}

/// Options for [`Client::clone_voice`](crate::Client::clone_voice).
#[derive(Clone)]
pub struct CloneOptions {
    pub model: VoiceModel,
    /// Reuse an earlier clone of the same audio + model. Default: true.
    pub use_cache: bool,
    pub on_progress: Option<ProgressFn>,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            model: VoiceModel::default(),
            use_cache: true,
            on_progress: None,
        }
    }
}

/// Options for [`Client::tts`](crate::Client::tts).
#[derive(Clone)]
pub struct TtsOptions {
    /// 0.5 to 2.0. Default: 1.0.
    pub speed: f32,
    /// 0.1 to 3.0. Default: 1.0.
    pub pitch: f32,
    pub on_progress: Option<ProgressFn>,
}

impl Default for TtsOptions {
    fn default() -> Self {
        Self {
            speed: 1.0,
            pitch: 1.0,
            on_progress: None,
        }
    }
}

/// Poll intervals and maximum waits of every polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Default: 3s.
    pub file_poll_interval: Duration,
    /// Default: 90s.
    pub file_max_wait: Duration,
    /// Default: 5s.
    pub lip_sync_poll_interval: Duration,
    /// Default: 30min.
    pub lip_sync_max_wait: Duration,
    /// Default: 5s.
    pub voice_clone_poll_interval: Duration,
    /// Default: 10min.
    pub voice_clone_max_wait: Duration,
    /// Used for the first 10 TTS polls. Default: 3s.
    pub tts_fast_poll_interval: Duration,
    /// Default: 5s.
    pub tts_poll_interval: Duration,
    /// Default: 10min.
    pub tts_max_wait: Duration,
    /// Pause after a failed status query. Default: 5s.
    pub error_backoff: Duration,
}

impl Timings {
    /// Same maximum waits, every interval set to `interval`.
    pub fn with_poll_interval(interval: Duration) -> Self {
        Self {
            file_poll_interval: interval,
            lip_sync_poll_interval: interval,
            voice_clone_poll_interval: interval,
            tts_fast_poll_interval: interval,
            tts_poll_interval: interval,
            error_backoff: interval,
            ..Self::default()
        }
    }
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            file_poll_interval: Duration::from_secs(3),
            file_max_wait: Duration::from_secs(90),
            lip_sync_poll_interval: Duration::from_secs(5),
            lip_sync_max_wait: Duration::from_secs(1800),
            voice_clone_poll_interval: Duration::from_secs(5),
            voice_clone_max_wait: Duration::from_secs(600),
            tts_fast_poll_interval: Duration::from_secs(3),
            tts_poll_interval: Duration::from_secs(5),
            tts_max_wait: Duration::from_secs(600),
            error_backoff: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A finished lip-sync video.
#[derive(Debug, Clone)]
pub struct LipSyncResult {
    pub video_url: String,
    pub task_id: String,
    pub duration_ms: u64,
    pub(crate) http: reqwest::Client,
}

impl LipSyncResult {
    /// Stream the video to `path`, creating parent directories.
    pub async fn download(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        download(&self.http, &self.video_url, path.as_ref()).await
    }

    /// File extension implied by the result URL, `.mp4` if none.
    pub fn suggested_extension(&self) -> &'static str {
        infer_extension_from_url(&self.video_url, ".mp4")
    }
}

/// A finished speech synthesis.
#[derive(Debug, Clone)]
pub struct TtsResult {
    pub audio_url: String,
    pub task_id: String,
    /// Seconds.
    pub duration: f64,
    pub(crate) http: reqwest::Client,
}

impl TtsResult {
    /// Stream the audio to `path`, creating parent directories.
    pub async fn download(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        download(&self.http, &self.audio_url, path.as_ref()).await
    }

    /// File extension implied by the result URL, `.mp3` if none.
    pub fn suggested_extension(&self) -> &'static str {
        infer_extension_from_url(&self.audio_url, ".mp3")
    }
}

async fn download(http: &reqwest::Client, url: &str, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let response = http
        .get(url)
        .send()
        .await?
        .error_for_status()?;

    let mut file = tokio::fs::File::create(path).await?;
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;

    info!(path = %path.display(), "downloaded result");
    Ok(path.to_path_buf())
}

// ---------------------------------------------------------------------------
// Wire types (not part of the public API surface)
// ---------------------------------------------------------------------------

/// `{code, msg, data}` wrapper every business endpoint answers with.
#[derive(Deserialize)]
pub(crate) struct Envelope {
    pub code: i64,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// POST /open/v1/access_token
#[derive(Deserialize)]
pub(crate) struct AccessTokenData {
    #[serde(default)]
    pub access_token: Option<String>,
}

/// GET /open/v1/common/create_upload_url
#[derive(Deserialize)]
pub(crate) struct UploadUrlData {
    pub sign_url: String,
    pub file_id: String,
    #[serde(default)]
    pub full_path: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// GET /open/v1/common/file_detail
#[derive(Deserialize)]
pub(crate) struct FileDetailData {
    #[serde(default)]
    pub status: i64,
}

/// GET /open/v1/video_lip_sync/detail
#[derive(Deserialize)]
pub(crate) struct LipSyncDetailData {
    pub status: i64,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    /// Milliseconds; sometimes sent as a float.
    #[serde(default)]
    pub duration: Option<f64>,
}

/// GET /open/v1/customised_audio
#[derive(Deserialize)]
pub(crate) struct VoiceDetailData {
    pub status: i64,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub err_msg: Option<String>,
}

/// POST /open/v1/create_audio_task
#[derive(Deserialize)]
pub(crate) struct TtsCreateData {
    pub task_id: String,
}

/// POST /open/v1/audio_task_state
#[derive(Deserialize)]
pub(crate) struct TtsStateData {
    pub status: i64,
    #[serde(default, rename = "errMsg")]
    pub err_msg: Option<String>,
    #[serde(default, rename = "errReason")]
    pub err_reason: Option<String>,
    #[serde(default)]
    pub full: Option<TtsAudio>,
}

#[derive(Deserialize)]
pub(crate) struct TtsAudio {
    #[serde(default)]
    pub url: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Clamp a server-side progress value into `0..=100`. The platform sends
/// integers or floats.
pub(crate) fn percent(progress: Option<f64>) -> u8 {
    progress.unwrap_or(0.0).clamp(0.0, 100.0) as u8
}
