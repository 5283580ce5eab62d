//! # Chanjing SDK for Rust
//!
//! Async client for the [Chanjing](https://www.chanjing.cc) AI media
//! platform: lip-sync videos, voice cloning and text-to-speech. Local files
//! are uploaded, remote jobs are polled to completion, and you get back a
//! result you can download.
//!
//! Credentials come from the builder, the `CHANJING_APP_ID` /
//! `CHANJING_SECRET_KEY` environment variables, or `~/.chanjing/config.json`,
//! in that order. Access tokens are cached in `~/.chanjing/cache/token.json`
//! and refreshed automatically.
//!
//! ## Quick start
//!
//! ```no_run
//! use chanjing::Client;
//!
//! #[tokio::main]
//! async fn main() -> chanjing::Result<()> {
//!     let client = Client::new("your-app-id", "your-secret-key")?;
//!
//!     // Lip-sync a video to new audio
//!     let video = client.lip_sync("video.mp4", "audio.wav", None).await?;
//!     video.download("out/lip_sync.mp4").await?;
//!
//!     // Clone a voice, then speak with it
//!     let voice_id = client.clone_voice("reference.wav", None).await?;
//!     let speech = client.tts(&voice_id, "Hello from a cloned voice.", None).await?;
//!     println!("{:.1}s of audio at {}", speech.duration, speech.audio_url);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Progress
//!
//! ```no_run
//! use std::sync::Arc;
//! use chanjing::{Client, TtsOptions};
//!
//! # async fn example(client: Client) -> chanjing::Result<()> {
//! let opts = TtsOptions {
//!     speed: 1.2,
//!     on_progress: Some(Arc::new(|stage: &str, pct: u8, msg: &str| {
//!         println!("[{stage}] {pct}% {msg}")
//!     })),
//!     ..TtsOptions::default()
//! };
//! client.tts("voice-id", "Faster now.", Some(opts)).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! The SDK emits [`tracing`] events and never installs a subscriber; wire up
//! whichever one your application uses.

mod api;
mod auth;
mod cache;
mod client;
mod credentials;
mod errors;
mod lip_sync;
mod models;
pub mod probe;
mod rate_limit;
mod tts;
mod upload;
mod util;
mod voice_clone;

pub use cache::{VoiceCloneCache, VoiceCloneEntry};
pub use client::{Client, ClientBuilder};
pub use credentials::{default_config_file, Credentials};
pub use errors::{ChanjingError, Result};
pub use models::{
    stage, Backway, CloneOptions, DriveMode, LipSyncModel, LipSyncOptions, LipSyncResult,
    ProgressFn, Timings, TtsOptions, TtsResult, VoiceModel,
};
pub use probe::{FfmpegProbe, MediaProbe, NoProbe};
pub use rate_limit::{RateCategory, RateLimits};
pub use util::{file_content_hash, format_duration, format_file_size, infer_extension_from_url};
