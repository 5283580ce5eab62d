//! Voice cloning + text-to-speech.
//!
//! Run with:
//!   CHANJING_APP_ID=... CHANJING_SECRET_KEY=... cargo run --example voice_clone -- sample.wav

use std::sync::Arc;

use chanjing::{Client, CloneOptions, ProgressFn, TtsOptions, VoiceModel};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> chanjing::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chanjing=info")),
        )
        .init();

    let reference = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sample_audio.wav".to_string());
    let client = Client::from_env()?;

    let progress: ProgressFn = Arc::new(|stage: &str, pct: u8, msg: &str| {
        println!("  [{stage}] {pct}% - {msg}");
    });

    // -----------------------------------------------------------------------
    // 1. One call: clone, then speak
    // -----------------------------------------------------------------------
    let clone_opts = CloneOptions {
        model: VoiceModel::Cicada3Turbo,
        on_progress: Some(progress.clone()),
        ..CloneOptions::default()
    };
    let tts_opts = TtsOptions {
        on_progress: Some(progress.clone()),
        ..TtsOptions::default()
    };
    let result = client
        .voice_clone_and_speak(
            &reference,
            "Hello, this speech was synthesized with a cloned voice.",
            Some(clone_opts.clone()),
            Some(tts_opts),
        )
        .await?;
    println!("Audio URL: {} ({:.1}s)", result.audio_url, result.duration);
    result.download("output/clone_speak.mp3").await?;

    // -----------------------------------------------------------------------
    // 2. Step by step; the clone is served from the local cache this time
    // -----------------------------------------------------------------------
    let voice_id = client.clone_voice(&reference, Some(clone_opts)).await?;
    println!("Voice id: {voice_id}");

    for (i, text) in ["First test sentence.", "Second one, a bit faster."]
        .iter()
        .enumerate()
    {
        let opts = TtsOptions {
            speed: 1.0 + i as f32 * 0.3,
            on_progress: Some(progress.clone()),
            ..TtsOptions::default()
        };
        let result = client.tts(&voice_id, text, Some(opts)).await?;
        let path = format!("output/tts_{}{}", i + 1, result.suggested_extension());
        result.download(&path).await?;
        println!("Saved {path} ({:.1}s)", result.duration);
    }

    Ok(())
}
