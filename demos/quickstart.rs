//! Quick-start example for the Chanjing Rust SDK: lip-sync a video.
//!
//! Run with:
//!   CHANJING_APP_ID=... CHANJING_SECRET_KEY=... cargo run --example quickstart -- video.mp4 audio.wav
//!
//! Set `RUST_LOG=chanjing=debug` for more detail.

use std::sync::Arc;

use chanjing::{Backway, ClientBuilder, LipSyncModel, LipSyncOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> chanjing::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chanjing=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let video = args.next().unwrap_or_else(|| "video.mp4".to_string());
    let audio = args.next().unwrap_or_else(|| "audio.wav".to_string());

    // -----------------------------------------------------------------------
    // 1. Create a client (reads credentials from env or ~/.chanjing/config.json)
    // -----------------------------------------------------------------------
    let client = ClientBuilder::new().build()?;

    // Or provide them directly:
    // let client = chanjing::Client::new("your-app-id", "your-secret-key")?;

    // -----------------------------------------------------------------------
    // 2. Lip-sync with a progress callback
    // -----------------------------------------------------------------------
    let opts = LipSyncOptions {
        model: LipSyncModel::Pro,
        backway: Backway::Forward,
        on_progress: Some(Arc::new(|stage: &str, pct: u8, msg: &str| {
            println!("  [{stage}] {pct}% - {msg}");
        })),
        ..LipSyncOptions::default()
    };

    let result = client.lip_sync(&video, &audio, Some(opts)).await?;

    println!("Task {} completed!", result.task_id);
    println!("Video URL: {}", result.video_url);
    println!("Duration: {:.1}s", result.duration_ms as f64 / 1000.0);

    // -----------------------------------------------------------------------
    // 3. Save it locally
    // -----------------------------------------------------------------------
    let out = format!("output/lip_sync{}", result.suggested_extension());
    let path = result.download(&out).await?;
    println!("Saved to {}", path.display());

    Ok(())
}
