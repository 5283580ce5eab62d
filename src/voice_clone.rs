use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::api::{job_failure, Api, Call, FailureStreak};
use crate::auth::unix_now;
use crate::cache::VoiceCloneCache;
use crate::errors::{ChanjingError, Result};
use crate::models::{percent, stage, CloneOptions, Reporter, VoiceDetailData};
use crate::probe::{self, MediaProbe};
use crate::rate_limit::RateCategory;
use crate::upload::UploadService;
use crate::util::{file_content_hash, format_duration};

pub(crate) const MIN_REFERENCE: Duration = Duration::from_secs(15);
pub(crate) const MAX_REFERENCE: Duration = Duration::from_secs(300);
const TRIM_TO: Duration = Duration::from_secs(299);

const WAITING: i64 = 0;
const DONE: i64 = 2;
const EXPIRED: i64 = 3;
const FAILED: i64 = 4;
const DELETED: i64 = 99;

/// Clone the voice in `audio` and return the platform's voice id.
pub(crate) async fn clone(
    api: &Api,
    cache: &VoiceCloneCache,
    probe: &Arc<dyn MediaProbe>,
    audio: &Path,
    opts: &CloneOptions,
) -> Result<String> {
    if !tokio::fs::try_exists(audio).await.unwrap_or(false) {
        return Err(ChanjingError::NotFound {
            path: audio.to_path_buf(),
        });
    }
    let reporter = Reporter::new(opts.on_progress.clone());
    let model = opts.model.as_str();

    // Holds the trimmed copy alive until the upload is done.
    let trimmed = check_duration(probe, audio).await?;
    let audio: &Path = trimmed.as_deref().unwrap_or(audio);

    let audio_hash = file_content_hash(audio).await?;

    if opts.use_cache {
        if let Some(voice_id) = cache.get(&audio_hash, model).await {
            info!(%voice_id, "voice clone cache hit");
            if is_voice_usable(api, &voice_id).await {
                reporter.report(stage::VOICE_CLONE, 100, "cache hit");
                return Ok(voice_id);
            }
            info!(%voice_id, "cached voice no longer valid, cloning again");
            cache.remove(&audio_hash, model).await;
        }
    }

    reporter.report(stage::UPLOAD_AUDIO, 0, "uploading reference audio");
    let uploaded = api
        .upload_file(audio, UploadService::PromptAudio, stage::UPLOAD_AUDIO, &reporter)
        .await?;
    if uploaded.url.is_empty() {
        return Err(ChanjingError::Upload(
            "upload response carried no public URL".into(),
        ));
    }

    reporter.report(stage::VOICE_CLONE, 0, "creating clone task");
    let voice_id: String = api
        .call(
            Call::post(
                "/open/v1/create_customised_audio",
                json!({
                    "name": format!("clone_{}", unix_now() as u64),
                    "url": uploaded.url,
                    "model_type": model,
                }),
            )
            .category(RateCategory::VoiceClone),
        )
        .await?;
    info!(%voice_id, "voice clone task created");

    poll(api, &voice_id, &reporter).await?;

    if opts.use_cache {
        cache.put(&audio_hash, model, &voice_id).await;
        debug!(%voice_id, "voice clone cached");
    }
    Ok(voice_id)
}

/// Enforce the reference length window. Over-long audio is trimmed when the
/// probe can; the returned path must outlive every use of the trimmed file.
async fn check_duration(
    probe: &Arc<dyn MediaProbe>,
    audio: &Path,
) -> Result<Option<tempfile::TempPath>> {
    let path = audio.to_path_buf();
    let Some(duration) = probe::run(probe, move |p| p.audio_duration(&path)).await else {
        return Ok(None);
    };
    info!(duration = %format_duration(Some(duration)), "reference audio");

    if duration < MIN_REFERENCE {
        return Err(ChanjingError::Validation(format!(
            "reference audio too short: {} ({:.1}s), at least {}s required",
            format_duration(Some(duration)),
            duration.as_secs_f64(),
            MIN_REFERENCE.as_secs()
        )));
    }
    if duration <= MAX_REFERENCE {
        return Ok(None);
    }

    info!("reference audio longer than 5 minutes, trimming");
    match probe.trim_audio(audio, TRIM_TO).await {
        Some(trimmed) => {
            info!("trimmed reference audio to {}", format_duration(Some(TRIM_TO)));
            Ok(Some(trimmed))
        }
        None => Err(ChanjingError::Validation(format!(
            "reference audio too long: {} (max 5:00) and automatic trimming failed; \
             install ffmpeg or trim it manually",
            format_duration(Some(duration))
        ))),
    }
}

/// A cached voice is reusable only while the platform reports it done.
async fn is_voice_usable(api: &Api, voice_id: &str) -> bool {
    let detail = api
        .call::<VoiceDetailData>(
            Call::get("/open/v1/customised_audio")
                .query("id", voice_id)
                .category(RateCategory::VoiceClone),
        )
        .await;
    matches!(detail, Ok(d) if d.status == DONE)
}

async fn poll(api: &Api, voice_id: &str, reporter: &Reporter) -> Result<()> {
    let max_wait = api.timings.voice_clone_max_wait;
    let start = Instant::now();
    let mut streak = FailureStreak::new("voice clone polling");
    let mut last: Option<(i64, u8)> = None;

    info!(%voice_id, "waiting for voice clone");
    loop {
        let waited = start.elapsed();
        if waited > max_wait {
            return Err(ChanjingError::Timeout {
                operation: format!("voice clone {voice_id}"),
                waited,
            });
        }

        let detail = api
            .call::<VoiceDetailData>(
                Call::get("/open/v1/customised_audio")
                    .query("id", voice_id)
                    .category(RateCategory::VoiceClone)
                    .silent(),
            )
            .await;
        let detail = match detail {
            Ok(detail) => {
                streak.reset();
                detail
            }
            Err(e) => {
                streak.record(e)?;
                tokio::time::sleep(api.timings.error_backoff).await;
                continue;
            }
        };

        match detail.status {
            DONE => {
                reporter.report(stage::VOICE_CLONE, 100, "voice clone finished");
                info!(%voice_id, "voice clone finished");
                return Ok(());
            }
            FAILED => {
                return Err(job_failure(
                    "voice clone failed",
                    detail.err_msg.as_deref().unwrap_or("unknown error"),
                ));
            }
            EXPIRED => {
                return Err(ChanjingError::Processing(format!(
                    "voice clone task {voice_id} expired"
                )));
            }
            DELETED => {
                return Err(ChanjingError::Processing(format!(
                    "voice clone task {voice_id} was deleted"
                )));
            }
            status => {
                let progress = percent(detail.progress);
                if last != Some((status, progress)) {
                    let text = if status == WAITING { "waiting" } else { "producing" };
                    info!("voice clone: {progress}% - {text}");
                    reporter.report(stage::VOICE_CLONE, progress, text);
                    last = Some((status, progress));
                }
                tokio::time::sleep(api.timings.voice_clone_poll_interval).await;
            }
        }
    }
}
