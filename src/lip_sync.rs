use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio::time::Instant;
use tracing::info;

use crate::api::{job_failure, Api, Call, FailureStreak};
use crate::errors::{ChanjingError, Result};
use crate::models::{
    percent, stage, LipSyncDetailData, LipSyncOptions, LipSyncResult, Reporter,
};
use crate::probe::{self, MediaProbe};
use crate::rate_limit::RateCategory;
use crate::upload::UploadService;

/// Used when the video's size can't be probed.
const FALLBACK_DIMENSIONS: (u32, u32) = (1080, 1920);

const QUEUED: i64 = 0;
const RUNNING: i64 = 10;
const SUCCEEDED: i64 = 20;
const FAILED: i64 = 30;

fn status_text(status: i64) -> String {
    match status {
        QUEUED => "queued".to_string(),
        RUNNING => "generating".to_string(),
        SUCCEEDED => "succeeded".to_string(),
        FAILED => "failed".to_string(),
        other => format!("unknown ({other})"),
    }
}

/// Upload both inputs, create the lip-sync task and wait for its video.
pub(crate) async fn create(
    api: &Api,
    probe: &Arc<dyn MediaProbe>,
    video: &Path,
    audio: &Path,
    opts: &LipSyncOptions,
) -> Result<LipSyncResult> {
    for path in [video, audio] {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ChanjingError::NotFound {
                path: path.to_path_buf(),
            });
        }
    }

    let reporter = Reporter::new(opts.on_progress.clone());
    reporter.report(stage::PREPARE, 0, "probing video dimensions");

    let video_path = video.to_path_buf();
    let (width, height) = match probe::run(probe, move |p| p.video_dimensions(&video_path)).await
    {
        Some(dims) => {
            info!(width = dims.0, height = dims.1, "video dimensions");
            dims
        }
        None => {
            info!(
                width = FALLBACK_DIMENSIONS.0,
                height = FALLBACK_DIMENSIONS.1,
                "video dimensions unknown, using defaults"
            );
            FALLBACK_DIMENSIONS
        }
    };

    reporter.report(stage::UPLOAD_VIDEO, 0, "uploading video");
    let video_file = api
        .upload_file(video, UploadService::LipSyncVideo, stage::UPLOAD_VIDEO, &reporter)
        .await?;

    reporter.report(stage::UPLOAD_AUDIO, 0, "uploading audio");
    let audio_file = api
        .upload_file(audio, UploadService::LipSyncAudio, stage::UPLOAD_AUDIO, &reporter)
        .await?;

    reporter.report(stage::LIP_SYNC, 0, "creating task");
    let task_id: String = api
        .call(
            Call::post(
                "/open/v1/video_lip_sync/create",
                json!({
                    "video_file_id": video_file.file_id,
                    "audio_type": "audio",
                    "audio_file_id": audio_file.file_id,
                    "model": opts.model.wire(),
                    "screen_width": width,
                    "screen_height": height,
                    "backway": opts.backway.wire(),
                    "drive_mode": opts.drive_mode.wire(),
                }),
            )
            .category(RateCategory::LipSync)
            .silent(),
        )
        .await?;
    info!(%task_id, "lip-sync task created");

    let (video_url, duration_ms) = poll(api, &task_id, &reporter).await?;

    reporter.report(stage::DONE, 100, "lip sync finished");
    Ok(LipSyncResult {
        video_url,
        task_id,
        duration_ms,
        http: api.http.clone(),
    })
}

/// Wait for a terminal status; returns `(video_url, duration_ms)`.
async fn poll(api: &Api, task_id: &str, reporter: &Reporter) -> Result<(String, u64)> {
    let max_wait = api.timings.lip_sync_max_wait;
    let start = Instant::now();
    let mut streak = FailureStreak::new("lip-sync polling");
    let mut last: Option<(i64, u8)> = None;

    info!(%task_id, "waiting for lip-sync video");
    loop {
        let waited = start.elapsed();
        if waited > max_wait {
            return Err(ChanjingError::Timeout {
                operation: format!("lip-sync task {task_id}"),
                waited,
            });
        }

        let detail = api
            .call::<LipSyncDetailData>(
                Call::get("/open/v1/video_lip_sync/detail")
                    .query("id", task_id)
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

        let progress = percent(detail.progress);
        if last != Some((detail.status, progress)) {
            let text = status_text(detail.status);
            info!("lip sync: {progress}% - {text}");
            reporter.report(stage::LIP_SYNC, progress, &text);
            last = Some((detail.status, progress));
        }

        match detail.status {
            SUCCEEDED => {
                let video_url = detail.video_url.unwrap_or_default();
                if video_url.is_empty() {
                    return Err(ChanjingError::Processing(
                        "lip sync finished without a video URL".into(),
                    ));
                }
                let duration_ms = detail.duration.unwrap_or(0.0).max(0.0).round() as u64;
                info!(seconds = duration_ms as f64 / 1000.0, "lip-sync video ready");
                return Ok((video_url, duration_ms));
            }
            FAILED => {
                return Err(job_failure(
                    "lip sync failed",
                    detail.msg.as_deref().unwrap_or_default(),
                ));
            }
            _ => tokio::time::sleep(api.timings.lip_sync_poll_interval).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_texts() {
        assert_eq!(status_text(0), "queued");
        assert_eq!(status_text(10), "generating");
        assert_eq!(status_text(7), "unknown (7)");
    }
}
