use serde_json::json;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::api::{job_failure, Api, Call, FailureStreak};
use crate::errors::{ChanjingError, Result};
use crate::models::{stage, Reporter, TtsCreateData, TtsOptions, TtsResult, TtsStateData};
use crate::rate_limit::RateCategory;

pub(crate) const MAX_TEXT_CHARS: usize = 4000;

const RUNNING: i64 = 1;
const FINISHED: i64 = 9;

/// Polls before the heuristic switches from coarse to fine steps.
const COARSE_POLLS: u32 = 6;
/// Polls before the loop slows down to the regular interval.
const FAST_POLLS: u32 = 10;

/// The state endpoint reports no percentage, so estimate one from the
/// number of "running" answers seen so far.
pub(crate) fn estimated_percent(polls: u32) -> u8 {
    if polls <= COARSE_POLLS {
        (polls * 15).min(90) as u8
    } else {
        (90 + (polls - COARSE_POLLS)).min(95) as u8
    }
}

pub(crate) fn validate(text: &str, opts: &TtsOptions) -> Result<()> {
    if text.trim().is_empty() {
        return Err(ChanjingError::Validation("text must not be empty".into()));
    }
    let chars = text.chars().count();
    if chars > MAX_TEXT_CHARS {
        return Err(ChanjingError::Validation(format!(
            "text too long: {chars}/{MAX_TEXT_CHARS} characters"
        )));
    }
    if !(0.5..=2.0).contains(&opts.speed) {
        return Err(ChanjingError::Validation(format!(
            "speed {} outside 0.5..=2.0",
            opts.speed
        )));
    }
    if !(0.1..=3.0).contains(&opts.pitch) {
        return Err(ChanjingError::Validation(format!(
            "pitch {} outside 0.1..=3.0",
            opts.pitch
        )));
    }
    Ok(())
}

/// Synthesize `text` with a cloned voice.
pub(crate) async fn synthesize(
    api: &Api,
    voice_id: &str,
    text: &str,
    opts: &TtsOptions,
) -> Result<TtsResult> {
    validate(text, opts)?;
    let reporter = Reporter::new(opts.on_progress.clone());

    reporter.report(stage::TTS, 0, "creating synthesis task");
    let created: TtsCreateData = api
        .call(
            Call::post(
                "/open/v1/create_audio_task",
                json!({
                    "audio_man": voice_id,
                    "speed": opts.speed,
                    "pitch": opts.pitch,
                    "text": { "text": text, "plain_text": text },
                }),
            )
            .category(RateCategory::Tts),
        )
        .await?;
    let task_id = created.task_id;
    info!(%task_id, "tts task created");

    let (audio_url, duration) = poll(api, &task_id, &reporter).await?;

    reporter.report(stage::TTS, 100, "synthesis finished");
    Ok(TtsResult {
        audio_url,
        task_id,
        duration,
        http: api.http.clone(),
    })
}

/// Wait for status 9; returns `(audio_url, duration_seconds)`.
async fn poll(api: &Api, task_id: &str, reporter: &Reporter) -> Result<(String, f64)> {
    let max_wait = api.timings.tts_max_wait;
    let start = Instant::now();
    let mut streak = FailureStreak::new("tts polling");
    let mut polls = 0u32;

    info!(%task_id, "waiting for synthesis");
    loop {
        let waited = start.elapsed();
        if waited > max_wait {
            return Err(ChanjingError::Timeout {
                operation: format!("tts task {task_id}"),
                waited,
            });
        }

        let state = api
            .call::<TtsStateData>(
                Call::post("/open/v1/audio_task_state", json!({ "task_id": task_id }))
                    .category(RateCategory::Tts)
                    .silent(),
            )
            .await;
        let state = match state {
            Ok(state) => {
                streak.reset();
                state
            }
            Err(e) => {
                streak.record(e)?;
                tokio::time::sleep(api.timings.error_backoff).await;
                continue;
            }
        };

        match state.status {
            FINISHED => return finished(task_id, state),
            RUNNING => {
                polls += 1;
                reporter.report(stage::TTS, estimated_percent(polls), "synthesizing");
                let pause = if polls <= FAST_POLLS {
                    api.timings.tts_fast_poll_interval
                } else {
                    api.timings.tts_poll_interval
                };
                tokio::time::sleep(pause).await;
            }
            other => {
                polls += 1;
                warn!(status = other, "tts returned an unknown status");
                tokio::time::sleep(api.timings.tts_poll_interval).await;
            }
        }
    }
}

/// Status 9 covers both outcomes; a non-empty `errMsg` means failure.
fn finished(task_id: &str, state: TtsStateData) -> Result<(String, f64)> {
    let err_msg = state.err_msg.unwrap_or_default();
    if !err_msg.is_empty() {
        let detail = match state.err_reason.filter(|r| !r.is_empty()) {
            Some(reason) => format!("{err_msg} (reason: {reason})"),
            None => err_msg,
        };
        return Err(job_failure("tts failed", &detail));
    }

    let audio = state.full;
    let audio_url = audio
        .as_ref()
        .and_then(|a| a.url.clone())
        .unwrap_or_default();
    if audio_url.is_empty() {
        return Err(ChanjingError::Processing(format!(
            "tts task {task_id} finished without an audio URL"
        )));
    }
    let duration = audio.and_then(|a| a.duration).unwrap_or(0.0);
    info!(seconds = duration, "synthesis finished");
    Ok((audio_url, duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_grows_then_plateaus() {
        let seq: Vec<u8> = (1..=15).map(estimated_percent).collect();
        assert_eq!(&seq[..7], &[15, 30, 45, 60, 75, 90, 91]);
        assert!(seq.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seq.last().unwrap(), 95);
    }

    #[test]
    fn rejects_bad_text() {
        let opts = TtsOptions::default();
        assert!(validate("   ", &opts).is_err());
        assert!(validate(&"字".repeat(MAX_TEXT_CHARS), &opts).is_ok());
        assert!(validate(&"字".repeat(MAX_TEXT_CHARS + 1), &opts).is_err());
    }

    #[test]
    fn rejects_out_of_range_voice_params() {
        let fast = TtsOptions {
            speed: 2.5,
            ..TtsOptions::default()
        };
        assert!(matches!(validate("hi", &fast), Err(ChanjingError::Validation(_))));
        let low = TtsOptions {
            pitch: 0.0,
            ..TtsOptions::default()
        };
        assert!(validate("hi", &low).is_err());
    }

    #[test]
    fn finished_with_billing_message() {
        let state: TtsStateData = serde_json::from_str(
            r#"{"status":9,"errMsg":"扣费失败","errReason":"balance"}"#,
        )
        .unwrap();
        assert!(matches!(
            finished("t", state),
            Err(ChanjingError::Billing { .. })
        ));
    }

    #[test]
    fn finished_without_url_is_an_error() {
        let state: TtsStateData = serde_json::from_str(r#"{"status":9,"full":{}}"#).unwrap();
        assert!(matches!(finished("t", state), Err(ChanjingError::Processing(_))));
    }
}
