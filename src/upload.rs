use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio::time::Instant;
use tracing::info;

use crate::api::{Api, Call, FailureStreak};
use crate::errors::{ChanjingError, Result};
use crate::models::{FileDetailData, Reporter, UploadUrlData};
use crate::rate_limit::RateCategory;
use crate::util::format_file_size;

const UPLOAD_CHUNK: usize = 64 * 1024;
const UPLOAD_ATTEMPTS: u32 = 2;

/// Upload slots the platform distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UploadService {
    LipSyncVideo,
    LipSyncAudio,
    PromptAudio,
}

impl UploadService {
    fn as_str(self) -> &'static str {
        match self {
            UploadService::LipSyncVideo => "lip_sync_video",
            UploadService::LipSyncAudio => "lip_sync_audio",
            UploadService::PromptAudio => "prompt_audio",
        }
    }

    fn label(self) -> &'static str {
        match self {
            UploadService::LipSyncVideo => "video",
            UploadService::LipSyncAudio | UploadService::PromptAudio => "audio",
        }
    }
}

/// A file the platform has accepted and synced.
#[derive(Debug, Clone)]
pub(crate) struct UploadedFile {
    pub file_id: String,
    /// Public URL; empty for services that don't expose one.
    pub url: String,
}

/// Hands a byte buffer out in chunks and reports read progress every 20
/// percentage points, and once more at 100%.
///
/// `reported` is the highest percentage already reported for the stage. It
/// is shared between retry attempts so a restarted body never reports a
/// lower value.
pub(crate) struct UploadProgress {
    data: Bytes,
    pos: usize,
    last_pct: i32,
    stage: &'static str,
    label: String,
    reporter: Reporter,
    reported: Arc<AtomicU8>,
}

impl UploadProgress {
    pub fn new(
        data: Bytes,
        stage: &'static str,
        label: String,
        reporter: Reporter,
        reported: Arc<AtomicU8>,
    ) -> Self {
        Self {
            data,
            pos: 0,
            last_pct: -20,
            stage,
            label,
            reporter,
            reported,
        }
    }

    /// Next chunk of at most `size` bytes, `None` once exhausted.
    pub fn read(&mut self, size: usize) -> Option<Bytes> {
        let total = self.data.len();
        if self.pos >= total {
            return None;
        }
        let end = self.pos.saturating_add(size.max(1)).min(total);
        let chunk = self.data.slice(self.pos..end);
        self.pos = end;

        let pct = (self.pos as u64 * 100 / total as u64) as i32;
        if pct >= self.last_pct + 20 || pct >= 100 {
            self.last_pct = pct;
            if self.reported.fetch_max(pct as u8, Ordering::Relaxed) >= pct as u8 {
                return Some(chunk);
            }
            let message = format!("{}: {}%", self.label, pct);
            info!(
                "{message} ({}/{})",
                format_file_size(self.pos as u64),
                format_file_size(total as u64)
            );
            self.reporter.report(self.stage, pct as u8, &message);
        }
        Some(chunk)
    }
}

impl Iterator for UploadProgress {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.read(UPLOAD_CHUNK)
    }
}

impl Api {
    /// Upload a local file: signed URL, PUT, then wait for the platform to
    /// sync it.
    pub(crate) async fn upload_file(
        &self,
        path: &Path,
        service: UploadService,
        stage: &'static str,
        reporter: &Reporter,
    ) -> Result<UploadedFile> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(ChanjingError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());
        let data = Bytes::from(tokio::fs::read(path).await?);
        info!(
            file = %file_name,
            size = %format_file_size(data.len() as u64),
            "uploading {}",
            service.label()
        );

        let target: UploadUrlData = self
            .call(
                Call::get("/open/v1/common/create_upload_url")
                    .query("service", service.as_str())
                    .query("name", file_name.as_str()),
            )
            .await?;

        let mime_type = target
            .mime_type
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let label = format!("upload {}", service.label());
        let size = data.len();
        let reported = Arc::new(AtomicU8::new(0));

        let response = self
            .send(RateCategory::Default, false, UPLOAD_ATTEMPTS, || {
                let progress = UploadProgress::new(
                    data.clone(),
                    stage,
                    label.clone(),
                    reporter.clone(),
                    reported.clone(),
                );
                let body = reqwest::Body::wrap_stream(futures::stream::iter(
                    progress.map(Ok::<Bytes, std::io::Error>),
                ));
                self.http
                    .put(&target.sign_url)
                    .header(CONTENT_TYPE, mime_type.as_str())
                    .header(CONTENT_LENGTH, size)
                    .body(body)
            })
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ChanjingError::Upload(format!(
                "signed URL answered HTTP {}",
                response.status().as_u16()
            )));
        }
        info!(file_id = %target.file_id, "{} uploaded", service.label());

        self.wait_file_synced(&target.file_id).await?;

        Ok(UploadedFile {
            file_id: target.file_id,
            url: target.full_path.unwrap_or_default(),
        })
    }

    /// Poll `file_detail` until the file is synced (status 1).
    ///
    /// Transient query failures are retried until five happen in a row;
    /// business errors end the wait at once.
    async fn wait_file_synced(&self, file_id: &str) -> Result<()> {
        let interval = self.timings.file_poll_interval;
        let max_wait = self.timings.file_max_wait;
        let start = Instant::now();
        let mut streak = FailureStreak::new("file sync polling");

        loop {
            let waited = start.elapsed();
            if waited > max_wait {
                return Err(ChanjingError::Timeout {
                    operation: format!("file sync of {file_id}"),
                    waited,
                });
            }
            tokio::time::sleep(interval).await;

            let detail = self
                .call::<FileDetailData>(
                    Call::get("/open/v1/common/file_detail")
                        .query("id", file_id)
                        .silent(),
                )
                .await;

            let detail = match detail {
                Ok(detail) => {
                    streak.reset();
                    detail
                }
                Err(e) if e.is_transient() => {
                    streak.record(e)?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match detail.status {
                1 => {
                    info!(elapsed = ?start.elapsed(), "file synced");
                    return Ok(());
                }
                status @ (98 | 99 | 100) => {
                    return Err(ChanjingError::FileUnavailable {
                        file_id: file_id.to_string(),
                        status,
                        reason: match status {
                            98 => "content safety check failed",
                            99 => "file deleted",
                            _ => "file purged",
                        },
                    });
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProgressFn;
    use std::sync::{Arc, Mutex};

    fn recording() -> (Reporter, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb: ProgressFn = Arc::new(move |_: &str, pct: u8, _: &str| {
            sink.lock().unwrap().push(pct);
        });
        (Reporter::new(Some(cb)), seen)
    }

    fn progress(data: Bytes, reporter: Reporter) -> UploadProgress {
        UploadProgress::new(
            data,
            "upload",
            "upload audio".into(),
            reporter,
            Arc::new(AtomicU8::new(0)),
        )
    }

    #[test]
    fn progress_is_monotonic_and_ends_at_100() {
        let (reporter, seen) = recording();
        let mut progress = progress(Bytes::from(vec![7u8; 1000]), reporter);

        let mut read = 0;
        while let Some(chunk) = progress.read(70) {
            read += chunk.len();
        }
        assert_eq!(read, 1000);

        let seen = seen.lock().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.windows(2).all(|w| w[1] - w[0] >= 20 || w[1] == 100));
        assert_eq!(*seen.last().unwrap(), 100);
        assert_eq!(seen.iter().filter(|p| **p == 100).count(), 1);
    }

    #[test]
    fn restarted_body_does_not_report_backwards() {
        let (reporter, seen) = recording();
        let reported = Arc::new(AtomicU8::new(0));
        let data = Bytes::from(vec![1u8; 1000]);

        let mut first = UploadProgress::new(
            data.clone(),
            "upload",
            "x".into(),
            reporter.clone(),
            reported.clone(),
        );
        for _ in 0..6 {
            first.read(100);
        }
        assert_eq!(*seen.lock().unwrap(), vec![10, 30, 50]);

        let mut second = UploadProgress::new(data, "upload", "x".into(), reporter, reported);
        while second.read(100).is_some() {}

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![10, 30, 50, 70, 90, 100]);
    }

    #[test]
    fn single_read_reports_once() {
        let (reporter, seen) = recording();
        let mut progress = progress(Bytes::from_static(b"abc"), reporter);
        assert_eq!(progress.read(usize::MAX).unwrap().len(), 3);
        assert!(progress.read(10).is_none());
        assert_eq!(*seen.lock().unwrap(), vec![100]);
    }

    #[test]
    fn empty_buffer_reports_nothing() {
        let (reporter, seen) = recording();
        let mut progress = progress(Bytes::new(), reporter);
        assert!(progress.next().is_none());
        assert!(seen.lock().unwrap().is_empty());
    }
}
