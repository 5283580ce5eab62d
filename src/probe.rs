//! Optional local media inspection.
//!
//! Everything here is best effort: a probe that cannot answer returns `None`
//! and the services carry on with defaults.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tempfile::TempPath;
use tracing::{debug, warn};

/// Longest an `ffmpeg` trim may run before it is killed.
const TRIM_TIMEOUT: Duration = Duration::from_secs(120);

/// Local media capabilities the services use when available.
pub trait MediaProbe: Send + Sync {
    /// Length of an audio file.
    fn audio_duration(&self, path: &Path) -> Option<Duration>;

    /// `(width, height)` of the first video stream.
    fn video_dimensions(&self, path: &Path) -> Option<(u32, u32)>;

    /// Copy of `path` cut to at most `max`. The file is deleted when the
    /// returned path is dropped.
    ///
    /// Unlike the queries above this runs on the async runtime, so
    /// implementations can bound how long it takes.
    fn trim_audio<'a>(&'a self, path: &'a Path, max: Duration) -> BoxFuture<'a, Option<TempPath>>;
}

/// A probe without any capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

impl MediaProbe for NoProbe {
    fn audio_duration(&self, _path: &Path) -> Option<Duration> {
        None
    }

    fn video_dimensions(&self, _path: &Path) -> Option<(u32, u32)> {
        None
    }

    fn trim_audio<'a>(&'a self, _path: &'a Path, _max: Duration) -> BoxFuture<'a, Option<TempPath>> {
        Box::pin(async { None })
    }
}

/// Probe backed by the `ffprobe` and `ffmpeg` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegProbe {
    ffprobe: PathBuf,
    ffmpeg: Option<PathBuf>,
    trim_timeout: Duration,
}

impl FfmpegProbe {
    /// Locate `ffprobe` (required) and `ffmpeg` (for trimming) on `PATH`.
    pub fn detect() -> Option<Self> {
        let ffprobe = which::which("ffprobe").ok()?;
        let ffmpeg = which::which("ffmpeg").ok();
        Some(Self {
            ffprobe,
            ffmpeg,
            trim_timeout: TRIM_TIMEOUT,
        })
    }

    async fn trim(&self, path: &Path, max: Duration) -> Option<TempPath> {
        let ffmpeg = self.ffmpeg.as_ref()?;
        let suffix = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| ".wav".to_string());
        let out = tempfile::Builder::new()
            .prefix("chanjing-trim-")
            .suffix(&suffix)
            .tempfile()
            .ok()?
            .into_temp_path();

        let run = tokio::process::Command::new(ffmpeg)
            .arg("-i")
            .arg(path)
            .arg("-t")
            .arg(max.as_secs().to_string())
            .arg("-y")
            .arg(&*out)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let status = match tokio::time::timeout(self.trim_timeout, run).await {
            Ok(output) => output.ok()?.status,
            Err(_) => {
                warn!(path = %path.display(), timeout = ?self.trim_timeout, "ffmpeg trim timed out");
                return None;
            }
        };

        let written = tokio::fs::metadata(&*out).await.map(|m| m.len()).unwrap_or(0);
        if !status.success() || written == 0 {
            warn!(path = %path.display(), "ffmpeg could not trim audio");
            return None;
        }
        Some(out)
    }

    fn ffprobe(&self, args: &[&str], path: &Path) -> Option<String> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "error"])
            .args(args)
            .arg(path)
            .output()
            .ok()?;
        if !output.status.success() {
            debug!(path = %path.display(), "ffprobe failed");
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl MediaProbe for FfmpegProbe {
    fn audio_duration(&self, path: &Path) -> Option<Duration> {
        let out = self.ffprobe(
            &[
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ],
            path,
        )?;
        parse_duration(&out)
    }

    fn video_dimensions(&self, path: &Path) -> Option<(u32, u32)> {
        let out = self.ffprobe(
            &[
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height",
                "-of",
                "csv=s=x:p=0",
            ],
            path,
        )?;
        parse_dimensions(&out)
    }

    fn trim_audio<'a>(&'a self, path: &'a Path, max: Duration) -> BoxFuture<'a, Option<TempPath>> {
        Box::pin(self.trim(path, max))
    }
}

/// [`FfmpegProbe`] when `ffprobe` is installed, otherwise [`NoProbe`].
pub fn default_probe() -> Arc<dyn MediaProbe> {
    match FfmpegProbe::detect() {
        Some(probe) => Arc::new(probe),
        None => {
            debug!("ffprobe not found, media probing disabled");
            Arc::new(NoProbe)
        }
    }
}

/// Run a blocking probe call off the async runtime.
pub(crate) async fn run<T, F>(probe: &Arc<dyn MediaProbe>, f: F) -> Option<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn MediaProbe) -> Option<T> + Send + 'static,
{
    let probe = Arc::clone(probe);
    tokio::task::spawn_blocking(move || f(probe.as_ref()))
        .await
        .ok()
        .flatten()
}

fn parse_duration(out: &str) -> Option<Duration> {
    let secs: f64 = out.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

fn parse_dimensions(out: &str) -> Option<(u32, u32)> {
    let line = out.lines().next()?.trim();
    let (w, h) = line.split_once('x')?;
    let (w, h): (u32, u32) = (w.trim().parse().ok()?, h.trim().parse().ok()?);
    (w > 0 && h > 0).then_some((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffprobe_duration() {
        assert_eq!(parse_duration("12.500000\n"), Some(Duration::from_millis(12500)));
        assert_eq!(parse_duration("N/A\n"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn parses_ffprobe_dimensions() {
        assert_eq!(parse_dimensions("1080x1920\n"), Some((1080, 1920)));
        assert_eq!(parse_dimensions("0x0\n"), None);
        assert_eq!(parse_dimensions("garbage"), None);
    }

    #[tokio::test]
    async fn no_probe_answers_nothing() {
        let probe: Arc<dyn MediaProbe> = Arc::new(NoProbe);
        let path = PathBuf::from("missing.wav");
        let duration = run(&probe, move |p| p.audio_duration(&path)).await;
        assert!(duration.is_none());
        assert!(probe.trim_audio(Path::new("missing.wav"), Duration::from_secs(1)).await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_ffmpeg_is_killed_after_the_deadline() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("ffmpeg");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let input = dir.path().join("in.wav");
        std::fs::write(&input, b"RIFF").unwrap();

        let probe = FfmpegProbe {
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg: Some(script),
            trim_timeout: Duration::from_millis(200),
        };
        let started = std::time::Instant::now();
        let trimmed = probe.trim_audio(&input, Duration::from_secs(299)).await;
        assert!(trimmed.is_none());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn trim_without_ffmpeg_is_none() {
        let probe = FfmpegProbe {
            ffprobe: PathBuf::from("ffprobe"),
            ffmpeg: None,
            trim_timeout: TRIM_TIMEOUT,
        };
        assert!(probe
            .trim_audio(Path::new("in.wav"), Duration::from_secs(1))
            .await
            .is_none());
    }
}
