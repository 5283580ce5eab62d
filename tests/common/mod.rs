#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chanjing::{Client, ClientBuilder, MediaProbe, NoProbe, ProgressFn, RateLimits, Timings};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tempfile::{TempDir, TempPath};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TOKEN: &str = "tok-1";

pub fn ok(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "code": 0, "msg": "success", "data": data }))
}

pub fn fail(code: i64, msg: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "code": code, "msg": msg, "data": null }))
}

pub fn builder(server: &MockServer, cache: &TempDir) -> ClientBuilder {
    ClientBuilder::new()
        .credentials("app-id", "secret-key")
        .base_url(server.uri())
        .cache_dir(cache.path())
        .rate_limits(RateLimits::none())
        .timings(Timings::with_poll_interval(Duration::from_millis(10)))
        .retry_delay(Duration::from_millis(10))
}

pub fn client(server: &MockServer, cache: &TempDir) -> Client {
    builder(server, cache)
        .probe(Arc::new(NoProbe))
        .build()
        .unwrap()
}

pub fn client_with_probe(server: &MockServer, cache: &TempDir, probe: Arc<dyn MediaProbe>) -> Client {
    builder(server, cache).probe(probe).build().unwrap()
}

pub async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/open/v1/access_token"))
        .and(body_partial_json(json!({ "app_id": "app-id", "secret_key": "secret-key" })))
        .respond_with(ok(json!({ "access_token": TOKEN })))
        .mount(server)
        .await;
}

/// Signed URL, PUT target and an immediately synced file for `service`.
pub async fn mount_upload(server: &MockServer, service: &str, file_id: &str, full_path: &str) {
    Mock::given(method("GET"))
        .and(path("/open/v1/common/create_upload_url"))
        .and(query_param("service", service))
        .respond_with(ok(json!({
            "sign_url": format!("{}/signed/{file_id}", server.uri()),
            "file_id": file_id,
            "full_path": full_path,
            "mime_type": "application/octet-stream",
        })))
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path(format!("/signed/{file_id}")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/open/v1/common/file_detail"))
        .and(query_param("id", file_id))
        .respond_with(ok(json!({ "id": file_id, "status": 1 })))
        .mount(server)
        .await;
}

pub fn media_file(dir: &TempDir, name: &str, size: usize) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, vec![0x5au8; size]).unwrap();
    path
}

/// Records every progress event.
pub fn recorder() -> (ProgressFn, Arc<Mutex<Vec<(String, u8)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let cb: ProgressFn = Arc::new(move |stage: &str, pct: u8, _msg: &str| {
        sink.lock().unwrap().push((stage.to_string(), pct));
    });
    (cb, seen)
}

pub fn percents(seen: &[(String, u8)], stage: &str) -> Vec<u8> {
    seen.iter()
        .filter(|(s, _)| s == stage)
        .map(|(_, p)| *p)
        .collect()
}

/// Probe that reports a fixed audio length.
pub struct FixedDuration(pub Duration);

impl MediaProbe for FixedDuration {
    fn audio_duration(&self, _path: &Path) -> Option<Duration> {
        Some(self.0)
    }

    fn video_dimensions(&self, _path: &Path) -> Option<(u32, u32)> {
        Some((720, 1280))
    }

    fn trim_audio<'a>(&'a self, _path: &'a Path, _max: Duration) -> BoxFuture<'a, Option<TempPath>> {
        Box::pin(async { None })
    }
}

/// Probe for an over-long recording whose trimmed copy holds `trimmed`.
pub struct Trimming {
    pub duration: Duration,
    pub trimmed: Vec<u8>,
}

impl MediaProbe for Trimming {
    fn audio_duration(&self, _path: &Path) -> Option<Duration> {
        Some(self.duration)
    }

    fn video_dimensions(&self, _path: &Path) -> Option<(u32, u32)> {
        None
    }

    fn trim_audio<'a>(&'a self, _path: &'a Path, _max: Duration) -> BoxFuture<'a, Option<TempPath>> {
        Box::pin(async move {
            let mut file = tempfile::Builder::new().suffix(".wav").tempfile().ok()?;
            file.write_all(&self.trimmed).ok()?;
            Some(file.into_temp_path())
        })
    }
}
