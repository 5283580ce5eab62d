mod common;

use std::time::Duration;

use chanjing::{ChanjingError, ClientBuilder, Credentials};
use common::*;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn token_is_cached_on_disk_between_clients() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/open/v1/access_token"))
        .respond_with(ok(json!({ "access_token": "disk-token" })))
        .expect(1)
        .mount(&server)
        .await;

    let first = client(&server, &cache).access_token().await.unwrap();
    let second = client(&server, &cache).access_token().await.unwrap();
    assert_eq!(first, "disk-token");
    assert_eq!(second, "disk-token");
    assert!(cache.path().join("token.json").exists());
}

#[tokio::test]
async fn changed_credentials_request_a_new_token() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/open/v1/access_token"))
        .respond_with(ok(json!({ "access_token": "any" })))
        .expect(2)
        .mount(&server)
        .await;

    client(&server, &cache).access_token().await.unwrap();
    builder(&server, &cache)
        .credentials("app-id", "rotated-key")
        .probe(std::sync::Arc::new(chanjing::NoProbe))
        .build()
        .unwrap()
        .access_token()
        .await
        .unwrap();
}

#[tokio::test]
async fn expired_token_is_refreshed_once_and_call_retried() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/open/v1/access_token"))
        .respond_with(ok(json!({ "access_token": "old" })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/open/v1/access_token"))
        .respond_with(ok(json!({ "access_token": "new" })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/open/v1/create_audio_task"))
        .and(header("access_token", "old"))
        .respond_with(fail(10401, "token expired"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/open/v1/create_audio_task"))
        .and(header("access_token", "new"))
        .respond_with(ok(json!({ "task_id": "t-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/open/v1/audio_task_state"))
        .and(header("access_token", "new"))
        .respond_with(ok(json!({
            "status": 9,
            "full": { "url": "https://cdn.example/t-1.mp3", "duration": 1.5 }
        })))
        .mount(&server)
        .await;

    let result = client(&server, &cache)
        .tts("voice-1", "hello", None)
        .await
        .unwrap();
    assert_eq!(result.audio_url, "https://cdn.example/t-1.mp3");

    let saved = std::fs::read_to_string(cache.path().join("token.json")).unwrap();
    assert!(saved.contains("\"new\""));
}

#[tokio::test]
async fn second_auth_failure_is_permission_denied() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/open/v1/access_token"))
        .respond_with(ok(json!({ "access_token": TOKEN })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/open/v1/create_audio_task"))
        .respond_with(fail(10400, "invalid token"))
        .expect(2)
        .mount(&server)
        .await;

    let err = client(&server, &cache)
        .tts("voice-1", "hello", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChanjingError::PermissionDenied { code: 10400, .. }));
}

#[tokio::test]
async fn http_error_status_is_not_retried() {
    let server = MockServer::start().await;
    let cache = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/open/v1/access_token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server, &cache).access_token().await.unwrap_err();
    assert!(matches!(err, ChanjingError::Http(_)));
}

#[tokio::test]
async fn unreachable_host_exhausts_retries() {
    let cache = tempfile::tempdir().unwrap();
    let client = ClientBuilder::new()
        .credentials("app-id", "secret-key")
        .base_url("http://127.0.0.1:1")
        .cache_dir(cache.path())
        .rate_limits(chanjing::RateLimits::none())
        .max_retries(2)
        .retry_delay(Duration::from_millis(10))
        .probe(std::sync::Arc::new(chanjing::NoProbe))
        .build()
        .unwrap();

    let err = client.access_token().await.unwrap_err();
    assert!(matches!(err, ChanjingError::Connectivity { attempts: 2, .. }));
}

#[test]
fn missing_credentials_are_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("absent.json");

    let result = Credentials::resolve_with(Some(""), Some(" "), |_| None, Some(&config));
    match result {
        Err(ChanjingError::Config { message }) => {
            assert!(message.contains("CHANJING_APP_ID"));
            assert!(message.contains("absent.json"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}
