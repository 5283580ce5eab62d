//! Request plumbing shared by every service: rate limiting, transport
//! retries, the `{code, msg, data}` envelope and access-token refresh.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::warn;

use crate::auth::AuthManager;
use crate::credentials::Credentials;
use crate::errors::{ChanjingError, Result};
use crate::models::{AccessTokenData, Envelope, Timings};
use crate::rate_limit::{RateCategory, RateLimiter};

pub(crate) const DEFAULT_BASE_URL: &str = "https://open-api.chanjing.cc";
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;
pub(crate) const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limits of the shared HTTP client. Uploads and downloads carry no
/// total deadline; they fail only when a connect or a single read stalls.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub(crate) const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Business codes meaning "access token invalid or expired".
const AUTH_EXPIRED: [i64; 2] = [10400, 10401];

/// Header carrying the access token.
const ACCESS_TOKEN_HEADER: &str = "access_token";

/// Consecutive status-query failures a polling loop tolerates.
pub(crate) const MAX_POLL_FAILURES: u32 = 5;

/// One business endpoint call.
pub(crate) struct Call {
    method: Method,
    path: &'static str,
    category: RateCategory,
    silent: bool,
    authorized: bool,
    query: Vec<(&'static str, String)>,
    body: Option<serde_json::Value>,
}

impl Call {
    pub fn get(path: &'static str) -> Self {
        Self {
            method: Method::GET,
            path,
            category: RateCategory::Default,
            silent: false,
            authorized: true,
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: &'static str, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(path)
        }
    }

    pub fn query(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.query.push((key, value.into()));
        self
    }

    pub fn category(mut self, category: RateCategory) -> Self {
        self.category = category;
        self
    }

    /// Don't log rate-limit waits (polling loops).
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    fn unauthorized(mut self) -> Self {
        self.authorized = false;
        self
    }
}

/// HTTP + JSON layers over one `reqwest::Client`.
pub(crate) struct Api {
    pub(crate) http: reqwest::Client,
    base_url: String,
    auth: AuthManager,
    limiter: RateLimiter,
    max_retries: u32,
    retry_delay: Duration,
    timeout: Duration,
    pub(crate) timings: Timings,
}

impl Api {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        auth: AuthManager,
        limiter: RateLimiter,
        max_retries: u32,
        retry_delay: Duration,
        timeout: Duration,
        timings: Timings,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            limiter,
            max_retries: max_retries.max(1),
            retry_delay,
            timeout,
            timings,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        self.auth.credentials()
    }

    /// Send a request built by `build`, retrying connection errors and
    /// timeouts with a fixed delay. HTTP error statuses are returned at once.
    ///
    /// `build` is invoked once per attempt so streaming bodies start fresh.
    pub async fn send<F>(
        &self,
        category: RateCategory,
        silent: bool,
        max_retries: u32,
        build: F,
    ) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        self.limiter.wait(category, silent).await;

        let attempts = max_retries.max(1);
        let mut attempt = 1;
        loop {
            match build().send().await {
                Ok(response) => return Ok(response.error_for_status()?),
                Err(e) if e.is_connect() || e.is_timeout() => {
                    if attempt >= attempts {
                        return Err(ChanjingError::Connectivity {
                            attempts,
                            source: e,
                        });
                    }
                    warn!(
                        attempt,
                        attempts,
                        retry_in = ?self.retry_delay,
                        error = %e,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Perform a business call and decode its `data`.
    ///
    /// An auth-expired code resets the token and retries exactly once; a
    /// second auth failure is a [`ChanjingError::PermissionDenied`].
    pub async fn call<T: DeserializeOwned>(&self, call: Call) -> Result<T> {
        let mut retried_auth = false;
        loop {
            let token = self.access_token().await?;
            let envelope = self.exchange(&call, Some(&token)).await?;

            match envelope.code {
                0 => return Ok(serde_json::from_value(envelope.data)?),
                code if AUTH_EXPIRED.contains(&code) && !retried_auth => {
                    warn!(code, "access token expired, refreshing");
                    self.auth.reset().await;
                    retried_auth = true;
                }
                code => return Err(business_error(code, envelope.msg)),
            }
        }
    }

    /// Current access token, issuing one if needed.
    pub async fn access_token(&self) -> Result<String> {
        self.auth.get_token(|creds| async move {
            let call = Call::post(
                "/open/v1/access_token",
                json!({
                    "app_id": creds.app_id(),
                    "secret_key": creds.secret_key(),
                }),
            )
            .unauthorized();

            let envelope = self.exchange(&call, None).await?;
            if envelope.code != 0 {
                return Err(business_error(envelope.code, envelope.msg));
            }
            let data: AccessTokenData = serde_json::from_value(envelope.data)?;
            Ok(data.access_token.unwrap_or_default())
        })
        .await
    }

    /// One rate-limited, retried round trip returning the raw envelope.
    async fn exchange(&self, call: &Call, token: Option<&str>) -> Result<Envelope> {
        let url = format!("{}{}", self.base_url, call.path);
        let response = self
            .send(call.category, call.silent, self.max_retries, || {
                let mut req = self
                    .http
                    .request(call.method.clone(), &url)
                    .timeout(self.timeout);
                if call.authorized {
                    if let Some(token) = token {
                        req = req.header(ACCESS_TOKEN_HEADER, token);
                    }
                }
                if !call.query.is_empty() {
                    req = req.query(&call.query);
                }
                if let Some(body) = &call.body {
                    req = req.header(CONTENT_TYPE, "application/json").json(body);
                }
                req
            })
            .await?;

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

fn business_error(code: i64, msg: Option<String>) -> ChanjingError {
    let message = msg
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "unknown error".to_string());
    if AUTH_EXPIRED.contains(&code) {
        ChanjingError::PermissionDenied { code, message }
    } else {
        ChanjingError::Api { code, message }
    }
}

/// Counts consecutive failed status queries inside a polling loop.
pub(crate) struct FailureStreak {
    operation: &'static str,
    count: u32,
}

impl FailureStreak {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            count: 0,
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Record a failure; gives the error back once the streak is too long.
    pub fn record(&mut self, err: ChanjingError) -> Result<()> {
        self.count += 1;
        if self.count >= MAX_POLL_FAILURES {
            return Err(ChanjingError::PollAborted {
                operation: self.operation.to_string(),
                attempts: self.count,
                source: Box::new(err),
            });
        }
        warn!(
            operation = self.operation,
            failures = self.count,
            error = %err,
            "status query failed, will retry"
        );
        Ok(())
    }
}

/// Billing failures are recognised by keyword in the platform's message.
const BILLING_KEYWORDS: [&str; 5] = ["扣费失败", "余额不足", "蝉豆不足", "蝉豆余额", "欠费"];

/// `Some(Billing)` when `message` names a charging problem.
pub(crate) fn billing_error(message: &str) -> Option<ChanjingError> {
    BILLING_KEYWORDS
        .iter()
        .any(|kw| message.contains(kw))
        .then(|| ChanjingError::Billing {
            message: message.to_string(),
        })
}

/// A job's terminal failure: billing when the message says so, else generic.
pub(crate) fn job_failure(prefix: &str, message: &str) -> ChanjingError {
    billing_error(message)
        .unwrap_or_else(|| ChanjingError::Processing(format!("{prefix}: {message}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_keywords_match_anywhere() {
        assert!(matches!(
            billing_error("任务失败：蝉豆余额不足，请充值"),
            Some(ChanjingError::Billing { .. })
        ));
        assert!(billing_error("模型加载失败").is_none());
        assert!(billing_error("").is_none());
    }

    #[test]
    fn job_failure_prefers_billing() {
        assert!(matches!(job_failure("tts", "欠费"), ChanjingError::Billing { .. }));
        match job_failure("tts", "bad audio") {
            ChanjingError::Processing(m) => assert_eq!(m, "tts: bad audio"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn business_error_kinds() {
        assert!(matches!(
            business_error(10401, None),
            ChanjingError::PermissionDenied { code: 10401, .. }
        ));
        match business_error(40000, Some(String::new())) {
            ChanjingError::Api { code, message } => {
                assert_eq!(code, 40000);
                assert_eq!(message, "unknown error");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn streak_aborts_on_fifth_failure() {
        let mut streak = FailureStreak::new("poll");
        for _ in 0..4 {
            streak
                .record(ChanjingError::Processing("x".into()))
                .unwrap();
        }
        streak.reset();
        for _ in 0..4 {
            streak
                .record(ChanjingError::Processing("x".into()))
                .unwrap();
        }
        let err = streak
            .record(ChanjingError::Processing("x".into()))
            .unwrap_err();
        assert!(matches!(err, ChanjingError::PollAborted { attempts: 5, .. }));
    }
}
