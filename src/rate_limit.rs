use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Request families the platform throttles separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateCategory {
    LipSync,
    VoiceClone,
    Tts,
    Default,
}

/// Minimum spacing between two calls of the same [`RateCategory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimits {
    /// Default: 6s.
    pub lip_sync: Duration,
    /// Default: 6s.
    pub voice_clone: Duration,
    /// Default: 500ms.
    pub tts: Duration,
    /// Default: 1s.
    pub default: Duration,
}

impl RateLimits {
    /// No throttling at all. Handy against a local mock server.
    pub fn none() -> Self {
        Self {
            lip_sync: Duration::ZERO,
            voice_clone: Duration::ZERO,
            tts: Duration::ZERO,
            default: Duration::ZERO,
        }
    }

    pub fn interval(&self, category: RateCategory) -> Duration {
        match category {
            RateCategory::LipSync => self.lip_sync,
            RateCategory::VoiceClone => self.voice_clone,
            RateCategory::Tts => self.tts,
            RateCategory::Default => self.default,
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            lip_sync: Duration::from_secs(6),
            voice_clone: Duration::from_secs(6),
            tts: Duration::from_millis(500),
            default: Duration::from_secs(1),
        }
    }
}

/// Per-client throttle. Each call reserves the next free slot of its
/// category under the lock, then sleeps outside it.
pub(crate) struct RateLimiter {
    limits: RateLimits,
    last: Mutex<HashMap<RateCategory, Instant>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            last: Mutex::new(HashMap::new()),
        }
    }

    pub async fn wait(&self, category: RateCategory, silent: bool) {
        let interval = self.limits.interval(category);
        let delay = {
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = match last.get(&category) {
                Some(prev) => (*prev + interval).max(now),
                None => now,
            };
            last.insert(category, slot);
            slot - now
        };

        if !delay.is_zero() {
            if !silent {
                debug!(?category, wait = ?delay, "rate limited");
            }
            tokio::time::sleep(delay).await;
        }
    }
}
