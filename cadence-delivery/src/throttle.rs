//! Pacing between contacts
//!
//! Sending is capped at a messages-per-minute ceiling by sleeping a fixed
//! interval between consecutive contacts. A ceiling of 20 per minute gives a
//! 3 second pause.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Ceiling on contacts started per minute. Zero disables pacing.
    #[serde(default = "default_max_per_minute")]
    pub max_per_minute: u32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_per_minute: default_max_per_minute(),
        }
    }
}

const fn default_max_per_minute() -> u32 {
    20
}

#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    interval: Duration,
}

impl Throttle {
    #[must_use]
    pub fn new(config: ThrottleConfig) -> Self {
        let interval = if config.max_per_minute == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(60) / config.max_per_minute
        };

        Self { interval }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether pacing applies to a run with these settings
    #[must_use]
    pub const fn applies(send_enabled: bool, window_minutes: u32) -> bool {
        send_enabled && window_minutes > 0
    }

    /// Sleep before the contact at `index`; the first contact never waits
    pub async fn pace(&self, index: usize) {
        if index == 0 || self.interval.is_zero() {
            return;
        }

        tokio::time::sleep(self.interval).await;
    }
}
