// SPDX-FileCopyrightText: 2026 Aibro Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-window rate limiting, keyed per connection.

use std::time::{Duration, Instant};

use dashmap::DashMap;

/// One counter window.
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    started: Instant,
}

/// Fixed-window counters with a shared cap and window length.
///
/// The broker keeps one limiter per request class (AI triggers, speech
/// requests) keyed by connection id. Windows reset lazily on the first hit
/// after they elapse.
pub struct RateLimiter {
    cap: u32,
    window: Duration,
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter {
    pub fn new(cap: u32, window: Duration) -> Self {
        Self {
            cap,
            window,
            windows: DashMap::new(),
        }
    }

    /// Count one request against `key`. Returns `true` if the request is
    /// within the cap for the current window.
    pub fn hit(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert(RateWindow {
            count: 0,
            started: now,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.count = 0;
            entry.started = now;
        }
        entry.count += 1;
        entry.count <= self.cap
    }

    /// Drop all state for a key (connection closed).
    pub fn forget(&self, key: &str) {
        self.windows.remove(key);
    }
}
