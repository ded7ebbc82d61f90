use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Per-host token bucket. Fixed per-request delays compose badly with a
/// concurrent worker pool, so pacing against any single external site is
/// modeled here instead of as inline sleeps.
#[derive(Debug)]
pub struct HostRateLimiter {
    /// Steady-state requests per second allowed per host.
    rate: f64,
    /// Bucket capacity; short bursts up to this many requests are fine.
    burst: f64,
    buckets: Mutex<HashMap<String, (f64, Instant)>>,
}

impl HostRateLimiter {
    pub fn new(requests_per_second: f64, burst: u32) -> Self {
        Self {
            rate: requests_per_second.max(0.01),
            burst: burst.max(1) as f64,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    fn host_of(url: &str) -> String {
        reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .unwrap_or_else(|| url.to_string())
    }

    /// Wait until a request against this URL's host is allowed.
    pub async fn acquire(&self, url: &str) {
        let host = Self::host_of(url);
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let now = Instant::now();
                let entry = buckets.entry(host.clone()).or_insert((self.burst, now));
                let (ref mut tokens, ref mut last) = *entry;
                let elapsed = now.duration_since(*last).as_secs_f64();
                *tokens = (*tokens + elapsed * self.rate).min(self.burst);
                *last = now;
                if *tokens >= 1.0 {
                    *tokens -= 1.0;
                    None
                } else {
                    Some((1.0 - *tokens) / self.rate)
                }
            };
            match wait {
                None => return,
                Some(secs) => tokio::time::sleep(Duration::from_secs_f64(secs.max(0.001))).await,
            }
        }
    }
}
