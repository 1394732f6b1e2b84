//! Per-client sliding-window request limiter

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window limiter keyed by client address
///
/// A client may make `max_requests` requests within any `window`. Rejected
/// requests are not counted. Clients idle for a whole window are forgotten
/// at most once per window, so the table only holds recently active ones.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    clients: Mutex<Clients>,
}

#[derive(Debug, Default)]
struct Clients {
    requests: HashMap<String, VecDeque<Instant>>,
    last_sweep: Option<Instant>,
}

impl Clients {
    fn sweep(&mut self, now: Instant, window: Duration) {
        let due = match self.last_sweep {
            Some(last) => now.saturating_duration_since(last) >= window,
            None => true,
        };
        if !due {
            return;
        }
        let before = self.requests.len();
        self.requests.retain(|_, requests| {
            requests
                .back()
                .is_some_and(|last| now.saturating_duration_since(*last) < window)
        });
        self.last_sweep = Some(now);
        let dropped = before - self.requests.len();
        if dropped > 0 {
            tracing::debug!(dropped, tracked = self.requests.len(), "Forgot idle clients");
        }
    }
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(Clients::default()),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a request from `client` now
    ///
    /// Returns the whole seconds until the oldest counted request leaves
    /// the window when the client is over its limit.
    pub fn check(&self, client: &str) -> Result<(), u64> {
        self.check_at(client, Instant::now())
    }

    /// Record a request from `client` at `now`
    pub fn check_at(&self, client: &str, now: Instant) -> Result<(), u64> {
        let Ok(mut clients) = self.clients.lock() else {
            tracing::error!("Rate limiter lock poisoned; letting request through");
            return Ok(());
        };
        clients.sweep(now, self.window);

        let requests = clients.requests.entry(client.to_string()).or_default();
        while let Some(oldest) = requests.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                requests.pop_front();
            } else {
                break;
            }
        }

        if requests.len() >= self.max_requests {
            let oldest = requests.front().copied().unwrap_or(now);
            let wait = (oldest + self.window).saturating_duration_since(now);
            let secs = wait.as_millis().div_ceil(1000) as u64;
            return Err(secs.max(1));
        }

        requests.push_back(now);
        Ok(())
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().map(|c| c.requests.len()).unwrap_or(0)
    }
}
