use std::collections::HashMap;

/// Fixed-window publish rate limiter, one window per publisher identity.
///
/// The first message from an identity opens its window; every message
/// inside the window counts against the budget, and the window resets
/// once its length has elapsed. Two back-to-back windows can together
/// admit a short burst of up to twice the budget, which is the accepted
/// trade-off of the fixed-window scheme.
///
/// A budget of zero disables limiting entirely.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: u32,
    window_ms: i64,
    windows: HashMap<String, Window>,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started_at: i64,
    count: u32,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window_ms: i64) -> Self {
        Self {
            max_per_window,
            window_ms,
            windows: HashMap::new(),
        }
    }

    /// Records one publish attempt for `identity` against the current
    /// wall clock and reports whether it fits the budget.
    pub fn allow(&mut self, identity: &str) -> bool {
        self.allow_at(identity, chrono::Utc::now().timestamp_millis())
    }

    /// Same as [`allow`](Self::allow) with an explicit clock, so window
    /// arithmetic can be exercised without sleeping.
    pub fn allow_at(&mut self, identity: &str, now_ms: i64) -> bool {
        if self.max_per_window == 0 {
            return true;
        }

        let window = self
            .windows
            .entry(identity.to_string())
            .or_insert(Window {
                started_at: now_ms,
                count: 0,
            });

        if now_ms - window.started_at > self.window_ms {
            window.started_at = now_ms;
            window.count = 0;
        }

        if window.count >= self.max_per_window {
            return false;
        }
        window.count += 1;
        true
    }

    /// Drops windows that have been idle for more than two window lengths.
    ///
    /// Keeps the identity map from growing without bound when publishers
    /// come and go. Returns how many windows were dropped.
    pub fn sweep(&mut self, now_ms: i64) -> usize {
        let before = self.windows.len();
        let window_ms = self.window_ms;
        self.windows
            .retain(|_, w| now_ms - w.started_at <= window_ms * 2);
        before - self.windows.len()
    }

    /// Number of identities currently holding a window.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
