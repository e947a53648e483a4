use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Fixed-window call pacing for the upstream API quota.
///
/// `acquire` blocks the caller until the current window has capacity, so the
/// client never has to handle a quota rejection.
pub struct RateLimiter {
    max_calls: u32,
    window: Duration,
    state: Mutex<Window>,
}

struct Window {
    started_at: Instant,
    calls: u32,
}

impl RateLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        assert!(max_calls > 0, "rate limiter needs capacity for at least one call");
        RateLimiter {
            max_calls,
            window,
            state: Mutex::new(Window {
                started_at: Instant::now(),
                calls: 0,
            }),
        }
    }

    /// Waits until one more call fits in the window, then records it.
    pub async fn acquire(&self) {
        let mut window = self.state.lock().await;

        let now = Instant::now();
        if now.duration_since(window.started_at) >= self.window {
            window.started_at = now;
            window.calls = 0;
        }

        if window.calls >= self.max_calls {
            let opens_at = window.started_at + self.window;
            sleep_until(opens_at).await;
            window.started_at = opens_at;
            window.calls = 0;
        }

        window.calls += 1;
    }
}
