//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Longest a loop sleeps without re-checking its stop flag.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sleep for `duration` in slices of at most [`STOP_POLL_INTERVAL`].
///
/// Returns `true` if the full duration elapsed, `false` if `stop` was set.
/// A duration past the clock's range sleeps until stopped.
pub async fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) -> bool {
    let deadline = deadline_after(duration);
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let slice = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return true;
                }
                (deadline - now).min(STOP_POLL_INTERVAL)
            }
            None => STOP_POLL_INTERVAL,
        };
        tokio::time::sleep(slice).await;
    }
}

/// `now + duration`, or `None` when that instant is not representable.
pub fn deadline_after(duration: Duration) -> Option<Instant> {
    Instant::now().checked_add(duration)
}
