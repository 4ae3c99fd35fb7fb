use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Shared sweep-level cancellation flag.
///
/// Clones observe the same flag. Once cancelled a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Cancels the token after `after` elapses on a detached watchdog thread.
    pub fn cancel_after(&self, after: Duration) -> thread::JoinHandle<()> {
        let token = self.clone();
        thread::spawn(move || {
            thread::sleep(after);
            if !token.is_cancelled() {
                tracing::warn!(after_secs = after.as_secs_f64(), "sweep deadline reached");
                token.cancel();
            }
        })
    }
}
