//! Stop signal shared by the indexer, its workers and the CLI.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct StopSignal {
    raised: AtomicBool,
    wake: Notify,
}

/// Clones share state: cancelling any clone stops every worker holding one.
///
/// Workers poll [`is_cancelled`](Self::is_cancelled) between jobs and await
/// [`cancelled`](Self::cancelled) while the queue is idle.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    signal: Arc<StopSignal>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        if !self.signal.raised.swap(true, Ordering::AcqRel) {
            self.signal.wake.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.raised.load(Ordering::Acquire)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.signal.wake.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}
