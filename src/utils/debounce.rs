//! Quiet-period debouncing for interactive search input.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Coalesces bursts of input so only the last one is applied.
///
/// Every input takes a ticket; after the quiet period the ticket is still
/// current only if no newer input arrived in between.
#[derive(Debug, Clone)]
pub struct Debouncer {
    quiet: Duration,
    latest: Arc<AtomicU64>,
}

impl Debouncer {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            latest: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Register a new input and supersede every earlier one.
    pub fn ticket(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Wait out the quiet period. `true` if `ticket` is still the newest.
    pub async fn settle(&self, ticket: u64) -> bool {
        tokio::time::sleep(self.quiet).await;
        self.latest.load(Ordering::SeqCst) == ticket
    }
}
