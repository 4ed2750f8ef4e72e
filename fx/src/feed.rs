//! Broadcast feed of committed rate changes.

use tokio::sync::broadcast;
use tracing::trace;

use crate::rate::ExchangeRate;

/// Default number of buffered updates per subscriber.
const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of committed rate records to any number of subscribers.
///
/// Publishing never blocks and never fails: with no subscribers the update is
/// dropped, and a slow subscriber observes `RecvError::Lagged` on its side.
#[derive(Debug, Clone)]
pub struct RateFeed {
    tx: broadcast::Sender<ExchangeRate>,
}

impl RateFeed {
    /// Create a feed with the default buffer.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a feed with a custom buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a committed record.
    pub fn publish(&self, rate: ExchangeRate) {
        let pair = rate.pair.clone();
        match self.tx.send(rate) {
            Ok(receivers) => trace!(pair = %pair, receivers, "Rate update published"),
            Err(_) => trace!(pair = %pair, "Rate update dropped, no subscribers"),
        }
    }

    /// Subscribe to updates published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ExchangeRate> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for RateFeed {
    fn default() -> Self {
        Self::new()
    }
}
