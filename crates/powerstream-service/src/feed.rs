//! Live feed: pumps upstream transaction events into the registry.

use tokio::sync::broadcast;
use tracing::{info, warn};

use powerstream_core::event::TxEvent;

use crate::registry::SubscriptionRegistry;

/// Counters for one feed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub events: u64,
    pub delivered: u64,
    pub failed: u64,
    pub lagged: u64,
}

pub struct LiveFeed {
    registry: SubscriptionRegistry,
}

impl LiveFeed {
    pub fn new(registry: SubscriptionRegistry) -> Self {
        Self { registry }
    }

    /// Dispatch every received event until the upstream channel closes.
    pub async fn run(&self, mut upstream: broadcast::Receiver<TxEvent>) -> FeedStats {
        let mut stats = FeedStats::default();
        loop {
            match upstream.recv().await {
                Ok(event) => {
                    let report = self.registry.dispatch(&event);
                    stats.events += 1;
                    stats.delivered += report.delivered as u64;
                    stats.failed += report.failed as u64;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    stats.lagged += skipped;
                    warn!(skipped, "live feed lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!(events = stats.events, delivered = stats.delivered, "live feed closed");
        stats
    }
}
