// ============================================================================
// Expiry Sweeper
// Periodic removal of resting orders past their expiry
// ============================================================================

use crate::engine::MatchingEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Run [`MatchingEngine::expire_orders`] every `interval` until the task is
/// aborted. The first sweep happens one interval after spawning.
pub fn spawn_expiry_sweeper(engine: Arc<MatchingEngine>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let expired = engine.expire_orders().await;
            if expired > 0 {
                tracing::debug!(expired, "Expiry sweep finished");
            }
        }
    })
}
