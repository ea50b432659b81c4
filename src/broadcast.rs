//! Category-filtered fan-out of freshly persisted predictions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::api::types::{OutboundMessage, PredictionNotice};
use crate::domain::Prediction;
use crate::registry::ConnectionRegistry;
use crate::storage::Storage;

/// Default bound on concurrent specialization lookups per broadcast.
pub const DEFAULT_MAX_CONCURRENT_LOOKUPS: usize = 16;

/// Fans out `new_prediction` notifications to connections whose agent is
/// specialized in the event's category. Delivery is best-effort and
/// at-most-once per connection per broadcast; a failed lookup or closed
/// channel skips that peer without touching the rest.
pub struct CategoryBroadcaster {
    store: Arc<dyn Storage>,
    registry: Arc<ConnectionRegistry>,
    max_concurrent_lookups: usize,
}

impl CategoryBroadcaster {
    pub fn new(store: Arc<dyn Storage>, registry: Arc<ConnectionRegistry>) -> Self {
        Self::with_lookup_limit(store, registry, DEFAULT_MAX_CONCURRENT_LOOKUPS)
    }

    pub fn with_lookup_limit(
        store: Arc<dyn Storage>,
        registry: Arc<ConnectionRegistry>,
        max_concurrent_lookups: usize,
    ) -> Self {
        Self {
            store,
            registry,
            max_concurrent_lookups: max_concurrent_lookups.max(1),
        }
    }

    /// Broadcast one persisted prediction. Returns the number of peers the
    /// notification was actually queued to.
    pub async fn broadcast_new_prediction(&self, prediction: &Prediction) -> usize {
        let notice = PredictionNotice::from_prediction(prediction);
        let category = prediction.event_category.as_str();
        let delivered = AtomicUsize::new(0);

        // Membership snapshot: peers disconnecting mid-broadcast are
        // skipped, peers connecting mid-broadcast wait for the next one.
        let peers = self.registry.agent_ids();

        stream::iter(peers)
            .for_each_concurrent(Some(self.max_concurrent_lookups), |agent_id| {
                let notice = notice.clone();
                let delivered = &delivered;
                async move {
                    let agent = match self.store.get_agent_by_id(&agent_id).await {
                        Ok(Some(agent)) => agent,
                        Ok(None) => {
                            debug!(agent_id, "skipping broadcast: agent unknown to store");
                            return;
                        }
                        Err(e) => {
                            debug!(agent_id, error = %e, "skipping broadcast: lookup failed");
                            return;
                        }
                    };

                    if !agent.is_specialized_in(category) {
                        return;
                    }

                    if self
                        .registry
                        .send_to(&agent_id, OutboundMessage::NewPrediction { data: notice })
                    {
                        delivered.fetch_add(1, Ordering::Relaxed);
                    } else {
                        debug!(agent_id, "skipping broadcast: connection gone");
                    }
                }
            })
            .await;

        let count = delivered.load(Ordering::Relaxed);
        debug!(
            prediction_id = %prediction.id,
            category,
            delivered = count,
            "broadcast complete"
        );
        count
    }
}
