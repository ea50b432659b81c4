//! Peer matching for coordination requests.

use std::sync::Arc;

use tracing::debug;

use crate::api::types::{CoordinationNotice, OutboundMessage};
use crate::domain::{AgentStatus, CoordinationRequest};
use crate::error::Result;
use crate::registry::ConnectionRegistry;
use crate::storage::{AgentFilter, Storage};

/// Upper bound on candidates per coordination request.
pub const MAX_CANDIDATES: i64 = 5;

/// Ranks complementary peers for a coordination request and notifies the
/// ones with a live connection.
pub struct CoordinationMatcher {
    store: Arc<dyn Storage>,
    registry: Arc<ConnectionRegistry>,
}

impl CoordinationMatcher {
    pub fn new(store: Arc<dyn Storage>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Match and notify peers. Returns the number of agents actually
    /// notified, which may be fewer than the candidates matched: offline
    /// candidates are skipped.
    pub async fn dispatch(&self, request: &CoordinationRequest) -> Result<usize> {
        let filter = AgentFilter {
            exclude_id: Some(request.requester_id.clone()),
            status: Some(AgentStatus::Active),
            min_trust_score: Some(request.min_trust_score),
            specializations: request.required_specializations.clone(),
            limit: Some(MAX_CANDIDATES),
        };

        let candidates = self.store.query_agents(&filter).await?;

        let notice = CoordinationNotice {
            from_agent_id: request.requester_id.clone(),
            event_id: request.event_id.clone(),
            collaboration_type: request.collaboration_type.clone(),
            message: request.message.clone(),
        };

        let mut notified = 0;
        for candidate in &candidates {
            if self.registry.send_to(
                &candidate.id,
                OutboundMessage::CoordinationRequest {
                    data: notice.clone(),
                },
            ) {
                notified += 1;
            } else {
                debug!(agent_id = %candidate.id, "coordination candidate offline, skipping");
            }
        }

        debug!(
            requester = %request.requester_id,
            matched = candidates.len(),
            notified,
            "coordination request dispatched"
        );
        Ok(notified)
    }
}
