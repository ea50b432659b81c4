use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::Prediction;
use crate::error::{Result, SwarmError};

// ============================================================================
// Inbound Protocol
// ============================================================================

/// Closed set of inbound message kinds. Anything else is rejected at the
/// boundary with a protocol error; the connection stays open.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    SubmitPrediction(SubmitPrediction),
    RequestCoordination(RequestCoordination),
    MetaPrediction(MetaPrediction),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitPrediction {
    pub event_id: String,
    pub event_title: String,
    pub event_category: String,
    pub predicted_probability: f64,
    #[serde(default)]
    pub rationale: Option<String>,
    pub confidence_score: f64,
    #[serde(default)]
    pub stake_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestCoordination {
    pub event_id: String,
    /// Collaboration type tag; `type` on the wire, inside the data payload.
    #[serde(rename = "type")]
    pub collaboration_type: String,
    pub message: String,
    #[serde(default)]
    pub min_trust_score: Option<f64>,
    #[serde(default)]
    pub required_specializations: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaPrediction {
    pub target_prediction_id: String,
    pub predicted_probability: f64,
    #[serde(default)]
    pub rationale: Option<String>,
    pub confidence_score: f64,
    #[serde(default)]
    pub stake_amount: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Parse one inbound frame. Unknown tags and malformed payloads map to
/// `SwarmError::Protocol` with the detail the sender gets back verbatim.
pub fn parse_inbound(text: &str) -> Result<InboundMessage> {
    let envelope: InboundEnvelope = serde_json::from_str(text)
        .map_err(|e| SwarmError::Protocol(format!("Invalid message: {e}")))?;

    let payload = |kind: &str| {
        if envelope.data.is_null() {
            Err(SwarmError::Protocol(format!(
                "Missing data payload for message type: {kind}"
            )))
        } else {
            Ok(envelope.data.clone())
        }
    };

    match envelope.kind.as_str() {
        "submit_prediction" => serde_json::from_value(payload("submit_prediction")?)
            .map(InboundMessage::SubmitPrediction)
            .map_err(|e| SwarmError::Protocol(format!("Invalid submit_prediction payload: {e}"))),
        "request_coordination" => serde_json::from_value(payload("request_coordination")?)
            .map(InboundMessage::RequestCoordination)
            .map_err(|e| SwarmError::Protocol(format!("Invalid request_coordination payload: {e}"))),
        "meta_prediction" => serde_json::from_value(payload("meta_prediction")?)
            .map(InboundMessage::MetaPrediction)
            .map_err(|e| SwarmError::Protocol(format!("Invalid meta_prediction payload: {e}"))),
        other => Err(SwarmError::Protocol(format!(
            "Unknown message type: {other}"
        ))),
    }
}

// ============================================================================
// Outbound Protocol
// ============================================================================

/// Everything the engine ever writes to a connection. Envelope shape is
/// `{type, data?, message?}` in both directions.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    ActivePredictions { data: Vec<Prediction> },
    NewPrediction { data: PredictionNotice },
    PredictionConfirmed { data: PredictionReceipt },
    PredictionError { message: String },
    CoordinationRequest { data: CoordinationNotice },
    CoordinationBroadcasted { data: BroadcastReceipt },
    MetaPredictionConfirmed { data: PredictionReceipt },
    Error { message: String },
}

/// Peer notification for a freshly persisted prediction.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionNotice {
    pub prediction_id: Uuid,
    pub agent_id: String,
    pub event_id: String,
    pub predicted_probability: f64,
    pub confidence_score: f64,
    pub timestamp: DateTime<Utc>,
}

impl PredictionNotice {
    pub fn from_prediction(prediction: &Prediction) -> Self {
        Self {
            prediction_id: prediction.id,
            agent_id: prediction.agent_id.clone(),
            event_id: prediction.event_id.clone(),
            predicted_probability: prediction.predicted_probability,
            confidence_score: prediction.confidence_score,
            timestamp: prediction.submitted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionReceipt {
    pub prediction_id: Uuid,
    pub status: String,
}

impl PredictionReceipt {
    pub fn submitted(prediction_id: Uuid) -> Self {
        Self {
            prediction_id,
            status: "submitted".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinationNotice {
    pub from_agent_id: String,
    pub event_id: String,
    pub collaboration_type: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastReceipt {
    pub notified_agents: usize,
}

// ============================================================================
// Health Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub db: String,
    pub uptime_secs: i64,
    pub connected_agents: usize,
}
