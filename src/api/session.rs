//! WebSocket session lifecycle: handshake, snapshot, message dispatch.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::state::AppState;
use crate::api::types::{
    parse_inbound, BroadcastReceipt, InboundMessage, MetaPrediction, OutboundMessage,
    PredictionReceipt, RequestCoordination, SubmitPrediction,
};
use crate::domain::{
    meta_event_id, validate_unit_interval, CoordinationRequest, DEFAULT_MIN_TRUST_SCORE,
    META_PREDICTION_CATEGORY,
};
use crate::error::{Result, SwarmError};
use crate::storage::NewPrediction;

#[derive(Deserialize)]
pub struct WsHandshake {
    agent_id: String,
    token: Option<String>,
}

/// WebSocket handler. Credentials are checked before the upgrade so a bad
/// token costs one HTTP 401, never a socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(handshake): Query<WsHandshake>,
    State(state): State<AppState>,
) -> std::result::Result<impl IntoResponse, StatusCode> {
    if handshake.agent_id.trim().is_empty() {
        warn!("WebSocket connection rejected: empty agent_id");
        return Err(StatusCode::BAD_REQUEST);
    }
    if let Err(e) = state.auth.verify(handshake.token.as_deref()) {
        warn!(
            agent_id = %handshake.agent_id,
            error = %e,
            "WebSocket connection rejected"
        );
        return Err(StatusCode::UNAUTHORIZED);
    }

    let agent_id = handshake.agent_id.trim().to_string();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, agent_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, agent_id: String) {
    let (sink, mut receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel();

    // Queue the unresolved-prediction snapshot first so it is the first
    // frame the agent sees. A snapshot failure degrades to an empty view
    // rather than tearing down the fresh connection.
    match state
        .store
        .list_unresolved_predictions(state.snapshot_limit)
        .await
    {
        Ok(predictions) => {
            debug!(agent_id, count = predictions.len(), "sending snapshot");
            let _ = tx.send(OutboundMessage::ActivePredictions { data: predictions });
        }
        Err(e) => {
            warn!(agent_id, error = %e, "snapshot query failed, skipping");
        }
    }

    // Replies go out on this session's own channel, never whichever entry
    // currently sits in the registry. Only a weak sender is kept here: a
    // strong clone would keep the channel open after a replacement evicts
    // the registry entry, and dropping `superseded` is what closes the
    // replaced connection.
    let reply_tx = tx.downgrade();
    let (handle, superseded) = state.registry.register(&agent_id, tx);
    let conn_id = handle.conn_id;
    drop(handle);
    if superseded.is_some() {
        info!(agent_id, "closing superseded connection");
    }
    drop(superseded);

    info!(agent_id, conn_id, connected = state.registry.len(), "agent connected");

    let mut send_task = tokio::spawn(writer_loop(sink, rx, state.idle_ping));

    loop {
        tokio::select! {
            // Writer gone means the channel closed (supersession) or the
            // peer stopped reading; either way the session is over.
            _ = &mut send_task => break,
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let response = match parse_inbound(&text) {
                        Ok(message) => handle_message(&state, &agent_id, message).await,
                        Err(e) => OutboundMessage::Error {
                            message: e.to_string(),
                        },
                    };
                    if !send_reply(&reply_tx, response) {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {
                    // Ping/pong are answered by axum itself.
                }
                Some(Err(e)) => {
                    debug!(agent_id, error = %e, "read error, closing session");
                    break;
                }
            }
        }
    }

    send_task.abort();
    // Guarded removal: if a re-handshake already replaced this entry the
    // newer connection stays registered.
    let removed = state.registry.unregister_exact(&agent_id, conn_id);
    info!(agent_id, conn_id, removed, "agent disconnected");
}

/// Deliver a reply on the session's own channel. Fails once every strong
/// sender is gone, i.e. the connection was unregistered or superseded; a
/// late reply must not land on a replacement connection.
fn send_reply(
    reply_tx: &mpsc::WeakUnboundedSender<OutboundMessage>,
    message: OutboundMessage,
) -> bool {
    match reply_tx.upgrade() {
        Some(tx) => tx.send(message).is_ok(),
        None => false,
    }
}

/// Serialize queued messages onto the socket; pings fill quiet stretches so
/// half-open connections are detected instead of lingering.
async fn writer_loop(
    mut sink: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
    idle_ping: Duration,
) {
    loop {
        match tokio::time::timeout(idle_ping, rx.recv()).await {
            Ok(Some(message)) => {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!(error = %e, "failed to serialize outbound message");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            // Channel closed: unregistered or superseded.
            Ok(None) => break,
            Err(_) => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = sink.close().await;
}

/// Dispatch one parsed inbound message and produce the reply for the sender.
/// Failures map to per-kind error envelopes; the session itself never drops
/// because of a bad message.
pub async fn handle_message(
    state: &AppState,
    agent_id: &str,
    message: InboundMessage,
) -> OutboundMessage {
    match message {
        InboundMessage::SubmitPrediction(submit) => {
            match submit_prediction(state, agent_id, submit).await {
                Ok(receipt) => OutboundMessage::PredictionConfirmed { data: receipt },
                Err(e) => OutboundMessage::PredictionError {
                    message: e.to_string(),
                },
            }
        }
        InboundMessage::MetaPrediction(meta) => {
            match submit_meta_prediction(state, agent_id, meta).await {
                Ok(receipt) => OutboundMessage::MetaPredictionConfirmed { data: receipt },
                Err(e) => OutboundMessage::PredictionError {
                    message: e.to_string(),
                },
            }
        }
        InboundMessage::RequestCoordination(request) => {
            match coordinate(state, agent_id, request).await {
                Ok(notified_agents) => OutboundMessage::CoordinationBroadcasted {
                    data: BroadcastReceipt { notified_agents },
                },
                Err(e) => OutboundMessage::Error {
                    message: e.to_string(),
                },
            }
        }
    }
}

fn validate_stake(stake: Option<Decimal>) -> Result<Decimal> {
    let stake = stake.unwrap_or(Decimal::ZERO);
    if stake < Decimal::ZERO {
        return Err(SwarmError::Validation(format!(
            "stake_amount must be non-negative, got {stake}"
        )));
    }
    Ok(stake)
}

async fn submit_prediction(
    state: &AppState,
    agent_id: &str,
    submit: SubmitPrediction,
) -> Result<PredictionReceipt> {
    validate_unit_interval(submit.predicted_probability, "predicted_probability")?;
    validate_unit_interval(submit.confidence_score, "confidence_score")?;
    let stake_amount = validate_stake(submit.stake_amount)?;

    let prediction = state
        .store
        .create_prediction(NewPrediction {
            agent_id: agent_id.to_string(),
            event_id: submit.event_id,
            event_title: submit.event_title,
            event_category: submit.event_category,
            predicted_probability: submit.predicted_probability,
            rationale: submit.rationale,
            confidence_score: submit.confidence_score,
            stake_amount,
        })
        .await?;

    // Fan-out happens off the session task; the submitter gets its
    // confirmation without waiting on peer lookups.
    let prediction_id = prediction.id;
    let broadcaster = state.broadcaster.clone();
    tokio::spawn(async move {
        broadcaster.broadcast_new_prediction(&prediction).await;
    });

    Ok(PredictionReceipt::submitted(prediction_id))
}

async fn submit_meta_prediction(
    state: &AppState,
    agent_id: &str,
    meta: MetaPrediction,
) -> Result<PredictionReceipt> {
    validate_unit_interval(meta.predicted_probability, "predicted_probability")?;
    validate_unit_interval(meta.confidence_score, "confidence_score")?;
    let stake_amount = validate_stake(meta.stake_amount)?;

    // Stored like any other prediction, under a synthetic event id and
    // category, so resolution and scoring need no special casing.
    let prediction = state
        .store
        .create_prediction(NewPrediction {
            agent_id: agent_id.to_string(),
            event_id: meta_event_id(&meta.target_prediction_id),
            event_title: format!("Meta-prediction on {}", meta.target_prediction_id),
            event_category: META_PREDICTION_CATEGORY.to_string(),
            predicted_probability: meta.predicted_probability,
            rationale: meta.rationale,
            confidence_score: meta.confidence_score,
            stake_amount,
        })
        .await?;

    let prediction_id = prediction.id;
    let broadcaster = state.broadcaster.clone();
    tokio::spawn(async move {
        broadcaster.broadcast_new_prediction(&prediction).await;
    });

    Ok(PredictionReceipt::submitted(prediction_id))
}

async fn coordinate(
    state: &AppState,
    agent_id: &str,
    request: RequestCoordination,
) -> Result<usize> {
    let min_trust_score = request.min_trust_score.unwrap_or(DEFAULT_MIN_TRUST_SCORE);
    validate_unit_interval(min_trust_score, "min_trust_score")?;

    state
        .matcher
        .dispatch(&CoordinationRequest {
            requester_id: agent_id.to_string(),
            event_id: request.event_id,
            collaboration_type: request.collaboration_type,
            message: request.message,
            min_trust_score,
            required_specializations: request.required_specializations.unwrap_or_default(),
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;

    #[tokio::test]
    async fn replies_stay_on_own_channel_and_die_with_it() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reply_tx = tx.downgrade();
        let (handle, _) = registry.register("a1", tx);
        drop(handle);

        assert!(send_reply(
            &reply_tx,
            OutboundMessage::Error {
                message: "first".into()
            }
        ));
        assert!(rx.try_recv().is_ok());

        // A re-handshake replaces the registry entry; once the session drops
        // the superseded handle, a late reply from the old session must fail
        // instead of landing on the replacement's channel.
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let (handle2, superseded) = registry.register("a1", tx2);
        drop(handle2);
        drop(superseded);

        assert!(!send_reply(
            &reply_tx,
            OutboundMessage::Error {
                message: "late".into()
            }
        ));
        assert!(rx2.try_recv().is_err());
    }
}
