//! End-to-end message handling against an in-memory store: submission,
//! category fan-out, coordination matching, meta-predictions, resolution.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal_macros::dec;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;
use uuid::Uuid;

use trustswarm::api::session::handle_message;
use trustswarm::api::types::{
    InboundMessage, MetaPrediction, OutboundMessage, RequestCoordination, SubmitPrediction,
};
use trustswarm::api::AppState;
use trustswarm::domain::{Agent, AgentStatus, Prediction};
use trustswarm::error::{Result, SwarmError};
use trustswarm::scoring::ResolutionStats;
use trustswarm::storage::{AgentFilter, NewPrediction, Storage};
use trustswarm::AppConfig;

#[derive(Default)]
struct InMemoryStore {
    agents: Mutex<HashMap<String, Agent>>,
    predictions: Mutex<Vec<Prediction>>,
}

impl InMemoryStore {
    fn with_agents(agents: Vec<Agent>) -> Self {
        Self {
            agents: Mutex::new(agents.into_iter().map(|a| (a.id.clone(), a)).collect()),
            predictions: Mutex::new(Vec::new()),
        }
    }

    fn predictions(&self) -> Vec<Prediction> {
        self.predictions.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for InMemoryStore {
    async fn create_prediction(&self, new: NewPrediction) -> Result<Prediction> {
        let prediction = Prediction {
            id: Uuid::new_v4(),
            agent_id: new.agent_id,
            event_id: new.event_id,
            event_title: new.event_title,
            event_category: new.event_category,
            predicted_probability: new.predicted_probability,
            rationale: new.rationale,
            confidence_score: new.confidence_score,
            stake_amount: new.stake_amount,
            submitted_at: Utc::now(),
            resolved_at: None,
            actual_outcome: None,
            brier_score: None,
            was_correct: None,
        };
        self.predictions.lock().unwrap().push(prediction.clone());
        Ok(prediction)
    }

    async fn resolve_prediction(&self, id: Uuid, outcome: bool) -> Result<Prediction> {
        let mut predictions = self.predictions.lock().unwrap();
        let prediction = predictions
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| SwarmError::PredictionNotFound(id.to_string()))?;
        prediction.resolve(outcome)?;
        Ok(prediction.clone())
    }

    async fn get_agent_by_id(&self, id: &str) -> Result<Option<Agent>> {
        Ok(self.agents.lock().unwrap().get(id).cloned())
    }

    async fn prediction_stats(&self, agent_id: &str) -> Result<ResolutionStats> {
        let predictions = self.predictions.lock().unwrap();
        let resolved: Vec<_> = predictions
            .iter()
            .filter(|p| p.agent_id == agent_id && p.is_resolved())
            .collect();
        let resolved_count = resolved.len() as i64;
        let correct_count = resolved.iter().filter(|p| p.was_correct == Some(true)).count() as i64;
        let avg_brier_score = if resolved.is_empty() {
            0.0
        } else {
            resolved.iter().filter_map(|p| p.brier_score).sum::<f64>() / resolved.len() as f64
        };
        Ok(ResolutionStats {
            resolved_count,
            correct_count,
            avg_brier_score,
        })
    }

    async fn query_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        let agents = self.agents.lock().unwrap();
        let mut matched: Vec<Agent> = agents
            .values()
            .filter(|a| filter.exclude_id.as_deref() != Some(a.id.as_str()))
            .filter(|a| filter.status.map_or(true, |s| a.status == s))
            .filter(|a| filter.min_trust_score.map_or(true, |t| a.trust_score >= t))
            .filter(|a| {
                filter.specializations.is_empty()
                    || filter.specializations.iter().any(|s| a.is_specialized_in(s))
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.trust_score.total_cmp(&a.trust_score));
        if let Some(limit) = filter.limit {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }

    async fn list_unresolved_predictions(&self, limit: i64) -> Result<Vec<Prediction>> {
        let mut unresolved: Vec<Prediction> = self
            .predictions
            .lock()
            .unwrap()
            .iter()
            .filter(|p| !p.is_resolved())
            .cloned()
            .collect();
        unresolved.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        unresolved.truncate(limit as usize);
        Ok(unresolved)
    }
}

fn agent(id: &str, trust: f64, specializations: &[&str]) -> Agent {
    Agent {
        id: id.to_string(),
        name: id.to_string(),
        agent_type: "forecaster".into(),
        specializations: specializations.iter().map(|s| s.to_string()).collect(),
        trust_score: trust,
        status: AgentStatus::Active,
        created_at: Utc::now(),
    }
}

fn state_with(store: Arc<InMemoryStore>) -> AppState {
    let config = AppConfig::default_config("postgres://unused/unused");
    AppState::new(store, &config)
}

fn connect(state: &AppState, agent_id: &str) -> UnboundedReceiver<OutboundMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    state.registry.register(agent_id, tx);
    rx
}

async fn recv(rx: &mut UnboundedReceiver<OutboundMessage>) -> OutboundMessage {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

fn submission(category: &str) -> SubmitPrediction {
    serde_json::from_value(serde_json::json!({
        "event_id": "evt-1",
        "event_title": "BTC above 100k",
        "event_category": category,
        "predicted_probability": 0.7,
        "confidence_score": 0.8,
        "stake_amount": "25"
    }))
    .unwrap()
}

#[tokio::test]
async fn submission_confirms_and_fans_out_by_category() {
    let store = Arc::new(InMemoryStore::with_agents(vec![
        agent("alice", 0.8, &["crypto"]),
        agent("bob", 0.8, &["sports"]),
    ]));
    let state = state_with(Arc::clone(&store));
    let mut alice_rx = connect(&state, "alice");
    let mut bob_rx = connect(&state, "bob");

    let reply = handle_message(
        &state,
        "carol",
        InboundMessage::SubmitPrediction(submission("crypto")),
    )
    .await;

    let prediction_id = match reply {
        OutboundMessage::PredictionConfirmed { data } => {
            assert_eq!(data.status, "submitted");
            data.prediction_id
        }
        other => panic!("unexpected reply: {other:?}"),
    };

    let stored = store.predictions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, prediction_id);
    assert_eq!(stored[0].stake_amount, dec!(25));

    // Fan-out runs off the session task; only the crypto specialist hears it.
    match recv(&mut alice_rx).await {
        OutboundMessage::NewPrediction { data } => {
            assert_eq!(data.prediction_id, prediction_id);
            assert_eq!(data.agent_id, "carol");
        }
        other => panic!("unexpected message: {other:?}"),
    }
    tokio::task::yield_now().await;
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn out_of_range_probability_is_rejected_without_storing() {
    let store = Arc::new(InMemoryStore::default());
    let state = state_with(Arc::clone(&store));

    let mut bad = submission("crypto");
    bad.predicted_probability = 1.5;

    let reply = handle_message(&state, "carol", InboundMessage::SubmitPrediction(bad)).await;
    match reply {
        OutboundMessage::PredictionError { message } => {
            assert!(message.contains("predicted_probability"), "got: {message}");
        }
        other => panic!("unexpected reply: {other:?}"),
    }
    assert!(store.predictions().is_empty());
}

#[tokio::test]
async fn negative_stake_is_rejected_without_storing() {
    let store = Arc::new(InMemoryStore::default());
    let state = state_with(Arc::clone(&store));

    let mut bad = submission("crypto");
    bad.stake_amount = Some(dec!(-1));

    let reply = handle_message(&state, "carol", InboundMessage::SubmitPrediction(bad)).await;
    match reply {
        OutboundMessage::PredictionError { message } => {
            assert!(message.contains("stake_amount"), "got: {message}");
        }
        other => panic!("unexpected reply: {other:?}"),
    }
    assert!(store.predictions().is_empty());
}

#[tokio::test]
async fn coordination_reaches_trusted_live_specialists_only() {
    let store = Arc::new(InMemoryStore::with_agents(vec![
        agent("dana", 0.9, &["crypto"]),  // connected, qualifies
        agent("erin", 0.9, &["crypto"]),  // qualifies but offline
        agent("frank", 0.2, &["crypto"]), // connected, below threshold
    ]));
    let state = state_with(Arc::clone(&store));
    let mut requester_rx = connect(&state, "requester");
    let mut dana_rx = connect(&state, "dana");
    let mut frank_rx = connect(&state, "frank");

    let request = RequestCoordination {
        event_id: "evt-9".into(),
        collaboration_type: "analysis_swap".into(),
        message: "anyone covering this?".into(),
        min_trust_score: Some(0.6),
        required_specializations: Some(vec!["crypto".into()]),
    };

    let reply = handle_message(
        &state,
        "requester",
        InboundMessage::RequestCoordination(request),
    )
    .await;

    match reply {
        OutboundMessage::CoordinationBroadcasted { data } => {
            assert_eq!(data.notified_agents, 1);
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    match recv(&mut dana_rx).await {
        OutboundMessage::CoordinationRequest { data } => {
            assert_eq!(data.from_agent_id, "requester");
            assert_eq!(data.event_id, "evt-9");
        }
        other => panic!("unexpected message: {other:?}"),
    }
    assert!(frank_rx.try_recv().is_err());
    assert!(requester_rx.try_recv().is_err());
}

#[tokio::test]
async fn coordination_keeps_the_five_most_trusted_candidates() {
    // Six connected agents all qualify; trust rises with the index, so
    // peer-1 is the one the limit must cut.
    let agents: Vec<Agent> = (1..=6)
        .map(|n| agent(&format!("peer-{n}"), 0.6 + n as f64 * 0.05, &["crypto"]))
        .collect();
    let store = Arc::new(InMemoryStore::with_agents(agents));
    let state = state_with(Arc::clone(&store));

    let mut receivers = Vec::new();
    for n in 1..=6 {
        receivers.push((n, connect(&state, &format!("peer-{n}"))));
    }

    let request = RequestCoordination {
        event_id: "evt-9".into(),
        collaboration_type: "analysis_swap".into(),
        message: "anyone covering this?".into(),
        min_trust_score: Some(0.6),
        required_specializations: Some(vec!["crypto".into()]),
    };

    let reply = handle_message(
        &state,
        "requester",
        InboundMessage::RequestCoordination(request),
    )
    .await;

    match reply {
        OutboundMessage::CoordinationBroadcasted { data } => {
            assert_eq!(data.notified_agents, 5);
        }
        other => panic!("unexpected reply: {other:?}"),
    }

    // Candidates are ranked by trust score descending before the limit
    // applies, so exactly the top five hear about it.
    for (n, rx) in receivers.iter_mut() {
        if *n == 1 {
            assert!(
                rx.try_recv().is_err(),
                "lowest-trust candidate should be cut by the limit"
            );
        } else {
            match recv(rx).await {
                OutboundMessage::CoordinationRequest { data } => {
                    assert_eq!(data.event_id, "evt-9");
                }
                other => panic!("unexpected message for peer-{n}: {other:?}"),
            }
        }
    }
}

#[tokio::test]
async fn meta_prediction_is_stored_under_synthetic_event() {
    let store = Arc::new(InMemoryStore::default());
    let state = state_with(Arc::clone(&store));

    let meta = MetaPrediction {
        target_prediction_id: "p-42".into(),
        predicted_probability: 0.35,
        rationale: Some("their track record in this category is thin".into()),
        confidence_score: 0.6,
        stake_amount: None,
    };

    let reply = handle_message(&state, "carol", InboundMessage::MetaPrediction(meta)).await;
    assert!(matches!(
        reply,
        OutboundMessage::MetaPredictionConfirmed { .. }
    ));

    let stored = store.predictions();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].event_id, "meta_p-42");
    assert_eq!(stored[0].event_category, "meta_prediction");
    assert_eq!(stored[0].stake_amount, dec!(0));
}

#[tokio::test]
async fn resolution_applies_once_and_rejects_replays() {
    let store = Arc::new(InMemoryStore::default());
    let prediction = store
        .create_prediction(NewPrediction {
            agent_id: "carol".into(),
            event_id: "evt-1".into(),
            event_title: "BTC above 100k".into(),
            event_category: "crypto".into(),
            predicted_probability: 0.8,
            rationale: None,
            confidence_score: 0.9,
            stake_amount: dec!(0),
        })
        .await
        .unwrap();

    let resolved = store.resolve_prediction(prediction.id, true).await.unwrap();
    assert_eq!(resolved.actual_outcome, Some(true));
    assert!((resolved.brier_score.unwrap() - 0.04).abs() < 1e-12);

    let err = store.resolve_prediction(prediction.id, false).await.unwrap_err();
    assert!(matches!(err, SwarmError::AlreadyResolved(id) if id == prediction.id));

    // Trust reflects the single resolved, correct prediction.
    let trust = store.compute_trust_score("carol").await.unwrap();
    assert!((trust - (0.96 * 0.7 + 0.3)).abs() < 1e-9);
}

#[tokio::test]
async fn snapshot_lists_unresolved_most_recent_first() {
    let store = Arc::new(InMemoryStore::default());
    for n in 0..3 {
        store
            .create_prediction(NewPrediction {
                agent_id: "carol".into(),
                event_id: format!("evt-{n}"),
                event_title: format!("event {n}"),
                event_category: "crypto".into(),
                predicted_probability: 0.5,
                rationale: None,
                confidence_score: 0.5,
                stake_amount: dec!(0),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let resolved_id = store.predictions()[0].id;
    store.resolve_prediction(resolved_id, true).await.unwrap();

    let snapshot = store.list_unresolved_predictions(10).await.unwrap();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot[0].event_id, "evt-2");
    assert_eq!(snapshot[1].event_id, "evt-1");

    let capped = store.list_unresolved_predictions(1).await.unwrap();
    assert_eq!(capped.len(), 1);
}
