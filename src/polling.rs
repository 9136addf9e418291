//! Fixed-delay reconciliation between local review state and the engine's
//! thread state.
//!
//! A poll reads `GET /threads/{id}/state` up to `max_attempts` times,
//! `interval` apart, and hands each snapshot to a probe. The first `Some`
//! from the probe ends the loop. Failed reads are logged and count as an
//! attempt. There is no backoff.

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clients::WorkflowEngine;
use crate::config::PollingConfig;
use crate::error::{GatewayError, Result};
use crate::schemas::{
    Need, ThreadState, UseCase, UseCaseCategory, needs_fingerprint, use_cases_fingerprint,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl From<&PollingConfig> for PollPolicy {
    fn from(cfg: &PollingConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            interval: cfg.interval(),
        }
    }
}

#[derive(Debug)]
pub struct PollOutcome<T> {
    pub value: T,
    pub attempts: u32,
}

pub async fn poll_thread_state<T, F>(
    engine: &dyn WorkflowEngine,
    thread_id: &str,
    operation: &str,
    policy: PollPolicy,
    cancel: &CancellationToken,
    mut probe: F,
) -> Result<PollOutcome<T>>
where
    F: FnMut(&ThreadState) -> Option<T>,
{
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled {
                operation: operation.to_string(),
            });
        }

        match engine.get_state(thread_id).await {
            Ok(state) => {
                if let Some(value) = probe(&state) {
                    debug!(
                        "{} ready on thread {} after {} attempt(s)",
                        operation, thread_id, attempt
                    );
                    return Ok(PollOutcome {
                        value,
                        attempts: attempt,
                    });
                }
            }
            Err(e) => warn!(
                "{}: state read {}/{} failed: {}",
                operation, attempt, max_attempts, e
            ),
        }

        if attempt < max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(GatewayError::Cancelled {
                        operation: operation.to_string(),
                    });
                }
                _ = tokio::time::sleep(policy.interval) => {}
            }
        }
    }

    warn!(
        "{} on thread {} gave up after {} attempts",
        operation, thread_id, max_attempts
    );
    Err(GatewayError::Timeout {
        operation: operation.to_string(),
        attempts: max_attempts,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UseCaseProposals {
    pub quick_wins: Vec<UseCase>,
    pub structuration_ia: Vec<UseCase>,
}

impl UseCaseProposals {
    pub fn from_state(state: &ThreadState) -> Self {
        Self {
            quick_wins: state.proposed_use_cases(UseCaseCategory::QuickWin),
            structuration_ia: state.proposed_use_cases(UseCaseCategory::StructurationIa),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.quick_wins.is_empty() && self.structuration_ia.is_empty()
    }

    pub fn fingerprint(&self) -> Vec<String> {
        let mut keys = use_cases_fingerprint(&self.quick_wins);
        keys.extend(use_cases_fingerprint(&self.structuration_ia));
        keys
    }
}

/// Needs have been proposed.
pub fn needs_ready(state: &ThreadState) -> Option<Vec<Need>> {
    let needs = state.identified_needs();
    (!needs.is_empty()).then_some(needs)
}

/// At least one use-case list has been proposed.
pub fn use_cases_ready(state: &ThreadState) -> Option<UseCaseProposals> {
    let proposals = UseCaseProposals::from_state(state);
    (!proposals.is_empty()).then_some(proposals)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NeedsTransition {
    /// Enough needs validated; use-case proposals are available.
    Advance(UseCaseProposals),
    /// The engine produced a different set of needs to review.
    Regenerated(Vec<Need>),
}

/// Probe used after a needs validation is submitted.
///
/// `previous` is the fingerprint of the needs as the engine last delivered
/// them. `accumulated` is the locally validated count including the batch
/// just sent.
pub fn after_needs_validation(
    previous: Vec<String>,
    accumulated: usize,
    threshold: usize,
) -> impl FnMut(&ThreadState) -> Option<NeedsTransition> + use<> {
    move |state| {
        let validated = state.validated_needs_count().max(accumulated);
        if validated >= threshold {
            return use_cases_ready(state).map(NeedsTransition::Advance);
        }
        let needs = state.identified_needs();
        if !needs.is_empty() && needs_fingerprint(&needs) != previous {
            return Some(NeedsTransition::Regenerated(needs));
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UseCaseTransition {
    Complete,
    Regenerated(UseCaseProposals),
}

/// Probe used after a use-case validation is submitted.
pub fn after_use_case_validation(
    previous: Vec<String>,
    accumulated: usize,
    threshold: usize,
) -> impl FnMut(&ThreadState) -> Option<UseCaseTransition> + use<> {
    move |state| {
        let validated = state.validated_use_cases_count().max(accumulated);
        if validated >= threshold {
            return Some(UseCaseTransition::Complete);
        }
        let proposals = UseCaseProposals::from_state(state);
        if !proposals.is_empty() && proposals.fingerprint() != previous {
            return Some(UseCaseTransition::Regenerated(proposals));
        }
        None
    }
}

/// Probe used after an explicit needs regeneration request.
pub fn needs_regenerated(
    previous: Vec<String>,
) -> impl FnMut(&ThreadState) -> Option<Vec<Need>> + use<> {
    move |state| {
        let needs = state.identified_needs();
        (!needs.is_empty() && needs_fingerprint(&needs) != previous).then_some(needs)
    }
}

/// Probe used after an explicit use-case regeneration request.
pub fn use_cases_regenerated(
    previous: Vec<String>,
) -> impl FnMut(&ThreadState) -> Option<UseCaseProposals> + use<> {
    move |state| {
        let proposals = UseCaseProposals::from_state(state);
        (!proposals.is_empty() && proposals.fingerprint() != previous).then_some(proposals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{RunInfo, ThreadInfo};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns the scripted states in order, then repeats the last one.
    struct ScriptedEngine {
        states: Mutex<Vec<Result<ThreadState>>>,
        reads: AtomicU32,
    }

    impl ScriptedEngine {
        fn new(states: Vec<Result<ThreadState>>) -> Self {
            Self {
                states: Mutex::new(states),
                reads: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl WorkflowEngine for ScriptedEngine {
        async fn create_thread(&self) -> Result<ThreadInfo> {
            unimplemented!()
        }
        async fn run_wait(&self, _: &str, _: Option<Value>) -> Result<Value> {
            unimplemented!()
        }
        async fn start_run(&self, _: &str, _: Option<Value>) -> Result<RunInfo> {
            unimplemented!()
        }
        async fn get_state(&self, _: &str) -> Result<ThreadState> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let mut states = self.states.lock().unwrap();
            if states.len() > 1 {
                states.remove(0)
            } else {
                match &states[0] {
                    Ok(s) => Ok(s.clone()),
                    Err(_) => Err(GatewayError::Transport {
                        message: "down".into(),
                    }),
                }
            }
        }
        async fn update_state(&self, _: &str, _: Value) -> Result<()> {
            unimplemented!()
        }
        async fn health(&self) -> bool {
            true
        }
    }

    fn fast() -> PollPolicy {
        PollPolicy {
            max_attempts: 5,
            interval: Duration::from_millis(1),
        }
    }

    fn needs_state(titles: &[&str]) -> ThreadState {
        let needs: Vec<Value> = titles
            .iter()
            .enumerate()
            .map(|(i, t)| json!({"id": format!("need_{}", i + 1), "theme": t, "quotes": []}))
            .collect();
        ThreadState::from_values(json!({ "identified_needs": needs }))
    }

    #[tokio::test]
    async fn returns_once_probe_is_satisfied() {
        let engine = ScriptedEngine::new(vec![
            Ok(ThreadState::default()),
            Err(GatewayError::Transport {
                message: "flaky".into(),
            }),
            Ok(needs_state(&["A", "B"])),
        ]);
        let cancel = CancellationToken::new();
        let out = poll_thread_state(&engine, "t", "needs", fast(), &cancel, needs_ready)
            .await
            .unwrap();
        assert_eq!(out.attempts, 3);
        assert_eq!(out.value.len(), 2);
    }

    #[tokio::test]
    async fn times_out_after_max_attempts() {
        let engine = ScriptedEngine::new(vec![Ok(ThreadState::default())]);
        let cancel = CancellationToken::new();
        let err = poll_thread_state(&engine, "t", "needs", fast(), &cancel, needs_ready)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { attempts: 5, .. }));
        assert_eq!(engine.reads.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn cancelled_token_stops_polling() {
        let engine = ScriptedEngine::new(vec![Ok(ThreadState::default())]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = poll_thread_state(&engine, "t", "needs", fast(), &cancel, needs_ready)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled { .. }));
        assert_eq!(engine.reads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn needs_probe_waits_for_a_different_set() {
        let before = needs_fingerprint(&needs_state(&["A", "B"]).identified_needs());
        let mut probe = after_needs_validation(before, 2, 5);
        assert_eq!(probe(&needs_state(&["A", "B"])), None);
        match probe(&needs_state(&["C", "D"])) {
            Some(NeedsTransition::Regenerated(needs)) => assert_eq!(needs[0].title, "C"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn needs_probe_advances_when_threshold_reached() {
        let mut probe = after_needs_validation(Vec::new(), 5, 5);
        assert_eq!(probe(&needs_state(&["A"])), None);
        let state = ThreadState::from_values(json!({
            "proposed_quick_wins": [{"titre": "QW"}],
        }));
        match probe(&state) {
            Some(NeedsTransition::Advance(p)) => assert_eq!(p.quick_wins.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn use_case_probe_trusts_engine_count() {
        let mut probe = after_use_case_validation(Vec::new(), 1, 5);
        let state = ThreadState::from_values(json!({
            "validated_quick_wins": [{}, {}, {}],
            "validated_structuration_ia": [{}, {}],
        }));
        assert_eq!(probe(&state), Some(UseCaseTransition::Complete));
    }

    #[test]
    fn regenerated_sets_must_differ() {
        let before = needs_fingerprint(&needs_state(&["A", "B"]).identified_needs());
        let mut changed_set = needs_regenerated(before);
        assert_eq!(changed_set(&needs_state(&["A", "B"])), None);
        assert_eq!(changed_set(&needs_state(&["A", "C"])).map(|n| n.len()), Some(2));

        let state = ThreadState::from_values(json!({
            "proposed_quick_wins": [{"titre": "QW"}],
        }));
        let mut changed_set = use_cases_regenerated(UseCaseProposals::from_state(&state).fingerprint());
        assert_eq!(changed_set(&state), None);
        let changed = ThreadState::from_values(json!({
            "proposed_quick_wins": [{"titre": "Autre"}],
        }));
        assert!(changed_set(&changed).is_some());
    }
}
