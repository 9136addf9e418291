//! Drives the remote analysis workflow for one review session: dispatch
//! the initial run, submit validations, and reconcile proposals by polling.
//!
//! The session store lock is never held across an engine call. Each
//! operation snapshots what it needs, talks to the engine, then writes back.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clients::WorkflowEngine;
use crate::config::{Config, ReviewConfig};
use crate::error::{GatewayError, Result};
use crate::polling::{
    NeedsTransition, PollPolicy, UseCaseProposals, UseCaseTransition, after_needs_validation,
    after_use_case_validation, needs_ready, needs_regenerated, poll_thread_state,
    use_cases_regenerated,
};
use crate::review::{Phase, ReviewSession};
use crate::schemas::{Need, UseCase, UseCaseCategory, needs_fingerprint};
use crate::sessions::SessionStore;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartAnalysis {
    #[serde(default)]
    pub company_name: String,
    #[serde(default)]
    pub workshop_files: Vec<String>,
    #[serde(default)]
    pub transcript_files: Vec<String>,
}

#[derive(Clone)]
pub struct WorkflowService {
    engine: Arc<dyn WorkflowEngine>,
    store: SessionStore,
    policy: PollPolicy,
    review: ReviewConfig,
    shutdown: CancellationToken,
}

fn feedback_list(feedback: Option<String>) -> Value {
    match feedback.map(|f| f.trim().to_string()) {
        Some(f) if !f.is_empty() => json!([f]),
        _ => json!([]),
    }
}

fn require_thread(session: &ReviewSession) -> Result<String> {
    session
        .thread_id
        .clone()
        .ok_or_else(|| GatewayError::validation("no analysis has been started for this session"))
}

impl WorkflowService {
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        store: SessionStore,
        config: &Config,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            store,
            policy: PollPolicy::from(&config.polling),
            review: config.review.clone(),
            shutdown,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn engine(&self) -> &Arc<dyn WorkflowEngine> {
        &self.engine
    }

    /// Record a failure on the session so the UI can render it, then pass it on.
    async fn guard<T>(&self, id: Uuid, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!("Session {}: {}", id, e);
            let recorded = self
                .store
                .update(id, |s| {
                    s.record_error(e);
                    s.status_message = None;
                    Ok(())
                })
                .await;
            if let Err(store_err) = recorded {
                warn!("Could not record error on session {}: {}", id, store_err);
            }
        }
        result
    }

    async fn set_status(&self, id: Uuid, message: &str) -> Result<()> {
        let message = message.to_string();
        self.store
            .update(id, move |s| {
                s.clear_error();
                s.status_message = Some(message);
                s.touch();
                Ok(())
            })
            .await
    }

    // ---- start -------------------------------------------------------------

    pub async fn start_analysis(&self, id: Uuid, request: StartAnalysis) -> Result<ReviewSession> {
        let company = request.company_name.trim().to_string();
        if company.is_empty() {
            return Err(GatewayError::validation("company name is required"));
        }
        if request.workshop_files.is_empty() && request.transcript_files.is_empty() {
            return Err(GatewayError::validation(
                "at least one workshop or transcript file is required",
            ));
        }

        let workshop_files = request.workshop_files.clone();
        let transcript_files = request.transcript_files.clone();
        let company_for_session = company.clone();
        self.store
            .update(id, move |s| {
                s.require_phase(Phase::Upload)?;
                s.company_name = company_for_session;
                s.workshop_files = workshop_files;
                s.transcript_files = transcript_files;
                Ok(())
            })
            .await?;
        self.set_status(id, "Analyse des fichiers en cours").await?;

        let result = self.dispatch_analysis(id, &company, &request).await;
        let needs = self.guard(id, result).await?;

        info!("Session {}: {} needs proposed", id, needs.len());
        self.store
            .update(id, move |s| {
                s.set_needs(needs);
                s.phase = Phase::Needs;
                s.status_message = None;
                Ok(s.clone())
            })
            .await
    }

    async fn dispatch_analysis(
        &self,
        id: Uuid,
        company: &str,
        request: &StartAnalysis,
    ) -> Result<Vec<Need>> {
        let thread = self.engine.create_thread().await?;
        let thread_id = thread.thread_id.clone();
        let stored = thread_id.clone();
        self.store
            .update(id, move |s| {
                s.thread_id = Some(stored);
                Ok(())
            })
            .await?;

        let input = json!({
            "company_info": { "company_name": company },
            "workshop_files": request.workshop_files,
            "transcript_files": request.transcript_files,
        });
        info!(
            "Session {}: starting analysis on thread {} ({} workshop, {} transcript files)",
            id,
            thread_id,
            request.workshop_files.len(),
            request.transcript_files.len()
        );
        self.engine.run_wait(&thread_id, Some(input)).await?;

        let cancel = self.shutdown.child_token();
        let outcome = poll_thread_state(
            self.engine.as_ref(),
            &thread_id,
            "needs generation",
            self.policy,
            &cancel,
            needs_ready,
        )
        .await?;
        Ok(outcome.value)
    }

    // ---- needs -------------------------------------------------------------

    pub async fn submit_needs(&self, id: Uuid, feedback: Option<String>) -> Result<ReviewSession> {
        let snapshot = self.store.get(id).await?;
        snapshot.require_phase(Phase::Needs)?;
        let thread_id = require_thread(&snapshot)?;
        let selected = snapshot.selected_needs();
        if selected.is_empty() {
            return Err(GatewayError::validation("select at least one need to validate"));
        }
        let rejected = snapshot.rejected_needs();

        let values = json!({
            "validated_needs": selected.iter().map(|n| n.to_engine()).collect::<Vec<_>>(),
            "rejected_needs": rejected.iter().map(|n| n.to_engine()).collect::<Vec<_>>(),
            "user_feedback": feedback_list(feedback),
        });
        self.set_status(id, "Validation des besoins en cours").await?;
        let sent = self.send_validation(&thread_id, values).await;
        self.guard(id, sent).await?;

        let accumulated = self
            .store
            .update(id, move |s| {
                s.accumulate_validated_needs(selected);
                Ok(s.validated_needs.len())
            })
            .await?;
        info!(
            "Session {}: {} needs validated so far (threshold {})",
            id, accumulated, self.review.min_validated_needs
        );

        let cancel = self.shutdown.child_token();
        let polled = poll_thread_state(
            self.engine.as_ref(),
            &thread_id,
            "needs validation",
            self.policy,
            &cancel,
            after_needs_validation(
                snapshot.needs_source.clone(),
                accumulated,
                self.review.min_validated_needs,
            ),
        )
        .await;
        let outcome = self.guard(id, polled).await?;

        self.store
            .update(id, move |s| {
                match outcome.value {
                    NeedsTransition::Advance(proposals) => {
                        s.set_use_cases(proposals);
                        s.phase = Phase::UseCases;
                    }
                    NeedsTransition::Regenerated(needs) => {
                        s.set_needs(needs);
                    }
                }
                s.status_message = None;
                Ok(s.clone())
            })
            .await
    }

    // ---- use cases ---------------------------------------------------------

    pub async fn submit_use_cases(
        &self,
        id: Uuid,
        feedback: Option<String>,
    ) -> Result<ReviewSession> {
        let snapshot = self.store.get(id).await?;
        snapshot.require_phase(Phase::UseCases)?;
        let thread_id = require_thread(&snapshot)?;
        let quick_wins = snapshot.selected_use_cases(UseCaseCategory::QuickWin);
        let structuration = snapshot.selected_use_cases(UseCaseCategory::StructurationIa);
        if quick_wins.is_empty() && structuration.is_empty() {
            return Err(GatewayError::validation(
                "select at least one use case to validate",
            ));
        }

        let to_engine = |items: Vec<UseCase>| -> Vec<Value> {
            items.iter().map(|u| u.to_engine()).collect()
        };
        let values = json!({
            "validated_quick_wins": to_engine(quick_wins.clone()),
            "validated_structuration_ia": to_engine(structuration.clone()),
            "rejected_quick_wins": to_engine(snapshot.rejected_use_cases(UseCaseCategory::QuickWin)),
            "rejected_structuration_ia":
                to_engine(snapshot.rejected_use_cases(UseCaseCategory::StructurationIa)),
            "user_feedback": feedback_list(feedback),
        });
        self.set_status(id, "Validation des cas d'usage en cours").await?;
        let sent = self.send_validation(&thread_id, values).await;
        self.guard(id, sent).await?;

        let accumulated = self
            .store
            .update(id, move |s| {
                s.accumulate_validated_use_cases(quick_wins, structuration);
                Ok(s.validated_use_cases_count())
            })
            .await?;
        let threshold = self.review.min_validated_use_cases;
        info!(
            "Session {}: {} use cases validated so far (threshold {})",
            id, accumulated, threshold
        );

        if accumulated >= threshold {
            return self
                .store
                .update(id, |s| {
                    s.phase = Phase::Results;
                    s.status_message = None;
                    Ok(s.clone())
                })
                .await;
        }

        let cancel = self.shutdown.child_token();
        let polled = poll_thread_state(
            self.engine.as_ref(),
            &thread_id,
            "use case validation",
            self.policy,
            &cancel,
            after_use_case_validation(snapshot.use_cases_source.clone(), accumulated, threshold),
        )
        .await;
        let outcome = self.guard(id, polled).await?;

        self.store
            .update(id, move |s| {
                match outcome.value {
                    UseCaseTransition::Complete => s.phase = Phase::Results,
                    UseCaseTransition::Regenerated(proposals) => s.set_use_cases(proposals),
                }
                s.status_message = None;
                Ok(s.clone())
            })
            .await
    }

    // ---- regeneration ------------------------------------------------------

    /// Ask the engine for a fresh set of needs. Current selections are sent
    /// as guidance but nothing is accumulated and the phase does not change.
    pub async fn regenerate_needs(
        &self,
        id: Uuid,
        feedback: Option<String>,
    ) -> Result<ReviewSession> {
        let snapshot = self.store.get(id).await?;
        snapshot.require_phase(Phase::Needs)?;
        let thread_id = require_thread(&snapshot)?;

        let values = json!({
            "validated_needs": snapshot.selected_needs().iter().map(|n| n.to_engine()).collect::<Vec<_>>(),
            "rejected_needs": snapshot.rejected_needs().iter().map(|n| n.to_engine()).collect::<Vec<_>>(),
            "user_feedback": feedback_list(feedback),
        });
        self.set_status(id, "Régénération des besoins en cours").await?;
        let sent = self.send_validation(&thread_id, values).await;
        self.guard(id, sent).await?;

        let cancel = self.shutdown.child_token();
        let polled = poll_thread_state(
            self.engine.as_ref(),
            &thread_id,
            "needs regeneration",
            self.policy,
            &cancel,
            needs_regenerated(snapshot.needs_source.clone()),
        )
        .await;
        let outcome = self.guard(id, polled).await?;

        info!("Session {}: {} needs regenerated", id, outcome.value.len());
        self.store
            .update(id, move |s| {
                s.set_needs(outcome.value);
                s.status_message = None;
                Ok(s.clone())
            })
            .await
    }

    /// Ask the engine for fresh use cases. A category whose selection already
    /// meets the use-case threshold keeps its current proposals.
    pub async fn regenerate_use_cases(
        &self,
        id: Uuid,
        feedback: Option<String>,
    ) -> Result<ReviewSession> {
        let snapshot = self.store.get(id).await?;
        snapshot.require_phase(Phase::UseCases)?;
        let thread_id = require_thread(&snapshot)?;

        let to_engine = |items: Vec<UseCase>| -> Vec<Value> {
            items.iter().map(|u| u.to_engine()).collect()
        };
        let values = json!({
            "validated_quick_wins": to_engine(snapshot.selected_use_cases(UseCaseCategory::QuickWin)),
            "validated_structuration_ia":
                to_engine(snapshot.selected_use_cases(UseCaseCategory::StructurationIa)),
            "user_feedback": feedback_list(feedback),
        });
        self.set_status(id, "Régénération des cas d'usage en cours").await?;
        let sent = self.send_validation(&thread_id, values).await;
        self.guard(id, sent).await?;

        let cancel = self.shutdown.child_token();
        let polled = poll_thread_state(
            self.engine.as_ref(),
            &thread_id,
            "use case regeneration",
            self.policy,
            &cancel,
            use_cases_regenerated(snapshot.use_cases_source.clone()),
        )
        .await;
        let outcome = self.guard(id, polled).await?;

        let keep_threshold = self.review.min_validated_use_cases;
        self.store
            .update(id, move |s| {
                s.replace_use_cases(outcome.value, keep_threshold);
                s.status_message = None;
                Ok(s.clone())
            })
            .await
    }

    async fn send_validation(&self, thread_id: &str, values: Value) -> Result<()> {
        self.engine.update_state(thread_id, values).await?;
        let run = self.engine.start_run(thread_id, None).await?;
        info!("Resumed thread {} with run {}", thread_id, run.run_id);
        Ok(())
    }

    // ---- recovery ----------------------------------------------------------

    /// Re-read the engine state once and pull any new proposals into the
    /// session. Used after a timeout.
    pub async fn refresh(&self, id: Uuid) -> Result<ReviewSession> {
        let snapshot = self.store.get(id).await?;
        let thread_id = require_thread(&snapshot)?;
        let fetched = self.engine.get_state(&thread_id).await;
        let state = self.guard(id, fetched).await?;

        let needs = state.identified_needs();
        let proposals = UseCaseProposals::from_state(&state);
        let needs_threshold = self.review.min_validated_needs;
        self.store
            .update(id, move |s| {
                if !needs.is_empty() && needs_fingerprint(&needs) != s.needs_source {
                    s.set_needs(needs);
                }
                if !proposals.is_empty() && proposals.fingerprint() != s.use_cases_source {
                    s.set_use_cases(proposals);
                }
                if s.phase == Phase::Upload && !s.needs.is_empty() {
                    s.phase = Phase::Needs;
                }
                let validated = s.validated_needs.len().max(state.validated_needs_count());
                if s.phase == Phase::Needs
                    && validated >= needs_threshold
                    && !(s.quick_wins.is_empty() && s.structuration_ia.is_empty())
                {
                    s.phase = Phase::UseCases;
                }
                s.clear_error();
                s.status_message = None;
                Ok(s.clone())
            })
            .await
    }

    /// Move to the next phase when enough items are already accumulated.
    ///
    /// Leaving `Needs` requires use-case proposals. When the session has none
    /// yet, the engine state is read once to pick them up.
    pub async fn advance(&self, id: Uuid) -> Result<ReviewSession> {
        let needs_threshold = self.review.min_validated_needs;
        let use_case_threshold = self.review.min_validated_use_cases;

        let snapshot = self.store.get(id).await?;
        let mut fetched = None;
        if snapshot.phase == Phase::Needs
            && snapshot.validated_needs.len() >= needs_threshold
            && snapshot.quick_wins.is_empty()
            && snapshot.structuration_ia.is_empty()
        {
            let thread_id = require_thread(&snapshot)?;
            let state = self.engine.get_state(&thread_id).await;
            let state = self.guard(id, state).await?;
            fetched = Some(UseCaseProposals::from_state(&state));
        }

        self.store
            .update(id, move |s| {
                match s.phase {
                    Phase::Needs => {
                        if s.validated_needs.len() < needs_threshold {
                            return Err(GatewayError::validation(format!(
                                "{} needs validated, at least {} required",
                                s.validated_needs.len(),
                                needs_threshold
                            )));
                        }
                        if let Some(proposals) = fetched
                            && !proposals.is_empty()
                        {
                            s.set_use_cases(proposals);
                        }
                        if s.quick_wins.is_empty() && s.structuration_ia.is_empty() {
                            return Err(GatewayError::validation(
                                "no use cases have been proposed yet",
                            ));
                        }
                        s.phase = Phase::UseCases;
                    }
                    Phase::UseCases => {
                        let count = s.validated_use_cases_count();
                        if count < use_case_threshold {
                            return Err(GatewayError::validation(format!(
                                "{} use cases validated, at least {} required",
                                count, use_case_threshold
                            )));
                        }
                        s.phase = Phase::Results;
                    }
                    Phase::Upload | Phase::Results => {
                        return Err(GatewayError::validation(format!(
                            "cannot advance from phase {:?}",
                            s.phase
                        )));
                    }
                }
                s.touch();
                Ok(s.clone())
            })
            .await
    }
}
