// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Learning Feedback Loop
//!
//! Wires user feedback on a completed turn back into the cortex.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Corrections → Pattern Learning Engine, acceptance → rule
//!   reinforcement, per-session metrics
//!
//! Each session remembers its last completed turn. Feedback settles that turn
//! once: the first correction or acceptance reinforces its rules, later
//! feedback on the same turn still learns but reinforces nothing.

use std::sync::Arc;

use anvil_cortex::application::{ExtractionOutcome, LearningError, PatternLearningEngine, RuleRetrieval};
use anvil_cortex::domain::{Correction, CorrectionId, RuleId, RuleNamespace, SessionId};
use anvil_cortex::infrastructure::{CorrectionRepository, RepositoryError, RuleRepository, UpsertOutcome};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::turn::TurnResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub turns: u64,
    pub accepted_turns: u64,
    pub corrections_submitted: u64,
    pub corrections_skipped: u64,
    pub rules_learned: u64,
    pub rules_merged: u64,
    /// Turns settled by a correction.
    #[serde(default)]
    pub corrected_turns: u64,
    /// Most recent settled turns, oldest first: `true` when accepted.
    #[serde(default)]
    pub recent_outcomes: Vec<bool>,
}

/// Settled turns per trend window.
pub const TREND_WINDOW: usize = 5;

impl SessionMetrics {
    /// Corrections per completed turn.
    pub fn correction_rate(&self) -> f64 {
        ratio(self.corrections_submitted, self.turns)
    }

    /// Share of completed turns accepted without correction.
    pub fn acceptance_rate(&self) -> f64 {
        ratio(self.accepted_turns, self.turns)
    }

    /// Share of settled turns that were accepted rather than corrected.
    pub fn accuracy(&self) -> f64 {
        ratio(self.accepted_turns, self.accepted_turns + self.corrected_turns)
    }

    /// Accuracy of the last [`TREND_WINDOW`] settled turns minus the
    /// accuracy of the window before them. `None` until both windows have
    /// at least one turn.
    pub fn accuracy_trend(&self) -> Option<f64> {
        let split = self.recent_outcomes.len().checked_sub(TREND_WINDOW)?;
        if split == 0 {
            return None;
        }
        let (previous, recent) = self.recent_outcomes.split_at(split);
        Some(window_accuracy(recent) - window_accuracy(previous))
    }

    fn settle(&mut self, accepted: bool) {
        if accepted {
            self.accepted_turns += 1;
        } else {
            self.corrected_turns += 1;
        }
        self.recent_outcomes.push(accepted);
        let overflow = self.recent_outcomes.len().saturating_sub(2 * TREND_WINDOW);
        self.recent_outcomes.drain(..overflow);
    }
}

fn window_accuracy(outcomes: &[bool]) -> f64 {
    ratio(outcomes.iter().filter(|a| **a).count() as u64, outcomes.len() as u64)
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Serializable state of one session, used to carry a session across
/// process boundaries (the CLI runs one command per process).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_turn: Option<TurnResult>,
    /// Feedback was already given on `last_turn`.
    #[serde(default)]
    pub settled: bool,
    #[serde(default)]
    pub metrics: SessionMetrics,
}

#[derive(Debug, Clone, Default)]
struct SessionState {
    last_turn: Option<TurnResult>,
    settled: bool,
    metrics: SessionMetrics,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackOutcome {
    pub correction_id: CorrectionId,
    pub extraction: ExtractionOutcome,
    /// Rules of the corrected turn that the correction did not target.
    pub reinforced: Vec<RuleId>,
}

#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("session {0} has no completed turn")]
    NoCompletedTurn(SessionId),

    #[error(transparent)]
    Learning(#[from] LearningError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct FeedbackLoop {
    engine: Arc<PatternLearningEngine>,
    corrections: Arc<dyn CorrectionRepository>,
    rules: Arc<dyn RuleRepository>,
    retrieval: Arc<RuleRetrieval>,
    sessions: DashMap<SessionId, SessionState>,
    shared_namespace: bool,
}

impl FeedbackLoop {
    pub fn new(
        engine: Arc<PatternLearningEngine>,
        corrections: Arc<dyn CorrectionRepository>,
        rules: Arc<dyn RuleRepository>,
        retrieval: Arc<RuleRetrieval>,
    ) -> Self {
        Self {
            engine,
            corrections,
            rules,
            retrieval,
            sessions: DashMap::new(),
            shared_namespace: false,
        }
    }

    pub fn with_shared_namespace(mut self, shared: bool) -> Self {
        self.shared_namespace = shared;
        self
    }

    /// Namespace the session reads and writes rules in.
    pub fn namespace(&self, session: SessionId) -> RuleNamespace {
        RuleNamespace::for_session(session, self.shared_namespace)
    }

    /// Remember a completed turn as the session's feedback target.
    pub fn record_turn(&self, result: &TurnResult) {
        let mut state = self.sessions.entry(result.session).or_default();
        state.last_turn = Some(result.clone());
        state.settled = false;
        state.metrics.turns += 1;
    }

    pub fn last_turn(&self, session: SessionId) -> Option<TurnResult> {
        self.sessions.get(&session).and_then(|s| s.last_turn.clone())
    }

    pub fn metrics(&self, session: SessionId) -> SessionMetrics {
        self.sessions
            .get(&session)
            .map(|s| s.metrics.clone())
            .unwrap_or_default()
    }

    pub fn snapshot(&self, session: SessionId) -> SessionSnapshot {
        let state = self.sessions.get(&session).map(|s| s.clone()).unwrap_or_default();
        SessionSnapshot {
            session,
            last_turn: state.last_turn,
            settled: state.settled,
            metrics: state.metrics,
        }
    }

    pub fn restore(&self, snapshot: SessionSnapshot) {
        self.sessions.insert(
            snapshot.session,
            SessionState {
                last_turn: snapshot.last_turn,
                settled: snapshot.settled,
                metrics: snapshot.metrics,
            },
        );
    }

    /// Log a correction and learn from it.
    ///
    /// `original` defaults to the last turn's artifact. An empty `corrected`
    /// means the user only supplied a rationale.
    pub async fn submit_correction(
        &self,
        session: SessionId,
        original: Option<String>,
        corrected: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Result<FeedbackOutcome, FeedbackError> {
        let (last_turn, settled) = self
            .sessions
            .get(&session)
            .map(|s| (s.last_turn.clone(), s.settled))
            .unwrap_or((None, false));

        let targets_last_turn = match (&original, &last_turn) {
            (None, Some(_)) => true,
            (Some(text), Some(turn)) => text.trim() == turn.artifact_text.trim(),
            _ => false,
        };
        let original = original
            .or_else(|| last_turn.as_ref().map(|t| t.artifact_text.clone()))
            .unwrap_or_default();

        let correction = Correction::new(self.namespace(session), original, corrected, rationale);
        self.corrections.insert(&correction).await?;
        let extraction = self.engine.extract(&correction).await?;

        let mut reinforced = Vec::new();
        if targets_last_turn && !settled && !extraction.is_skipped() {
            if let Some(turn) = &last_turn {
                reinforced = self.untargeted_rules(&turn.rule_ids, &extraction).await?;
                self.retrieval.record_success(&reinforced).await?;
            }
        }

        {
            let mut state = self.sessions.entry(session).or_default();
            state.metrics.corrections_submitted += 1;
            match &extraction {
                ExtractionOutcome::Skipped(_) => state.metrics.corrections_skipped += 1,
                ExtractionOutcome::Learned { inserted, merged, .. } => {
                    state.metrics.rules_learned += *inserted as u64;
                    state.metrics.rules_merged += *merged as u64;
                }
            }
            if targets_last_turn && !settled {
                state.settled = true;
                state.metrics.settle(false);
            }
        }

        metrics::counter!("anvil_corrections_total").increment(1);
        info!(
            session = %session,
            correction_id = %correction.id,
            learned = extraction.rules().len(),
            skipped = extraction.is_skipped(),
            reinforced = reinforced.len(),
            "Processed correction"
        );

        Ok(FeedbackOutcome {
            correction_id: correction.id,
            extraction,
            reinforced,
        })
    }

    /// Positive feedback on the last turn: reinforce every rule it injected.
    pub async fn accept(&self, session: SessionId) -> Result<Vec<RuleId>, FeedbackError> {
        let (turn, settled) = self
            .sessions
            .get(&session)
            .and_then(|s| s.last_turn.clone().map(|t| (t, s.settled)))
            .ok_or(FeedbackError::NoCompletedTurn(session))?;

        if settled {
            debug!(session = %session, turn_id = %turn.turn_id, "Turn already settled");
            return Ok(Vec::new());
        }

        self.retrieval.record_success(&turn.rule_ids).await?;

        if let Some(mut state) = self.sessions.get_mut(&session) {
            state.settled = true;
            state.metrics.settle(true);
        }
        metrics::counter!("anvil_turns_accepted_total").increment(1);
        info!(session = %session, turn_id = %turn.turn_id, reinforced = turn.rule_ids.len(), "Accepted turn");

        Ok(turn.rule_ids)
    }

    /// Store a user-authored rule in the session's namespace.
    pub async fn teach(&self, session: SessionId, text: &str) -> Result<UpsertOutcome, FeedbackError> {
        let outcome = self.engine.teach(self.namespace(session), text).await?;
        {
            let mut state = self.sessions.entry(session).or_default();
            if outcome.is_merge() {
                state.metrics.rules_merged += 1;
            } else {
                state.metrics.rules_learned += 1;
            }
        }
        Ok(outcome)
    }

    /// Injected rules the correction did not touch. A rule is targeted when
    /// the correction merged into it, or when it carries the same non-general
    /// domain tag as a rule the correction produced.
    async fn untargeted_rules(
        &self,
        injected: &[RuleId],
        extraction: &ExtractionOutcome,
    ) -> Result<Vec<RuleId>, RepositoryError> {
        let learned = extraction.rules();
        let mut untargeted = Vec::with_capacity(injected.len());

        for id in injected {
            if learned.iter().any(|r| r.id == *id) {
                continue;
            }
            let Some(rule) = self.rules.find_by_id(*id).await? else {
                continue;
            };
            let same_domain = !rule.is_general()
                && learned.iter().any(|r| r.domain_tag == rule.domain_tag);
            if !same_domain {
                untargeted.push(*id);
            }
        }

        Ok(untargeted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registry::Registry;
    use crate::domain::routing::Tier;
    use crate::domain::turn::TurnId;
    use anvil_cortex::application::EventBus;
    use anvil_cortex::domain::{CortexEvent, Rule, RuleCategory, SkipReason};
    use anvil_cortex::infrastructure::{InMemoryCorrectionRepository, InMemoryRuleRepository, RuleQuery};
    use async_trait::async_trait;
    use chrono::Utc;

    struct NullBus;

    #[async_trait]
    impl EventBus for NullBus {
        async fn publish(&self, _event: CortexEvent) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        feedback: FeedbackLoop,
        rules: Arc<InMemoryRuleRepository>,
        corrections: Arc<InMemoryCorrectionRepository>,
    }

    fn fixture() -> Fixture {
        let rules = Arc::new(InMemoryRuleRepository::new());
        let corrections = Arc::new(InMemoryCorrectionRepository::new());
        let bus: Arc<dyn EventBus> = Arc::new(NullBus);
        let engine = Arc::new(PatternLearningEngine::new(
            rules.clone(),
            corrections.clone(),
            Arc::new(Registry::builtin().unwrap()),
            bus.clone(),
        ));
        let retrieval = Arc::new(RuleRetrieval::new(rules.clone(), bus));
        Fixture {
            feedback: FeedbackLoop::new(engine, corrections.clone(), rules.clone(), retrieval),
            rules,
            corrections,
        }
    }

    fn turn(session: SessionId, artifact: &str, rule_ids: Vec<RuleId>) -> TurnResult {
        TurnResult {
            turn_id: TurnId::new(),
            session,
            request: "request".to_string(),
            tier: Tier::Balanced,
            artifact_text: artifact.to_string(),
            applied_fixes: vec![],
            critiques: vec![],
            modules_used: vec![],
            suggestions: vec![],
            hardware: None,
            rule_ids,
            completed_at: Utc::now(),
        }
    }

    async fn stored(fx: &Fixture, namespace: RuleNamespace, text: &str, tag: &str) -> Rule {
        let rule = Rule::new(namespace, text, RuleCategory::Taught, tag, 0.8);
        fx.rules.insert(&rule).await.unwrap();
        rule
    }

    #[tokio::test]
    async fn test_correction_of_last_turn_learns_rule() {
        let fx = fixture();
        let session = SessionId::new();
        fx.feedback.record_turn(&turn(session, "threshold=1023", vec![]));

        let outcome = fx
            .feedback
            .submit_correction(session, None, "threshold=4095", "ADC is 12-bit, must use 4095 not 1023")
            .await
            .unwrap();

        let rules = outcome.extraction.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].confidence, 1.0);
        assert_eq!(rules[0].domain_tag, "adc");
        assert!(rules[0].text.contains("4095"));
        assert_eq!(rules[0].namespace, RuleNamespace::Session(session));

        let logged = fx.corrections.find_by_id(outcome.correction_id).await.unwrap().unwrap();
        assert_eq!(logged.original_artifact, "threshold=1023");
        assert!(logged.applied);

        let metrics = fx.feedback.metrics(session);
        assert_eq!(metrics.turns, 1);
        assert_eq!(metrics.corrections_submitted, 1);
        assert_eq!(metrics.rules_learned, 1);
        assert_eq!(metrics.correction_rate(), 1.0);
    }

    #[tokio::test]
    async fn test_untargeted_rules_are_reinforced() {
        let fx = fixture();
        let session = SessionId::new();
        let namespace = fx.feedback.namespace(session);
        let motor = stored(&fx, namespace, "Use ENA for motor speed", "motor").await;
        let led = stored(&fx, namespace, "Blink the status LED", "led").await;
        let general = stored(&fx, namespace, "Keep loop() short", "general").await;

        fx.feedback.record_turn(&turn(
            session,
            "void drive() {\n  analogWrite(ENA, 255);\n}",
            vec![motor.id, led.id, general.id],
        ));

        let outcome = fx
            .feedback
            .submit_correction(
                session,
                None,
                "void drive() {\n  analogWrite(ENA, 255);\n  stopAfter(5000);\n}",
                "Always stop the motor within 5000 ms",
            )
            .await
            .unwrap();

        assert_eq!(outcome.extraction.rules()[0].domain_tag, "motor");
        assert_eq!(outcome.reinforced, vec![led.id, general.id]);

        let motor_after = fx.rules.find_by_id(motor.id).await.unwrap().unwrap();
        let led_after = fx.rules.find_by_id(led.id).await.unwrap().unwrap();
        assert_eq!(motor_after.success_count, 0);
        assert_eq!(led_after.success_count, 1);
    }

    #[tokio::test]
    async fn test_malformed_correction_is_logged_and_skipped() {
        let fx = fixture();
        let session = SessionId::new();
        fx.feedback.record_turn(&turn(session, "int a = 1;", vec![]));

        let outcome = fx
            .feedback
            .submit_correction(session, None, "int a = 1;", "should be different")
            .await
            .unwrap();

        assert!(matches!(outcome.extraction, ExtractionOutcome::Skipped(SkipReason::Malformed(_))));
        assert!(outcome.reinforced.is_empty());
        let all = fx.rules.query(&RuleQuery::all(fx.feedback.namespace(session))).await.unwrap();
        assert!(all.is_empty());
        assert_eq!(fx.feedback.metrics(session).corrections_skipped, 1);
    }

    #[tokio::test]
    async fn test_accept_reinforces_once() {
        let fx = fixture();
        let session = SessionId::new();
        let namespace = fx.feedback.namespace(session);
        let rule = stored(&fx, namespace, "Serial should run at 115200 baud", "general").await;
        fx.feedback.record_turn(&turn(session, "code", vec![rule.id]));

        assert_eq!(fx.feedback.accept(session).await.unwrap(), vec![rule.id]);
        assert!(fx.feedback.accept(session).await.unwrap().is_empty());

        let after = fx.rules.find_by_id(rule.id).await.unwrap().unwrap();
        assert_eq!(after.success_count, 1);
        let metrics = fx.feedback.metrics(session);
        assert_eq!(metrics.accepted_turns, 1);
        assert_eq!(metrics.acceptance_rate(), 1.0);
    }

    #[tokio::test]
    async fn test_accept_without_turn_fails() {
        let fx = fixture();
        let err = fx.feedback.accept(SessionId::new()).await.unwrap_err();
        assert!(matches!(err, FeedbackError::NoCompletedTurn(_)));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let fx = fixture();
        let alice = SessionId::new();
        let bob = SessionId::new();

        fx.feedback.teach(alice, "Never use delay() in motor code").await.unwrap();

        let bob_rules = fx.rules.query(&RuleQuery::all(fx.feedback.namespace(bob))).await.unwrap();
        let alice_rules = fx.rules.query(&RuleQuery::all(fx.feedback.namespace(alice))).await.unwrap();
        assert!(bob_rules.is_empty());
        assert_eq!(alice_rules.len(), 1);
        assert_eq!(alice_rules[0].domain_tag, "motor");
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_keeps_last_turn() {
        let fx = fixture();
        let session = SessionId::new();
        fx.feedback.record_turn(&turn(session, "code", vec![]));
        let snapshot = fx.feedback.snapshot(session);

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: SessionSnapshot = serde_json::from_str(&json).unwrap();

        let other = fixture();
        other.feedback.restore(restored);
        assert_eq!(other.feedback.last_turn(session).unwrap().artifact_text, "code");
        assert_eq!(other.feedback.metrics(session).turns, 1);
    }

    #[test]
    fn test_rates_without_turns_are_zero() {
        let metrics = SessionMetrics::default();
        assert_eq!(metrics.correction_rate(), 0.0);
        assert_eq!(metrics.acceptance_rate(), 0.0);
        assert_eq!(metrics.accuracy(), 0.0);
        assert_eq!(metrics.accuracy_trend(), None);
    }

    #[tokio::test]
    async fn test_teach_counts_rules_before_any_turn() {
        let fx = fixture();
        let session = SessionId::new();

        fx.feedback.teach(session, "Never use delay() in motor code").await.unwrap();
        fx.feedback.teach(session, "Never use delay() in motor code").await.unwrap();

        let metrics = fx.feedback.metrics(session);
        assert_eq!(metrics.turns, 0);
        assert_eq!(metrics.rules_learned, 1);
        assert_eq!(metrics.rules_merged, 1);
    }

    #[tokio::test]
    async fn test_accuracy_trend_compares_recent_window() {
        let fx = fixture();
        let session = SessionId::new();

        // Five corrected turns, then five accepted ones.
        for _ in 0..TREND_WINDOW {
            fx.feedback.record_turn(&turn(session, "threshold=1023", vec![]));
            fx.feedback
                .submit_correction(session, None, "threshold=4095", "ADC is 12-bit, must use 4095 not 1023")
                .await
                .unwrap();
        }
        assert_eq!(fx.feedback.metrics(session).accuracy_trend(), None);

        for _ in 0..TREND_WINDOW {
            fx.feedback.record_turn(&turn(session, "code", vec![]));
            fx.feedback.accept(session).await.unwrap();
        }

        let metrics = fx.feedback.metrics(session);
        assert_eq!(metrics.corrected_turns, TREND_WINDOW as u64);
        assert_eq!(metrics.accepted_turns, TREND_WINDOW as u64);
        assert_eq!(metrics.accuracy(), 0.5);
        assert_eq!(metrics.accuracy_trend(), Some(1.0));
    }

    #[test]
    fn test_outcome_history_keeps_two_windows() {
        let mut metrics = SessionMetrics::default();
        for _ in 0..3 * TREND_WINDOW {
            metrics.settle(true);
        }
        metrics.settle(false);

        assert_eq!(metrics.recent_outcomes.len(), 2 * TREND_WINDOW);
        assert_eq!(metrics.recent_outcomes.last(), Some(&false));
        let trend = metrics.accuracy_trend().unwrap();
        assert!((trend + 0.2).abs() < 1e-9);
    }
}
