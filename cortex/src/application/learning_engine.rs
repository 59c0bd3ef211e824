// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Pattern Learning Engine
//!
//! Turns a [`Correction`] into rules:
//!
//! 1. Line-diff `original_artifact` against `corrected_artifact` and split the
//!    result into contiguous changed regions.
//! 2. For each region pick the rationale sentence sharing the most tokens with
//!    it; the rationale is the source of the rule text, the diff only decides
//!    the domain tag and proves that something changed.
//! 3. Confidence comes from the [`ConfidencePolicy`] applied to the rationale.
//! 4. Domain tag is the first registry module whose keywords appear in the
//!    rationale or the region, else `general`.
//! 5. Candidates are written with dedup-merge; the correction is marked applied
//!    once at least one rule was written (inserted or merged).
//!
//! A correction with a rationale and no corrected artifact yields one
//! `general` rule of category [`RuleCategory::RationaleOnly`]. Malformed
//! corrections are skipped and only logged.
//!
//! The engine is deterministic: no weighting is learned.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use similar::{ChangeTag, TextDiff};
use tracing::{debug, info, warn};

use crate::domain::{
    normalize_rule_text, ConfidencePolicy, Correction, CortexEvent, ModuleCatalog, Rule,
    RuleCategory, RuleNamespace, SkipReason, GENERAL_TAG,
};
use crate::infrastructure::{CorrectionRepository, RepositoryError, RuleRepository, UpsertOutcome};

/// Event bus trait for publishing domain events
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: CortexEvent) -> anyhow::Result<()>;
}

static SENTENCE_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?;]+(?:\s+|$)|\n+").expect("static regex"));

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "be", "to", "of", "in", "on", "at", "for", "and", "or", "not",
    "it", "its", "this", "that", "with", "as", "by", "use", "using", "instead", "than", "from",
];

#[derive(Debug, thiserror::Error)]
pub enum LearningError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("rule text is empty")]
    EmptyRule,
}

/// One contiguous run of changed lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedRegion {
    pub removed: Vec<String>,
    pub added: Vec<String>,
}

impl ChangedRegion {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }

    pub fn text(&self) -> String {
        self.removed
            .iter()
            .chain(self.added.iter())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A rule before it is written to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRule {
    pub text: String,
    pub domain_tag: String,
    pub confidence: f64,
    pub category: RuleCategory,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Learned {
        rules: Vec<Rule>,
        inserted: usize,
        merged: usize,
    },
    Skipped(SkipReason),
}

impl ExtractionOutcome {
    pub fn rules(&self) -> &[Rule] {
        match self {
            ExtractionOutcome::Learned { rules, .. } => rules,
            ExtractionOutcome::Skipped(_) => &[],
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ExtractionOutcome::Skipped(_))
    }
}

/// Contiguous changed regions between two artifacts, in document order.
pub fn changed_regions(original: &str, corrected: &str) -> Vec<ChangedRegion> {
    let diff = TextDiff::from_lines(original, corrected);
    diff.grouped_ops(0)
        .iter()
        .map(|group| {
            let mut region = ChangedRegion::default();
            for op in group {
                for change in diff.iter_changes(op) {
                    let line = change.value().trim_end_matches(['\r', '\n']).to_string();
                    match change.tag() {
                        ChangeTag::Delete => region.removed.push(line),
                        ChangeTag::Insert => region.added.push(line),
                        ChangeTag::Equal => {}
                    }
                }
            }
            region
        })
        .filter(|region| !region.is_empty())
        .collect()
}

fn content_tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn rationale_sentences(rationale: &str) -> Vec<&str> {
    SENTENCE_SPLIT
        .split(rationale)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// The sentence with the largest token overlap with `region`; ties go to the
/// earlier sentence. `None` when no sentence shares a token.
fn best_sentence<'a>(sentences: &[&'a str], region: &ChangedRegion) -> Option<&'a str> {
    let region_tokens = content_tokens(&region.text());
    let mut best: Option<(&'a str, usize)> = None;
    for &sentence in sentences {
        let overlap = content_tokens(sentence).intersection(&region_tokens).count();
        if overlap > 0 && best.map_or(true, |(_, score)| overlap > score) {
            best = Some((sentence, overlap));
        }
    }
    best.map(|(sentence, _)| sentence)
}

pub struct PatternLearningEngine {
    rules: Arc<dyn RuleRepository>,
    corrections: Arc<dyn CorrectionRepository>,
    catalog: Arc<dyn ModuleCatalog>,
    event_bus: Arc<dyn EventBus>,
    policy: ConfidencePolicy,
}

impl PatternLearningEngine {
    pub fn new(
        rules: Arc<dyn RuleRepository>,
        corrections: Arc<dyn CorrectionRepository>,
        catalog: Arc<dyn ModuleCatalog>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Self {
            rules,
            corrections,
            catalog,
            event_bus,
            policy: ConfidencePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ConfidencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &ConfidencePolicy {
        &self.policy
    }

    /// Candidate rules for `correction`, without touching any store.
    pub fn derive_candidates(&self, correction: &Correction) -> Result<Vec<CandidateRule>, SkipReason> {
        if let Some(reason) = correction.malformed_reason() {
            return Err(SkipReason::Malformed(reason));
        }

        let rationale = correction.rationale.trim();

        if correction.is_rationale_only() {
            if !self.policy.store_rationale_only {
                return Err(SkipReason::RationaleOnlyDisabled);
            }
            return Ok(vec![CandidateRule {
                text: rationale.to_string(),
                domain_tag: GENERAL_TAG.to_string(),
                confidence: self.policy.rationale_only_confidence(rationale),
                category: RuleCategory::RationaleOnly,
            }]);
        }

        let sentences = rationale_sentences(rationale);
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for region in changed_regions(&correction.original_artifact, &correction.corrected_artifact) {
            let text = best_sentence(&sentences, &region).unwrap_or(rationale);
            if !seen.insert(normalize_rule_text(text)) {
                continue;
            }
            let domain_tag = self
                .catalog
                .first_module_in(&format!("{rationale}\n{}", region.text()))
                .unwrap_or_else(|| GENERAL_TAG.to_string());

            candidates.push(CandidateRule {
                text: text.to_string(),
                domain_tag,
                confidence: self.policy.confidence_for(text),
                category: RuleCategory::Correction,
            });
        }

        Ok(candidates)
    }

    /// Learn from a logged correction.
    pub async fn extract(&self, correction: &Correction) -> Result<ExtractionOutcome, LearningError> {
        let candidates = match self.derive_candidates(correction) {
            Ok(candidates) => candidates,
            Err(reason) => {
                warn!(correction_id = %correction.id, %reason, "Skipping correction");
                metrics::counter!("anvil_corrections_skipped_total").increment(1);
                self.publish(CortexEvent::CorrectionSkipped {
                    correction_id: correction.id,
                    reason,
                    timestamp: Utc::now(),
                })
                .await;
                return Ok(ExtractionOutcome::Skipped(reason));
            }
        };

        let mut rules = Vec::with_capacity(candidates.len());
        let (mut inserted, mut merged) = (0, 0);

        for candidate in candidates {
            let rule = Rule::new(
                correction.namespace,
                candidate.text,
                candidate.category,
                candidate.domain_tag,
                candidate.confidence,
            );
            let outcome = self.rules.upsert_merge(&rule).await?;
            self.publish_upsert(&outcome, Some(correction)).await;
            if outcome.is_merge() {
                merged += 1;
            } else {
                inserted += 1;
            }
            rules.push(outcome.into_rule());
        }

        if !rules.is_empty() {
            self.corrections.mark_applied(correction.id).await?;
            self.publish(CortexEvent::CorrectionApplied {
                correction_id: correction.id,
                rule_count: rules.len(),
                timestamp: Utc::now(),
            })
            .await;
        }

        metrics::counter!("anvil_rules_learned_total").increment(inserted as u64);
        metrics::counter!("anvil_rules_merged_total").increment(merged as u64);
        info!(
            correction_id = %correction.id,
            inserted,
            merged,
            "Extracted rules from correction"
        );

        Ok(ExtractionOutcome::Learned {
            rules,
            inserted,
            merged,
        })
    }

    /// Store a user-authored rule directly.
    pub async fn teach(&self, namespace: RuleNamespace, text: &str) -> Result<UpsertOutcome, LearningError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LearningError::EmptyRule);
        }
        let domain_tag = self
            .catalog
            .first_module_in(text)
            .unwrap_or_else(|| GENERAL_TAG.to_string());
        let rule = Rule::new(
            namespace,
            text,
            RuleCategory::Taught,
            domain_tag,
            self.policy.taught_confidence,
        );

        let outcome = self.rules.upsert_merge(&rule).await?;
        self.publish_upsert(&outcome, None).await;
        debug!(rule_id = %outcome.rule().id, tag = %outcome.rule().domain_tag, "Taught rule");
        Ok(outcome)
    }

    async fn publish_upsert(&self, outcome: &UpsertOutcome, correction: Option<&Correction>) {
        let correction_id = correction.map(|c| c.id);
        let event = match outcome {
            UpsertOutcome::Inserted(rule) => CortexEvent::RuleLearned {
                rule_id: rule.id,
                namespace: rule.namespace,
                domain_tag: rule.domain_tag.clone(),
                category: rule.category,
                confidence: rule.confidence,
                correction_id,
                timestamp: Utc::now(),
            },
            UpsertOutcome::Merged { rule, previous_confidence } => CortexEvent::RuleMerged {
                rule_id: rule.id,
                namespace: rule.namespace,
                old_confidence: *previous_confidence,
                new_confidence: rule.confidence,
                correction_id,
                timestamp: Utc::now(),
            },
        };
        self.publish(event).await;
    }

    async fn publish(&self, event: CortexEvent) {
        if let Err(e) = self.event_bus.publish(event).await {
            warn!(error = %e, "Failed to publish cortex event");
        }
    }
}
