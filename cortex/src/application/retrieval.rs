// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Rule selection for prompt augmentation
//!
//! Selects the rules relevant to a set of domain tags. `general` rules are
//! always eligible. Ordering is effective confidence (after decay) desc, then
//! usage desc, then newest first, with the rule id as the last tiebreak so the
//! same store always yields the same prompt.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::application::learning_engine::EventBus;
use crate::domain::{CortexEvent, DecayPolicy, NoDecay, Rule, RuleId, RuleNamespace, GENERAL_TAG};
use crate::infrastructure::{RepositoryError, RuleQuery, RuleRepository};

pub const DEFAULT_RULE_LIMIT: usize = 25;

pub struct RuleRetrieval {
    rules: Arc<dyn RuleRepository>,
    event_bus: Arc<dyn EventBus>,
    decay: Arc<dyn DecayPolicy>,
    default_limit: usize,
}

impl RuleRetrieval {
    pub fn new(rules: Arc<dyn RuleRepository>, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            rules,
            event_bus,
            decay: Arc::new(NoDecay),
            default_limit: DEFAULT_RULE_LIMIT,
        }
    }

    pub fn with_decay(mut self, decay: Arc<dyn DecayPolicy>) -> Self {
        self.decay = decay;
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit
    }

    /// Rules tagged with any of `domain_tags` or `general`, best first.
    pub async fn select(
        &self,
        namespace: RuleNamespace,
        domain_tags: &[String],
        limit: Option<usize>,
    ) -> Result<Vec<Rule>, RepositoryError> {
        let limit = limit.unwrap_or(self.default_limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut tags: Vec<String> = Vec::with_capacity(domain_tags.len() + 1);
        for tag in domain_tags.iter().map(String::as_str).chain([GENERAL_TAG]) {
            if !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }

        let mut rules = self.rules.query(&RuleQuery::all(namespace).with_tags(tags)).await?;

        let now = Utc::now();
        let mut scored: Vec<(f64, Rule)> = rules
            .drain(..)
            .map(|rule| (self.decay.effective_confidence(&rule, now), rule))
            .collect();
        scored.sort_by(|(ca, a), (cb, b)| {
            cb.total_cmp(ca)
                .then_with(|| b.usage_count.cmp(&a.usage_count))
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.0.cmp(&b.id.0))
        });
        scored.truncate(limit);

        debug!(
            namespace = %namespace,
            tags = ?domain_tags,
            selected = scored.len(),
            "Selected rules"
        );
        Ok(scored.into_iter().map(|(_, rule)| rule).collect())
    }

    /// Count one use for each rule injected into a completed turn.
    pub async fn record_usage(&self, ids: &[RuleId]) -> Result<(), RepositoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.rules.record_usage(ids).await?;
        metrics::counter!("anvil_rule_usage_total").increment(ids.len() as u64);
        self.publish(CortexEvent::RuleUsageRecorded {
            rule_ids: ids.to_vec(),
            timestamp: Utc::now(),
        })
        .await;
        Ok(())
    }

    /// Reinforce rules whose turn was accepted without correction.
    pub async fn record_success(&self, ids: &[RuleId]) -> Result<(), RepositoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.rules.record_success(ids).await?;
        self.publish(CortexEvent::RuleReinforced {
            rule_ids: ids.to_vec(),
            timestamp: Utc::now(),
        })
        .await;
        Ok(())
    }

    async fn publish(&self, event: CortexEvent) {
        if let Err(e) = self.event_bus.publish(event).await {
            warn!(error = %e, "Failed to publish cortex event");
        }
    }
}
