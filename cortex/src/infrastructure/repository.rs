// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository interfaces for Cortex bounded context
//! Defines the contracts for the Rule Store and the Correction log
//!
//! Both stores are the only mutable state shared across concurrent sessions.
//! Implementations must be safe under simultaneous callers; in particular a
//! concurrent duplicate insert resolves through [`RuleRepository::upsert_merge`]
//! and is never a hard failure.

use async_trait::async_trait;

use crate::domain::{Correction, CorrectionId, Rule, RuleId, RuleNamespace};

/// Outcome of writing a candidate rule.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// No row had the same normalized key; the candidate was stored as-is.
    Inserted(Rule),
    /// An existing row absorbed the candidate. Carries the merged row and the
    /// confidence it had before the merge.
    Merged { rule: Rule, previous_confidence: f64 },
}

impl UpsertOutcome {
    pub fn rule(&self) -> &Rule {
        match self {
            UpsertOutcome::Inserted(rule) => rule,
            UpsertOutcome::Merged { rule, .. } => rule,
        }
    }

    pub fn into_rule(self) -> Rule {
        match self {
            UpsertOutcome::Inserted(rule) => rule,
            UpsertOutcome::Merged { rule, .. } => rule,
        }
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, UpsertOutcome::Merged { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleOrder {
    /// confidence desc, usage_count desc, created_at desc
    #[default]
    Ranked,
    /// created_at desc
    Newest,
}

/// Filter for [`RuleRepository::query`].
#[derive(Debug, Clone, PartialEq)]
pub struct RuleQuery {
    pub namespace: RuleNamespace,
    /// `None` matches every tag.
    pub domain_tags: Option<Vec<String>>,
    pub min_confidence: Option<f64>,
    pub order: RuleOrder,
    pub limit: Option<usize>,
}

impl RuleQuery {
    pub fn all(namespace: RuleNamespace) -> Self {
        Self {
            namespace,
            domain_tags: None,
            min_confidence: None,
            order: RuleOrder::Ranked,
            limit: None,
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.domain_tags = Some(tags);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_order(mut self, order: RuleOrder) -> Self {
        self.order = order;
        self
    }

    pub fn matches(&self, rule: &Rule) -> bool {
        rule.namespace == self.namespace
            && self
                .domain_tags
                .as_ref()
                .map_or(true, |tags| tags.iter().any(|t| t == &rule.domain_tag))
            && self.min_confidence.map_or(true, |min| rule.confidence >= min)
    }
}

/// Rule Store
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Insert a new rule. Fails with [`RepositoryError::Conflict`] when a rule
    /// with the same namespace and normalized key exists.
    async fn insert(&self, rule: &Rule) -> Result<(), RepositoryError>;

    /// Insert, or merge into the row with the same normalized key (max
    /// confidence, summed counters). Atomic with respect to other callers.
    async fn upsert_merge(&self, rule: &Rule) -> Result<UpsertOutcome, RepositoryError>;

    async fn find_by_id(&self, id: RuleId) -> Result<Option<Rule>, RepositoryError>;

    async fn find_by_key(
        &self,
        namespace: &RuleNamespace,
        normalized_key: &str,
    ) -> Result<Option<Rule>, RepositoryError>;

    async fn query(&self, query: &RuleQuery) -> Result<Vec<Rule>, RepositoryError>;

    /// `usage_count += 1` for each id. Unknown ids are ignored.
    async fn record_usage(&self, ids: &[RuleId]) -> Result<(), RepositoryError>;

    /// `success_count += 1` for each id. Unknown ids are ignored.
    async fn record_success(&self, ids: &[RuleId]) -> Result<(), RepositoryError>;
}

/// Correction log
#[async_trait]
pub trait CorrectionRepository: Send + Sync {
    async fn insert(&self, correction: &Correction) -> Result<(), RepositoryError>;

    async fn mark_applied(&self, id: CorrectionId) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: CorrectionId) -> Result<Option<Correction>, RepositoryError>;

    /// Newest first.
    async fn list(
        &self,
        namespace: &RuleNamespace,
        limit: Option<usize>,
    ) -> Result<Vec<Correction>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return RepositoryError::Conflict(db.message().to_string());
            }
        }
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

/// Rank rules by confidence desc, usage desc, created_at desc.
pub(crate) fn rank_rules(rules: &mut [Rule], order: RuleOrder) {
    match order {
        RuleOrder::Ranked => rules.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.usage_count.cmp(&a.usage_count))
                .then_with(|| b.created_at.cmp(&a.created_at))
        }),
        RuleOrder::Newest => rules.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
    }
}
