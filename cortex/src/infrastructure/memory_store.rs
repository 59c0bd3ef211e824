// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory Rule Store and Correction log
//!
//! Used by tests and ephemeral sessions. A single lock guards both the rows
//! and the key index so that `upsert_merge` is atomic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::{Correction, CorrectionId, Rule, RuleId, RuleNamespace};
use crate::infrastructure::repository::{
    rank_rules, CorrectionRepository, RepositoryError, RuleQuery, RuleRepository, UpsertOutcome,
};

#[derive(Default)]
struct RuleTable {
    rows: HashMap<RuleId, Rule>,
    by_key: HashMap<(RuleNamespace, String), RuleId>,
}

#[derive(Clone, Default)]
pub struct InMemoryRuleRepository {
    table: Arc<RwLock<RuleTable>>,
}

impl InMemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.read().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RuleRepository for InMemoryRuleRepository {
    async fn insert(&self, rule: &Rule) -> Result<(), RepositoryError> {
        let mut table = self.table.write();
        let key = (rule.namespace, rule.normalized_key.clone());
        if table.by_key.contains_key(&key) {
            return Err(RepositoryError::Conflict(format!(
                "rule '{}' already exists in {}",
                rule.normalized_key, rule.namespace
            )));
        }
        table.by_key.insert(key, rule.id);
        table.rows.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn upsert_merge(&self, rule: &Rule) -> Result<UpsertOutcome, RepositoryError> {
        let mut table = self.table.write();
        let key = (rule.namespace, rule.normalized_key.clone());

        if let Some(existing_id) = table.by_key.get(&key).copied() {
            let existing = table.rows.get_mut(&existing_id).ok_or_else(|| {
                RepositoryError::NotFound(format!("indexed rule {existing_id} has no row"))
            })?;
            let previous_confidence = existing.confidence;
            existing.merge_from(rule);
            return Ok(UpsertOutcome::Merged {
                rule: existing.clone(),
                previous_confidence,
            });
        }

        table.by_key.insert(key, rule.id);
        table.rows.insert(rule.id, rule.clone());
        Ok(UpsertOutcome::Inserted(rule.clone()))
    }

    async fn find_by_id(&self, id: RuleId) -> Result<Option<Rule>, RepositoryError> {
        Ok(self.table.read().rows.get(&id).cloned())
    }

    async fn find_by_key(
        &self,
        namespace: &RuleNamespace,
        normalized_key: &str,
    ) -> Result<Option<Rule>, RepositoryError> {
        let table = self.table.read();
        Ok(table
            .by_key
            .get(&(*namespace, normalized_key.to_string()))
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn query(&self, query: &RuleQuery) -> Result<Vec<Rule>, RepositoryError> {
        let mut rules: Vec<Rule> = self
            .table
            .read()
            .rows
            .values()
            .filter(|rule| query.matches(rule))
            .cloned()
            .collect();
        rank_rules(&mut rules, query.order);
        if let Some(limit) = query.limit {
            rules.truncate(limit);
        }
        Ok(rules)
    }

    async fn record_usage(&self, ids: &[RuleId]) -> Result<(), RepositoryError> {
        let mut table = self.table.write();
        for id in ids {
            if let Some(rule) = table.rows.get_mut(id) {
                rule.usage_count += 1;
            }
        }
        Ok(())
    }

    async fn record_success(&self, ids: &[RuleId]) -> Result<(), RepositoryError> {
        let mut table = self.table.write();
        for id in ids {
            if let Some(rule) = table.rows.get_mut(id) {
                rule.success_count += 1;
            }
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCorrectionRepository {
    corrections: Arc<RwLock<Vec<Correction>>>,
}

impl InMemoryCorrectionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorrectionRepository for InMemoryCorrectionRepository {
    async fn insert(&self, correction: &Correction) -> Result<(), RepositoryError> {
        let mut corrections = self.corrections.write();
        if corrections.iter().any(|c| c.id == correction.id) {
            return Err(RepositoryError::Conflict(format!(
                "correction {} already logged",
                correction.id
            )));
        }
        corrections.push(correction.clone());
        Ok(())
    }

    async fn mark_applied(&self, id: CorrectionId) -> Result<(), RepositoryError> {
        let mut corrections = self.corrections.write();
        let correction = corrections
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("correction {id}")))?;
        correction.applied = true;
        Ok(())
    }

    async fn find_by_id(&self, id: CorrectionId) -> Result<Option<Correction>, RepositoryError> {
        Ok(self.corrections.read().iter().find(|c| c.id == id).cloned())
    }

    async fn list(
        &self,
        namespace: &RuleNamespace,
        limit: Option<usize>,
    ) -> Result<Vec<Correction>, RepositoryError> {
        let mut items: Vec<Correction> = self
            .corrections
            .read()
            .iter()
            .filter(|c| &c.namespace == namespace)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        Ok(items)
    }
}
