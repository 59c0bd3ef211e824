// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates the Rule Store and Correction log implementations for the
//! configured storage backend. The cortex defines the repository traits and
//! ships both implementations; this is the only place that picks one.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Map `spec.storage` onto concrete repositories

use std::sync::Arc;

use anvil_cortex::infrastructure::{
    connect_sqlite, CorrectionRepository, InMemoryCorrectionRepository, InMemoryRuleRepository,
    RepositoryError, RuleRepository, SqliteCorrectionRepository, SqliteRuleRepository,
};

use crate::domain::config::{StorageBackend, StorageConfig};

/// The two mutable stores shared across sessions.
#[derive(Clone)]
pub struct RuleStores {
    pub rules: Arc<dyn RuleRepository>,
    pub corrections: Arc<dyn CorrectionRepository>,
}

impl RuleStores {
    pub fn in_memory() -> Self {
        Self {
            rules: Arc::new(InMemoryRuleRepository::new()),
            corrections: Arc::new(InMemoryCorrectionRepository::new()),
        }
    }
}

/// Creates the rule and correction repositories for the configured backend.
/// Both SQLite repositories share one pool.
pub async fn create_rule_stores(config: &StorageConfig) -> Result<RuleStores, RepositoryError> {
    match config.backend {
        StorageBackend::InMemory => Ok(RuleStores::in_memory()),
        StorageBackend::Sqlite => {
            let pool = connect_sqlite(config.sqlite_path()).await?;
            Ok(RuleStores {
                rules: Arc::new(SqliteRuleRepository::new(pool.clone())),
                corrections: Arc::new(SqliteCorrectionRepository::new(pool)),
            })
        }
    }
}
