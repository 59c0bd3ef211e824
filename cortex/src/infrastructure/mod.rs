// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure layer for Cortex bounded context

pub mod repository;
pub mod memory_store;
pub mod sqlite_store;

pub use repository::{
    CorrectionRepository, RepositoryError, RuleOrder, RuleQuery, RuleRepository, UpsertOutcome,
};
pub use memory_store::{InMemoryCorrectionRepository, InMemoryRuleRepository};
pub use sqlite_store::{connect_sqlite, SqliteCorrectionRepository, SqliteRuleRepository};
