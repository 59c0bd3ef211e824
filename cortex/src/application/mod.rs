// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Application services of the Cortex bounded context

pub mod learning_engine;
pub mod retrieval;

pub use learning_engine::{
    changed_regions, CandidateRule, ChangedRegion, EventBus, ExtractionOutcome, LearningError,
    PatternLearningEngine,
};
pub use retrieval::{RuleRetrieval, DEFAULT_RULE_LIMIT};
