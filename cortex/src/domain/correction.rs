// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Correction aggregate: a user-supplied (original, corrected, rationale) triple.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rule::RuleNamespace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrectionId(pub Uuid);

impl CorrectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable once created; only `applied` flips, and only through
/// `CorrectionRepository::mark_applied`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Correction {
    pub id: CorrectionId,
    pub namespace: RuleNamespace,
    pub original_artifact: String,
    /// Empty when the user only supplied a rationale.
    pub corrected_artifact: String,
    pub rationale: String,
    pub timestamp: DateTime<Utc>,
    pub applied: bool,
}

/// Why a correction cannot be learned from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum MalformedCorrection {
    #[error("rationale is empty")]
    EmptyRationale,

    #[error("corrected artifact is identical to the original")]
    IdenticalArtifacts,
}

impl Correction {
    pub fn new(
        namespace: RuleNamespace,
        original_artifact: impl Into<String>,
        corrected_artifact: impl Into<String>,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            id: CorrectionId::new(),
            namespace,
            original_artifact: original_artifact.into(),
            corrected_artifact: corrected_artifact.into(),
            rationale: rationale.into(),
            timestamp: Utc::now(),
            applied: false,
        }
    }

    /// A correction with no corrected artifact carries only a rationale.
    pub fn is_rationale_only(&self) -> bool {
        self.corrected_artifact.trim().is_empty()
    }

    pub fn malformed_reason(&self) -> Option<MalformedCorrection> {
        if self.rationale.trim().is_empty() {
            return Some(MalformedCorrection::EmptyRationale);
        }
        if !self.is_rationale_only()
            && self.original_artifact.trim() == self.corrected_artifact.trim()
        {
            return Some(MalformedCorrection::IdenticalArtifacts);
        }
        None
    }
}
