// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Rule Aggregate
//!
//! A [`Rule`] is a learned directive injected into future generation prompts.
//! Rules are created by the Pattern Learning Engine (from corrections) or taught
//! explicitly, and are never deleted: a second rule whose text normalizes to the
//! same key is merged into the surviving row (max confidence, summed counters).
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Rule identity, namespacing and merge semantics

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel domain tag for rules that apply regardless of detected modules.
pub const GENERAL_TAG: &str = "general";

const SESSION_NAMESPACE_UUID: Uuid = Uuid::from_u128(0x6a1e_51b0_7c3d_4f8e_9a2b_0c4d_5e6f_7081);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub Uuid);

impl RuleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the user session that owns rules and corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Stable id derived from a human-readable session name (e.g. `--session bench`).
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&SESSION_NAMESPACE_UUID, name.as_bytes()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Visibility scope of a rule.
///
/// Session isolation is the default; `Shared` is only used when the deployment
/// opts into a shared rule namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "session", rename_all = "snake_case")]
pub enum RuleNamespace {
    Shared,
    Session(SessionId),
}

impl RuleNamespace {
    pub fn for_session(session: SessionId, shared: bool) -> Self {
        if shared {
            Self::Shared
        } else {
            Self::Session(session)
        }
    }

    /// Storage key, e.g. `shared` or `session:<uuid>`.
    pub fn as_key(&self) -> String {
        match self {
            Self::Shared => "shared".to_string(),
            Self::Session(id) => format!("session:{}", id.0),
        }
    }
}

impl fmt::Display for RuleNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

impl FromStr for RuleNamespace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "shared" {
            return Ok(Self::Shared);
        }
        let raw = s
            .strip_prefix("session:")
            .ok_or_else(|| format!("unknown rule namespace: {s}"))?;
        let id = Uuid::parse_str(raw).map_err(|e| format!("invalid session id '{raw}': {e}"))?;
        Ok(Self::Session(SessionId(id)))
    }
}

/// How a rule came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    /// Extracted from a correction with an actual artifact diff.
    Correction,
    /// Extracted from a rationale with no corresponding diff (lower trust).
    RationaleOnly,
    /// Authored directly by the user.
    Taught,
}

impl RuleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correction => "correction",
            Self::RationaleOnly => "rationale_only",
            Self::Taught => "taught",
        }
    }
}

impl FromStr for RuleCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "correction" => Ok(Self::Correction),
            "rationale_only" => Ok(Self::RationaleOnly),
            "taught" => Ok(Self::Taught),
            other => Err(format!("unknown rule category: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub id: RuleId,
    pub namespace: RuleNamespace,
    pub text: String,
    /// Dedup key; see [`normalize_rule_text`].
    pub normalized_key: String,
    pub category: RuleCategory,
    pub domain_tag: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub usage_count: u64,
    pub success_count: u64,
}

impl Rule {
    pub fn new(
        namespace: RuleNamespace,
        text: impl Into<String>,
        category: RuleCategory,
        domain_tag: impl Into<String>,
        confidence: f64,
    ) -> Self {
        let text = text.into().trim().to_string();
        Self {
            id: RuleId::new(),
            namespace,
            normalized_key: normalize_rule_text(&text),
            text,
            category,
            domain_tag: domain_tag.into(),
            confidence: confidence.clamp(0.0, 1.0),
            created_at: Utc::now(),
            usage_count: 0,
            success_count: 0,
        }
    }

    pub fn is_general(&self) -> bool {
        self.domain_tag == GENERAL_TAG
    }

    /// Fold a duplicate into this rule. Identity, text and tag of the surviving
    /// row are kept.
    pub fn merge_from(&mut self, duplicate: &Rule) {
        self.confidence = self.confidence.max(duplicate.confidence);
        self.usage_count += duplicate.usage_count;
        self.success_count += duplicate.success_count;
    }
}

/// Lower-case, collapse whitespace and strip trailing punctuation.
///
/// Two rules with the same normalized text are the same rule.
pub fn normalize_rule_text(text: &str) -> String {
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ';' | ':' | ','))
        .trim_end()
        .to_string()
}
