// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! One user turn: the request going in and the validated artifact coming out.

use std::fmt;

use anvil_cortex::domain::{RuleId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::routing::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub session: SessionId,
    /// The user's literal request. Never rewritten.
    pub text: String,
    /// Skip classification and use this tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_tier: Option<Tier>,
    /// Hardware profile to assume when the request names none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<String>,
}

impl TurnRequest {
    pub fn new(session: SessionId, text: impl Into<String>) -> Self {
        Self {
            session,
            text: text.into(),
            force_tier: None,
            hardware: None,
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.force_tier = Some(tier);
        self
    }

    pub fn with_hardware(mut self, hardware: impl Into<String>) -> Self {
        self.hardware = Some(hardware.into());
        self
    }
}

/// What the caller renders to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub turn_id: TurnId,
    pub session: SessionId,
    pub request: String,
    pub tier: Tier,
    pub artifact_text: String,
    pub applied_fixes: Vec<String>,
    pub critiques: Vec<String>,
    pub modules_used: Vec<String>,
    /// Follow-ups the user may want next, drawn from the registry.
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<String>,
    /// Rules injected into the prompt(s) of this turn.
    pub rule_ids: Vec<RuleId>,
    pub completed_at: DateTime<Utc>,
}

/// Item of a streamed turn. Exactly one terminal item ends the stream.
#[derive(Debug, Clone)]
pub enum TurnStreamEvent {
    Token(String),
    Completed(Box<TurnResult>),
    Failed(String),
}

impl TurnStreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnStreamEvent::Token(_))
    }
}
