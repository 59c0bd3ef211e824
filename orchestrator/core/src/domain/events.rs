// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use anvil_cortex::domain::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::routing::Tier;
use crate::domain::turn::TurnId;

/// Assistant turn events
///
/// Published on the event bus alongside cortex events. Zero subscribers is fine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TurnEvent {
    Routed {
        turn_id: TurnId,
        session: SessionId,
        tier: Tier,
        modules: Vec<String>,
        forced: bool,
        routed_at: DateTime<Utc>,
    },
    ModuleFailed {
        turn_id: TurnId,
        module: String,
        attempts: u32,
        error: String,
        failed_at: DateTime<Utc>,
    },
    TurnCompleted {
        turn_id: TurnId,
        session: SessionId,
        tier: Tier,
        applied_fixes: usize,
        critiques: usize,
        rules_injected: usize,
        duration_ms: u64,
        completed_at: DateTime<Utc>,
    },
    TurnFailed {
        turn_id: TurnId,
        session: SessionId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
}

impl TurnEvent {
    pub fn turn_id(&self) -> TurnId {
        match self {
            TurnEvent::Routed { turn_id, .. }
            | TurnEvent::ModuleFailed { turn_id, .. }
            | TurnEvent::TurnCompleted { turn_id, .. }
            | TurnEvent::TurnFailed { turn_id, .. } => *turn_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            TurnEvent::Routed { .. } => "routed",
            TurnEvent::ModuleFailed { .. } => "module_failed",
            TurnEvent::TurnCompleted { .. } => "turn_completed",
            TurnEvent::TurnFailed { .. } => "turn_failed",
        }
    }
}
