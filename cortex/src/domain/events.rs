// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain events for the Cortex bounded context
//! Published for every rule and correction state change

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::correction::{CorrectionId, MalformedCorrection};
use super::rule::{RuleCategory, RuleId, RuleNamespace};

/// Cortex domain events
/// These events are published to the EventBus for observability and integration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CortexEvent {
    /// A new rule row was written
    RuleLearned {
        rule_id: RuleId,
        namespace: RuleNamespace,
        domain_tag: String,
        category: RuleCategory,
        confidence: f64,
        correction_id: Option<CorrectionId>,
        timestamp: DateTime<Utc>,
    },

    /// A candidate rule normalized to an existing row and was merged into it
    RuleMerged {
        rule_id: RuleId,
        namespace: RuleNamespace,
        old_confidence: f64,
        new_confidence: f64,
        correction_id: Option<CorrectionId>,
        timestamp: DateTime<Utc>,
    },

    /// Rules were injected into a completed turn
    RuleUsageRecorded {
        rule_ids: Vec<RuleId>,
        timestamp: DateTime<Utc>,
    },

    /// Rules survived a turn without being corrected
    RuleReinforced {
        rule_ids: Vec<RuleId>,
        timestamp: DateTime<Utc>,
    },

    /// A correction produced at least one rule
    CorrectionApplied {
        correction_id: CorrectionId,
        rule_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// A correction was not learned from
    CorrectionSkipped {
        correction_id: CorrectionId,
        reason: SkipReason,
        timestamp: DateTime<Utc>,
    },
}

/// Why a correction produced no rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    Malformed(MalformedCorrection),
    /// Rationale-only corrections are disabled by the confidence policy
    RationaleOnlyDisabled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Malformed(reason) => write!(f, "malformed correction: {reason}"),
            SkipReason::RationaleOnlyDisabled => f.write_str("rationale-only corrections are disabled"),
        }
    }
}

impl CortexEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CortexEvent::RuleLearned { timestamp, .. } => *timestamp,
            CortexEvent::RuleMerged { timestamp, .. } => *timestamp,
            CortexEvent::RuleUsageRecorded { timestamp, .. } => *timestamp,
            CortexEvent::RuleReinforced { timestamp, .. } => *timestamp,
            CortexEvent::CorrectionApplied { timestamp, .. } => *timestamp,
            CortexEvent::CorrectionSkipped { timestamp, .. } => *timestamp,
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            CortexEvent::RuleLearned { .. } => "rule_learned",
            CortexEvent::RuleMerged { .. } => "rule_merged",
            CortexEvent::RuleUsageRecorded { .. } => "rule_usage_recorded",
            CortexEvent::RuleReinforced { .. } => "rule_reinforced",
            CortexEvent::CorrectionApplied { .. } => "correction_applied",
            CortexEvent::CorrectionSkipped { .. } => "correction_skipped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = CortexEvent::RuleLearned {
            rule_id: RuleId::new(),
            namespace: RuleNamespace::Shared,
            domain_tag: "adc".to_string(),
            category: RuleCategory::Correction,
            confidence: 1.0,
            correction_id: Some(CorrectionId::new()),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"rule_learned\""));
        let deserialized: CortexEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(event.event_type(), deserialized.event_type());
    }

    #[test]
    fn test_skip_reason_display() {
        let event = CortexEvent::CorrectionSkipped {
            correction_id: CorrectionId::new(),
            reason: SkipReason::Malformed(MalformedCorrection::EmptyRationale),
            timestamp: Utc::now(),
        };

        assert_eq!(event.event_type(), "correction_skipped");
        if let CortexEvent::CorrectionSkipped { reason, .. } = event {
            assert_eq!(reason.to_string(), "malformed correction: rationale is empty");
        }
    }
}
