// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Learning Policies
//!
//! Explicit, swappable configuration for how confident a learned rule is and
//! how that confidence ages. Both are passed into the learning and retrieval
//! services; nothing here is global state.
//!
//! ## Confidence table
//!
//! | Rationale contains | Confidence |
//! |--------------------|-----------|
//! | `must`, `always`, `never` | 1.0 |
//! | `should`, `prefer` | 0.8 |
//! | anything else | 0.6 |
//!
//! Markers are matched on whole lower-cased words. The table is fixed per
//! policy instance; no weighting is learned.
//!
//! A rule learned from a rationale alone, with no corrected code behind it,
//! loses `rationale_only_penalty` (0.2 by default) but never drops below the
//! no-marker value.
//!
//! ## Decay
//!
//! [`DecayPolicy`] only affects ranking at retrieval time. Stored confidence
//! never drops below its creation value.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rule::Rule;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidencePolicy {
    #[serde(default = "default_strong_markers")]
    pub strong_markers: Vec<String>,

    #[serde(default = "default_strong_confidence")]
    pub strong_confidence: f64,

    #[serde(default = "default_moderate_markers")]
    pub moderate_markers: Vec<String>,

    #[serde(default = "default_moderate_confidence")]
    pub moderate_confidence: f64,

    #[serde(default = "default_base_confidence")]
    pub default_confidence: f64,

    /// Confidence assigned to explicitly taught rules.
    #[serde(default = "default_strong_confidence")]
    pub taught_confidence: f64,

    /// Store a rule when the correction has a rationale but no corrected
    /// artifact. When false such corrections are skipped.
    #[serde(default = "default_true")]
    pub store_rationale_only: bool,

    /// Subtracted from the table value for rationale-only rules.
    #[serde(default = "default_rationale_only_penalty")]
    pub rationale_only_penalty: f64,
}

fn default_strong_markers() -> Vec<String> {
    vec!["must".into(), "always".into(), "never".into()]
}

fn default_moderate_markers() -> Vec<String> {
    vec!["should".into(), "prefer".into()]
}

fn default_strong_confidence() -> f64 {
    1.0
}

fn default_moderate_confidence() -> f64 {
    0.8
}

fn default_base_confidence() -> f64 {
    0.6
}

fn default_rationale_only_penalty() -> f64 {
    0.2
}

fn default_true() -> bool {
    true
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            strong_markers: default_strong_markers(),
            strong_confidence: default_strong_confidence(),
            moderate_markers: default_moderate_markers(),
            moderate_confidence: default_moderate_confidence(),
            default_confidence: default_base_confidence(),
            taught_confidence: default_strong_confidence(),
            store_rationale_only: true,
            rationale_only_penalty: default_rationale_only_penalty(),
        }
    }
}

impl ConfidencePolicy {
    /// Confidence for a rule learned from `rationale`.
    pub fn confidence_for(&self, rationale: &str) -> f64 {
        let words: Vec<String> = rationale
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        let has_any = |markers: &[String]| {
            markers
                .iter()
                .any(|m| words.iter().any(|w| w == &m.to_lowercase()))
        };

        if has_any(&self.strong_markers) {
            self.strong_confidence
        } else if has_any(&self.moderate_markers) {
            self.moderate_confidence
        } else {
            self.default_confidence
        }
    }

    pub fn rationale_only_confidence(&self, rationale: &str) -> f64 {
        let table = self.confidence_for(rationale);
        let floor = self.default_confidence.min(table);
        (table - self.rationale_only_penalty).max(floor).clamp(0.0, 1.0)
    }

    pub fn validate(&self) -> Result<(), String> {
        let values = [
            ("strong_confidence", self.strong_confidence),
            ("moderate_confidence", self.moderate_confidence),
            ("default_confidence", self.default_confidence),
            ("taught_confidence", self.taught_confidence),
            ("rationale_only_penalty", self.rationale_only_penalty),
        ];
        for (name, value) in values {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must be within [0, 1], got {value}"));
            }
        }
        Ok(())
    }
}

/// Ranking-time confidence adjustment.
pub trait DecayPolicy: Send + Sync {
    fn effective_confidence(&self, rule: &Rule, now: DateTime<Utc>) -> f64;
}

/// Default: confidence is used as stored.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDecay;

impl DecayPolicy for NoDecay {
    fn effective_confidence(&self, rule: &Rule, _now: DateTime<Utc>) -> f64 {
        rule.confidence
    }
}

/// Exponential decay by rule age, halving every `half_life_days`.
#[derive(Debug, Clone, Copy)]
pub struct HalfLifeDecay {
    pub half_life_days: f64,
}

impl DecayPolicy for HalfLifeDecay {
    fn effective_confidence(&self, rule: &Rule, now: DateTime<Utc>) -> f64 {
        if self.half_life_days <= 0.0 {
            return rule.confidence;
        }
        let age_days = (now - rule.created_at).num_seconds().max(0) as f64 / 86_400.0;
        rule.confidence * 0.5_f64.powf(age_days / self.half_life_days)
    }
}

/// Configuration form of [`DecayPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecayConfig {
    #[default]
    None,
    HalfLife { half_life_days: f64 },
}

impl DecayConfig {
    pub fn into_policy(&self) -> Arc<dyn DecayPolicy> {
        match self {
            Self::None => Arc::new(NoDecay),
            Self::HalfLife { half_life_days } => Arc::new(HalfLifeDecay {
                half_life_days: *half_life_days,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::{RuleCategory, RuleNamespace, GENERAL_TAG};

    #[test]
    fn test_confidence_table() {
        let policy = ConfidencePolicy::default();
        assert_eq!(policy.confidence_for("ADC is 12-bit, must use 4095 not 1023"), 1.0);
        assert_eq!(policy.confidence_for("Always call Serial.begin first"), 1.0);
        assert_eq!(policy.confidence_for("never block in loop()"), 1.0);
        assert_eq!(policy.confidence_for("You should debounce the button"), 0.8);
        assert_eq!(policy.confidence_for("I prefer ledcWrite"), 0.8);
        assert_eq!(policy.confidence_for("use ledcWrite"), 0.6);
    }

    #[test]
    fn test_markers_match_whole_words_only() {
        let policy = ConfidencePolicy::default();
        assert_eq!(policy.confidence_for("mustard colored LEDs"), 0.6);
        assert_eq!(policy.confidence_for("the preference pane"), 0.6);
    }

    #[test]
    fn test_strong_marker_wins_over_moderate() {
        let policy = ConfidencePolicy::default();
        assert_eq!(policy.confidence_for("you should always stop motors"), 1.0);
    }

    #[test]
    fn test_rationale_only_penalty() {
        let policy = ConfidencePolicy::default();
        assert!((policy.rationale_only_confidence("must use ledcWrite") - 0.8).abs() < 1e-9);
        assert!((policy.rationale_only_confidence("should use ledcWrite") - 0.6).abs() < 1e-9);
        assert_eq!(policy.rationale_only_confidence("use ledcWrite"), 0.6);

        let unpenalized = ConfidencePolicy {
            rationale_only_penalty: 0.0,
            ..Default::default()
        };
        assert_eq!(unpenalized.rationale_only_confidence("must use ledcWrite"), 1.0);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let policy = ConfidencePolicy {
            moderate_confidence: 1.2,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
        assert!(ConfidencePolicy::default().validate().is_ok());
    }

    #[test]
    fn test_half_life_decay() {
        let mut rule = Rule::new(RuleNamespace::Shared, "x", RuleCategory::Taught, GENERAL_TAG, 1.0);
        let now = Utc::now();
        rule.created_at = now - chrono::Duration::days(10);

        let decay = HalfLifeDecay { half_life_days: 10.0 };
        let value = decay.effective_confidence(&rule, now);
        assert!((value - 0.5).abs() < 1e-6);

        assert_eq!(NoDecay.effective_confidence(&rule, now), 1.0);
    }
}
