// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Routing types: generation tiers, route decisions and the router's keyword tables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Generation tier of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Conceptual question; answered with one fast-model call and no decomposition.
    Fast,
    /// One augmented generation call.
    Balanced,
    /// One call per detected module plus an integration call.
    Modular,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Fast => "FAST",
            Tier::Balanced => "BALANCED",
            Tier::Modular => "MODULAR",
        })
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(Tier::Fast),
            "balanced" => Ok(Tier::Balanced),
            "modular" => Ok(Tier::Modular),
            other => Err(format!("unknown tier '{other}' (expected fast, balanced or modular)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub tier: Tier,
    /// Detected modules, deduplicated, in order of first mention.
    ///
    /// Filled for every tier; used as domain tags for retrieval and
    /// validation. Only MODULAR decomposes on it.
    pub modules: Vec<String>,
    /// Hardware profile named in the request, if any.
    pub hardware: Option<String>,
    /// The tier was chosen by the caller rather than classified.
    #[serde(default)]
    pub forced: bool,
}

/// Keyword tables the router classifies with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Words that make a request a question when they open it.
    #[serde(default = "default_interrogatives")]
    pub interrogatives: Vec<String>,

    /// Greeting and conceptual openers ("hi", "explain", "tell me about").
    #[serde(default = "default_openers")]
    pub openers: Vec<String>,

    /// Generation-intent verbs; any of these disqualifies FAST.
    #[serde(default = "default_generation_verbs")]
    pub generation_verbs: Vec<String>,

    #[serde(default = "default_completeness_markers")]
    pub completeness_markers: Vec<String>,

    /// Distinct module hits that escalate to MODULAR on their own.
    #[serde(default = "default_modular_threshold")]
    pub modular_threshold: usize,
}

fn to_strings(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

fn default_interrogatives() -> Vec<String> {
    to_strings(&["what", "how", "which", "why", "when", "where", "who"])
}

fn default_openers() -> Vec<String> {
    to_strings(&[
        "hi",
        "hello",
        "hey",
        "good morning",
        "explain",
        "tell me about",
        "can you explain",
        "what is",
    ])
}

fn default_generation_verbs() -> Vec<String> {
    to_strings(&["generate", "create", "write", "build"])
}

fn default_completeness_markers() -> Vec<String> {
    to_strings(&["complete", "entire", "full system"])
}

fn default_modular_threshold() -> usize {
    3
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            interrogatives: default_interrogatives(),
            openers: default_openers(),
            generation_verbs: default_generation_verbs(),
            completeness_markers: default_completeness_markers(),
            modular_threshold: default_modular_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_parse_and_display() {
        assert_eq!("Modular".parse::<Tier>().unwrap(), Tier::Modular);
        assert_eq!(Tier::Fast.to_string(), "FAST");
        assert!("turbo".parse::<Tier>().is_err());
    }

    #[test]
    fn test_routing_config_defaults_fill_missing_fields() {
        let config: RoutingConfig = serde_yaml::from_str("modular_threshold: 4").unwrap();
        assert_eq!(config.modular_threshold, 4);
        assert_eq!(config.generation_verbs, default_generation_verbs());
    }
}
