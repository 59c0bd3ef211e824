// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Request Router
//!
//! Classifies a request into FAST, BALANCED or MODULAR.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Tier classification and module detection for one turn
//!
//! Classification order:
//!
//! 1. A question (contains an interrogative, opens with a greeting or
//!    conceptual opener, or ends in `?`) with no generation verb is FAST.
//! 2. Otherwise count distinct registry modules mentioned (`m`).
//! 3. `m >= modular_threshold`, or a completeness marker with `m >= 1`, is
//!    MODULAR.
//! 4. Everything else is BALANCED. Classification never fails.

use std::sync::Arc;

use tracing::info;

use crate::domain::keywords::{tokenize, KeywordSet};
use crate::domain::registry::Registry;
use crate::domain::routing::{RouteDecision, RoutingConfig, Tier};

pub struct RequestRouter {
    registry: Arc<Registry>,
    interrogatives: KeywordSet,
    openers: KeywordSet,
    generation_verbs: KeywordSet,
    completeness_markers: KeywordSet,
    modular_threshold: usize,
}

impl RequestRouter {
    pub fn new(registry: Arc<Registry>, config: &RoutingConfig) -> Self {
        Self {
            registry,
            interrogatives: KeywordSet::new(&config.interrogatives),
            openers: KeywordSet::new(&config.openers),
            generation_verbs: KeywordSet::new(&config.generation_verbs),
            completeness_markers: KeywordSet::new(&config.completeness_markers),
            modular_threshold: config.modular_threshold.max(1),
        }
    }

    pub fn route(&self, request: &str, force_tier: Option<Tier>) -> RouteDecision {
        let tokens = tokenize(request);
        let modules = self.registry.detect_modules_in(&tokens);
        let hardware = self.registry.detect_hardware(request).map(|h| h.name.clone());

        let (tier, forced) = match force_tier {
            Some(tier) => (tier, true),
            None => (self.classify(request, &tokens, modules.len()), false),
        };

        metrics::counter!("anvil_routes_total", "tier" => tier.to_string()).increment(1);
        info!(%tier, forced, modules = ?modules, hardware = ?hardware, "Routed request");

        RouteDecision {
            tier,
            modules,
            hardware,
            forced,
        }
    }

    fn classify(&self, request: &str, tokens: &[String], module_count: usize) -> Tier {
        let has_verb = self.generation_verbs.matches(tokens);
        if self.is_question(request, tokens) && !has_verb {
            return Tier::Fast;
        }

        let complete = self.completeness_markers.matches(tokens);
        if module_count >= self.modular_threshold || (complete && module_count > 0) {
            return Tier::Modular;
        }

        Tier::Balanced
    }

    fn is_question(&self, request: &str, tokens: &[String]) -> bool {
        request.trim_end().ends_with('?')
            || self.interrogatives.matches(tokens)
            || self.openers.matches_at(tokens, 0)
    }
}
