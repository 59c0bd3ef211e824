// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod router;
pub mod inference;
pub mod validator;
pub mod decomposition;
pub mod feedback;
pub mod repository_factory;
pub mod assistant;

// Re-export use cases for convenience
pub use assistant::{AssistantError, AssistantService, AssistantSettings};
pub use decomposition::{BuildError, BuildOutput, BuildPlan, ModularBuilder};
pub use feedback::{FeedbackError, FeedbackLoop, FeedbackOutcome, SessionMetrics, SessionSnapshot};
pub use inference::{CallFailure, CallPolicy, PolicyInference};
pub use repository_factory::{create_rule_stores, RuleStores};
pub use router::RequestRouter;
pub use validator::{CodeValidator, ValidationContext, ValidationReport};
