// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Cortex domain model
//!
//! Rules, corrections, learning policies and the events they emit.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Aggregates and policies of the rule-learning context

pub mod rule;
pub mod correction;
pub mod policy;
pub mod catalog;
pub mod events;

pub use rule::*;
pub use correction::*;
pub use policy::*;
pub use catalog::*;
pub use events::*;
