// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Anvil Core
//!
//! Routing, generation, validation and feedback services for the anvil
//! embedded coding assistant.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Wires the domain model, the application services and the
//!   LLM/event infrastructure; rule learning and retrieval live in `anvil-cortex`

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
