// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Types of the assistant bounded context.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Registry, routing, turn and configuration types plus the inference boundary

pub mod keywords;
pub mod registry;
pub mod routing;
pub mod turn;
pub mod events;
pub mod llm;
pub mod config;
