// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the anvil CLI

pub mod assist;
pub mod config;
pub mod rules;

pub use self::config::ConfigCommand;
