// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// LLM Provider Infrastructure - Anti-Corruption Layer Implementations
//
// Each provider adapter translates between the domain inference interface
// and an external model server.

pub mod openai;
pub mod ollama;
pub mod registry;

pub use registry::ProviderRegistry;
