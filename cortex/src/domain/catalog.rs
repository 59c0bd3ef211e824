// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Read-only view of the module registry needed by the learning context.
//!
//! The assistant's registry implements this trait, keeping the cortex free of
//! any dependency on the registry's storage format.

pub trait ModuleCatalog: Send + Sync {
    /// Module names in registry order.
    fn module_names(&self) -> Vec<String>;

    /// First module, in registry order, with a keyword present in `text`.
    fn first_module_in(&self, text: &str) -> Option<String>;

    fn is_known_module(&self, name: &str) -> bool {
        self.module_names().iter().any(|m| m == name)
    }
}
