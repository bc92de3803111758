//! Exchanges and queues already declared by this process, so each one is
//! declared on the broker at most once.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

/// A set of declared names.
#[derive(Debug, Default)]
pub struct DeclarationSet {
    names: Mutex<HashSet<String>>,
}

impl DeclarationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    /// Record `name`. Returns `false` if it was already recorded.
    pub fn mark(&self, name: &str) -> bool {
        self.lock().insert(name.to_string())
    }

    /// Forget `name`, e.g. after deleting it on the broker.
    pub fn forget(&self, name: &str) -> bool {
        self.lock().remove(name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        // The set stays consistent even if a holder panicked.
        self.names.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Exchanges declared by publishers in this process.
pub fn exchanges() -> &'static DeclarationSet {
    static EXCHANGES: OnceLock<DeclarationSet> = OnceLock::new();
    EXCHANGES.get_or_init(DeclarationSet::new)
}

/// Queues declared by consumers in this process.
pub fn queues() -> &'static DeclarationSet {
    static QUEUES: OnceLock<DeclarationSet> = OnceLock::new();
    QUEUES.get_or_init(DeclarationSet::new)
}
