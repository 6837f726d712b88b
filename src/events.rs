//! Lazily initialized event dispatcher.
//!
//! Starts with no table at all: `listeners` returns nothing until the first
//! `on` installs the real table.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

pub struct EventDispatcher<L> {
    table: OnceLock<RwLock<HashMap<String, Vec<L>>>>,
}

impl<L: Clone> Default for EventDispatcher<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: Clone> EventDispatcher<L> {
    pub fn new() -> Self {
        EventDispatcher { table: OnceLock::new() }
    }

    pub fn is_initialized(&self) -> bool {
        self.table.get().is_some()
    }

    fn initialize(&self) -> &RwLock<HashMap<String, Vec<L>>> {
        self.table.get_or_init(|| {
            tracing::debug!("event table installed");
            RwLock::new(HashMap::new())
        })
    }

    pub fn on(&self, event: &str, listener: L) {
        match self.initialize().write() {
            Ok(mut table) => table.entry(event.to_string()).or_default().push(listener),
            Err(_) => tracing::warn!(event = %event, "event table poisoned, listener dropped"),
        }
    }

    /// Snapshot of the listeners for `event`, in registration order.
    pub fn listeners(&self, event: &str) -> Vec<L> {
        let Some(table) = self.table.get() else {
            return Vec::new();
        };
        table
            .read()
            .ok()
            .and_then(|t| t.get(event).cloned())
            .unwrap_or_default()
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        !self.listeners(event).is_empty()
    }
}
