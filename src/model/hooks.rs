//! Model lifecycle hooks, awaited before the guarded operation continues.

use crate::error::AppError;
use async_trait::async_trait;
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookEvent {
    BeforeInsert,
    AfterInsert,
    BeforePatch,
    AfterPatch,
    BeforeDelete,
    AfterDelete,
}

impl HookEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            HookEvent::BeforeInsert => "before:insert",
            HookEvent::AfterInsert => "after:insert",
            HookEvent::BeforePatch => "before:patch",
            HookEvent::AfterPatch => "after:patch",
            HookEvent::BeforeDelete => "before:delete",
            HookEvent::AfterDelete => "after:delete",
        }
    }

    /// Dispatcher key, e.g. `User:before:insert`.
    pub fn key(self, model: &str) -> String {
        format!("{}:{}", model, self.as_str())
    }
}

/// A hook may rewrite the data it receives (before-hooks) or inspect the stored row (after-hooks).
/// Returning an error aborts the operation.
#[async_trait]
pub trait ModelHook: Send + Sync {
    async fn call(&self, event: HookEvent, model: &str, data: &mut Value) -> Result<(), AppError>;
}
