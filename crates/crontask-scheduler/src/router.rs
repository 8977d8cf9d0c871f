use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::debug;

use crontask_core::{Operation, OperationResult};

use crate::error::OperationError;
use crate::scope::ExecScope;

/// Executes one kind of operation against a task's scope.
///
/// Handlers run synchronously inside the tick and must be deterministic:
/// the same payload and state must always produce the same result.
pub trait OperationHandler: Send + Sync {
    fn handle(&self, payload: &Value, scope: &mut ExecScope<'_>) -> Result<Value, OperationError>;
}

impl<F> OperationHandler for F
where
    F: Fn(&Value, &mut ExecScope<'_>) -> Result<Value, OperationError> + Send + Sync,
{
    fn handle(&self, payload: &Value, scope: &mut ExecScope<'_>) -> Result<Value, OperationError> {
        self(payload, scope)
    }
}

/// Capability table mapping an operation kind to its handler.
///
/// Kinds are registered at startup; dispatching an unknown kind fails with
/// [`OperationError::Unsupported`].
pub struct OperationRouter {
    handlers: RwLock<HashMap<String, Arc<dyn OperationHandler>>>,
}

impl OperationRouter {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler. A later registration for the same kind replaces
    /// the earlier one.
    pub fn register(&self, kind: impl Into<String>, handler: Arc<dyn OperationHandler>) {
        let kind = kind.into();
        let mut handlers = self.handlers.write().unwrap_or_else(PoisonError::into_inner);
        debug!(%kind, "operation handler registered");
        handlers.insert(kind, handler);
    }

    pub fn register_fn<F>(&self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&Value, &mut ExecScope<'_>) -> Result<Value, OperationError> + Send + Sync + 'static,
    {
        self.register(kind, Arc::new(handler));
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(kind)
    }

    /// Registered kinds in sorted order.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        kinds.sort();
        kinds
    }

    pub fn dispatch(
        &self,
        op: &Operation,
        scope: &mut ExecScope<'_>,
    ) -> Result<OperationResult, OperationError> {
        // Release the registry lock before running the handler.
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&op.kind)
            .cloned()
            .ok_or_else(|| OperationError::Unsupported(op.kind.clone()))?;

        let data = handler.handle(&op.payload, scope)?;
        debug!(task_id = %scope.task_id(), kind = %op.kind, "operation completed");
        Ok(OperationResult {
            kind: op.kind.clone(),
            data,
        })
    }
}

impl Default for OperationRouter {
    fn default() -> Self {
        Self::new()
    }
}
