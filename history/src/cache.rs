//! Registry of live execution contexts.
//!
//! Contexts are created lazily on first reference and shared by `Arc`; two
//! callers referencing the same `(domain, workflow, run)` get the same
//! context and therefore contend on the same lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;
use windlass_core::WorkflowExecution;

use crate::context::{ContextDeps, ExecutionContext};

type ContextKey = (Uuid, String, Uuid);

/// Owning cache of per-execution contexts.
pub struct ContextRegistry {
    deps: ContextDeps,
    contexts: Mutex<HashMap<ContextKey, Arc<ExecutionContext>>>,
}

impl ContextRegistry {
    pub fn new(deps: ContextDeps) -> Self {
        Self {
            deps,
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Return the context for the execution, creating it on first use.
    pub fn get_or_create(
        &self,
        domain_id: Uuid,
        execution: &WorkflowExecution,
    ) -> Arc<ExecutionContext> {
        let key = (
            domain_id,
            execution.workflow_id.clone(),
            execution.run_id,
        );
        let mut contexts = self.contexts.lock();
        contexts
            .entry(key)
            .or_insert_with(|| {
                Arc::new(ExecutionContext::new(
                    domain_id,
                    execution.clone(),
                    self.deps.clone(),
                ))
            })
            .clone()
    }

    /// Drop the registry's reference to a context. Callers still holding
    /// the `Arc` keep using it; the next `get_or_create` starts fresh.
    pub fn evict(&self, domain_id: Uuid, execution: &WorkflowExecution) {
        let key = (
            domain_id,
            execution.workflow_id.clone(),
            execution.run_id,
        );
        self.contexts.lock().remove(&key);
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }
}
