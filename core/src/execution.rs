//! Workflow execution identifiers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one run of one workflow.
///
/// The workflow ID is chosen by the caller that starts the workflow; the run
/// ID is minted by the engine and is unique across all runs of all
/// workflows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub run_id: Uuid,
}

impl WorkflowExecution {
    pub fn new(workflow_id: impl Into<String>, run_id: Uuid) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id,
        }
    }
}

impl std::fmt::Display for WorkflowExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.run_id)
    }
}
