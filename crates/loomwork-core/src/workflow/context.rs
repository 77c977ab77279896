//! Workflow execution context: step outputs, trigger payload, and variables.
//!
//! `WorkflowContext` is the mutable state that flows through one execution.
//! Template resolution is delegated to `expression::interpolate`; this
//! module owns storage, the size bound, and checkpoint (de)serialization.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use super::definition::WorkflowError;
use super::expression::{self, build_context};

/// Total serialized size bound for one execution's context (steps +
/// variables + trigger payload combined). A write that would push the
/// context over this bound is rejected outright rather than silently
/// truncated, so the execution fails loudly instead of losing data it
/// thinks it still has.
pub const MAX_CONTEXT_SIZE: usize = 1_048_576;

/// Mutable execution context that tracks state across a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub step_outputs: HashMap<String, Value>,
    pub variables: HashMap<String, Value>,
    pub trigger_payload: Option<Value>,
    pub workflow_name: String,
    pub run_id: Uuid,
}

impl WorkflowContext {
    pub fn new(workflow_name: String, run_id: Uuid, trigger_payload: Option<Value>) -> Self {
        Self {
            step_outputs: HashMap::new(),
            variables: HashMap::new(),
            trigger_payload,
            workflow_name,
            run_id,
        }
    }

    /// Store the output of a completed step.
    ///
    /// Rejects the write with `WorkflowError::ExecutionError` if it would
    /// push the total context size over `MAX_CONTEXT_SIZE`; the previous
    /// state is left untouched.
    pub fn set_step_output(&mut self, step_id: &str, output: Value) -> Result<(), WorkflowError> {
        let added = serde_json::to_string(&output)
            .map_err(|e| WorkflowError::ExecutionError(e.to_string()))?
            .len();
        let existing = self
            .step_outputs
            .get(step_id)
            .and_then(|v| serde_json::to_string(v).ok())
            .map(|s| s.len())
            .unwrap_or(0);
        let projected = self.total_size() - existing + added;

        if projected > MAX_CONTEXT_SIZE {
            return Err(WorkflowError::ExecutionError(format!(
                "writing output for step '{step_id}' would grow context to {projected} bytes, \
                 exceeding the {MAX_CONTEXT_SIZE} byte bound"
            )));
        }

        self.step_outputs.insert(step_id.to_string(), output);
        Ok(())
    }

    pub fn get_step_output(&self, step_id: &str) -> Option<&Value> {
        self.step_outputs.get(step_id)
    }

    /// Set a user-defined variable, subject to the same size bound as step
    /// outputs.
    pub fn set_variable(&mut self, name: &str, value: Value) -> Result<(), WorkflowError> {
        let added = serde_json::to_string(&value)
            .map_err(|e| WorkflowError::ExecutionError(e.to_string()))?
            .len();
        let existing = self
            .variables
            .get(name)
            .and_then(|v| serde_json::to_string(v).ok())
            .map(|s| s.len())
            .unwrap_or(0);
        let projected = self.total_size() - existing + added;

        if projected > MAX_CONTEXT_SIZE {
            return Err(WorkflowError::ExecutionError(format!(
                "writing variable '{name}' would grow context to {projected} bytes, exceeding \
                 the {MAX_CONTEXT_SIZE} byte bound"
            )));
        }

        self.variables.insert(name.to_string(), value);
        Ok(())
    }

    /// Resolve `{{path}}` templates against this context's nested view
    /// (`steps.<id>.output`, `trigger.<field>`, `variables.<name>`,
    /// `workflow.name`/`workflow.run_id`).
    pub fn resolve_template(&self, template: &str) -> Result<String, WorkflowError> {
        expression::interpolate(template, &self.to_expression_context())
            .map_err(|e| WorkflowError::ExpressionError(e.to_string()))
    }

    /// Compute the total serialized size of all context data in bytes.
    pub fn total_size(&self) -> usize {
        let outputs: usize = self
            .step_outputs
            .values()
            .map(|v| serde_json::to_string(v).map(|s| s.len()).unwrap_or(0))
            .sum();
        let variables: usize = self
            .variables
            .values()
            .map(|v| serde_json::to_string(v).map(|s| s.len()).unwrap_or(0))
            .sum();
        let trigger = self
            .trigger_payload
            .as_ref()
            .map(|v| serde_json::to_string(v).map(|s| s.len()).unwrap_or(0))
            .unwrap_or(0);
        outputs + variables + trigger
    }

    /// Serialize the entire context to JSON for checkpointing.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(json!({}))
    }

    /// Restore a context from a JSON checkpoint.
    pub fn from_json(value: Value) -> Result<Self, WorkflowError> {
        serde_json::from_value(value)
            .map_err(|e| WorkflowError::ParseError(format!("failed to restore context: {e}")))
    }

    /// Merge step outputs and variables produced by a child context (e.g. a
    /// `parallel`/`foreach` branch run against a clone of this context) back
    /// into this one. Last writer wins on scalars; object-valued entries are
    /// merged key by key. Entries that would breach `MAX_CONTEXT_SIZE` are
    /// skipped rather than failing the whole merge.
    pub fn merge_from(&mut self, other: &WorkflowContext) {
        for (key, value) in &other.step_outputs {
            let merged = match (self.step_outputs.get(key), value) {
                (Some(Value::Object(base)), Value::Object(incoming)) => {
                    let mut merged = base.clone();
                    for (k, v) in incoming {
                        merged.insert(k.clone(), v.clone());
                    }
                    Value::Object(merged)
                }
                _ => value.clone(),
            };
            let _ = self.set_step_output(key, merged);
        }
        for (key, value) in &other.variables {
            let _ = self.set_variable(key, value.clone());
        }
    }

    /// Build the nested `{steps, trigger, variables, workflow}` object that
    /// condition evaluation and template interpolation operate over.
    pub fn to_expression_context(&self) -> Value {
        build_context(
            &self.step_outputs,
            self.trigger_payload.as_ref(),
            &self.variables,
            &self.workflow_name,
            &self.run_id.to_string(),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
