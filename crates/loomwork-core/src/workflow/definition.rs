//! Workflow definition parsing, validation, and filesystem operations.
//!
//! Converts between YAML files and the canonical `WorkflowDefinition` IR,
//! validates structural constraints (step id uniqueness, resolvable
//! next/on_true/on_false/wait routes, acyclic step graph, valid
//! operators/cron/durations), and provides discovery for workflow files on
//! disk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use loomwork_types::workflow::{
    ActionSpec, Condition, ExecuteAction, Step, StepBody, Trigger, WorkflowDefinition,
};
use thiserror::Error;

use super::dag;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("parse error: {0}")]
    ParseError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("cycle detected: {0}")]
    CycleDetected(String),

    #[error("unknown step reference: {0}")]
    UnknownDependency(String),

    #[error("expression error: {0}")]
    ExpressionError(String),

    #[error("execution error: {0}")]
    ExecutionError(String),

    #[error("timeout exceeded")]
    TimeoutError,

    #[error("concurrency limit reached")]
    ConcurrencyLimitReached,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `WorkflowDefinition` to a YAML string.
pub fn serialize_workflow_yaml(def: &WorkflowDefinition) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - At least one step exists; all step IDs are unique (including nested
///   `parallel`/`foreach` children, which share the same id namespace).
/// - Every `next`/`on_true`/`on_false`/`wait.on_timeout` reference resolves.
/// - Trigger is well-formed (non-empty event name / parseable cron).
/// - `condition` steps reference a structurally sound `Condition` tree
///   (regex leaves compile; `in`/`contains` leaves don't pair nonsensical
///   operators with scalar RHS).
/// - `global_timeout_secs` and per-step `timeout_secs` are > 0 if set.
/// - The step graph (as derived from routing edges) is acyclic.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.steps.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one step".to_string(),
        ));
    }

    validate_trigger(&def.trigger)?;

    let mut seen_ids = HashSet::new();
    collect_step_ids(&def.steps, &mut seen_ids)?;

    for step in &def.steps {
        validate_step(step, &seen_ids)?;
    }

    if let Some(t) = def.global_timeout_secs {
        if t == 0 {
            return Err(WorkflowError::ValidationError(
                "global_timeout_secs must be > 0".to_string(),
            ));
        }
    }

    dag::validate_acyclic(&def.steps).map_err(|cycle| {
        WorkflowError::CycleDetected(format!("cycle detected involving step '{cycle}'"))
    })?;

    Ok(())
}

fn validate_trigger(trigger: &Trigger) -> Result<(), WorkflowError> {
    match trigger {
        Trigger::Event { name } => {
            if name.is_empty() {
                return Err(WorkflowError::ValidationError(
                    "event trigger name must not be empty".to_string(),
                ));
            }
        }
        Trigger::Schedule { cron } => {
            croner::Cron::new(cron).parse().map_err(|e| {
                WorkflowError::ValidationError(format!("invalid cron expression '{cron}': {e}"))
            })?;
        }
        Trigger::Manual => {}
    }
    Ok(())
}

fn collect_step_ids(steps: &[Step], seen: &mut HashSet<String>) -> Result<(), WorkflowError> {
    for step in steps {
        if !seen.insert(step.id.clone()) {
            return Err(WorkflowError::ValidationError(format!(
                "duplicate step ID: '{}'",
                step.id
            )));
        }
        match &step.body {
            StepBody::Parallel { steps, .. } | StepBody::Foreach { steps, .. } => {
                collect_step_ids(steps, seen)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_step(step: &Step, known_ids: &HashSet<String>) -> Result<(), WorkflowError> {
    if let Some(t) = step.timeout_secs {
        if t == 0 {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' timeout_secs must be > 0",
                step.id
            )));
        }
    }
    if let Some(retry) = &step.retry {
        if retry.max_attempts == 0 {
            return Err(WorkflowError::ValidationError(format!(
                "step '{}' retry.max_attempts must be >= 1",
                step.id
            )));
        }
    }

    let check_ref = |id: &str| -> Result<(), WorkflowError> {
        if known_ids.contains(id) {
            Ok(())
        } else {
            Err(WorkflowError::UnknownDependency(format!(
                "step '{}' references unknown step '{}'",
                step.id, id
            )))
        }
    };

    match &step.body {
        StepBody::Condition {
            expression,
            on_true,
            on_false,
        } => {
            validate_condition(expression)?;
            if let Some(id) = on_true {
                check_ref(id)?;
            }
            if let Some(id) = on_false {
                check_ref(id)?;
            }
        }
        StepBody::Action { action } => validate_action_spec(step, action, known_ids)?,
        StepBody::Execute { actions } => {
            for action in actions {
                validate_execute_action(action)?;
            }
        }
        StepBody::Parallel { steps, .. } => {
            for child in steps {
                validate_step(child, known_ids)?;
            }
        }
        StepBody::Foreach {
            items_field,
            item_var,
            steps,
            ..
        } => {
            if items_field.is_empty() {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}' foreach.items_field must not be empty",
                    step.id
                )));
            }
            if item_var.is_empty() {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}' foreach.item_var must not be empty",
                    step.id
                )));
            }
            for child in steps {
                validate_step(child, known_ids)?;
            }
        }
        StepBody::Wait {
            event,
            timeout_secs,
            on_timeout,
        } => {
            if event.is_empty() {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}' wait.event must not be empty",
                    step.id
                )));
            }
            if *timeout_secs == 0 {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}' wait.timeout_secs must be > 0",
                    step.id
                )));
            }
            if let Some(id) = on_timeout {
                check_ref(id)?;
            }
        }
    }

    if let Some(id) = &step.next {
        check_ref(id)?;
    }

    Ok(())
}

fn validate_action_spec(
    step: &Step,
    action: &ActionSpec,
    known_ids: &HashSet<String>,
) -> Result<(), WorkflowError> {
    match action {
        ActionSpec::RequireApproval { approver_role, .. } => {
            if approver_role.is_empty() {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}' require_approval.approver_role must not be empty",
                    step.id
                )));
            }
        }
        ActionSpec::Wait {
            event,
            timeout_secs,
        } => {
            if event.is_empty() || *timeout_secs == 0 {
                return Err(WorkflowError::ValidationError(format!(
                    "step '{}' action wait must have a non-empty event and positive timeout",
                    step.id
                )));
            }
        }
        ActionSpec::Allow { .. } | ActionSpec::Block { .. } | ActionSpec::Execute => {}
    }
    let _ = known_ids;
    Ok(())
}

fn validate_execute_action(action: &ExecuteAction) -> Result<(), WorkflowError> {
    match action {
        ExecuteAction::Webhook { url, .. } | ExecuteAction::HttpRequest { url, .. } => {
            if url.is_empty() {
                return Err(WorkflowError::ValidationError(
                    "execute action url must not be empty".to_string(),
                ));
            }
        }
        ExecuteAction::Notify { recipients, .. } => {
            if recipients.is_empty() {
                return Err(WorkflowError::ValidationError(
                    "notify action must have at least one recipient".to_string(),
                ));
            }
        }
        ExecuteAction::CreateRecord { entity, .. }
        | ExecuteAction::UpdateRecord { entity, .. } => {
            if entity.is_empty() {
                return Err(WorkflowError::ValidationError(
                    "record action entity must not be empty".to_string(),
                ));
            }
        }
        ExecuteAction::CreateApprovalRequest { approver_role, .. } => {
            if approver_role.is_empty() {
                return Err(WorkflowError::ValidationError(
                    "create_approval_request.approver_role must not be empty".to_string(),
                ));
            }
        }
        ExecuteAction::Log { .. } => {}
    }
    Ok(())
}

fn validate_condition(condition: &Condition) -> Result<(), WorkflowError> {
    match condition {
        Condition::Leaf {
            field,
            operator,
            value,
        } => {
            if field.is_empty() {
                return Err(WorkflowError::ValidationError(
                    "condition leaf field must not be empty".to_string(),
                ));
            }
            if matches!(operator, loomwork_types::workflow::ConditionOperator::Regex) {
                let pattern = value.as_str().ok_or_else(|| {
                    WorkflowError::ValidationError(
                        "regex condition value must be a string pattern".to_string(),
                    )
                })?;
                regex::Regex::new(pattern).map_err(|e| {
                    WorkflowError::ValidationError(format!("invalid regex '{pattern}': {e}"))
                })?;
            }
            Ok(())
        }
        Condition::And { and } => and.iter().try_for_each(validate_condition),
        Condition::Or { or } => or.iter().try_for_each(validate_condition),
    }
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Save a workflow definition to a YAML file, creating parent directories.
pub fn save_workflow_file(path: &Path, def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_workflow_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover all workflow YAML files under `base_dir`. Files that fail to
/// parse are logged and skipped, not returned as errors.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, WorkflowError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), WorkflowError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" {
                match load_workflow_file(&path) {
                    Ok(def) => results.push((path, def)),
                    Err(_) => {
                        tracing::warn!(?path, "skipping unparseable workflow file");
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use loomwork_types::workflow::ConditionOperator;
    use serde_json::json;
    use std::collections::HashMap;

    fn minimal_workflow(steps: Vec<Step>) -> WorkflowDefinition {
        WorkflowDefinition {
            trigger: Trigger::Manual,
            context_load: vec![],
            global_timeout_secs: None,
            steps,
        }
    }

    fn action_step(id: &str, action: ActionSpec, next: Option<&str>) -> Step {
        Step {
            id: id.to_string(),
            name: None,
            body: StepBody::Action { action },
            next: next.map(String::from),
            timeout_secs: None,
            retry: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn parse_yaml_roundtrip() {
        let yaml = r#"
trigger:
  type: event
  name: order.created
steps:
  - id: check-total
    type: condition
    expression:
      field: order.total
      operator: gt
      value: 1000
    on_true: block
    on_false: allow
  - id: block
    type: action
    action:
      kind: block
      reason: high value
  - id: allow
    type: action
    action:
      kind: allow
"#;
        let def = parse_workflow_yaml(yaml).expect("should parse");
        assert_eq!(def.steps.len(), 3);

        let yaml2 = serialize_workflow_yaml(&def).expect("should serialize");
        let def2 = parse_workflow_yaml(&yaml2).expect("should re-parse");
        assert_eq!(def2.steps.len(), def.steps.len());
    }

    #[test]
    fn rejects_empty_workflow() {
        let def = minimal_workflow(vec![]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn rejects_duplicate_step_ids() {
        let def = minimal_workflow(vec![
            action_step("a", ActionSpec::Allow { reason: None }, None),
            action_step("a", ActionSpec::Block { reason: None }, None),
        ]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("duplicate step ID"));
    }

    #[test]
    fn rejects_unknown_next_reference() {
        let def = minimal_workflow(vec![action_step(
            "a",
            ActionSpec::Allow { reason: None },
            Some("missing"),
        )]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("unknown step"));
    }

    #[test]
    fn rejects_unknown_condition_branch() {
        let def = minimal_workflow(vec![Step {
            id: "check".to_string(),
            name: None,
            body: StepBody::Condition {
                expression: Condition::Leaf {
                    field: "x".to_string(),
                    operator: ConditionOperator::Eq,
                    value: json!(1),
                },
                on_true: Some("missing".to_string()),
                on_false: None,
            },
            next: None,
            timeout_secs: None,
            retry: None,
            metadata: HashMap::new(),
        }]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("unknown step"));
    }

    #[test]
    fn rejects_invalid_regex_condition() {
        let def = minimal_workflow(vec![Step {
            id: "check".to_string(),
            name: None,
            body: StepBody::Condition {
                expression: Condition::Leaf {
                    field: "x".to_string(),
                    operator: ConditionOperator::Regex,
                    value: json!("("),
                },
                on_true: None,
                on_false: None,
            },
            next: None,
            timeout_secs: None,
            retry: None,
            metadata: HashMap::new(),
        }]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("invalid regex"));
    }

    #[test]
    fn rejects_invalid_cron_trigger() {
        let mut def = minimal_workflow(vec![action_step(
            "a",
            ActionSpec::Allow { reason: None },
            None,
        )]);
        def.trigger = Trigger::Schedule {
            cron: "not a cron".to_string(),
        };
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("invalid cron"));
    }

    #[test]
    fn rejects_cycle_in_routing_graph() {
        let def = minimal_workflow(vec![
            action_step("a", ActionSpec::Execute, Some("b")),
            action_step("b", ActionSpec::Execute, Some("a")),
        ]);
        let err = validate_definition(&def).unwrap_err();
        assert!(err.to_string().contains("cycle detected"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflows/test.yaml");
        let def = minimal_workflow(vec![action_step(
            "a",
            ActionSpec::Allow { reason: None },
            None,
        )]);
        save_workflow_file(&path, &def).expect("should save");
        let loaded = load_workflow_file(&path).expect("should load");
        assert_eq!(loaded.steps.len(), 1);
    }

    #[test]
    fn discover_workflows_skips_unparseable() {
        let dir = tempfile::tempdir().unwrap();
        let wf1 = minimal_workflow(vec![action_step(
            "a",
            ActionSpec::Allow { reason: None },
            None,
        )]);
        save_workflow_file(&dir.path().join("wf1.yaml"), &wf1).unwrap();
        std::fs::write(dir.path().join("not-a-workflow.yaml"), "key: value").unwrap();

        let found = discover_workflows(dir.path()).expect("should discover");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn discover_nonexistent_dir_is_empty() {
        let result = discover_workflows(Path::new("/nonexistent/path"));
        assert!(result.unwrap().is_empty());
    }
}
