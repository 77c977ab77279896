//! Condition evaluation and template interpolation against a workflow
//! execution context.
//!
//! `Condition` trees (see `loomwork_types::workflow::Condition`) are
//! evaluated natively — no embedded expression-string grammar — and
//! `{{path}}` templates are resolved by a small hand-rolled scanner walking
//! arbitrary dotted paths into the context map.
//!
//! **Security note:** field paths are only ever looked up in the context;
//! they are never interpolated into a host-language expression string.

use std::collections::HashMap;

use loomwork_types::workflow::{Condition, ConditionOperator};
use regex::Regex;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("operator {operator:?} requires a {expected} value, got {actual}")]
    TypeMismatch {
        operator: ConditionOperator,
        expected: &'static str,
        actual: String,
    },

    #[error("unterminated template placeholder in: {0}")]
    UnterminatedTemplate(String),
}

// ---------------------------------------------------------------------------
// Condition evaluation
// ---------------------------------------------------------------------------

/// Evaluate a `Condition` tree against a JSON context object.
pub fn evaluate(condition: &Condition, ctx: &Value) -> Result<bool, EvalError> {
    match condition {
        Condition::And { and } => {
            for child in and {
                if !evaluate(child, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Or { or } => {
            for child in or {
                if evaluate(child, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Leaf {
            field,
            operator,
            value,
        } => evaluate_leaf(field, *operator, value, ctx),
    }
}

fn evaluate_leaf(
    field: &str,
    operator: ConditionOperator,
    rhs: &Value,
    ctx: &Value,
) -> Result<bool, EvalError> {
    let lhs = resolve_path(ctx, field).unwrap_or(&Value::Null);

    Ok(match operator {
        ConditionOperator::Eq => values_equal(lhs, rhs),
        ConditionOperator::Neq => !values_equal(lhs, rhs),
        ConditionOperator::Gt => compare_numeric(lhs, rhs).is_some_and(|o| o.is_gt()),
        ConditionOperator::Gte => compare_numeric(lhs, rhs).is_some_and(|o| o.is_ge()),
        ConditionOperator::Lt => compare_numeric(lhs, rhs).is_some_and(|o| o.is_lt()),
        ConditionOperator::Lte => compare_numeric(lhs, rhs).is_some_and(|o| o.is_le()),
        ConditionOperator::In => rhs
            .as_array()
            .map(|arr| arr.iter().any(|v| values_equal(v, lhs)))
            .unwrap_or(false),
        ConditionOperator::Contains => match lhs {
            Value::String(s) => rhs.as_str().is_some_and(|needle| s.contains(needle)),
            Value::Array(arr) => arr.iter().any(|v| values_equal(v, rhs)),
            _ => false,
        },
        ConditionOperator::Regex => {
            let pattern = rhs.as_str().ok_or_else(|| EvalError::TypeMismatch {
                operator,
                expected: "string",
                actual: describe(rhs),
            })?;
            let re = Regex::new(pattern).map_err(|source| EvalError::InvalidRegex {
                pattern: pattern.to_string(),
                source,
            })?;
            re.is_match(&stringify(lhs))
        }
    })
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => a == b,
    }
}

fn compare_numeric(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    let a = a.as_f64()?;
    let b = b.as_f64()?;
    a.partial_cmp(&b)
}

fn describe(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}

/// Resolve a dot-separated field path against a JSON value. Returns `None`
/// if any segment is missing or the path walks through a non-object.
pub fn resolve_path<'a>(ctx: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(ctx, |cur, segment| match cur {
        Value::Object(map) => map.get(segment),
        _ => None,
    })
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Template interpolation
// ---------------------------------------------------------------------------

/// Resolve every `{{path}}` (optionally `{{ path }}` with surrounding
/// whitespace) placeholder in `template` against `ctx`. Undefined paths
/// render as an empty string.
pub fn interpolate(template: &str, ctx: &Value) -> Result<String, EvalError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            return Err(EvalError::UnterminatedTemplate(template.to_string()));
        };
        let path = after[..end].trim();
        let resolved = resolve_path(ctx, path)
            .map(stringify)
            .unwrap_or_default();
        out.push_str(&resolved);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Legacy workflow-context adapter
// ---------------------------------------------------------------------------

/// Builds the nested `{steps, trigger, variables, workflow}` context object
/// that `evaluate`/`interpolate` operate over, from the flattened fields the
/// execution engine tracks per-run.
pub fn build_context(
    step_outputs: &HashMap<String, Value>,
    trigger_payload: Option<&Value>,
    variables: &HashMap<String, Value>,
    workflow_name: &str,
    execution_id: &str,
) -> Value {
    let mut steps = serde_json::Map::new();
    for (id, output) in step_outputs {
        steps.insert(id.clone(), serde_json::json!({ "output": output }));
    }

    serde_json::json!({
        "steps": steps,
        "trigger": trigger_payload.cloned().unwrap_or(serde_json::json!({})),
        "variables": variables,
        "workflow": {
            "name": workflow_name,
            "execution_id": execution_id,
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn leaf_eq_and_neq() {
        let ctx = json!({"order": {"status": "paid"}});
        let cond = Condition::Leaf {
            field: "order.status".to_string(),
            operator: ConditionOperator::Eq,
            value: json!("paid"),
        };
        assert!(evaluate(&cond, &ctx).unwrap());

        let cond = Condition::Leaf {
            field: "order.status".to_string(),
            operator: ConditionOperator::Neq,
            value: json!("paid"),
        };
        assert!(!evaluate(&cond, &ctx).unwrap());
    }

    #[test]
    fn numeric_comparisons() {
        let ctx = json!({"order": {"total": 1500}});
        for (op, value, expected) in [
            (ConditionOperator::Gt, json!(1000), true),
            (ConditionOperator::Gte, json!(1500), true),
            (ConditionOperator::Lt, json!(1000), false),
            (ConditionOperator::Lte, json!(1500), true),
        ] {
            let cond = Condition::Leaf {
                field: "order.total".to_string(),
                operator: op,
                value,
            };
            assert_eq!(evaluate(&cond, &ctx).unwrap(), expected);
        }
    }

    #[test]
    fn missing_field_is_null_and_comparisons_fail() {
        let ctx = json!({});
        let cond = Condition::Leaf {
            field: "order.total".to_string(),
            operator: ConditionOperator::Gt,
            value: json!(1000),
        };
        assert!(!evaluate(&cond, &ctx).unwrap());

        let cond = Condition::Leaf {
            field: "order.total".to_string(),
            operator: ConditionOperator::Eq,
            value: json!(null),
        };
        assert!(evaluate(&cond, &ctx).unwrap());
    }

    #[test]
    fn in_operator() {
        let ctx = json!({"user": {"role": "admin"}});
        let cond = Condition::Leaf {
            field: "user.role".to_string(),
            operator: ConditionOperator::In,
            value: json!(["admin", "manager"]),
        };
        assert!(evaluate(&cond, &ctx).unwrap());
    }

    #[test]
    fn contains_string_and_array() {
        let ctx = json!({"msg": "critical error occurred", "tags": ["a", "b"]});
        let cond = Condition::Leaf {
            field: "msg".to_string(),
            operator: ConditionOperator::Contains,
            value: json!("error"),
        };
        assert!(evaluate(&cond, &ctx).unwrap());

        let cond = Condition::Leaf {
            field: "tags".to_string(),
            operator: ConditionOperator::Contains,
            value: json!("b"),
        };
        assert!(evaluate(&cond, &ctx).unwrap());
    }

    #[test]
    fn regex_operator_matches_real_regex() {
        let ctx = json!({"email": "user@example.com"});
        let cond = Condition::Leaf {
            field: "email".to_string(),
            operator: ConditionOperator::Regex,
            value: json!(r"^[\w.]+@example\.com$"),
        };
        assert!(evaluate(&cond, &ctx).unwrap());

        let cond = Condition::Leaf {
            field: "email".to_string(),
            operator: ConditionOperator::Regex,
            value: json!(r"^[\w.]+@other\.com$"),
        };
        assert!(!evaluate(&cond, &ctx).unwrap());
    }

    #[test]
    fn and_is_vacuously_true_or_vacuously_false() {
        assert!(evaluate(&Condition::And { and: vec![] }, &json!({})).unwrap());
        assert!(!evaluate(&Condition::Or { or: vec![] }, &json!({})).unwrap());
    }

    #[test]
    fn composite_and_or() {
        let ctx = json!({"a": 1, "b": "x"});
        let cond = Condition::And {
            and: vec![
                Condition::Leaf {
                    field: "a".to_string(),
                    operator: ConditionOperator::Eq,
                    value: json!(1),
                },
                Condition::Or {
                    or: vec![
                        Condition::Leaf {
                            field: "b".to_string(),
                            operator: ConditionOperator::Eq,
                            value: json!("y"),
                        },
                        Condition::Leaf {
                            field: "b".to_string(),
                            operator: ConditionOperator::Eq,
                            value: json!("x"),
                        },
                    ],
                },
            ],
        };
        assert!(evaluate(&cond, &ctx).unwrap());
    }

    #[test]
    fn interpolate_resolves_nested_path() {
        let ctx = json!({"steps": {"gather": {"output": "news articles"}}});
        let out = interpolate("Result: {{steps.gather.output}}", &ctx).unwrap();
        assert_eq!(out, "Result: news articles");
    }

    #[test]
    fn interpolate_accepts_spaced_braces() {
        let ctx = json!({"trigger": {"source": "github"}});
        let out = interpolate("from {{ trigger.source }}", &ctx).unwrap();
        assert_eq!(out, "from github");
    }

    #[test]
    fn interpolate_undefined_path_renders_empty() {
        let ctx = json!({});
        let out = interpolate("value={{missing.path}}", &ctx).unwrap();
        assert_eq!(out, "value=");
    }

    #[test]
    fn interpolate_unterminated_placeholder_errors() {
        let ctx = json!({});
        assert!(interpolate("{{oops", &ctx).is_err());
    }

    #[test]
    fn build_context_nests_step_outputs() {
        let mut step_outputs = HashMap::new();
        step_outputs.insert("gather".to_string(), json!("articles"));
        let ctx = build_context(&step_outputs, None, &HashMap::new(), "daily-digest", "exec-1");
        assert_eq!(
            resolve_path(&ctx, "steps.gather.output"),
            Some(&json!("articles"))
        );
        assert_eq!(
            resolve_path(&ctx, "workflow.name"),
            Some(&json!("daily-digest"))
        );
    }
}
