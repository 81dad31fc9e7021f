//! Template resolution and JEXL condition evaluation.
//!
//! `resolve` replaces `{{ path }}` markers inside node params with values
//! taken from the run context. `WorkflowEvaluator` wraps `jexl_eval` for the
//! `condition` step.
//!
//! Payloads are always passed as context objects, never spliced into
//! expression strings.

use serde_json::{json, Map, Value};

use super::context::{value_to_string, RunContext, INPUT_ROOT};

// ---------------------------------------------------------------------------
// Resolution errors
// ---------------------------------------------------------------------------

/// Why a template could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("unterminated template marker in '{template}'")]
    Unterminated { template: String },

    #[error("empty path in template '{template}'")]
    EmptyPath { template: String },

    #[error("path '{path}': no value for key '{segment}'")]
    MissingKey { path: String, segment: String },

    #[error("path '{path}': index {index} out of range (length {len})")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("path '{path}': cannot take '{segment}' from {found}")]
    TypeMismatch {
        path: String,
        segment: String,
        found: &'static str,
    },
}

// ---------------------------------------------------------------------------
// Template resolution
// ---------------------------------------------------------------------------

/// Resolve every template marker inside `template` against `ctx`.
///
/// Objects and arrays are walked recursively, non-string scalars pass through
/// unchanged. A string consisting of exactly one marker resolves to the raw
/// value at that path; markers embedded in text are stringified.
pub fn resolve(template: &Value, ctx: &RunContext) -> Result<Value, ResolutionError> {
    match template {
        Value::String(s) => resolve_str(s, ctx),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve(item, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), resolve(value, ctx)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Resolve a single string template.
pub fn resolve_str(template: &str, ctx: &RunContext) -> Result<Value, ResolutionError> {
    let pieces = split_template(template)?;

    if let [Piece::Marker(path)] = pieces.as_slice() {
        return lookup(path, ctx);
    }

    if !pieces.iter().any(|p| matches!(p, Piece::Marker(_))) {
        return Ok(Value::String(template.to_string()));
    }

    let mut out = String::with_capacity(template.len());
    for piece in pieces {
        match piece {
            Piece::Literal(text) => out.push_str(text),
            Piece::Marker(path) => out.push_str(&value_to_string(&lookup(path, ctx)?)),
        }
    }
    Ok(Value::String(out))
}

/// Does this value contain any template marker?
pub fn has_markers(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains("{{"),
        Value::Array(items) => items.iter().any(has_markers),
        Value::Object(map) => map.values().any(has_markers),
        _ => false,
    }
}

/// Look up a dot path against the run context and return an owned value.
///
/// The first segment picks the root: `input` addresses the global input, a
/// committed node id addresses that node's output, anything else is read
/// from the global input as a shorthand.
pub fn lookup(path: &str, ctx: &RunContext) -> Result<Value, ResolutionError> {
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    let (root, rest) = match segments.split_first() {
        Some((root, rest)) => (*root, rest),
        None => {
            return Err(ResolutionError::EmptyPath {
                template: path.to_string(),
            });
        }
    };

    let value = if root == INPUT_ROOT {
        walk(ctx.global_input(), rest, path)?
    } else if let Some(output) = ctx.output(root) {
        walk(output, rest, path)?
    } else {
        walk(ctx.global_input(), &segments, path)?
    };
    Ok(value.clone())
}

/// Walk a dot path through a JSON value. Numeric segments index arrays.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Result<&'a Value, ResolutionError> {
    let path = path.trim();
    if path.is_empty() {
        return Ok(value);
    }
    let segments: Vec<&str> = path.split('.').map(str::trim).collect();
    walk(value, &segments, path)
}

fn walk<'a>(
    root: &'a Value,
    segments: &[&str],
    path: &str,
) -> Result<&'a Value, ResolutionError> {
    let mut current = root;
    for segment in segments {
        if segment.is_empty() {
            return Err(ResolutionError::EmptyPath {
                template: path.to_string(),
            });
        }
        current = match current {
            Value::Object(map) => map.get(*segment).ok_or_else(|| ResolutionError::MissingKey {
                path: path.to_string(),
                segment: segment.to_string(),
            })?,
            Value::Array(items) => {
                let index: usize =
                    segment
                        .parse()
                        .map_err(|_| ResolutionError::TypeMismatch {
                            path: path.to_string(),
                            segment: segment.to_string(),
                            found: "array",
                        })?;
                items
                    .get(index)
                    .ok_or_else(|| ResolutionError::IndexOutOfRange {
                        path: path.to_string(),
                        index,
                        len: items.len(),
                    })?
            }
            other => {
                return Err(ResolutionError::TypeMismatch {
                    path: path.to_string(),
                    segment: segment.to_string(),
                    found: type_name(other),
                });
            }
        };
    }
    Ok(current)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, PartialEq)]
enum Piece<'a> {
    Literal(&'a str),
    Marker(&'a str),
}

fn split_template(template: &str) -> Result<Vec<Piece<'_>>, ResolutionError> {
    let mut pieces = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            pieces.push(Piece::Literal(&rest[..start]));
        }
        let after_open = &rest[start + 2..];
        let end = after_open
            .find("}}")
            .ok_or_else(|| ResolutionError::Unterminated {
                template: template.to_string(),
            })?;
        let path = after_open[..end].trim();
        if path.is_empty() {
            return Err(ResolutionError::EmptyPath {
                template: template.to_string(),
            });
        }
        pieces.push(Piece::Marker(path));
        rest = &after_open[end + 2..];
    }

    if !rest.is_empty() {
        pieces.push(Piece::Literal(rest));
    }
    Ok(pieces)
}

// ---------------------------------------------------------------------------
// JEXL evaluation
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

/// JEXL expression evaluator with standard transforms pre-registered.
///
/// Not `Send`; build one where it is used instead of holding it across an
/// await point.
pub struct WorkflowEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl WorkflowEvaluator {
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!truthy(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                let found = match (args.first(), args.get(1)) {
                    (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                    (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle.as_str()),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            });

        Self { evaluator }
    }

    /// Evaluate an expression and coerce the result with `truthy`.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        self.evaluate_value(expression, context)
            .map(|result| truthy(&result))
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed(e.to_string()))
    }

    /// Evaluate against `{ input, <nodeId>: output, ... }` built from a run.
    pub fn evaluate_in_run_context(
        &self,
        expression: &str,
        ctx: &RunContext,
    ) -> Result<bool, ExpressionError> {
        self.evaluate_bool(expression, &ctx.to_expression_context())
    }
}

impl Default for WorkflowEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// JavaScript-like truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
