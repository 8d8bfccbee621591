//! `{{...}}` placeholder resolution.
//!
//! Expression forms:
//! - `timestamp` / `timestampUnix` — built-ins, computed at resolution time
//! - `<digits>.response.<subpath>` — navigate an earlier response
//! - anything else — variable table lookup
//!
//! A string that is exactly one placeholder resolves to the value's native
//! type; mixed content concatenates stringified fragments. An unresolvable
//! placeholder is an error, never literal pass-through.

use chrono::Utc;
use serde_json::Value;

use crate::error::TaskError;
use crate::extract;
use crate::runtime::context::ExecutionContext;

enum Fragment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

/// Recursively substitute placeholders in every string leaf of a value tree.
pub fn resolve_value(
    value: &Value,
    ctx: &ExecutionContext,
    field: &str,
) -> Result<Value, TaskError> {
    match value {
        Value::String(text) => resolve_str(text, ctx, field),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(resolve_value(item, ctx, field)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, item) in map {
                out.insert(key.clone(), resolve_value(item, ctx, field)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Substitute placeholders in one string.
pub fn resolve_str(input: &str, ctx: &ExecutionContext, field: &str) -> Result<Value, TaskError> {
    if !input.contains("{{") {
        return Ok(Value::String(input.to_string()));
    }

    let fragments = split_placeholders(input);

    // A lone placeholder keeps its native type, so numeric ids survive
    // substitution into path segments intact.
    if let [Fragment::Placeholder(expr)] = fragments.as_slice() {
        return resolve_expr(expr, ctx).ok_or_else(|| unresolved(expr, field));
    }

    let mut out = String::new();
    for fragment in &fragments {
        match fragment {
            Fragment::Literal(text) => out.push_str(text),
            Fragment::Placeholder(expr) => {
                let value = resolve_expr(expr, ctx).ok_or_else(|| unresolved(expr, field))?;
                out.push_str(&stringify(&value));
            }
        }
    }
    Ok(Value::String(out))
}

/// Like `resolve_str`, but always coerced to a string.
pub fn resolve_to_string(
    input: &str,
    ctx: &ExecutionContext,
    field: &str,
) -> Result<String, TaskError> {
    Ok(stringify(&resolve_str(input, ctx, field)?))
}

/// Scalars render bare; structures render as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn unresolved(expr: &str, field: &str) -> TaskError {
    TaskError::VariableResolution {
        placeholder: format!("{{{{{}}}}}", expr),
        field: field.to_string(),
    }
}

fn resolve_expr(expr: &str, ctx: &ExecutionContext) -> Option<Value> {
    match expr {
        "timestamp" => Some(Value::String(Utc::now().to_rfc3339())),
        "timestampUnix" => Some(Value::Number(Utc::now().timestamp().into())),
        _ => {
            if let Some((index, subpath)) = parse_history_ref(expr) {
                let response = ctx.response_at(index)?;
                extract::navigate_response(response, subpath).ok()
            } else {
                ctx.variable(expr).cloned()
            }
        }
    }
}

/// `<digits>.response` or `<digits>.response.<subpath>`. Anything else is
/// a plain variable name.
fn parse_history_ref(expr: &str) -> Option<(usize, &str)> {
    let (digits, rest) = expr.split_once('.')?;
    let index: usize = digits.parse().ok()?;
    if rest == "response" {
        return Some((index, ""));
    }
    let subpath = rest.strip_prefix("response.")?;
    Some((index, subpath))
}

fn split_placeholders(input: &str) -> Vec<Fragment<'_>> {
    let mut fragments = Vec::new();
    let mut rest = input;

    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start + 2..].find("}}") else {
            // Unterminated marker; the remainder is literal text.
            break;
        };
        if start > 0 {
            fragments.push(Fragment::Literal(&rest[..start]));
        }
        fragments.push(Fragment::Placeholder(rest[start + 2..start + 2 + end].trim()));
        rest = &rest[start + 2 + end + 2..];
    }

    if !rest.is_empty() {
        fragments.push(Fragment::Literal(rest));
    }
    fragments
}
