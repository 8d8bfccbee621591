use serde_json::{Value, json};

use crate::error::ExtractError;
use crate::transport::ResponseData;

/// Pull a value out of a completed response.
///
/// Supported path forms:
/// - `status_code`
/// - `body` (raw response text)
/// - `headers.<name>` (case-insensitive)
/// - `json.<segment>(.<segment>)*`
/// - `<segment>(.<segment>)*` (implicit `json.` prefix)
///
/// A segment that parses as a non-negative integer indexes into an array;
/// anything else indexes into an object by key.
pub fn extract(response: &ResponseData, path_expr: &str) -> Result<Value, ExtractError> {
    let expr = path_expr.trim();
    if expr.is_empty() {
        return Err(ExtractError::EmptyPath);
    }

    match expr {
        "status_code" => Ok(json!(response.status_code)),
        "body" => Ok(Value::String(response.body.clone())),
        "json" => response.json.clone().ok_or(ExtractError::NonJsonBody),
        _ => {
            if let Some(name) = expr.strip_prefix("headers.") {
                return header_value(response, name);
            }
            let path = expr.strip_prefix("json.").unwrap_or(expr);
            let root = response.json.as_ref().ok_or(ExtractError::NonJsonBody)?;
            navigate(root, path)
        }
    }
}

/// Resolve a history reference subpath against a response. An empty
/// subpath yields the whole response object.
pub fn navigate_response(response: &ResponseData, subpath: &str) -> Result<Value, ExtractError> {
    if subpath.is_empty() {
        Ok(response.as_value())
    } else {
        extract(response, subpath)
    }
}

fn header_value(response: &ResponseData, name: &str) -> Result<Value, ExtractError> {
    let lower = name.to_ascii_lowercase();
    response
        .headers
        .iter()
        .find(|(key, _)| key.to_ascii_lowercase() == lower)
        .map(|(_, value)| Value::String(value.clone()))
        .ok_or_else(|| ExtractError::MissingHeader(name.to_string()))
}

/// Walk a dotted path through a JSON value. Total over arbitrary shapes:
/// missing keys, null traversal, and out-of-range indices are errors,
/// never panics.
pub fn navigate(root: &Value, path: &str) -> Result<Value, ExtractError> {
    if path.is_empty() {
        return Ok(root.clone());
    }

    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(ExtractError::PathNotFound {
                path: path.to_string(),
                segment: segment.to_string(),
            });
        }
        current = match current {
            Value::Array(items) => {
                let index: usize =
                    segment
                        .parse()
                        .map_err(|_| ExtractError::PathNotFound {
                            path: path.to_string(),
                            segment: segment.to_string(),
                        })?;
                items.get(index).ok_or(ExtractError::IndexOutOfBounds {
                    path: path.to_string(),
                    index,
                })?
            }
            Value::Object(map) => map.get(segment).ok_or_else(|| ExtractError::PathNotFound {
                path: path.to_string(),
                segment: segment.to_string(),
            })?,
            _ => {
                return Err(ExtractError::PathNotFound {
                    path: path.to_string(),
                    segment: segment.to_string(),
                });
            }
        };
    }

    Ok(current.clone())
}
