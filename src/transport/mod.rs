pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::batch::HttpMethod;
use crate::error::TransportError;

/// A fully resolved request, ready for the wire. Produced by the engine
/// after template substitution and payload selection.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub path: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub payload: RequestPayload,
}

/// The request body, decided once during task resolution:
/// a body file's content supersedes an inline body, and any text body
/// supersedes multipart fields.
#[derive(Debug, Clone, Default)]
pub enum RequestPayload {
    #[default]
    Empty,
    Text(String),
    Multipart {
        fields: Vec<(String, String)>,
        files: Vec<MultipartFile>,
    },
}

/// One file part of a multipart form, already read into memory so the
/// transport never touches the filesystem.
#[derive(Debug, Clone)]
pub struct MultipartFile {
    pub field: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Response as recorded in task history. Header names are lowercased.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub url: String,
    pub method: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
}

impl ResponseData {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// The whole response as a JSON value, for `{{N.response}}` templates.
    pub fn as_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// 传输层接口 (Transport seam)
/// One HTTP call with the implementation's own retry policy; the engine
/// treats the outcome as final.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: RequestSpec) -> Result<ResponseData, TransportError>;
}
