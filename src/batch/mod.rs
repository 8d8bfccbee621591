pub mod loader;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// 批量任务文档 ({"tasks": [...]})
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub tasks: Vec<Task>,
}

/// One declarative HTTP call within a batch. Field values in `path`,
/// `params`, `headers`, `body` (or the body file's content) and
/// `multipartData` may contain `{{...}}` placeholders; file paths in
/// `multipartFiles` may not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(alias = "config_name")]
    pub config_name: String,

    pub method: HttpMethod,

    pub path: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub headers: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Overrides `body` when set. The file's content is read at send time
    /// and template-substituted exactly as an inline body would be.
    #[serde(default, alias = "body_file", skip_serializing_if = "Option::is_none")]
    pub body_file: Option<PathBuf>,

    #[serde(default, alias = "multipart_data", skip_serializing_if = "Option::is_none")]
    pub multipart_data: Option<Map<String, Value>>,

    #[serde(default, alias = "multipart_files", skip_serializing_if = "Option::is_none")]
    pub multipart_files: Option<BTreeMap<String, FileSpec>>,

    /// Seconds to wait before sending.
    #[serde(default, alias = "delay_before", skip_serializing_if = "is_zero")]
    pub delay_before: f64,

    /// Seconds to wait after the result is recorded.
    #[serde(default, alias = "delay_after", skip_serializing_if = "is_zero")]
    pub delay_after: f64,

    /// Variable name -> extraction path, applied against the response
    /// before the next task starts.
    #[serde(default, alias = "extract_vars", skip_serializing_if = "Option::is_none")]
    pub extract_vars: Option<Map<String, Value>>,
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

impl Task {
    pub fn new(
        config_name: impl Into<String>,
        method: HttpMethod,
        path: impl Into<String>,
    ) -> Self {
        Self {
            config_name: config_name.into(),
            method,
            path: path.into(),
            params: Map::new(),
            headers: Map::new(),
            body: None,
            body_file: None,
            multipart_data: None,
            multipart_files: None,
            delay_before: 0.0,
            delay_after: 0.0,
            extract_vars: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn body_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.body_file = Some(path.into());
        self
    }

    pub fn multipart_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.multipart_data
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn multipart_file(mut self, field: impl Into<String>, spec: FileSpec) -> Self {
        self.multipart_files
            .get_or_insert_with(BTreeMap::new)
            .insert(field.into(), spec);
        self
    }

    pub fn delay_before(mut self, seconds: f64) -> Self {
        self.delay_before = seconds;
        self
    }

    pub fn delay_after(mut self, seconds: f64) -> Self {
        self.delay_after = seconds;
        self
    }

    pub fn extract(mut self, var: impl Into<String>, path_expr: impl Into<String>) -> Self {
        self.extract_vars
            .get_or_insert_with(Map::new)
            .insert(var.into(), Value::String(path_expr.into()));
        self
    }

    /// Rebase relative file references onto `base_dir` (the batch file's
    /// directory), so batch files stay relocatable.
    pub fn anchor_paths(&mut self, base_dir: &Path) {
        if let Some(path) = &self.body_file {
            if path.is_relative() {
                self.body_file = Some(base_dir.join(path));
            }
        }
        if let Some(files) = &mut self.multipart_files {
            for spec in files.values_mut() {
                spec.anchor(base_dir);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(format!("unsupported HTTP method: {}", other)),
        }
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.as_str().to_string()
    }
}

/// File reference for a multipart part: bare path, or path plus content
/// type, or path plus content type plus an explicit upload filename.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FileSpec {
    Path(PathBuf),
    WithContentType(PathBuf, String),
    Full(PathBuf, String, String),
}

impl FileSpec {
    pub fn path(&self) -> &Path {
        match self {
            FileSpec::Path(path)
            | FileSpec::WithContentType(path, _)
            | FileSpec::Full(path, _, _) => path,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        match self {
            FileSpec::Path(_) => None,
            FileSpec::WithContentType(_, content_type) | FileSpec::Full(_, content_type, _) => {
                Some(content_type)
            }
        }
    }

    pub fn filename(&self) -> Option<&str> {
        match self {
            FileSpec::Full(_, _, filename) => Some(filename),
            _ => None,
        }
    }

    fn anchor(&mut self, base_dir: &Path) {
        let path = match self {
            FileSpec::Path(path)
            | FileSpec::WithContentType(path, _)
            | FileSpec::Full(path, _, _) => path,
        };
        if path.is_relative() {
            let joined = base_dir.join(path.as_path());
            *path = joined;
        }
    }
}
