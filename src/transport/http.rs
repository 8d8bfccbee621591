use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::batch::HttpMethod;
use crate::error::TransportError;
use crate::transport::{RequestPayload, RequestSpec, ResponseData, Transport};

const RETRY_TOTAL: usize = 3;
const RETRY_BACKOFF_FACTOR: u64 = 1;
const RETRY_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// reqwest-backed transport for one configured endpoint. Owns the retry
/// policy for transient failures; callers see only the final outcome.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    session_headers: Vec<(String, String)>,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_headers: Vec::new(),
        })
    }

    pub fn with_auth_token(mut self, token: &str) -> Self {
        upsert_header(
            &mut self.session_headers,
            "Authorization",
            &format!("Bearer {}", token),
        );
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        upsert_header(&mut self.session_headers, name, value);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn send_once(&self, request: &RequestSpec) -> Result<ResponseData, TransportError> {
        let url = self.build_url(&request.path);
        let mut builder = self.client.request(to_reqwest_method(request.method), &url);

        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }

        // Default JSON headers, then session headers, then per-request
        // headers; the last write for a name wins.
        let mut headers: Vec<(String, String)> = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        for (name, value) in &self.session_headers {
            upsert_header(&mut headers, name, value);
        }
        for (name, value) in &request.headers {
            upsert_header(&mut headers, name, value);
        }

        match &request.payload {
            RequestPayload::Empty => {}
            RequestPayload::Text(body) => {
                // A body that isn't valid JSON goes out as plain text.
                if serde_json::from_str::<Value>(body).is_err() {
                    upsert_header(&mut headers, "Content-Type", "text/plain");
                }
                builder = builder.body(body.clone());
            }
            RequestPayload::Multipart { fields, files } => {
                // reqwest supplies the boundary content type itself.
                headers.retain(|(name, _)| !name.eq_ignore_ascii_case("Content-Type"));
                let mut form = Form::new();
                for (name, value) in fields {
                    form = form.text(name.clone(), value.clone());
                }
                for file in files {
                    let mut part =
                        Part::bytes(file.bytes.clone()).file_name(file.filename.clone());
                    if let Some(content_type) = &file.content_type {
                        part = part.mime_str(content_type).map_err(|e| {
                            TransportError::InvalidRequest(format!(
                                "bad content type '{}' for field '{}': {}",
                                content_type, file.field, e
                            ))
                        })?;
                    }
                    form = form.part(file.field.clone(), part);
                }
                builder = builder.multipart(form);
            }
        }

        for (name, value) in &headers {
            builder = builder.header(name, value);
        }

        debug!(method = %request.method, url = %url, "sending request");
        let response = builder
            .send()
            .await
            .map_err(|e| classify_error(&url, e))?;

        let status_code = response.status().as_u16();
        let mut response_headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(text) = value.to_str() {
                response_headers.insert(name.as_str().to_ascii_lowercase(), text.to_string());
            }
        }
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let json = serde_json::from_str::<Value>(&body).ok();

        Ok(ResponseData {
            status_code,
            headers: response_headers,
            url: final_url,
            method: request.method.to_string(),
            body,
            json,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: RequestSpec) -> Result<ResponseData, TransportError> {
        for attempt in 0..RETRY_TOTAL {
            if attempt > 0 {
                let delay = Duration::from_secs(RETRY_BACKOFF_FACTOR * (1 << (attempt - 1)));
                sleep(delay).await;
            }

            match self.send_once(&request).await {
                Ok(response) => {
                    if RETRY_STATUS_CODES.contains(&response.status_code)
                        && attempt + 1 < RETRY_TOTAL
                    {
                        warn!(
                            status = response.status_code,
                            attempt = attempt + 1,
                            "retrying on transient status"
                        );
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if attempt + 1 < RETRY_TOTAL {
                        warn!(error = %err, attempt = attempt + 1, "retrying failed request");
                        continue;
                    }
                    return Err(err);
                }
            }
        }
        Err(TransportError::Request(
            "request failed after retries".to_string(),
        ))
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

fn upsert_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if let Some(entry) = headers
        .iter_mut()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
    {
        entry.1 = value.to_string();
    } else {
        headers.push((name.to_string(), value.to_string()));
    }
}

fn classify_error(url: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            url: url.to_string(),
        }
    } else if err.is_connect() {
        TransportError::Connect {
            url: url.to_string(),
            message: err.to_string(),
        }
    } else {
        TransportError::Request(err.to_string())
    }
}
