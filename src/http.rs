//! HTTP transport: the request/response shapes and the client seam.
//!
//! The runner only talks to [`HttpClient`]; [`ReqwestClient`] is the real
//! implementation and tests plug in their own.

use std::time::{Duration, Instant};

use indexmap::IndexMap;

use crate::error::{AteError, Result};
use crate::value::{Map, Value};

/// Request payload
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    #[default]
    None,
    /// Serialized as a JSON document
    Json(Value),
    /// A mapping is sent form-encoded, anything else as raw text
    Data(Value),
}

/// A fully resolved request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Request {
    pub method: String,
    pub url: String,
    /// Header names are lowercase
    pub headers: IndexMap<String, String>,
    pub params: Vec<(String, String)>,
    pub body: Body,
    pub timeout: Option<Duration>,
}

impl Request {
    /// Build a request from a resolved `request:` mapping.
    ///
    /// # Errors
    /// `Params` when `url` or `method` is missing or a field has the wrong
    /// shape.
    pub fn from_value(raw: &Value) -> Result<Self> {
        let Value::Map(fields) = raw else {
            return Err(AteError::params(format!(
                "request must be a mapping, got {}",
                raw.type_name()
            )));
        };

        let url = match fields.get("url") {
            Some(Value::String(url)) if !url.is_empty() => url.clone(),
            _ => return Err(AteError::params("request url missing")),
        };
        let method = match fields.get("method") {
            Some(Value::String(method)) if !method.is_empty() => method.to_uppercase(),
            _ => return Err(AteError::params("request method missing")),
        };

        let headers = match fields.get("headers") {
            None | Some(Value::Null) => IndexMap::new(),
            Some(Value::Map(headers)) => lowercase_headers(headers),
            Some(other) => {
                return Err(AteError::params(format!(
                    "request headers must be a mapping, got {}",
                    other.type_name()
                )))
            }
        };

        let params = match fields.get("params") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Map(params)) => params
                .iter()
                .map(|(k, v)| (k.clone(), v.to_text()))
                .collect(),
            Some(other) => {
                return Err(AteError::params(format!(
                    "request params must be a mapping, got {}",
                    other.type_name()
                )))
            }
        };

        let body = if let Some(json) = fields.get("json") {
            Body::Json(json.clone())
        } else if let Some(data) = fields.get("data") {
            Body::Data(data.clone())
        } else {
            Body::None
        };

        let timeout = fields
            .get("timeout")
            .and_then(Value::as_f64)
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64);

        Ok(Request {
            method,
            url,
            headers,
            params,
            body,
            timeout,
        })
    }
}

/// Header names lowercased; later duplicates win.
pub fn lowercase_headers(headers: &Map) -> IndexMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.to_text()))
        .collect()
}

/// A received response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    pub status_code: u16,
    pub headers: IndexMap<String, String>,
    /// Parsed JSON when the body is JSON, otherwise the text
    pub body: Value,
    pub text: String,
    pub elapsed_ms: f64,
    pub url: String,
}

impl Response {
    pub fn new(
        status_code: u16,
        headers: IndexMap<String, String>,
        text: String,
        elapsed_ms: f64,
        url: impl Into<String>,
    ) -> Self {
        let body = serde_json::from_str::<serde_json::Value>(&text)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.clone()));
        Response {
            status_code,
            headers,
            body,
            text,
            elapsed_ms,
            url: url.into(),
        }
    }

    /// The tree validators and extractors query, e.g. `content.token` or
    /// `headers.content-type`.
    pub fn to_value(&self) -> Value {
        let headers: Map = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), Value::string(v)))
            .collect();

        let mut map = Map::new();
        map.insert("status_code".to_string(), Value::from(self.status_code));
        map.insert("headers".to_string(), Value::Map(headers));
        map.insert("content".to_string(), self.body.clone());
        map.insert("body".to_string(), self.body.clone());
        map.insert("text".to_string(), Value::string(&self.text));
        map.insert("elapsed_ms".to_string(), Value::Float(self.elapsed_ms));
        map.insert("url".to_string(), Value::string(&self.url));
        Value::Map(map)
    }
}

/// Something that can send a request.
pub trait HttpClient {
    fn send(&mut self, request: &Request) -> Result<Response>;
}

/// Blocking `reqwest` client with a cookie store shared across requests.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| AteError::Http(format!("Failed to create HTTP client: {}", e)))?;
        Ok(ReqwestClient { client })
    }
}

impl HttpClient for ReqwestClient {
    fn send(&mut self, request: &Request) -> Result<Response> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| AteError::params(format!("Unsupported HTTP method: {}", request.method)))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        builder = match &request.body {
            Body::None => builder,
            Body::Json(json) => builder.json(&serde_json::Value::from(json)),
            Body::Data(Value::Map(form)) => {
                let form: Vec<(String, String)> =
                    form.iter().map(|(k, v)| (k.clone(), v.to_text())).collect();
                builder.form(&form)
            }
            Body::Data(raw) => builder.body(raw.to_text()),
        };
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let started = Instant::now();
        let response = builder
            .send()
            .map_err(|e| AteError::Http(format!("{} {} failed: {}", request.method, request.url, e)))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers: IndexMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let text = response
            .text()
            .map_err(|e| AteError::Http(format!("Failed to read response body: {}", e)))?;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        Ok(Response::new(status, headers, text, elapsed_ms, final_url))
    }
}
