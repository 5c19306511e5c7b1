//! Response values produced by stub handlers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A fully resolved response, as handed back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Response {
    /// Body as UTF-8 text, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// What a handler returns. Unset fields fall back to status 200, no headers
/// and an empty body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartialResponse {
    #[serde(default)]
    pub status: Option<u16>,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub body: Option<ResponseBody>,
}

impl PartialResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn text(mut self, content: impl Into<String>) -> Self {
        self.body = Some(ResponseBody::Text {
            content: content.into(),
        });
        self
    }

    pub fn json(mut self, content: serde_json::Value) -> Self {
        self.body = Some(ResponseBody::Json { content });
        self
    }

    pub fn bytes(mut self, content: impl Into<Vec<u8>>) -> Self {
        self.body = Some(ResponseBody::Bytes(content.into()));
        self
    }

    /// Merge over the defaults and coerce the body to raw bytes.
    pub fn into_response(self) -> anyhow::Result<Response> {
        let body = match self.body {
            Some(body) => body.to_bytes()?,
            None => Vec::new(),
        };
        Ok(Response {
            status: self.status.unwrap_or(200),
            headers: self.headers,
            body,
        })
    }
}

/// Response body configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Load from file
    File { path: String },
    /// Raw bytes, only constructible from code
    #[serde(skip)]
    Bytes(Vec<u8>),
}

impl ResponseBody {
    /// Get the body content as bytes.
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        match self {
            ResponseBody::Text { content } => Ok(content.as_bytes().to_vec()),
            ResponseBody::Json { content } => Ok(serde_json::to_string(content)?.into_bytes()),
            ResponseBody::Base64 { content } => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| anyhow::anyhow!("Invalid base64: {}", e))
            }
            ResponseBody::File { path } => std::fs::read(path)
                .map_err(|e| anyhow::anyhow!("Failed to read file {}: {}", path, e)),
            ResponseBody::Bytes(bytes) => Ok(bytes.clone()),
        }
    }
}
