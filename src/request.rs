//! Request normalization.
//!
//! Whatever shape an outgoing request arrives in (a bare URL, a record with
//! or without a method, an entity-wrapped body) it is folded into a single
//! [`CanonicalRequest`] before matching.

use crate::url::{self, ParsedUrl};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::{Cursor, Read};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

/// HTTP method. `Any` is a wildcard on both the route and the request side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
    Connect,
    Any,
}

impl Method {
    /// Lowercase name, used when building ledger keys.
    pub fn key_name(&self) -> &'static str {
        match self {
            Method::Get => "get",
            Method::Head => "head",
            Method::Post => "post",
            Method::Put => "put",
            Method::Patch => "patch",
            Method::Delete => "delete",
            Method::Options => "options",
            Method::Trace => "trace",
            Method::Connect => "connect",
            Method::Any => "any",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key_name().to_uppercase())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "get" => Ok(Method::Get),
            "head" => Ok(Method::Head),
            "post" => Ok(Method::Post),
            "put" => Ok(Method::Put),
            "patch" => Ok(Method::Patch),
            "delete" => Ok(Method::Delete),
            "options" => Ok(Method::Options),
            "trace" => Ok(Method::Trace),
            "connect" => Ok(Method::Connect),
            "any" => Ok(Method::Any),
            other => Err(format!("unknown HTTP method: {}", other)),
        }
    }
}

impl TryFrom<String> for Method {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A readable stream shared between clones of a request.
pub type SharedReader = Arc<Mutex<Box<dyn Read + Send>>>;

/// Request body after normalization.
#[derive(Clone)]
pub enum Body {
    Bytes(Vec<u8>),
    Stream(SharedReader),
}

impl Body {
    /// Drain the body into memory. A stream can only be drained once.
    pub fn read_to_end(&self) -> std::io::Result<Vec<u8>> {
        match self {
            Body::Bytes(bytes) => Ok(bytes.clone()),
            Body::Stream(reader) => {
                let mut guard = reader.lock().unwrap_or_else(|e| e.into_inner());
                let mut buf = Vec::new();
                guard.read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// An entity wrapper: content plus the content type it was declared with.
#[derive(Debug, Clone, Default)]
pub struct Entity {
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

impl Entity {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// The underlying readable stream.
    pub fn into_reader(self) -> Box<dyn Read + Send> {
        Box::new(Cursor::new(self.content))
    }
}

/// Body as handed in by the caller.
pub enum RawBody {
    Bytes(Vec<u8>),
    Text(String),
    Entity(Entity),
    Reader(Box<dyn Read + Send>),
}

impl fmt::Debug for RawBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawBody::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            RawBody::Text(t) => f.debug_tuple("Text").field(t).finish(),
            RawBody::Entity(e) => f.debug_tuple("Entity").field(e).finish(),
            RawBody::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// A request described field by field. Any field may be left out.
#[derive(Debug, Default)]
pub struct RequestRecord {
    pub method: Option<Method>,
    /// Parsed for any component not given explicitly below.
    pub url: Option<String>,
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub query_string: Option<String>,
    pub query_params: Option<BTreeMap<String, String>>,
    pub headers: HashMap<String, String>,
    pub body: Option<RawBody>,
}

impl RequestRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn query_string(mut self, query: impl Into<String>) -> Self {
        self.query_string = Some(query.into());
        self
    }

    pub fn query_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query_params
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.to_string());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: RawBody) -> Self {
        self.body = Some(body);
        self
    }
}

/// Any request representation the engine accepts.
#[derive(Debug)]
pub enum RawRequest {
    Url(String),
    Record(RequestRecord),
    /// Already normalized; passed through untouched.
    Canonical(CanonicalRequest),
}

impl From<&str> for RawRequest {
    fn from(url: &str) -> Self {
        RawRequest::Url(url.to_string())
    }
}

impl From<String> for RawRequest {
    fn from(url: String) -> Self {
        RawRequest::Url(url)
    }
}

impl From<RequestRecord> for RawRequest {
    fn from(record: RequestRecord) -> Self {
        RawRequest::Record(record)
    }
}

impl From<CanonicalRequest> for RawRequest {
    fn from(request: CanonicalRequest) -> Self {
        RawRequest::Canonical(request)
    }
}

/// The engine's normalized view of an outgoing request.
#[derive(Debug, Clone)]
pub struct CanonicalRequest {
    pub method: Method,
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Never blank; see [`url::normalize_path`].
    pub path: String,
    /// The path exactly as the caller wrote it.
    pub raw_path: Option<String>,
    pub query_string: Option<String>,
    pub query_params: Option<BTreeMap<String, String>>,
    pub headers: HashMap<String, String>,
    pub body: Option<Body>,
}

impl CanonicalRequest {
    /// Normalize any accepted request representation.
    pub fn normalize(raw: impl Into<RawRequest>) -> Self {
        match raw.into() {
            RawRequest::Url(url) => Self::from_parsed(url::parse(&url), Method::Get),
            RawRequest::Record(record) => Self::from_record(record),
            RawRequest::Canonical(request) => request,
        }
    }

    fn from_parsed(parsed: ParsedUrl, method: Method) -> Self {
        Self {
            method,
            scheme: parsed.scheme,
            host: parsed.host,
            port: parsed.port,
            path: parsed.path,
            raw_path: parsed.raw_path,
            query_string: parsed.query_string,
            query_params: None,
            headers: HashMap::new(),
            body: None,
        }
    }

    fn from_record(record: RequestRecord) -> Self {
        let parsed = record.url.as_deref().map(url::parse).unwrap_or_default();
        let raw_path = record.path.clone().or_else(|| parsed.raw_path.clone());

        let path = match record.path {
            Some(path) => url::normalize_path(Some(path.as_str())),
            None => url::normalize_path(Some(parsed.path.as_str())),
        };

        let body = record.body.map(|body| match body {
            RawBody::Bytes(bytes) => Body::Bytes(bytes),
            RawBody::Text(text) => Body::Bytes(text.into_bytes()),
            RawBody::Entity(entity) => Body::Stream(Arc::new(Mutex::new(entity.into_reader()))),
            RawBody::Reader(reader) => Body::Stream(Arc::new(Mutex::new(reader))),
        });

        Self {
            method: record.method.unwrap_or(Method::Get),
            scheme: record.scheme.or(parsed.scheme),
            host: record.host.or(parsed.host),
            port: record.port.or(parsed.port),
            path,
            raw_path,
            query_string: record.query_string.or(parsed.query_string),
            query_params: record.query_params,
            headers: record.headers,
            body,
        }
    }

    /// The query string as it appears on the wire: the raw string if there is
    /// one, otherwise the form-encoded parameter map.
    pub fn effective_query(&self) -> Option<String> {
        match (&self.query_string, &self.query_params) {
            (Some(raw), _) => Some(raw.clone()),
            (None, Some(params)) => Some(url::encode_form(params)),
            (None, None) => None,
        }
    }

    /// Query parameters, preferring the structured map over the raw string.
    pub fn params(&self) -> BTreeMap<String, String> {
        match (&self.query_params, &self.query_string) {
            (Some(params), _) => params.clone(),
            (None, Some(raw)) => url::decode_form(raw),
            (None, None) => BTreeMap::new(),
        }
    }

    /// Render the request as a URL string.
    pub fn to_url_string(&self) -> String {
        let query = self.effective_query();
        url::format_url(
            self.scheme.as_deref(),
            self.host.as_deref(),
            self.port,
            Some(self.path.as_str()),
            query.as_deref(),
        )
    }

    /// The request as the caller issued it, for the real transport. Only the
    /// path is rewritten by normalization, so restoring it is enough.
    pub fn into_issued(self) -> Self {
        let path = self.raw_path.clone().unwrap_or_default();
        Self { path, ..self }
    }

    /// Same request with every form of query removed.
    pub fn without_query(&self) -> Self {
        Self {
            query_string: None,
            query_params: None,
            ..self.clone()
        }
    }

    /// Body bytes, draining a stream body if needed.
    pub fn body_bytes(&self) -> std::io::Result<Vec<u8>> {
        match &self.body {
            Some(body) => body.read_to_end(),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_bare_url() {
        let req = CanonicalRequest::normalize("http://example.com:8080/api?x=1");
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.scheme.as_deref(), Some("http"));
        assert_eq!(req.host.as_deref(), Some("example.com"));
        assert_eq!(req.port, Some(8080));
        assert_eq!(req.path, "/api/");
        assert_eq!(req.query_string.as_deref(), Some("x=1"));
        assert!(req.body.is_none());
    }

    #[test]
    fn test_record_without_method_defaults_to_get() {
        let req = CanonicalRequest::normalize(RequestRecord::new().host("example.com"));
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/");
    }

    #[test]
    fn test_explicit_fields_win_over_url() {
        let req = CanonicalRequest::normalize(
            RequestRecord::new()
                .url("http://example.com/a")
                .method(Method::Post)
                .path("/b"),
        );
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.host.as_deref(), Some("example.com"));
        assert_eq!(req.path, "/b/");
    }

    #[test]
    fn test_entity_body_is_unwrapped_to_stream() {
        let req = CanonicalRequest::normalize(
            RequestRecord::new()
                .url("http://example.com/upload")
                .method(Method::Post)
                .body(RawBody::Entity(Entity::new("payload").with_content_type("text/plain"))),
        );
        assert!(matches!(req.body, Some(Body::Stream(_))));
        assert_eq!(req.body_bytes().unwrap(), b"payload");
    }

    #[test]
    fn test_effective_query_prefers_raw_string() {
        let req = CanonicalRequest::normalize(
            RequestRecord::new()
                .url("http://example.com/?b=2")
                .query_param("a", 1),
        );
        assert_eq!(req.effective_query().as_deref(), Some("b=2"));
        assert_eq!(req.params().get("a").map(String::as_str), Some("1"));

        let req = CanonicalRequest::normalize(
            RequestRecord::new().url("http://example.com/").query_param("a", 1),
        );
        assert_eq!(req.to_url_string(), "http://example.com/?a=1");
    }

    #[test]
    fn test_into_issued_restores_caller_path() {
        let req = CanonicalRequest::normalize("http://elsewhere.com/api/v1/items?id=3");
        assert_eq!(req.to_url_string(), "http://elsewhere.com/api/v1/items/?id=3");
        assert_eq!(
            req.into_issued().to_url_string(),
            "http://elsewhere.com/api/v1/items?id=3"
        );

        let req = CanonicalRequest::normalize("http://elsewhere.com");
        assert_eq!(req.into_issued().to_url_string(), "http://elsewhere.com");

        let req = CanonicalRequest::normalize(
            RequestRecord::new()
                .url("http://elsewhere.com/ignored")
                .path("/items"),
        );
        assert_eq!(req.into_issued().to_url_string(), "http://elsewhere.com/items");
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("GET".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("any".parse::<Method>().unwrap(), Method::Any);
        assert!("fetch".parse::<Method>().is_err());
        assert_eq!(Method::Delete.to_string(), "DELETE");
        assert_eq!(Method::Delete.key_name(), "delete");
    }
}
