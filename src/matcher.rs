//! Route matching.
//!
//! Route keys come in three shapes: a literal URL, a regular expression, or a
//! structured key pairing one of those with an exact set of query parameters.

use crate::alternatives::{alternatives, request_path_only};
use crate::request::{CanonicalRequest, Method};
use crate::url;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;

/// A regular expression that must match a whole URL string.
#[derive(Debug, Clone)]
pub struct UrlPattern {
    source: String,
    anchored: Regex,
}

impl UrlPattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        let anchored = Regex::new(&format!("^(?:{})$", source))?;
        Ok(Self {
            source: source.to_string(),
            anchored,
        })
    }

    /// The expression as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_full_match(&self, candidate: &str) -> bool {
        self.anchored.is_match(candidate)
    }
}

impl TryFrom<Regex> for UrlPattern {
    type Error = regex::Error;

    fn try_from(regex: Regex) -> Result<Self, Self::Error> {
        Self::new(regex.as_str())
    }
}

/// The URL part of a structured key.
#[derive(Debug, Clone)]
pub enum Address {
    Literal(String),
    Pattern(UrlPattern),
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address::Literal(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address::Literal(s)
    }
}

impl From<UrlPattern> for Address {
    fn from(p: UrlPattern) -> Self {
        Address::Pattern(p)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Literal(s) => f.write_str(s),
            Address::Pattern(p) => f.write_str(p.as_str()),
        }
    }
}

/// Identifies which requests a route applies to.
///
/// The `Display` form doubles as the route's identity in the call ledger:
/// literals print as themselves, patterns as their source, and structured
/// keys as their address followed by `?` and the sorted, form-encoded
/// parameters.
#[derive(Debug, Clone)]
pub enum RouteKey {
    Literal(String),
    Pattern(UrlPattern),
    Structured {
        address: Address,
        query_params: Option<BTreeMap<String, String>>,
    },
}

impl RouteKey {
    /// Compile a regular-expression key.
    pub fn pattern(source: &str) -> Result<Self, regex::Error> {
        Ok(RouteKey::Pattern(UrlPattern::new(source)?))
    }

    /// A structured key with no query constraint yet.
    pub fn structured(address: impl Into<Address>) -> Self {
        RouteKey::Structured {
            address: address.into(),
            query_params: None,
        }
    }

    /// Add a required query parameter. Turns a plain key into a structured one.
    pub fn query_param(self, key: impl Into<String>, value: impl ToString) -> Self {
        let (address, mut params) = match self {
            RouteKey::Literal(s) => (Address::Literal(s), BTreeMap::new()),
            RouteKey::Pattern(p) => (Address::Pattern(p), BTreeMap::new()),
            RouteKey::Structured {
                address,
                query_params,
            } => (address, query_params.unwrap_or_default()),
        };
        params.insert(key.into(), value.to_string());
        RouteKey::Structured {
            address,
            query_params: Some(params),
        }
    }
}

impl From<&str> for RouteKey {
    fn from(s: &str) -> Self {
        RouteKey::Literal(s.to_string())
    }
}

impl From<String> for RouteKey {
    fn from(s: String) -> Self {
        RouteKey::Literal(s)
    }
}

impl From<UrlPattern> for RouteKey {
    fn from(p: UrlPattern) -> Self {
        RouteKey::Pattern(p)
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKey::Literal(s) => f.write_str(s),
            RouteKey::Pattern(p) => f.write_str(p.as_str()),
            RouteKey::Structured {
                address,
                query_params,
            } => {
                write!(f, "{}", address)?;
                match query_params {
                    Some(params) if !params.is_empty() => {
                        write!(f, "?{}", url::encode_form(params))
                    }
                    _ => Ok(()),
                }
            }
        }
    }
}

/// `Any` on either side matches everything.
pub fn method_matches(expected: Method, actual: Method) -> bool {
    expected == Method::Any || actual == Method::Any || expected == actual
}

/// Whether `request` satisfies the route `key` declared for `method`.
pub fn matches(key: &RouteKey, method: Method, request: &CanonicalRequest) -> bool {
    match key {
        RouteKey::Literal(literal) => address_matches(&UrlTarget::exact(literal), method, request),
        RouteKey::Pattern(pattern) => address_matches(&UrlTarget::Pattern(pattern), method, request),
        RouteKey::Structured {
            address,
            query_params,
        } => {
            let target = match address {
                Address::Literal(literal) => UrlTarget::exact(literal),
                Address::Pattern(pattern) => UrlTarget::Pattern(pattern),
            };
            match query_params {
                Some(expected) => {
                    query_params_match(expected, request)
                        && address_matches(&target, method, &request.without_query())
                }
                None => address_matches(&target, method, request),
            }
        }
    }
}

/// Exact equality of the request's parameters with `expected`.
pub fn query_params_match(expected: &BTreeMap<String, String>, request: &CanonicalRequest) -> bool {
    let actual = request.params();
    actual.len() == expected.len()
        && expected
            .iter()
            .all(|(k, v)| actual.get(k).is_some_and(|actual| actual == v))
}

enum UrlTarget<'k> {
    /// A literal, already stripped of trailing slashes.
    Exact(String),
    Pattern(&'k UrlPattern),
}

impl UrlTarget<'_> {
    fn exact(literal: &str) -> Self {
        UrlTarget::Exact(url::normalize_for_matching(literal))
    }

    fn accepts(&self, candidate: &str) -> bool {
        match self {
            UrlTarget::Exact(expected) => url::normalize_for_matching(candidate) == *expected,
            UrlTarget::Pattern(pattern) => {
                pattern.is_full_match(candidate)
                    || pattern.is_full_match(&url::normalize_for_matching(candidate))
            }
        }
    }
}

fn address_matches(target: &UrlTarget<'_>, method: Method, request: &CanonicalRequest) -> bool {
    if !method_matches(method, request.method) {
        return false;
    }

    if target.accepts(&request.to_url_string()) {
        return true;
    }

    alternatives(request, request_path_only)
        .iter()
        .any(|form| target.accepts(&form.to_url_string()))
}
