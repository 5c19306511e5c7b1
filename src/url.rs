//! URL parsing and stringification.
//!
//! The parser is deliberately loose: it never fails, and anything it cannot
//! make sense of degrades to an absent component. An explicit port that does
//! not parse stays glued to the host, so it can never pass for a default port.

use std::collections::BTreeMap;

/// Components of a parsed URL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedUrl {
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Always non-empty and ending in `/`.
    pub path: String,
    /// The path as written, if the URL had one.
    pub raw_path: Option<String>,
    pub query_string: Option<String>,
}

/// Split a URL string into scheme, host, port, path and query string.
pub fn parse(url: &str) -> ParsedUrl {
    let (rest, query_string) = match url.split_once('?') {
        Some((rest, query)) => (rest, Some(query.to_string())),
        None => (url, None),
    };

    let (scheme, rest) = match rest.split_once("://") {
        Some((scheme, rest)) => (non_empty(scheme), rest),
        None => (None, rest),
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], Some(&rest[idx..])),
        None => (rest, None),
    };

    let (host, port) = match authority.split_once(':') {
        Some((host, "")) => (non_empty(host), None),
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (non_empty(host), Some(port)),
            Err(_) => (non_empty(authority), None),
        },
        None => (non_empty(authority), None),
    };

    ParsedUrl {
        scheme,
        host,
        port,
        path: normalize_path(path),
        raw_path: path.map(str::to_string),
        query_string,
    }
}

/// Canonicalize a path: blank becomes `/`, otherwise a trailing `/` is appended
/// unless one is already there.
pub fn normalize_path(path: Option<&str>) -> String {
    match path {
        None => "/".to_string(),
        Some(p) if p.trim().is_empty() => "/".to_string(),
        Some(p) if p.ends_with('/') => p.to_string(),
        Some(p) => format!("{}/", p),
    }
}

/// Assemble a URL string from its components. Absent components are skipped.
pub fn format_url(
    scheme: Option<&str>,
    host: Option<&str>,
    port: Option<u16>,
    path: Option<&str>,
    query: Option<&str>,
) -> String {
    let mut url = String::new();
    if let Some(scheme) = scheme {
        url.push_str(scheme);
        url.push_str("://");
    }
    if let Some(host) = host {
        url.push_str(host);
    }
    if let Some(port) = port {
        url.push(':');
        url.push_str(&port.to_string());
    }
    if let Some(path) = path {
        url.push_str(path);
    }
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Strip any run of trailing slashes from the path part of a URL string.
pub fn normalize_for_matching(url: &str) -> String {
    match url.split_once('?') {
        Some((base, query)) => format!("{}?{}", base.trim_end_matches('/'), query),
        None => url.trim_end_matches('/').to_string(),
    }
}

/// Form-encode a parameter map. Keys come out sorted.
pub fn encode_form(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Form-decode a query string. Repeated keys have their values joined with `,`.
pub fn decode_form(query: &str) -> BTreeMap<String, String> {
    let mut params: BTreeMap<String, String> = BTreeMap::new();

    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key);
        let value = decode_component(value);

        params
            .entry(key)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&value);
            })
            .or_insert(value);
    }

    params
}

fn decode_component(s: &str) -> String {
    let s = s.replace('+', " ");
    urlencoding::decode(&s)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(s)
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}
