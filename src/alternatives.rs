//! Equivalent spellings of a request URL.
//!
//! A stub written as `http://example.com/api` should catch a request for
//! `example.com:80/api/`, and `?a=1&b=2` should catch `?b=2&a=1`. Rather than
//! normalizing both sides into one form, we enumerate every form a request
//! could have been written in and let the matcher try each of them.
//!
//! Unstructured query strings are permuted segment by segment, so the number
//! of forms grows factorially with the number of `&`-separated segments. That
//! is fine for the handful of parameters tests usually carry.

use crate::request::CanonicalRequest;
use crate::url;

const DEFAULT_SCHEME: &str = "http";
const DEFAULT_PORT: u16 = 80;

/// One equivalent form of a request. Host, method, headers and body are
/// shared with the original request; only the URL pieces below vary.
#[derive(Debug, Clone)]
pub struct AlternativeForm<'a> {
    pub request: &'a CanonicalRequest,
    pub scheme: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub query: Option<String>,
}

impl AlternativeForm<'_> {
    pub fn to_url_string(&self) -> String {
        url::format_url(
            self.scheme.as_deref(),
            self.request.host.as_deref(),
            self.port,
            self.path.as_deref(),
            self.query.as_deref(),
        )
    }
}

/// Path candidates used when the caller has no opinion: `/`, empty, absent.
///
/// Route matching always passes [`request_path_only`]; this set is the
/// generator's default for callers that want every spelling of a bare host.
pub fn default_path_candidates(_request: &CanonicalRequest) -> Vec<Option<String>> {
    vec![Some("/".to_string()), Some(String::new()), None]
}

/// The request's own path and nothing else.
pub fn request_path_only(request: &CanonicalRequest) -> Vec<Option<String>> {
    vec![Some(request.path.clone())]
}

/// Enumerate every combination of scheme, port, path and query spellings.
pub fn alternatives<'a, F>(request: &'a CanonicalRequest, path_candidates: F) -> Vec<AlternativeForm<'a>>
where
    F: Fn(&CanonicalRequest) -> Vec<Option<String>>,
{
    let schemes = scheme_candidates(request);
    let ports = port_candidates(request);
    let paths = path_candidates(request);
    let queries = query_candidates(request);

    let mut forms = Vec::with_capacity(schemes.len() * ports.len() * paths.len() * queries.len());
    for scheme in &schemes {
        for port in &ports {
            for path in &paths {
                for query in &queries {
                    forms.push(AlternativeForm {
                        request,
                        scheme: scheme.clone(),
                        port: *port,
                        path: path.clone(),
                        query: query.clone(),
                    });
                }
            }
        }
    }
    forms
}

fn scheme_candidates(request: &CanonicalRequest) -> Vec<Option<String>> {
    match request.scheme.as_deref() {
        None | Some(DEFAULT_SCHEME) => vec![None, Some(DEFAULT_SCHEME.to_string())],
        Some(other) => vec![Some(other.to_string())],
    }
}

fn port_candidates(request: &CanonicalRequest) -> Vec<Option<u16>> {
    match request.port {
        None | Some(DEFAULT_PORT) => vec![None, Some(DEFAULT_PORT)],
        Some(other) => vec![Some(other)],
    }
}

fn query_candidates(request: &CanonicalRequest) -> Vec<Option<String>> {
    if let Some(params) = &request.query_params {
        return vec![Some(url::encode_form(params))];
    }

    match request.query_string.as_deref() {
        None | Some("") => vec![Some(String::new()), None],
        Some(raw) => {
            let segments: Vec<&str> = raw.split(['&', ';']).collect();
            permutations(&segments)
                .into_iter()
                .map(|perm| Some(perm.join("&")))
                .collect()
        }
    }
}

fn permutations<'s>(items: &[&'s str]) -> Vec<Vec<&'s str>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }

    let mut result = Vec::new();
    for (i, head) in items.iter().enumerate() {
        let mut rest = items.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, *head);
            result.push(tail);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Method, RequestRecord};

    fn urls(forms: &[AlternativeForm<'_>]) -> Vec<String> {
        forms.iter().map(AlternativeForm::to_url_string).collect()
    }

    #[test]
    fn test_defaults_expand_scheme_and_port() {
        let req = CanonicalRequest::normalize("http://example.com/api");
        let forms = alternatives(&req, request_path_only);
        let urls = urls(&forms);

        // 2 schemes x 2 ports x 1 path x 2 queries
        assert_eq!(urls.len(), 8);
        assert!(urls.contains(&"example.com/api/".to_string()));
        assert!(urls.contains(&"http://example.com:80/api/".to_string()));
        assert!(urls.contains(&"http://example.com/api/?".to_string()));
    }

    #[test]
    fn test_non_default_scheme_and_port_are_kept() {
        let req = CanonicalRequest::normalize("https://example.com:8443/");
        let forms = alternatives(&req, request_path_only);
        let urls = urls(&forms);
        assert_eq!(urls.len(), 2);
        assert!(urls.iter().all(|u| u.starts_with("https://example.com:8443/")));
    }

    #[test]
    fn test_query_segments_are_permuted() {
        let req = CanonicalRequest::normalize("https://example.com:8443/?a=1&b=2;c=3");
        let forms = alternatives(&req, request_path_only);
        assert_eq!(forms.len(), 6);
        let urls = urls(&forms);
        assert!(urls.contains(&"https://example.com:8443/?c=3&b=2&a=1".to_string()));
    }

    #[test]
    fn test_structured_params_yield_single_query() {
        let req = CanonicalRequest::normalize(
            RequestRecord::new()
                .url("https://example.com:8443/")
                .query_param("b", 2)
                .query_param("a", 1),
        );
        let forms = alternatives(&req, request_path_only);
        assert_eq!(forms.len(), 1);
        assert_eq!(forms[0].query.as_deref(), Some("a=1&b=2"));
    }

    #[test]
    fn test_default_path_candidates() {
        let req = CanonicalRequest::normalize(RequestRecord::new().host("example.com").method(Method::Put));
        let forms = alternatives(&req, default_path_candidates);
        assert_eq!(forms.len(), 2 * 2 * 3 * 2);
        assert!(forms.iter().all(|f| f.request.method == Method::Put));
        assert!(urls(&forms).contains(&"example.com".to_string()));
    }

    #[test]
    fn test_permutations_count() {
        assert_eq!(permutations(&["a", "b", "c", "d"]).len(), 24);
        assert_eq!(permutations(&["a"]), vec![vec!["a"]]);
    }
}
