//! Error types surfaced by the stubbing engine.

use thiserror::Error;

/// Errors produced while dispatching a request or closing a stub scope.
#[derive(Debug, Error)]
pub enum StubError {
    /// No route matched and the scope runs in isolation.
    #[error(
        "No matching stub route found to handle request. Request details: \n\t{scheme} \n\t{method} \n\t{host} \n\t{path} \n\t{query_string}"
    )]
    NoMatchInIsolation {
        scheme: String,
        method: String,
        host: String,
        path: String,
        query_string: String,
    },

    /// A route with a `times` expectation saw a different number of calls.
    #[error("Expected route '{key}' to be called {expected} times but was called {actual} times")]
    CountMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// A user-supplied handler failed. Displays the handler's own error.
    #[error("{source}")]
    Handler {
        route: String,
        #[source]
        source: anyhow::Error,
    },

    /// The real transport failed on passthrough.
    #[error("real transport failed: {0}")]
    Transport(#[source] anyhow::Error),

    /// Callback dispatch needs a tokio runtime to spawn on.
    #[error("callback dispatch requires a tokio runtime: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

impl StubError {
    /// Whether this error is an isolation miss.
    pub fn is_no_match(&self) -> bool {
        matches!(self, StubError::NoMatchInIsolation { .. })
    }

    /// Whether this error is a call-count mismatch.
    pub fn is_count_mismatch(&self) -> bool {
        matches!(self, StubError::CountMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_match_message() {
        let err = StubError::NoMatchInIsolation {
            scheme: "http".to_string(),
            method: "GET".to_string(),
            host: "example.com".to_string(),
            path: "/missing/".to_string(),
            query_string: String::new(),
        };
        assert_eq!(
            err.to_string(),
            "No matching stub route found to handle request. Request details: \n\thttp \n\tGET \n\texample.com \n\t/missing/ \n\t"
        );
        assert!(err.is_no_match());
    }

    #[test]
    fn test_count_mismatch_message() {
        let err = StubError::CountMismatch {
            key: "http://example.com/apiget".to_string(),
            expected: 2,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "Expected route 'http://example.com/apiget' to be called 2 times but was called 1 times"
        );
        assert!(err.is_count_mismatch());
    }
}
