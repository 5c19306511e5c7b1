//! Stub scopes and request dispatch.
//!
//! A [`Scope`] owns everything one stubbing invocation needs: the route
//! table, the call ledger, the expectation table and the isolation flag.
//! Dispatch walks the flattened table and takes the first entry that accepts
//! the request; entries are never reordered by specificity.

use crate::error::StubError;
use crate::ledger::{self, CallLedger, Expectations};
use crate::matcher;
use crate::request::{CanonicalRequest, RawRequest};
use crate::response::Response;
use crate::routes::{flatten, Handler, RouteEntry, RouteTable};
use crate::transport::{AsyncRealTransport, RealTransport};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which log lines a scope emits.
#[derive(Debug, Clone, Copy)]
pub struct LogSettings {
    pub log_matches: bool,
    pub log_unmatched: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
        }
    }
}

/// The lifetime of one stubbing invocation.
#[derive(Debug)]
pub struct Scope {
    routes: RouteTable,
    isolation: bool,
    ledger: CallLedger,
    expectations: Expectations,
    logging: LogSettings,
}

/// Outcome of looking a request up in the route table.
enum Decision<'t> {
    Handle(RouteEntry<'t>),
    Isolated,
    Passthrough,
}

/// A matched entry, detached from the table so it can move into a task.
struct Matched {
    route: String,
    ledger_key: String,
    handler: Handler,
}

impl Scope {
    pub fn new(routes: RouteTable, isolation: bool) -> Self {
        let expectations = Expectations::new();
        expectations.merge(flatten(&routes).expectations);

        Self {
            routes,
            isolation,
            ledger: CallLedger::new(),
            expectations,
            logging: LogSettings::default(),
        }
    }

    pub fn with_logging(mut self, logging: LogSettings) -> Self {
        self.logging = logging;
        self
    }

    pub fn is_isolated(&self) -> bool {
        self.isolation
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// Calls recorded so far under a ledger key.
    pub fn call_count(&self, key: &str) -> u64 {
        self.ledger.count(key)
    }

    /// Every ledger key with its call count.
    pub fn calls(&self) -> BTreeMap<String, u64> {
        self.ledger.snapshot()
    }

    pub fn expectations(&self) -> Vec<(String, u64)> {
        self.expectations.snapshot()
    }

    /// Check every declared `times` against the ledger.
    pub fn validate(&self) -> Result<(), StubError> {
        ledger::validate(&self.expectations, &self.ledger)
    }

    /// Clear the ledger and the expectation table.
    pub fn reset(&self) {
        self.ledger.reset();
        self.expectations.reset();
    }

    /// Handle a request synchronously. Passthrough hands the real transport
    /// the request as it was issued, not its normalized form.
    pub fn dispatch(
        &self,
        raw: impl Into<RawRequest>,
        real: &dyn RealTransport,
    ) -> Result<Response, StubError> {
        let request = CanonicalRequest::normalize(raw);
        match self.decide(&request) {
            Decision::Handle(entry) => {
                let matched = self.record(&entry, &request);
                invoke(matched, request)
            }
            Decision::Isolated => Err(no_match_error(&request)),
            Decision::Passthrough => real
                .send(request.into_issued())
                .map_err(StubError::Transport),
        }
    }

    /// Handle a request on an async client.
    pub async fn dispatch_async(
        &self,
        raw: impl Into<RawRequest>,
        real: &dyn AsyncRealTransport,
    ) -> Result<Response, StubError> {
        let request = CanonicalRequest::normalize(raw);
        let matched = match self.decide(&request) {
            Decision::Handle(entry) => self.record(&entry, &request),
            Decision::Isolated => return Err(no_match_error(&request)),
            Decision::Passthrough => {
                return real
                    .send(request.into_issued())
                    .await
                    .map_err(StubError::Transport);
            }
        };
        invoke(matched, request)
    }

    /// Handle a request for a two-callback client.
    ///
    /// Matching happens before this returns. Handlers and passthrough run on
    /// a spawned task, so the caller is never blocked on them. An isolation
    /// miss is delivered to `on_failure` and also returned.
    pub fn dispatch_with_callbacks<S, F>(
        self: &Arc<Self>,
        raw: impl Into<RawRequest>,
        real: Arc<dyn AsyncRealTransport>,
        on_success: S,
        on_failure: F,
    ) -> Result<(), StubError>
    where
        S: FnOnce(Response) + Send + 'static,
        F: FnOnce(StubError) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()?;
        let request = CanonicalRequest::normalize(raw);

        let matched = match self.decide(&request) {
            Decision::Handle(entry) => self.record(&entry, &request),
            Decision::Isolated => {
                on_failure(no_match_error(&request));
                return Err(no_match_error(&request));
            }
            Decision::Passthrough => {
                let request = request.into_issued();
                runtime.spawn(async move {
                    match real.send(request).await {
                        Ok(response) => on_success(response),
                        Err(e) => on_failure(StubError::Transport(e)),
                    }
                });
                return Ok(());
            }
        };

        runtime.spawn(async move {
            match invoke(matched, request) {
                Ok(response) => on_success(response),
                Err(e) => on_failure(e),
            }
        });
        Ok(())
    }

    fn decide(&self, request: &CanonicalRequest) -> Decision<'_> {
        let flat = flatten(&self.routes);
        let found = flat
            .entries
            .into_iter()
            .find(|entry| matcher::matches(entry.key, entry.method, request));

        match found {
            Some(entry) => Decision::Handle(entry),
            None if self.isolation => {
                if self.logging.log_unmatched {
                    warn!(
                        method = %request.method,
                        url = %request.to_url_string(),
                        "No matching stub route in isolation"
                    );
                }
                Decision::Isolated
            }
            None => {
                if self.logging.log_unmatched {
                    debug!(
                        method = %request.method,
                        url = %request.to_url_string(),
                        "No matching stub route, passing through"
                    );
                }
                Decision::Passthrough
            }
        }
    }

    fn record(&self, entry: &RouteEntry<'_>, request: &CanonicalRequest) -> Matched {
        let ledger_key = entry.ledger_key();
        let calls = self.ledger.record_call(&ledger_key);

        if self.logging.log_matches {
            info!(
                route = %entry.key,
                method = %request.method,
                url = %request.to_url_string(),
                calls,
                "Request matched stub route"
            );
        }

        Matched {
            route: entry.key.to_string(),
            ledger_key,
            handler: entry.handler.clone(),
        }
    }
}

/// Run the handler and merge its output over the response defaults.
fn invoke(matched: Matched, mut request: CanonicalRequest) -> Result<Response, StubError> {
    if request.query_params.is_none() && request.query_string.is_some() {
        request.query_params = Some(request.params());
    }

    debug!(ledger_key = %matched.ledger_key, "Invoking stub handler");

    matched
        .handler
        .respond(&request)
        .and_then(|partial| partial.into_response())
        .map_err(|source| StubError::Handler {
            route: matched.route,
            source,
        })
}

fn no_match_error(request: &CanonicalRequest) -> StubError {
    StubError::NoMatchInIsolation {
        scheme: request.scheme.clone().unwrap_or_default(),
        method: request.method.to_string(),
        host: request.host.clone().unwrap_or_default(),
        path: request.path.clone(),
        query_string: request.query_string.clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Method, RequestRecord};
    use crate::response::PartialResponse;
    use crate::routes::Methods;
    use crate::transport::Offline;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn text(body: &'static str) -> Handler {
        Handler::Static(PartialResponse::new().text(body))
    }

    fn table() -> RouteTable {
        RouteTable::new()
            .route(
                "http://example.com/api",
                Methods::new().get(text("get")).post(text("post")).times(1),
            )
            .route("http://example.com/api", text("fallback"))
    }

    #[test]
    fn test_first_match_wins() {
        let scope = Scope::new(table(), true);
        let resp = scope.dispatch("http://example.com/api", &Offline).unwrap();
        assert_eq!(resp.text(), "get");

        let put = RequestRecord::new()
            .url("http://example.com/api")
            .method(Method::Put);
        let resp = scope.dispatch(put, &Offline).unwrap();
        assert_eq!(resp.text(), "fallback");

        assert_eq!(scope.call_count("http://example.com/apiget"), 1);
        assert_eq!(scope.call_count("http://example.com/apiany"), 1);
    }

    #[test]
    fn test_isolation_error_details() {
        let scope = Scope::new(table(), true);
        let err = scope
            .dispatch("https://other.com/x?y=1", &Offline)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "No matching stub route found to handle request. Request details: \n\thttps \n\tGET \n\tother.com \n\t/x/ \n\ty=1"
        );
    }

    #[test]
    fn test_passthrough_uses_real_transport() {
        let scope = Scope::new(table(), false);
        let real = |req: CanonicalRequest| -> anyhow::Result<Response> {
            Ok(Response {
                status: 299,
                headers: Default::default(),
                body: req.to_url_string().into_bytes(),
            })
        };
        let resp = scope
            .dispatch("http://elsewhere.com/api/v1/items?id=3", &real)
            .unwrap();
        assert_eq!(resp.status, 299);
        assert_eq!(resp.text(), "http://elsewhere.com/api/v1/items?id=3");
        assert!(scope.calls().is_empty());
    }

    #[test]
    fn test_unparseable_port_is_not_a_default_port() {
        let routes = RouteTable::new().route("http://example.com/api", text("api"));
        let scope = Scope::new(routes, true);
        let err = scope
            .dispatch("http://example.com:99999/api", &Offline)
            .unwrap_err();
        assert!(err.is_no_match());
        assert!(scope.calls().is_empty());
    }

    #[test]
    fn test_passthrough_transport_error() {
        let scope = Scope::new(RouteTable::new(), false);
        let err = scope.dispatch("http://elsewhere.com/", &Offline).unwrap_err();
        assert!(matches!(err, StubError::Transport(_)));
    }

    #[test]
    fn test_handler_sees_resolved_query_params() {
        let routes = RouteTable::new().route(
            "http://example.com/search?q=rust",
            Handler::func(|req| {
                let q = req
                    .query_params
                    .as_ref()
                    .and_then(|p| p.get("q").cloned())
                    .unwrap_or_default();
                Ok(PartialResponse::new().text(q))
            }),
        );
        let scope = Scope::new(routes, true);
        let resp = scope.dispatch("http://example.com/search?q=rust", &Offline).unwrap();
        assert_eq!(resp.text(), "rust");
    }

    #[test]
    fn test_handler_error_propagates_and_is_counted() {
        let routes = RouteTable::new().route(
            "http://example.com/boom",
            Handler::func(|_| anyhow::bail!("kaboom")),
        );
        let scope = Scope::new(routes, true);
        let err = scope.dispatch("http://example.com/boom", &Offline).unwrap_err();
        assert_eq!(err.to_string(), "kaboom");
        assert!(matches!(err, StubError::Handler { ref route, .. } if route == "http://example.com/boom"));
        assert_eq!(scope.call_count("http://example.com/boomany"), 1);
    }

    #[test]
    fn test_validate_and_reset() {
        let scope = Scope::new(table(), true);
        scope.dispatch("http://example.com/api", &Offline).unwrap();
        let err = scope.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Expected route 'http://example.com/apipost' to be called 1 times but was called 0 times"
        );

        scope.reset();
        assert!(scope.calls().is_empty());
        assert!(scope.expectations().is_empty());
        assert!(scope.validate().is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_async() {
        let scope = Scope::new(table(), true);
        let post = RequestRecord::new()
            .url("http://example.com/api")
            .method(Method::Post);
        let resp = scope.dispatch_async(post, &Offline).await.unwrap();
        assert_eq!(resp.text(), "post");

        let err = scope.dispatch_async("http://nowhere/", &Offline).await.unwrap_err();
        assert!(err.is_no_match());
    }

    #[tokio::test]
    async fn test_dispatch_with_callbacks_success() {
        let scope = Arc::new(Scope::new(table(), true));
        let (tx, rx) = tokio::sync::oneshot::channel();

        scope
            .dispatch_with_callbacks(
                "http://example.com/api",
                Arc::new(Offline),
                move |resp| {
                    let _ = tx.send(resp);
                },
                |e| panic!("unexpected failure: {}", e),
            )
            .unwrap();

        let resp = rx.await.unwrap();
        assert_eq!(resp.text(), "get");
        assert_eq!(scope.call_count("http://example.com/apiget"), 1);
    }

    #[tokio::test]
    async fn test_dispatch_with_callbacks_isolation_uses_both_channels() {
        let scope = Arc::new(Scope::new(table(), true));
        let failures = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&failures);

        let result = scope.dispatch_with_callbacks(
            "http://nowhere/",
            Arc::new(Offline),
            |_| panic!("unexpected success"),
            move |e| {
                assert!(e.is_no_match());
                seen.fetch_add(1, Ordering::SeqCst);
            },
        );

        assert!(result.unwrap_err().is_no_match());
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_with_callbacks_passthrough_failure() {
        let scope = Arc::new(Scope::new(RouteTable::new(), false));
        let (tx, rx) = tokio::sync::oneshot::channel();

        scope
            .dispatch_with_callbacks(
                "http://nowhere/",
                Arc::new(Offline),
                |_| panic!("unexpected success"),
                move |e| {
                    let _ = tx.send(e);
                },
            )
            .unwrap();

        assert!(matches!(rx.await.unwrap(), StubError::Transport(_)));
    }

    #[test]
    fn test_dispatch_with_callbacks_needs_runtime() {
        let scope = Arc::new(Scope::new(table(), true));
        let err = scope
            .dispatch_with_callbacks("http://example.com/api", Arc::new(Offline), |_| {}, |_| {})
            .unwrap_err();
        assert!(matches!(err, StubError::Runtime(_)));
    }
}
