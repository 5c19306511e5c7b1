//! Route tables and their flattened form.
//!
//! A [`RouteTable`] is nested: each address maps either to a single handler
//! (answering every method) or to a set of per-method handlers, optionally
//! carrying call-count expectations. Matching works on the flat list produced
//! by [`flatten`].

use crate::matcher::RouteKey;
use crate::request::{CanonicalRequest, Method};
use crate::response::PartialResponse;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Signature of a handler function.
pub type HandlerFn = dyn Fn(&CanonicalRequest) -> anyhow::Result<PartialResponse> + Send + Sync;

/// Produces the response for a matched request.
#[derive(Clone)]
pub enum Handler {
    /// A constant response.
    Static(PartialResponse),
    Func(Arc<HandlerFn>),
}

impl Handler {
    pub fn func<F>(f: F) -> Self
    where
        F: Fn(&CanonicalRequest) -> anyhow::Result<PartialResponse> + Send + Sync + 'static,
    {
        Handler::Func(Arc::new(f))
    }

    /// Tag this handler with its own expected call count.
    pub fn times(self, expected: u64) -> MethodHandler {
        MethodHandler {
            handler: self,
            times: Some(expected),
        }
    }

    pub fn respond(&self, request: &CanonicalRequest) -> anyhow::Result<PartialResponse> {
        match self {
            Handler::Static(response) => Ok(response.clone()),
            Handler::Func(f) => f(request),
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Static(response) => f.debug_tuple("Static").field(response).finish(),
            Handler::Func(_) => f.write_str("Func(..)"),
        }
    }
}

impl From<PartialResponse> for Handler {
    fn from(response: PartialResponse) -> Self {
        Handler::Static(response)
    }
}

/// A handler registered under a specific method.
#[derive(Debug, Clone)]
pub struct MethodHandler {
    pub handler: Handler,
    /// Per-handler expected count; wins over the address-level `times`.
    pub times: Option<u64>,
}

impl From<Handler> for MethodHandler {
    fn from(handler: Handler) -> Self {
        Self {
            handler,
            times: None,
        }
    }
}

impl From<PartialResponse> for MethodHandler {
    fn from(response: PartialResponse) -> Self {
        Handler::Static(response).into()
    }
}

/// Per-method handlers for one address.
#[derive(Debug, Clone, Default)]
pub struct Methods {
    handlers: Vec<(Method, MethodHandler)>,
    times: Option<u64>,
    times_per_method: HashMap<Method, u64>,
}

impl Methods {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A repeated method replaces the earlier handler in place.
    pub fn on(mut self, method: Method, handler: impl Into<MethodHandler>) -> Self {
        let handler = handler.into();
        match self.handlers.iter_mut().find(|(m, _)| *m == method) {
            Some(slot) => slot.1 = handler,
            None => self.handlers.push((method, handler)),
        }
        self
    }

    pub fn get(self, handler: impl Into<MethodHandler>) -> Self {
        self.on(Method::Get, handler)
    }

    pub fn post(self, handler: impl Into<MethodHandler>) -> Self {
        self.on(Method::Post, handler)
    }

    pub fn put(self, handler: impl Into<MethodHandler>) -> Self {
        self.on(Method::Put, handler)
    }

    pub fn patch(self, handler: impl Into<MethodHandler>) -> Self {
        self.on(Method::Patch, handler)
    }

    pub fn delete(self, handler: impl Into<MethodHandler>) -> Self {
        self.on(Method::Delete, handler)
    }

    pub fn any(self, handler: impl Into<MethodHandler>) -> Self {
        self.on(Method::Any, handler)
    }

    /// Expected count shared by every method at this address. Each method is
    /// still counted on its own.
    pub fn times(mut self, expected: u64) -> Self {
        self.times = Some(expected);
        self
    }

    /// Expected count for one method, overriding the shared count.
    pub fn times_for(mut self, method: Method, expected: u64) -> Self {
        self.times_per_method.insert(method, expected);
        self
    }

    pub fn handlers(&self) -> &[(Method, MethodHandler)] {
        &self.handlers
    }

    /// Resolution order: handler tag, then per-method count, then shared count.
    fn expected_for(&self, method: Method, handler: &MethodHandler) -> Option<u64> {
        handler
            .times
            .or_else(|| self.times_per_method.get(&method).copied())
            .or(self.times)
    }
}

/// What an address maps to.
#[derive(Debug, Clone)]
pub enum RouteSpec {
    /// Answers every method.
    Handler(Handler),
    Methods(Methods),
}

impl From<Handler> for RouteSpec {
    fn from(handler: Handler) -> Self {
        RouteSpec::Handler(handler)
    }
}

impl From<PartialResponse> for RouteSpec {
    fn from(response: PartialResponse) -> Self {
        RouteSpec::Handler(Handler::Static(response))
    }
}

impl From<Methods> for RouteSpec {
    fn from(methods: Methods) -> Self {
        RouteSpec::Methods(methods)
    }
}

/// The declarative stub specification, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<(RouteKey, RouteSpec)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, key: impl Into<RouteKey>, spec: impl Into<RouteSpec>) -> Self {
        self.routes.push((key.into(), spec.into()));
        self
    }

    pub fn routes(&self) -> &[(RouteKey, RouteSpec)] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// One (method, address, handler) triple from a flattened table.
#[derive(Debug, Clone)]
pub struct RouteEntry<'t> {
    pub method: Method,
    pub key: &'t RouteKey,
    pub handler: &'t Handler,
    pub expected_count: Option<u64>,
}

impl RouteEntry<'_> {
    /// Identity of this entry in the call ledger.
    pub fn ledger_key(&self) -> String {
        ledger_key(self.key, self.method)
    }
}

/// Ledger key for a route key declared under `method`.
pub fn ledger_key(key: &RouteKey, method: Method) -> String {
    format!("{}{}", key, method.key_name())
}

/// Result of flattening a table.
#[derive(Debug, Clone, Default)]
pub struct Flattened<'t> {
    pub entries: Vec<RouteEntry<'t>>,
    /// `(ledger key, expected count)` in declaration order.
    pub expectations: Vec<(String, u64)>,
}

/// Expand a nested table into ordered entries, collecting expected counts.
pub fn flatten(table: &RouteTable) -> Flattened<'_> {
    let mut flat = Flattened::default();

    for (key, spec) in &table.routes {
        match spec {
            RouteSpec::Handler(handler) => flat.entries.push(RouteEntry {
                method: Method::Any,
                key,
                handler,
                expected_count: None,
            }),
            RouteSpec::Methods(methods) => {
                for (method, method_handler) in &methods.handlers {
                    let entry = RouteEntry {
                        method: *method,
                        key,
                        handler: &method_handler.handler,
                        expected_count: methods.expected_for(*method, method_handler),
                    };
                    if let Some(expected) = entry.expected_count {
                        flat.expectations.push((entry.ledger_key(), expected));
                    }
                    flat.entries.push(entry);
                }
            }
        }
    }

    flat
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> Handler {
        Handler::Static(PartialResponse::default())
    }

    #[test]
    fn test_plain_handler_flattens_to_any() {
        let table = RouteTable::new().route("http://example.com/a", ok());
        let flat = flatten(&table);
        assert_eq!(flat.entries.len(), 1);
        assert_eq!(flat.entries[0].method, Method::Any);
        assert_eq!(flat.entries[0].expected_count, None);
        assert!(flat.expectations.is_empty());
    }

    #[test]
    fn test_declaration_order_is_preserved() {
        let table = RouteTable::new()
            .route("http://b", Methods::new().post(ok()).get(ok()))
            .route("http://a", ok());
        let flat = flatten(&table);
        let order: Vec<String> = flat.entries.iter().map(RouteEntry::ledger_key).collect();
        assert_eq!(order, vec!["http://bpost", "http://bget", "http://aany"]);
    }

    #[test]
    fn test_shared_times_applies_to_every_method() {
        let table = RouteTable::new().route(
            "http://example.com/api",
            Methods::new().get(ok()).post(ok()).times(3),
        );
        let flat = flatten(&table);
        assert_eq!(
            flat.expectations,
            vec![
                ("http://example.com/apiget".to_string(), 3),
                ("http://example.com/apipost".to_string(), 3),
            ]
        );
    }

    #[test]
    fn test_per_method_times_overrides_shared() {
        let table = RouteTable::new().route(
            "http://example.com/api",
            Methods::new()
                .get(ok())
                .post(ok())
                .delete(ok())
                .times(1)
                .times_for(Method::Post, 4),
        );
        let flat = flatten(&table);
        let expected: HashMap<_, _> = flat.expectations.into_iter().collect();
        assert_eq!(expected["http://example.com/apiget"], 1);
        assert_eq!(expected["http://example.com/apipost"], 4);
        assert_eq!(expected["http://example.com/apidelete"], 1);
    }

    #[test]
    fn test_tagged_handler_equals_per_method_map() {
        let tagged = RouteTable::new().route("http://x/y", Methods::new().get(ok().times(2)));
        let mapped = RouteTable::new().route(
            "http://x/y",
            Methods::new().get(ok()).times_for(Method::Get, 2),
        );
        assert_eq!(flatten(&tagged).expectations, flatten(&mapped).expectations);
    }

    #[test]
    fn test_structured_key_ledger_key() {
        let key = RouteKey::from("http://x/s").query_param("q", "a");
        let table = RouteTable::new().route(key, Methods::new().get(ok()).times(1));
        let flat = flatten(&table);
        assert_eq!(flat.expectations[0].0, "http://x/s?q=aget");
    }

    #[test]
    fn test_static_handler_responds() {
        let handler = Handler::from(PartialResponse::new().status(404));
        let req = CanonicalRequest::normalize("http://x/");
        assert_eq!(handler.respond(&req).unwrap().status, Some(404));
    }
}
