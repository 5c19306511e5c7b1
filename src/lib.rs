//! Zentinel HTTP Stub
//!
//! In-process stubbing for outgoing HTTP requests. Test code declares a route
//! table; requests that match a route get a canned response, everything else
//! either falls through to the real transport or, in isolation mode, fails.
//!
//! # Features
//!
//! - **Forgiving URL matching**: Literal routes ignore default port/scheme,
//!   trailing slashes and query-parameter order
//! - **Regex routes**: Match whole URLs against a regular expression
//! - **Query constraints**: Structured routes require an exact parameter set
//! - **Per-method handlers**: Static responses or closures, with `ANY` as a wildcard
//! - **Call-count expectations**: `times` is checked when the scope exits
//! - **Scoped or global**: Bind stubs to a thread, a task, or the whole process
//!
//! # Example
//!
//! ```
//! use zentinel_http_stub::{send, with_stub_in_isolation, Methods, PartialResponse, RouteTable};
//! use zentinel_http_stub::transport::Offline;
//!
//! let routes = RouteTable::new().route(
//!     "http://example.com/api",
//!     Methods::new().get(PartialResponse::new().text("hello")).times(1),
//! );
//!
//! let body = with_stub_in_isolation(routes, || {
//!     send("http://example.com:80/api/", &Offline).map(|r| r.text())
//! })
//! .unwrap()
//! .unwrap();
//! assert_eq!(body, "hello");
//! ```

pub mod alternatives;
pub mod config;
pub mod error;
pub mod ledger;
pub mod matcher;
pub mod request;
pub mod response;
pub mod routes;
pub mod scope;
pub mod stub;
pub mod transport;
pub mod url;

pub use config::RouteFile;
pub use error::StubError;
pub use matcher::{RouteKey, UrlPattern};
pub use request::{CanonicalRequest, Method, RawRequest, RequestRecord};
pub use response::{PartialResponse, Response, ResponseBody};
pub use routes::{Handler, Methods, RouteTable};
pub use scope::Scope;
pub use stub::{
    send, send_async, send_with_callbacks, with_global_stub, with_global_stub_in_isolation,
    with_stub, with_stub_async, with_stub_async_in_isolation, with_stub_in_isolation,
};
