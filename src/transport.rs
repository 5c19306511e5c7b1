//! The real transport that unmatched requests fall through to.

use crate::request::CanonicalRequest;
use crate::response::Response;
use async_trait::async_trait;

/// Blocking client used on passthrough.
pub trait RealTransport: Send + Sync {
    fn send(&self, request: CanonicalRequest) -> anyhow::Result<Response>;
}

impl<F> RealTransport for F
where
    F: Fn(CanonicalRequest) -> anyhow::Result<Response> + Send + Sync,
{
    fn send(&self, request: CanonicalRequest) -> anyhow::Result<Response> {
        self(request)
    }
}

/// Asynchronous client used on passthrough.
#[async_trait]
pub trait AsyncRealTransport: Send + Sync {
    async fn send(&self, request: CanonicalRequest) -> anyhow::Result<Response>;
}

/// A transport that refuses every request. Handy when a test must never
/// reach the network but does not want isolation errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct Offline;

impl RealTransport for Offline {
    fn send(&self, request: CanonicalRequest) -> anyhow::Result<Response> {
        anyhow::bail!("network access disabled: {} {}", request.method, request.to_url_string())
    }
}

#[async_trait]
impl AsyncRealTransport for Offline {
    async fn send(&self, request: CanonicalRequest) -> anyhow::Result<Response> {
        RealTransport::send(self, request)
    }
}
