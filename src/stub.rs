//! Stubbing entry points and scope binding.
//!
//! Three bindings are supported. Thread-scoped stubs (`with_stub`) are seen
//! only by the calling thread, and nested scopes shadow outer ones.
//! Task-scoped stubs (`with_stub_async`) follow a future across `.await`
//! points. Global stubs (`with_global_stub`) are visible from every thread,
//! including workers spawned by the code under test. When global scopes from
//! several threads overlap, the most recently entered live one is active, and
//! leaving a scope never unbinds another that is still live.
//!
//! Transport adapters call [`send`], [`send_async`] or
//! [`send_with_callbacks`]. Those look up the innermost active scope (task,
//! then thread, then global) and fall through to the real transport when no
//! scope is active.

use crate::error::StubError;
use crate::request::{CanonicalRequest, RawRequest};
use crate::response::Response;
use crate::routes::RouteTable;
use crate::scope::Scope;
use crate::transport::{AsyncRealTransport, RealTransport};
use arc_swap::ArcSwapOption;
use std::cell::RefCell;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::debug;

static GLOBAL_SCOPE: ArcSwapOption<Scope> = ArcSwapOption::const_empty();

/// Live global scopes, oldest first. `GLOBAL_SCOPE` always mirrors the last.
static GLOBAL_STACK: Mutex<Vec<Arc<Scope>>> = Mutex::new(Vec::new());

thread_local! {
    static THREAD_SCOPES: RefCell<Vec<Arc<Scope>>> = const { RefCell::new(Vec::new()) };
}

tokio::task_local! {
    static TASK_SCOPE: Arc<Scope>;
}

/// Unbinds and resets a scope exactly once, however the body exits.
struct ScopeGuard {
    scope: Arc<Scope>,
    binding: Binding,
}

enum Binding {
    Thread,
    Global,
    /// Bound by `TASK_SCOPE.scope`, which unbinds on its own.
    Task,
}

impl ScopeGuard {
    fn thread(scope: Arc<Scope>) -> Self {
        THREAD_SCOPES.with(|scopes| scopes.borrow_mut().push(Arc::clone(&scope)));
        debug!(isolation = scope.is_isolated(), "Installed thread stub scope");
        Self {
            scope,
            binding: Binding::Thread,
        }
    }

    fn global(scope: Arc<Scope>) -> Self {
        let mut stack = GLOBAL_STACK.lock().unwrap_or_else(|e| e.into_inner());
        stack.push(Arc::clone(&scope));
        GLOBAL_SCOPE.store(Some(Arc::clone(&scope)));
        debug!(
            isolation = scope.is_isolated(),
            live = stack.len(),
            "Installed global stub scope"
        );
        Self {
            scope,
            binding: Binding::Global,
        }
    }

    fn task(scope: Arc<Scope>) -> Self {
        debug!(isolation = scope.is_isolated(), "Installed task stub scope");
        Self {
            scope,
            binding: Binding::Task,
        }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        match self.binding {
            Binding::Thread => {
                let _ = THREAD_SCOPES.try_with(|scopes| {
                    let mut scopes = scopes.borrow_mut();
                    if let Some(pos) = scopes.iter().rposition(|s| Arc::ptr_eq(s, &self.scope)) {
                        scopes.remove(pos);
                    }
                });
            }
            Binding::Global => {
                let mut stack = GLOBAL_STACK.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(pos) = stack.iter().rposition(|s| Arc::ptr_eq(s, &self.scope)) {
                    stack.remove(pos);
                }
                GLOBAL_SCOPE.store(stack.last().cloned());
            }
            Binding::Task => {}
        }
        self.scope.reset();
        debug!("Stub scope torn down");
    }
}

/// The scope a request issued right now would be dispatched against.
pub fn current_scope() -> Option<Arc<Scope>> {
    if let Ok(scope) = TASK_SCOPE.try_with(Arc::clone) {
        return Some(scope);
    }
    let thread_scope = THREAD_SCOPES
        .try_with(|scopes| scopes.borrow().last().cloned())
        .ok()
        .flatten();
    thread_scope.or_else(|| GLOBAL_SCOPE.load_full())
}

fn run_bound<T>(scope: Arc<Scope>, guard: ScopeGuard, body: impl FnOnce() -> T) -> Result<T, StubError> {
    let value = body();
    let outcome = scope.validate();
    drop(guard);
    outcome.map(|()| value)
}

/// Run `body` with `routes` stubbed on this thread. Unmatched requests go to
/// the real transport.
pub fn with_stub<T>(routes: RouteTable, body: impl FnOnce() -> T) -> Result<T, StubError> {
    let scope = Arc::new(Scope::new(routes, false));
    run_bound(Arc::clone(&scope), ScopeGuard::thread(scope), body)
}

/// Like [`with_stub`], but unmatched requests fail.
pub fn with_stub_in_isolation<T>(routes: RouteTable, body: impl FnOnce() -> T) -> Result<T, StubError> {
    let scope = Arc::new(Scope::new(routes, true));
    run_bound(Arc::clone(&scope), ScopeGuard::thread(scope), body)
}

/// Run `body` with `routes` stubbed process-wide.
pub fn with_global_stub<T>(routes: RouteTable, body: impl FnOnce() -> T) -> Result<T, StubError> {
    let scope = Arc::new(Scope::new(routes, false));
    run_bound(Arc::clone(&scope), ScopeGuard::global(scope), body)
}

/// Like [`with_global_stub`], but unmatched requests fail.
pub fn with_global_stub_in_isolation<T>(
    routes: RouteTable,
    body: impl FnOnce() -> T,
) -> Result<T, StubError> {
    let scope = Arc::new(Scope::new(routes, true));
    run_bound(Arc::clone(&scope), ScopeGuard::global(scope), body)
}

/// Run a prepared scope on this thread.
pub fn with_scope<T>(scope: Arc<Scope>, body: impl FnOnce() -> T) -> Result<T, StubError> {
    run_bound(Arc::clone(&scope), ScopeGuard::thread(scope), body)
}

async fn run_task<F: Future>(scope: Arc<Scope>, body: F) -> Result<F::Output, StubError> {
    let guard = ScopeGuard::task(Arc::clone(&scope));
    let value = TASK_SCOPE.scope(Arc::clone(&scope), body).await;
    let outcome = scope.validate();
    drop(guard);
    outcome.map(|()| value)
}

/// Await `body` with `routes` stubbed for the current task.
pub async fn with_stub_async<F: Future>(routes: RouteTable, body: F) -> Result<F::Output, StubError> {
    run_task(Arc::new(Scope::new(routes, false)), body).await
}

/// Like [`with_stub_async`], but unmatched requests fail.
pub async fn with_stub_async_in_isolation<F: Future>(
    routes: RouteTable,
    body: F,
) -> Result<F::Output, StubError> {
    run_task(Arc::new(Scope::new(routes, true)), body).await
}

/// Send a request through the active scope, or straight to `real`.
pub fn send(raw: impl Into<RawRequest>, real: &dyn RealTransport) -> Result<Response, StubError> {
    match current_scope() {
        Some(scope) => scope.dispatch(raw, real),
        None => real
            .send(CanonicalRequest::normalize(raw).into_issued())
            .map_err(StubError::Transport),
    }
}

/// Async counterpart of [`send`].
pub async fn send_async(
    raw: impl Into<RawRequest>,
    real: &dyn AsyncRealTransport,
) -> Result<Response, StubError> {
    match current_scope() {
        Some(scope) => scope.dispatch_async(raw, real).await,
        None => real
            .send(CanonicalRequest::normalize(raw).into_issued())
            .await
            .map_err(StubError::Transport),
    }
}

/// Two-callback counterpart of [`send`]. Must be called inside a tokio runtime.
pub fn send_with_callbacks<S, F>(
    raw: impl Into<RawRequest>,
    real: Arc<dyn AsyncRealTransport>,
    on_success: S,
    on_failure: F,
) -> Result<(), StubError>
where
    S: FnOnce(Response) + Send + 'static,
    F: FnOnce(StubError) + Send + 'static,
{
    match current_scope() {
        Some(scope) => scope.dispatch_with_callbacks(raw, real, on_success, on_failure),
        None => {
            let runtime = tokio::runtime::Handle::try_current()?;
            let request = CanonicalRequest::normalize(raw).into_issued();
            runtime.spawn(async move {
                match real.send(request).await {
                    Ok(response) => on_success(response),
                    Err(e) => on_failure(StubError::Transport(e)),
                }
            });
            Ok(())
        }
    }
}
