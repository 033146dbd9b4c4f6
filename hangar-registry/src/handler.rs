//! The capability interface handlers are invoked through: a loaded function
//! package exposes one async entry point that takes an invocation context
//! and returns a response.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::response::Response;
use hangar_core::FunctionLog;
use tokio_util::sync::CancellationToken;

/// Everything a handler needs to process one invocation, whether it arrived
/// over HTTP or was synthesized by the cron scheduler.
pub struct InvocationContext {
    /// The owning package's name.
    pub package: String,
    /// `GET`, `POST`, ... or the synthetic `CRON` method.
    pub method: String,
    /// The fully-qualified path the request matched, or
    /// `/__cron/<name>` for a cron tick.
    pub path: String,
    /// Named path parameters extracted from a `:param` route skeleton.
    pub params: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Correlates this invocation's log lines and error responses.
    pub correlation_id: String,
    /// Cancelled if the client disconnects mid-request
    /// "Cancellation"). Cron ticks receive a token that is never cancelled.
    pub cancel: CancellationToken,
    pub logger: Arc<dyn FunctionLog>,
}

impl InvocationContext {
    pub fn is_cron(&self) -> bool {
        self.method == "CRON"
    }
}

/// A boxed future yielding the handler's response — the async analogue of
/// the source platform's duck-typed callable.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A loaded, invocable function handler.
///
/// Implementations choose their own polymorphism mechanism internally; the
/// trait object is what the dispatcher and scheduler hold onto. The shipped
/// `DylibLoader` produces handlers backed by a `cdylib`'s exported entry
/// point (see `loader.rs`); tests typically implement this directly over a
/// closure via `ClosureHandler`.
pub trait Handler: Send + Sync {
    fn call(&self, ctx: InvocationContext) -> HandlerFuture;
}

/// A `Handler` built from a plain async closure — used by `TestLoader` and
/// by unit tests elsewhere in the workspace that don't want to compile a
/// real `cdylib` fixture.
pub struct ClosureHandler<F>(pub F);

impl<F, Fut> Handler for ClosureHandler<F>
where
    F: Fn(InvocationContext) -> Fut + Send + Sync,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: InvocationContext) -> HandlerFuture {
        Box::pin((self.0)(ctx))
    }
}
