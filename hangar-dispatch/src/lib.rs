//! Turns a live `Registry` into an `axum::Router`.
//!
//! Because the route table changes at runtime, every request is matched
//! through a single fallback handler against whatever `RegistrySnapshot`
//! was current when the request arrived, rather than through axum's own
//! (compile-time) route table.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use hangar_core::{HangarError, LoggerProvider, NullLoggerProvider, RouteMethod};
use hangar_registry::{InvocationContext, Registry};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, info_span, Instrument};

const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Clone)]
pub struct DispatchState {
    registry: Arc<Registry>,
    loggers: Arc<dyn LoggerProvider>,
}

/// Builds the public-facing router: every method on every path falls
/// through to `dispatch`, which resolves the path against the live
/// registry snapshot. CORS is wide open by default since functions are
/// expected to be called from arbitrary browser origins; a function wanting
/// stricter behaviour sets its own headers from within its handler.
pub fn router(registry: Arc<Registry>) -> Router {
    router_with_logger(registry, Arc::new(NullLoggerProvider))
}

/// Same as [`router`], but binds each invocation's logger to the production
/// `hangar-logger::Logger` (or any other `LoggerProvider`) instead of
/// discarding log output.
pub fn router_with_logger(registry: Arc<Registry>, loggers: Arc<dyn LoggerProvider>) -> Router {
    Router::new()
        .fallback(any(dispatch))
        .layer(CorsLayer::permissive())
        .with_state(DispatchState { registry, loggers })
}

fn method_to_route_method(method: &Method) -> Option<RouteMethod> {
    RouteMethod::parse(method.as_str())
}

async fn dispatch(
    State(state): State<DispatchState>,
    request: Request<Body>,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let headers = request.headers().clone();
    let correlation_id = correlation_id(&headers);

    let Some(route_method) = method_to_route_method(&method) else {
        info!(target: "system", %path, method = %method, "route not found");
        return HangarError::NotFound { path }.into_response();
    };

    let snapshot = state.registry.snapshot();

    if route_method == RouteMethod::Options {
        return preflight_response(&snapshot, &path);
    }

    let (loaded, params) = match snapshot.lookup(route_method, &path) {
        Ok(found) => found,
        Err(e) => {
            if matches!(e, HangarError::NotFound { .. }) {
                info!(target: "system", %path, method = %method, "route not found");
            }
            return e.into_response();
        }
    };

    let body = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return HangarError::InternalHandlerError {
                package: loaded.package.clone(),
                correlation_id: correlation_id.clone(),
                detail: format!("could not read request body: {e}"),
            }
            .into_response()
        }
    };

    let cancel = CancellationToken::new();
    let guard = cancel.clone().drop_guard();
    let logger = state.loggers.for_function(&loaded.package);

    let ctx = InvocationContext {
        package: loaded.package.clone(),
        method: route_method.as_str().to_string(),
        path: path.clone(),
        params,
        headers,
        body,
        correlation_id: correlation_id.clone(),
        cancel,
        logger,
    };

    let handler = loaded.handler.clone();
    let package = loaded.package.clone();
    let span = info_span!("invoke", package = %package, correlation_id = %correlation_id);

    let response = std::panic::AssertUnwindSafe(handler.call(ctx))
        .catch_unwind()
        .instrument(span)
        .await;
    drop(guard);

    match response {
        Ok(resp) => with_correlation_header(resp, &correlation_id),
        Err(panic) => {
            let detail = panic_message(panic);
            error!(package = %package, correlation_id = %correlation_id, %detail, "handler panicked");
            HangarError::InternalHandlerError {
                package,
                correlation_id,
                detail,
            }
            .into_response()
        }
    }
}

/// Answers a CORS preflight directly rather than routing it to a function
/// handler: `200` with the same method list a real request to this path
/// would see in its `Allow` header, on any path the registry actually
/// knows about.
fn preflight_response(snapshot: &hangar_registry::RegistrySnapshot, path: &str) -> Response {
    let allowed = match snapshot.lookup(RouteMethod::Options, path) {
        Ok(_) => vec![RouteMethod::Options.as_str().to_string()],
        Err(HangarError::MethodNotAllowed { allowed, .. }) => allowed,
        Err(e) => return e.into_response(),
    };

    let mut response = Response::builder().status(axum::http::StatusCode::OK).body(Body::empty()).unwrap();
    let headers = response.headers_mut();
    headers.insert("Access-Control-Allow-Origin", HeaderValue::from_static("*"));
    headers.insert("Access-Control-Allow-Headers", HeaderValue::from_static("Content-Type, Authorization"));
    if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
        headers.insert("Access-Control-Allow-Methods", value.clone());
        headers.insert("Allow", value);
    }
    response
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn with_correlation_header(mut response: Response, correlation_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked with a non-string payload".to_string()
    }
}

/// Extension trait so `catch_unwind` reads naturally on a boxed future in
/// the call chain above.
trait CatchUnwindExt: std::future::Future + Sized {
    fn catch_unwind(self) -> futures_util::future::CatchUnwind<Self>
    where
        Self: std::panic::UnwindSafe;
}

impl<F: std::future::Future> CatchUnwindExt for F {
    fn catch_unwind(self) -> futures_util::future::CatchUnwind<Self>
    where
        Self: std::panic::UnwindSafe,
    {
        futures_util::FutureExt::catch_unwind(self)
    }
}
