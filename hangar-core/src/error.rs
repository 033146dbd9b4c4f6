//! The error taxonomy, collapsed into one enum so every
//! component can convert its local error into something the HTTP control
//! plane (`hangar-http`) knows how to render.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

/// Helper to create a JSON error response with a standard
/// `{ "ok": false, "error": kind, "detail": ... }` envelope (
/// "User-visible behaviour").
fn error_response(status: StatusCode, kind: &str, detail: impl Into<String>) -> Response {
    let body = json!({ "ok": false, "error": kind, "detail": detail.into() });
    (status, Json(body)).into_response()
}

/// The union of every error a Hangar component can report to its caller.
///
/// Loader and orchestrator errors are returned to their direct caller and
/// never unwind past the component boundary;
/// this enum is the common currency they convert into at the HTTP boundary.
#[derive(Debug)]
pub enum HangarError {
    /// Referenced files (`route.config.json`, handler, `package.json`) are
    /// missing from the package directory.
    PackageIncomplete { package: String, detail: String },
    /// `route.config.json` or `cron.json` failed to parse.
    PackageMalformed { package: String, detail: String },
    /// A handler file failed to load (dlopen failure, missing symbol, etc).
    HandlerLoadFailed {
        package: String,
        handler: String,
        detail: String,
    },
    /// Two packages claim the same normalised `(method, path-skeleton)`.
    RouteConflict {
        method: String,
        path_skeleton: String,
        first: String,
        second: String,
    },
    /// A safe-deploy is already in flight for this package.
    DeployBusy { package: String },
    /// The safe-deploy orchestrator aborted after `apply`/`load` failed.
    DeployFailed { package: String, reason: String },
    /// Post-deploy test validation failed.
    ValidationFailed {
        package: String,
        failed: u32,
        total: u32,
        output: String,
    },
    /// An admin read API was asked to resolve a path outside `logDir`.
    InvalidPath { requested: String },
    /// No route matches the requested `(method, path)`.
    NotFound { path: String },
    /// A route matches the path but not the method.
    MethodNotAllowed { path: String, allowed: Vec<String> },
    /// A handler raised or panicked during invocation.
    InternalHandlerError {
        package: String,
        correlation_id: String,
        detail: String,
    },
    /// A package with the given name does not exist in the registry.
    UnknownPackage { package: String },
    /// The control plane rejected a request for lacking a valid bearer token.
    Unauthorized,
}

impl HangarError {
    fn kind(&self) -> &'static str {
        match self {
            HangarError::PackageIncomplete { .. } => "PackageIncomplete",
            HangarError::PackageMalformed { .. } => "PackageMalformed",
            HangarError::HandlerLoadFailed { .. } => "HandlerLoadFailed",
            HangarError::RouteConflict { .. } => "RouteConflict",
            HangarError::DeployBusy { .. } => "DeployBusy",
            HangarError::DeployFailed { .. } => "DeployFailed",
            HangarError::ValidationFailed { .. } => "ValidationFailed",
            HangarError::InvalidPath { .. } => "InvalidPath",
            HangarError::NotFound { .. } => "NotFound",
            HangarError::MethodNotAllowed { .. } => "MethodNotAllowed",
            HangarError::InternalHandlerError { .. } => "InternalHandlerError",
            HangarError::UnknownPackage { .. } => "UnknownPackage",
            HangarError::Unauthorized => "Unauthorized",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            HangarError::PackageIncomplete { .. } => StatusCode::BAD_REQUEST,
            HangarError::PackageMalformed { .. } => StatusCode::BAD_REQUEST,
            HangarError::HandlerLoadFailed { .. } => StatusCode::BAD_REQUEST,
            HangarError::RouteConflict { .. } => StatusCode::CONFLICT,
            HangarError::DeployBusy { .. } => StatusCode::CONFLICT,
            HangarError::DeployFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            HangarError::ValidationFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            HangarError::InvalidPath { .. } => StatusCode::BAD_REQUEST,
            HangarError::NotFound { .. } => StatusCode::NOT_FOUND,
            HangarError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            HangarError::InternalHandlerError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            HangarError::UnknownPackage { .. } => StatusCode::NOT_FOUND,
            HangarError::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for HangarError {
    fn into_response(self) -> Response {
        if let HangarError::MethodNotAllowed { allowed, .. } = &self {
            let status = self.status();
            let kind = self.kind();
            let detail = self.to_string();
            let mut resp = error_response(status, kind, detail);
            if let Ok(value) = allowed.join(", ").parse() {
                resp.headers_mut().insert("Allow", value);
            }
            return resp;
        }
        if let HangarError::InternalHandlerError { correlation_id, .. } = &self {
            let body = json!({ "error": "internal", "correlationId": correlation_id });
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
        }
        let status = self.status();
        let kind = self.kind();
        let detail = self.to_string();
        error_response(status, kind, detail)
    }
}

impl std::fmt::Display for HangarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HangarError::PackageIncomplete { package, detail } => {
                write!(f, "package '{package}' is incomplete: {detail}")
            }
            HangarError::PackageMalformed { package, detail } => {
                write!(f, "package '{package}' is malformed: {detail}")
            }
            HangarError::HandlerLoadFailed {
                package,
                handler,
                detail,
            } => write!(
                f,
                "handler '{handler}' for package '{package}' failed to load: {detail}"
            ),
            HangarError::RouteConflict {
                method,
                path_skeleton,
                first,
                second,
            } => write!(
                f,
                "route conflict on {method} {path_skeleton} between '{first}' and '{second}'"
            ),
            HangarError::DeployBusy { package } => {
                write!(f, "a deploy is already in flight for package '{package}'")
            }
            HangarError::DeployFailed { package, reason } => {
                write!(f, "deploy of package '{package}' failed: {reason}")
            }
            HangarError::ValidationFailed {
                package,
                failed,
                total,
                ..
            } => write!(
                f,
                "validation of package '{package}' failed: {failed}/{total} tests failed"
            ),
            HangarError::InvalidPath { requested } => {
                write!(f, "path '{requested}' resolves outside the log directory")
            }
            HangarError::NotFound { path } => write!(f, "no route matches '{path}'"),
            HangarError::MethodNotAllowed { path, allowed } => write!(
                f,
                "method not allowed for '{path}' (allowed: {})",
                allowed.join(", ")
            ),
            HangarError::InternalHandlerError {
                package,
                correlation_id,
                detail,
            } => write!(
                f,
                "handler for package '{package}' raised [{correlation_id}]: {detail}"
            ),
            HangarError::UnknownPackage { package } => {
                write!(f, "no package named '{package}' is loaded")
            }
            HangarError::Unauthorized => write!(f, "missing or invalid bearer token"),
        }
    }
}

impl std::error::Error for HangarError {}

impl From<std::io::Error> for HangarError {
    fn from(err: std::io::Error) -> Self {
        HangarError::DeployFailed {
            package: "system".to_string(),
            reason: err.to_string(),
        }
    }
}
