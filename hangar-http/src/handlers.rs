use std::convert::Infallible;

use axum::extract::{Multipart, Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::{Stream, StreamExt};
use hangar_bus::{BusEvent, LifecycleEvent};
use hangar_core::{DeploymentMetadata, HangarError, SourceKind};
use hangar_deploy::BackupReason;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::dto::{PackageDetail, PackageSummary};
use crate::AppState;

pub async fn list_functions(State(state): State<AppState>) -> Json<Vec<PackageSummary>> {
    let snapshot = state.registry.snapshot();
    let packages = snapshot.packages().map(PackageSummary::from).collect();
    Json(packages)
}

pub async fn function_detail(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PackageDetail>, HangarError> {
    let snapshot = state.registry.snapshot();
    let package = snapshot
        .package(&name)
        .ok_or_else(|| HangarError::UnknownPackage { package: name.clone() })?;
    Ok(Json(PackageDetail::from(package)))
}

pub async fn delete_function(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, HangarError> {
    state.orchestrator.delete(&name).await?;
    state.bus.publish_lifecycle(LifecycleEvent::FunctionDeleted { package: name.clone() });
    Ok(Json(json!({ "ok": true, "package": name })))
}

/// Every non-`name` field in the multipart form is treated as a file to
/// write into the package directory, at the path given by its form field
/// name (e.g. a field named `route.config.json` becomes that file at the
/// package root; `nested/handler.js` becomes a nested file).
pub async fn deploy_local(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, HangarError> {
    let mut package_name: Option<String> = None;
    let mut files: Vec<(String, axum::body::Bytes)> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(&e))? {
        let field_name = field.name().unwrap_or_default().to_string();
        if field_name == "name" {
            package_name = Some(field.text().await.map_err(|e| multipart_error(&e))?);
            continue;
        }
        let relative_path = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or(field_name);
        let bytes = field.bytes().await.map_err(|e| multipart_error(&e))?;
        files.push((relative_path, bytes));
    }

    let package = package_name.ok_or_else(|| HangarError::PackageIncomplete {
        package: "unknown".to_string(),
        detail: "multipart form is missing the 'name' field".to_string(),
    })?;

    for (relative_path, _) in &files {
        if relative_path.contains("..") {
            return Err(HangarError::PackageMalformed {
                package: package.clone(),
                detail: format!("file path '{relative_path}' escapes the package directory"),
            });
        }
    }

    let package_for_write = package.clone();
    let deployment = DeploymentMetadata {
        source: SourceKind::Local,
        git_url: None,
        branch: None,
        commit: None,
        pr_number: None,
        deployed_at: chrono::Utc::now(),
        deployed_by: state.deployed_by.clone(),
    };
    let outcome = state
        .orchestrator
        .deploy(&package, BackupReason::Deploy, Some(deployment), move |dir| {
            let files = files.clone();
            let package = package_for_write.clone();
            async move { write_package_files(&dir, files, &package).await }
        })
        .await?;

    state.bus.publish_lifecycle(LifecycleEvent::FunctionDeployed { package: package.clone() });
    Ok(Json(deploy_outcome_json(outcome)))
}

async fn write_package_files(
    dir: &std::path::Path,
    files: Vec<(String, axum::body::Bytes)>,
    package: &str,
) -> Result<(), HangarError> {
    tokio::fs::create_dir_all(dir).await.map_err(|e| write_error(package, &e))?;
    for (relative_path, bytes) in files {
        let target = dir.join(&relative_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| write_error(package, &e))?;
        }
        tokio::fs::write(&target, &bytes).await.map_err(|e| write_error(package, &e))?;
    }
    Ok(())
}

fn write_error(package: &str, err: &std::io::Error) -> HangarError {
    HangarError::DeployFailed {
        package: package.to_string(),
        reason: format!("could not write uploaded files: {err}"),
    }
}

fn multipart_error(err: &axum::extract::multipart::MultipartError) -> HangarError {
    HangarError::PackageMalformed {
        package: "unknown".to_string(),
        detail: err.to_string(),
    }
}

#[derive(Debug, Deserialize)]
pub struct DeployGitRequest {
    pub name: String,
    pub repo: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub pr_number: Option<u64>,
}

pub async fn deploy_git(
    State(state): State<AppState>,
    Json(request): Json<DeployGitRequest>,
) -> Result<Json<Value>, HangarError> {
    let git = state.git.clone();
    let repo = request.repo.clone();
    let branch = request.branch.clone();
    let commit = request.commit.clone();
    let package = request.name.clone();

    let deployment = DeploymentMetadata {
        source: if request.pr_number.is_some() {
            SourceKind::PullRequest
        } else {
            SourceKind::Git
        },
        git_url: Some(request.repo.clone()),
        branch: request.branch.clone(),
        commit: request.commit.clone(),
        pr_number: request.pr_number,
        deployed_at: chrono::Utc::now(),
        deployed_by: state.deployed_by.clone(),
    };

    let outcome = state
        .orchestrator
        .deploy(&request.name, BackupReason::Deploy, Some(deployment), move |dir| {
            let git = git.clone();
            let repo = repo.clone();
            let branch = branch.clone();
            let commit = commit.clone();
            let package = package.clone();
            async move {
                let _ = tokio::fs::remove_dir_all(&dir).await;
                git.checkout(&repo, branch.as_deref(), commit.as_deref(), &dir)
                    .await
                    .map_err(|e| HangarError::DeployFailed {
                        package: package.clone(),
                        reason: e.to_string(),
                    })
            }
        })
        .await?;

    state.bus.publish_lifecycle(LifecycleEvent::FunctionDeployed {
        package: request.name.clone(),
    });
    Ok(Json(deploy_outcome_json(outcome)))
}

#[derive(Debug, Deserialize, Default)]
pub struct ReloadRequest {
    #[serde(default)]
    pub function_name: Option<String>,
}

pub async fn reload(
    State(state): State<AppState>,
    body: Option<Json<ReloadRequest>>,
) -> Result<Json<Value>, HangarError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let targets: Vec<String> = match &request.function_name {
        Some(name) => vec![name.clone()],
        None => state
            .registry
            .snapshot()
            .packages()
            .map(|p| p.name.clone())
            .collect(),
    };

    let mut reloaded = Vec::new();
    let mut failed = Vec::new();
    for name in targets {
        match state.orchestrator.reload(&name).await {
            Ok(_) => {
                state
                    .bus
                    .publish_lifecycle(LifecycleEvent::FunctionUpdated { package: name.clone(), generation: 0 });
                reloaded.push(name);
            }
            Err(e) => failed.push(json!({ "package": name, "error": e.to_string() })),
        }
    }

    Ok(Json(json!({ "ok": failed.is_empty(), "reloaded": reloaded, "failed": failed })))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_log_limit")]
    pub limit: usize,
}

fn default_log_limit() -> usize {
    100
}

pub async fn function_logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Response, HangarError> {
    if name.contains("..") || name.contains('/') || name.contains('\\') {
        return Err(HangarError::InvalidPath { requested: name });
    }
    let records = state.logger.tail(&name, query.limit)?;
    Ok(Json(records).into_response())
}

pub async fn status(State(state): State<AppState>) -> Json<hangar_core::HealthSnapshot> {
    let count = state.registry.snapshot().package_count();
    Json(state.health.snapshot(count))
}

pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = state.bus.subscribe().map(|item| {
        let event = item.unwrap_or_else(|never| match never {});
        let kind = match &event {
            BusEvent::Lifecycle(_) => "lifecycle",
            BusEvent::LogNew(_) => "log:new",
        };
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().event(kind).data(data))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn deploy_outcome_json(outcome: hangar_deploy::DeployOutcome) -> Value {
    json!({
        "ok": true,
        "package": outcome.package,
        "validation": outcome.validation.map(|v| json!({
            "passed": v.passed,
            "failed": v.failed,
            "total": v.total,
        })),
    })
}
