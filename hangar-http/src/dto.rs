//! JSON view models for the admin API. Kept separate from
//! `hangar_core::model` so the wire format can evolve (and hide internal
//! fields like `directory`) without touching the in-process data model.

use hangar_core::{CronSpec, DeploymentMetadata, FunctionPackage, RouteSpec, SourceKind};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct RouteView {
    pub path: String,
    pub methods: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler_file: Option<String>,
}

impl From<&RouteSpec> for RouteView {
    fn from(route: &RouteSpec) -> Self {
        Self {
            path: route.path.clone(),
            methods: route.methods.iter().map(|m| m.as_str().to_string()).collect(),
            handler_file: route.handler_file.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CronView {
    pub name: String,
    pub schedule: String,
    pub timezone: String,
    pub enabled: bool,
}

impl From<&CronSpec> for CronView {
    fn from(cron: &CronSpec) -> Self {
        Self {
            name: cron.name.clone(),
            schedule: cron.schedule.clone(),
            timezone: cron.timezone.clone(),
            enabled: cron.enabled,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeploymentView {
    pub source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    pub deployed_at: chrono::DateTime<chrono::Utc>,
    pub deployed_by: String,
}

impl From<&DeploymentMetadata> for DeploymentView {
    fn from(meta: &DeploymentMetadata) -> Self {
        Self {
            source: match meta.source {
                SourceKind::Git => "git",
                SourceKind::PullRequest => "pull-request",
                SourceKind::Local => "local",
            },
            git_url: meta.git_url.clone(),
            branch: meta.branch.clone(),
            commit: meta.commit.clone(),
            pr_number: meta.pr_number,
            deployed_at: meta.deployed_at,
            deployed_by: meta.deployed_by.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PackageSummary {
    pub name: String,
    pub base_path: String,
    pub route_count: usize,
    pub cron_count: usize,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentView>,
}

impl From<&FunctionPackage> for PackageSummary {
    fn from(package: &FunctionPackage) -> Self {
        Self {
            name: package.name.clone(),
            base_path: package.normalised_base().to_string(),
            route_count: package.routes.len(),
            cron_count: package.cron.len(),
            generation: package.generation,
            deployment: package.deployment.as_ref().map(DeploymentView::from),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PackageDetail {
    pub name: String,
    pub base_path: String,
    pub default_handler_file: String,
    pub routes: Vec<RouteView>,
    pub cron: Vec<CronView>,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentView>,
}

impl From<&FunctionPackage> for PackageDetail {
    fn from(package: &FunctionPackage) -> Self {
        Self {
            name: package.name.clone(),
            base_path: package.normalised_base().to_string(),
            default_handler_file: package.default_handler_file.clone(),
            routes: package.routes.iter().map(RouteView::from).collect(),
            cron: package.cron.iter().map(CronView::from).collect(),
            generation: package.generation,
            deployment: package.deployment.as_ref().map(DeploymentView::from),
        }
    }
}
