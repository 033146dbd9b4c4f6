//! The on-disk and in-memory data model shared by every component: a
//! `FunctionPackage` is the unit discovered under `functions/<name>/`, a
//! `RouteSpec` is one entry in its `route.config.json`, and a `CronSpec` is
//! one entry in its optional `cron.json`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// An HTTP method a route can be registered under.
///
/// The accepted method set is `GET, POST, PUT, DELETE, PATCH,
/// OPTIONS, HEAD` — we mirror that closed set rather than accepting
/// arbitrary strings, so an unknown method in `route.config.json` is caught
/// at parse time instead of silently never matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
}

impl RouteMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteMethod::Get => "GET",
            RouteMethod::Post => "POST",
            RouteMethod::Put => "PUT",
            RouteMethod::Delete => "DELETE",
            RouteMethod::Patch => "PATCH",
            RouteMethod::Options => "OPTIONS",
            RouteMethod::Head => "HEAD",
        }
    }

    /// Parse a method string case-insensitively.
    /// normalisation rule (we normalise to a canonical upper-case variant
    /// instead, which is equivalent for comparison purposes).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Some(RouteMethod::Get),
            "POST" => Some(RouteMethod::Post),
            "PUT" => Some(RouteMethod::Put),
            "DELETE" => Some(RouteMethod::Delete),
            "PATCH" => Some(RouteMethod::Patch),
            "OPTIONS" => Some(RouteMethod::Options),
            "HEAD" => Some(RouteMethod::Head),
            _ => None,
        }
    }
}

impl std::fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One route entry from `route.config.json`'s `routes` array.
///
/// `path` is relative to the package's `base` and may contain `:param`
/// segments. `handler_file` defaults to the package's default handler when
/// omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSpec {
    pub path: String,
    pub methods: Vec<RouteMethod>,
    #[serde(default)]
    pub handler_file: Option<String>,
}

/// One job entry from `cron.json`'s `jobs` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSpec {
    pub name: String,
    pub schedule: String,
    #[serde(default)]
    pub handler_file: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

/// The origin of a deployed package, recorded in `.deployment.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Git,
    PullRequest,
    Local,
}

/// `.deployment.json` — stamped by the safe-deploy orchestrator on every
/// successful commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentMetadata {
    pub source: SourceKind,
    #[serde(default)]
    pub git_url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub pr_number: Option<u64>,
    pub deployed_at: chrono::DateTime<chrono::Utc>,
    pub deployed_by: String,
}

/// The fully-parsed, on-disk unit under `functions/<name>/`.
///
/// A `FunctionPackage` is immutable once constructed; reloading a package
/// produces a brand new value that replaces the old one in the registry map
/// so a snapshot swap is a single pointer replacement.
#[derive(Debug, Clone)]
pub struct FunctionPackage {
    pub name: String,
    pub base_path: String,
    pub default_handler_file: String,
    pub routes: Vec<RouteSpec>,
    pub cron: Vec<CronSpec>,
    pub deployment: Option<DeploymentMetadata>,
    pub directory: PathBuf,
    /// Monotonically increasing across successful loads of this package,
    /// independent of the registry-wide generation counter.
    pub generation: u64,
}

impl FunctionPackage {
    /// Resolve a route's handler file against this package's default,
    /// returning the absolute path to the handler on disk.
    pub fn handler_path(&self, relative: &str) -> PathBuf {
        self.directory.join(relative)
    }

    pub fn default_handler_path(&self) -> PathBuf {
        self.handler_path(&self.default_handler_file)
    }

    /// The normalised base path — trimmed of a trailing `/`.
    pub fn normalised_base(&self) -> &str {
        self.base_path.trim_end_matches('/')
    }
}
