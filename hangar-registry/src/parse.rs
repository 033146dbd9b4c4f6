//! Turns a `functions/<name>/` directory into a validated `FunctionPackage`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use cron::Schedule;
use hangar_core::{CronSpec, DeploymentMetadata, FunctionPackage, HangarError, RouteMethod, RouteSpec};
use serde::Deserialize;

const PACKAGE_MANIFEST: &str = "package.json";
const ROUTE_CONFIG: &str = "route.config.json";
const CRON_CONFIG: &str = "cron.json";
const DEPLOYMENT_METADATA: &str = ".deployment.json";

#[derive(Deserialize)]
struct PackageManifest {
    name: Option<String>,
    #[serde(default)]
    main: Option<String>,
}

#[derive(Deserialize, Default)]
struct RouteConfigFile {
    #[serde(default)]
    base: Option<String>,
    #[serde(default)]
    handler: Option<String>,
    #[serde(default)]
    routes: Vec<RawRoute>,
}

#[derive(Deserialize)]
struct RawRoute {
    path: String,
    methods: Vec<String>,
    #[serde(default)]
    handler: Option<String>,
}

#[derive(Deserialize)]
struct CronConfigFile {
    #[serde(default)]
    jobs: Vec<RawCronJob>,
}

#[derive(Deserialize)]
struct RawCronJob {
    name: String,
    schedule: String,
    #[serde(default)]
    handler: Option<String>,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    description: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Reads and validates one package directory. Missing `package.json` or an
/// absent handler file is `PackageIncomplete`; anything present but
/// unparsable, or a cron schedule that doesn't parse, is `PackageMalformed`.
/// `generation` is the package-local load counter the registry assigns.
pub fn parse_package(dir: &Path, generation: u64) -> Result<FunctionPackage, HangarError> {
    let dir_name = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| HangarError::PackageIncomplete {
            package: dir.display().to_string(),
            detail: "package directory has no valid name".into(),
        })?
        .to_string();

    let manifest_path = dir.join(PACKAGE_MANIFEST);
    if !manifest_path.is_file() {
        return Err(HangarError::PackageIncomplete {
            package: dir_name.clone(),
            detail: format!("missing {PACKAGE_MANIFEST}"),
        });
    }
    let manifest: PackageManifest = read_json(&manifest_path, &dir_name)?;
    let name = manifest.name.unwrap_or_else(|| dir_name.clone());

    let route_config = read_route_config(dir, &name)?;
    let default_handler_file = route_config
        .handler
        .clone()
        .or(manifest.main)
        .unwrap_or_else(|| "handler.js".to_string());
    let base_path = route_config
        .base
        .clone()
        .unwrap_or_else(|| format!("/{dir_name}"));

    let routes = parse_routes(&route_config, &name)?;
    let cron = parse_cron(dir, &name)?;

    if routes.is_empty() && cron.is_empty() {
        return Err(HangarError::PackageIncomplete {
            package: name,
            detail: "package declares neither routes nor cron jobs".into(),
        });
    }

    for route in &routes {
        let handler_rel = route.handler_file.as_deref().unwrap_or(&default_handler_file);
        if !dir.join(handler_rel).is_file() {
            return Err(HangarError::PackageIncomplete {
                package: name,
                detail: format!(
                    "handler file '{handler_rel}' for route '{}' does not exist",
                    route.path
                ),
            });
        }
    }
    for job in &cron {
        let handler_rel = job.handler_file.as_deref().unwrap_or(&default_handler_file);
        if !dir.join(handler_rel).is_file() {
            return Err(HangarError::PackageIncomplete {
                package: name,
                detail: format!(
                    "handler file '{handler_rel}' for cron job '{}' does not exist",
                    job.name
                ),
            });
        }
    }

    let deployment = parse_deployment_metadata(dir, &name)?;

    Ok(FunctionPackage {
        name,
        base_path,
        default_handler_file,
        routes,
        cron,
        deployment,
        directory: dir.to_path_buf(),
        generation,
    })
}

/// Reads the optional `.deployment.json` stamp the safe-deploy
/// orchestrator leaves behind on every successful commit. A package that
/// has never been through the orchestrator (hand-authored on disk) simply
/// has no deployment metadata.
fn parse_deployment_metadata(
    dir: &Path,
    package: &str,
) -> Result<Option<DeploymentMetadata>, HangarError> {
    let path = dir.join(DEPLOYMENT_METADATA);
    if !path.is_file() {
        return Ok(None);
    }
    read_json(&path, package).map(Some)
}

fn read_route_config(dir: &Path, package: &str) -> Result<RouteConfigFile, HangarError> {
    let path = dir.join(ROUTE_CONFIG);
    if !path.is_file() {
        return Err(HangarError::PackageIncomplete {
            package: package.to_string(),
            detail: format!("missing {ROUTE_CONFIG}"),
        });
    }
    read_json(&path, package)
}

fn parse_routes(config: &RouteConfigFile, package: &str) -> Result<Vec<RouteSpec>, HangarError> {
    let mut routes = Vec::with_capacity(config.routes.len());
    for raw in &config.routes {
        if !raw.path.starts_with('/') {
            return Err(HangarError::PackageMalformed {
                package: package.to_string(),
                detail: format!("route path '{}' must start with '/'", raw.path),
            });
        }
        if raw.methods.is_empty() {
            return Err(HangarError::PackageMalformed {
                package: package.to_string(),
                detail: format!("route '{}' declares no methods", raw.path),
            });
        }
        let mut methods = Vec::with_capacity(raw.methods.len());
        for m in &raw.methods {
            let method = RouteMethod::parse(m).ok_or_else(|| HangarError::PackageMalformed {
                package: package.to_string(),
                detail: format!("unrecognised HTTP method '{m}' on route '{}'", raw.path),
            })?;
            methods.push(method);
        }
        routes.push(RouteSpec {
            path: raw.path.clone(),
            methods,
            handler_file: raw.handler.clone(),
        });
    }
    Ok(routes)
}

fn parse_cron(dir: &Path, package: &str) -> Result<Vec<CronSpec>, HangarError> {
    let path = dir.join(CRON_CONFIG);
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let config: CronConfigFile = read_json(&path, package)?;
    let mut jobs = Vec::with_capacity(config.jobs.len());
    for raw in config.jobs {
        validate_cron_expression(&raw.schedule).map_err(|detail| HangarError::PackageMalformed {
            package: package.to_string(),
            detail: format!("cron job '{}' has invalid schedule: {detail}", raw.name),
        })?;
        jobs.push(CronSpec {
            name: raw.name,
            schedule: raw.schedule,
            handler_file: raw.handler,
            timezone: raw.timezone.unwrap_or_else(|| "UTC".to_string()),
            enabled: raw.enabled,
            description: raw.description,
        });
    }
    Ok(jobs)
}

/// `cron` expects a 6- or 7-field expression (seconds-first); `cron.json`
/// accepts a standard 5-field expression, prepending a leading `0 ` for
/// seconds when only 5 fields are present.
fn validate_cron_expression(expr: &str) -> Result<(), String> {
    Schedule::from_str(&normalise_cron_expression(expr)).map(|_| ()).map_err(|e| e.to_string())
}

/// `cron` expects a 6- or 7-field expression (seconds-first); `cron.json`
/// accepts a standard 5-field expression too, so callers outside this
/// module (the scheduler, re-evaluating a `CronSpec.schedule` at tick
/// time) need the exact same normalisation this parser validated against.
pub fn normalise_cron_expression(expr: &str) -> String {
    let field_count = expr.split_whitespace().count();
    if field_count == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path, package: &str) -> Result<T, HangarError> {
    let bytes = std::fs::read(path).map_err(|e| HangarError::PackageMalformed {
        package: package.to_string(),
        detail: format!("could not read {}: {e}", path.display()),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| HangarError::PackageMalformed {
        package: package.to_string(),
        detail: format!("invalid JSON in {}: {e}", path.display()),
    })
}

#[allow(dead_code)]
fn handler_abs(dir: &Path, rel: &str) -> PathBuf {
    dir.join(rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, contents: &str) {
        std::fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn rejects_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("hello");
        std::fs::create_dir(&pkg).unwrap();
        let err = parse_package(&pkg, 1).unwrap_err();
        assert!(matches!(err, HangarError::PackageIncomplete { .. }));
    }

    #[test]
    fn rejects_package_with_no_routes_or_cron() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("hello");
        std::fs::create_dir(&pkg).unwrap();
        write(&pkg, "package.json", r#"{"name":"hello"}"#);
        let err = parse_package(&pkg, 1).unwrap_err();
        assert!(matches!(err, HangarError::PackageIncomplete { .. }));
    }

    #[test]
    fn parses_valid_package_with_routes() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("hello");
        std::fs::create_dir(&pkg).unwrap();
        write(&pkg, "package.json", r#"{"name":"hello","main":"handler.js"}"#);
        write(
            &pkg,
            "route.config.json",
            r#"{"routes":[{"path":"/hello","methods":["GET"]}]}"#,
        );
        write(&pkg, "handler.js", "// stub");

        let package = parse_package(&pkg, 1).unwrap();
        assert_eq!(package.name, "hello");
        assert_eq!(package.routes.len(), 1);
        assert_eq!(package.routes[0].methods, vec![RouteMethod::Get]);
    }

    #[test]
    fn rejects_route_with_missing_handler_file() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("hello");
        std::fs::create_dir(&pkg).unwrap();
        write(&pkg, "package.json", r#"{"name":"hello"}"#);
        write(
            &pkg,
            "route.config.json",
            r#"{"routes":[{"path":"/hello","methods":["GET"],"handler":"missing.js"}]}"#,
        );
        let err = parse_package(&pkg, 1).unwrap_err();
        assert!(matches!(err, HangarError::PackageIncomplete { .. }));
    }

    #[test]
    fn rejects_invalid_cron_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("hello");
        std::fs::create_dir(&pkg).unwrap();
        write(&pkg, "package.json", r#"{"name":"hello"}"#);
        write(&pkg, "route.config.json", r#"{"routes":[]}"#);
        write(&pkg, "handler.js", "// stub");
        write(
            &pkg,
            "cron.json",
            r#"{"jobs":[{"name":"nightly","schedule":"not a cron expr"}]}"#,
        );
        let err = parse_package(&pkg, 1).unwrap_err();
        assert!(matches!(err, HangarError::PackageMalformed { .. }));
    }

    #[test]
    fn accepts_valid_five_field_cron_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("hello");
        std::fs::create_dir(&pkg).unwrap();
        write(&pkg, "package.json", r#"{"name":"hello"}"#);
        write(&pkg, "route.config.json", r#"{"routes":[]}"#);
        write(&pkg, "handler.js", "// stub");
        write(
            &pkg,
            "cron.json",
            r#"{"jobs":[{"name":"nightly","schedule":"0 0 * * *"}]}"#,
        );
        let package = parse_package(&pkg, 1).unwrap();
        assert_eq!(package.cron.len(), 1);
        assert_eq!(package.cron[0].timezone, "UTC");
    }

    #[test]
    fn rejects_package_missing_route_config() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("hello");
        std::fs::create_dir(&pkg).unwrap();
        write(&pkg, "package.json", r#"{"name":"hello"}"#);
        write(&pkg, "handler.js", "// stub");
        write(
            &pkg,
            "cron.json",
            r#"{"jobs":[{"name":"nightly","schedule":"0 0 * * *"}]}"#,
        );
        let err = parse_package(&pkg, 1).unwrap_err();
        assert!(matches!(err, HangarError::PackageIncomplete { .. }));
    }
}
