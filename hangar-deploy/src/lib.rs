//! Safe-Deploy Orchestrator (C6): wraps every mutation that replaces a
//! package — new deploy, update from source, forced reload — in
//! snapshot → apply → load → validate → commit-or-rollback.
//!
//! The orchestrator doesn't know how to fetch a package's new contents
//! (that's a multipart upload or a git clone, supplied by the caller as an
//! `apply` closure); it only knows how to make that mutation safe.

mod backup;
mod runner;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use hangar_core::{DeploymentMetadata, HangarError};
use hangar_registry::Registry;
use tracing::{info, warn};

const DEPLOYMENT_METADATA_FILE: &str = ".deployment.json";

pub use backup::BackupReason;
pub use runner::{has_test_files, CargoTestRunner, RunnerError, StubRunner, TestRunner, TestVerdict};

#[derive(Debug, Clone)]
pub struct DeployOutcome {
    pub package: String,
    pub validation: Option<TestVerdict>,
}

/// Owns the per-package deploy locks and coordinates the pipeline against
/// a shared `Registry`.
pub struct DeployOrchestrator {
    functions_dir: PathBuf,
    backups_dir: PathBuf,
    registry: Arc<Registry>,
    runner: Arc<dyn TestRunner>,
    retention: usize,
    validation_timeout: Duration,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeployOrchestrator {
    pub fn new(
        functions_dir: impl Into<PathBuf>,
        backups_dir: impl Into<PathBuf>,
        registry: Arc<Registry>,
        runner: Arc<dyn TestRunner>,
        retention: usize,
        validation_timeout: Duration,
    ) -> Self {
        Self {
            functions_dir: functions_dir.into(),
            backups_dir: backups_dir.into(),
            registry,
            runner,
            retention,
            validation_timeout,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the full deploy pipeline for `package`. `apply` receives the
    /// package's on-disk directory (which may not exist yet) and is
    /// responsible for making it contain the desired new contents — e.g.
    /// extracting an upload or checking out a git ref.
    pub async fn deploy<F, Fut>(
        &self,
        package: &str,
        reason: BackupReason,
        deployment: Option<DeploymentMetadata>,
        apply: F,
    ) -> Result<DeployOutcome, HangarError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), HangarError>>,
    {
        let _guard = self.acquire(package)?;
        let package_dir = self.functions_dir.join(package);

        let backup = backup::snapshot(&self.backups_dir, package, &package_dir, reason, Utc::now())
            .map_err(|e| HangarError::DeployFailed {
                package: package.to_string(),
                reason: format!("could not snapshot existing package: {e}"),
            })?;

        match self.run_pipeline(package, &package_dir, deployment, apply).await {
            Ok(validation) => {
                if let Err(e) = backup::prune(&self.backups_dir, package, self.retention) {
                    warn!(package = %package, error = %e, "failed to prune old backups");
                }
                info!(package = %package, "deploy committed");
                Ok(DeployOutcome {
                    package: package.to_string(),
                    validation,
                })
            }
            Err(err) => {
                self.rollback(package, &package_dir, backup.as_deref());
                Err(err)
            }
        }
    }

    /// Forces a reload of an already-on-disk package through the same
    /// pipeline (so a bad on-disk edit still rolls back cleanly), without
    /// mutating its contents first.
    pub async fn reload(&self, package: &str) -> Result<DeployOutcome, HangarError> {
        let package_dir = self.functions_dir.join(package);
        if !package_dir.exists() {
            return Err(HangarError::UnknownPackage {
                package: package.to_string(),
            });
        }
        self.deploy(package, BackupReason::Reload, None, |_dir| async { Ok(()) })
            .await
    }

    /// Unloads `package` from the registry and removes its on-disk
    /// directory, under the same per-package lock a deploy uses so a
    /// delete can't race a concurrent deploy of the same package.
    pub async fn delete(&self, package: &str) -> Result<(), HangarError> {
        let _guard = self.acquire(package)?;
        if self.registry.snapshot().package(package).is_none() {
            return Err(HangarError::UnknownPackage {
                package: package.to_string(),
            });
        }
        let package_dir = self.functions_dir.join(package);
        self.registry.unload(package).map_err(|errors| {
            let reason = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            HangarError::DeployFailed {
                package: package.to_string(),
                reason,
            }
        })?;
        let _ = std::fs::remove_dir_all(&package_dir);
        info!(package = %package, "package deleted");
        Ok(())
    }

    async fn run_pipeline<F, Fut>(
        &self,
        package: &str,
        package_dir: &std::path::Path,
        deployment: Option<DeploymentMetadata>,
        apply: F,
    ) -> Result<Option<TestVerdict>, HangarError>
    where
        F: FnOnce(PathBuf) -> Fut,
        Fut: Future<Output = Result<(), HangarError>>,
    {
        apply(package_dir.to_path_buf()).await?;

        if let Some(deployment) = deployment {
            write_deployment_metadata(package_dir, &deployment).map_err(|e| HangarError::DeployFailed {
                package: package.to_string(),
                reason: format!("could not write deployment metadata: {e}"),
            })?;
        }

        self.registry.load_one(package_dir).map_err(|errors| {
            let reason = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            HangarError::DeployFailed {
                package: package.to_string(),
                reason,
            }
        })?;

        if !runner::has_test_files(package_dir) {
            return Ok(None);
        }

        match self.runner.run(package_dir, self.validation_timeout).await {
            Ok(verdict) if verdict.ok() => Ok(Some(verdict)),
            Ok(verdict) => Err(HangarError::ValidationFailed {
                package: package.to_string(),
                failed: verdict.failed,
                total: verdict.total,
                output: verdict.output,
            }),
            Err(e) => Err(HangarError::ValidationFailed {
                package: package.to_string(),
                failed: 0,
                total: 0,
                output: e.to_string(),
            }),
        }
    }

    fn rollback(&self, package: &str, package_dir: &std::path::Path, backup: Option<&std::path::Path>) {
        let _ = std::fs::remove_dir_all(package_dir);
        match backup {
            Some(backup_path) => match backup::restore(backup_path, package_dir) {
                Ok(()) => {
                    if let Err(e) = self.registry.load_one(package_dir) {
                        warn!(package = %package, ?e, "failed to reload restored backup");
                    }
                    info!(package = %package, "deploy rolled back to previous backup");
                }
                Err(e) => warn!(package = %package, error = %e, "failed to restore backup during rollback"),
            },
            None => {
                let _ = self.registry.unload(package);
                info!(package = %package, "deploy failed with no prior backup, package unloaded");
            }
        }
    }

    fn acquire(&self, package: &str) -> Result<tokio::sync::OwnedMutexGuard<()>, HangarError> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap();
            locks
                .entry(package.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        mutex.try_lock_owned().map_err(|_| HangarError::DeployBusy {
            package: package.to_string(),
        })
    }
}

/// Stamps `package_dir/.deployment.json` with the origin of a successful
/// deploy. Overwrites whatever was there before.
fn write_deployment_metadata(package_dir: &std::path::Path, deployment: &DeploymentMetadata) -> std::io::Result<()> {
    let bytes = serde_json::to_vec_pretty(deployment)?;
    std::fs::write(package_dir.join(DEPLOYMENT_METADATA_FILE), bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use hangar_registry::loader::TestLoader;
    use hangar_registry::{ClosureHandler, InvocationContext};

    fn orchestrator(
        functions_dir: &std::path::Path,
        backups_dir: &std::path::Path,
        registry: Arc<Registry>,
        runner: Arc<dyn TestRunner>,
    ) -> DeployOrchestrator {
        DeployOrchestrator::new(functions_dir, backups_dir, registry, runner, 5, Duration::from_secs(30))
    }

    fn write_package(dir: &std::path::Path, name: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join("package.json"), format!(r#"{{"name":"{name}"}}"#)).unwrap();
        std::fs::write(
            dir.join("route.config.json"),
            r#"{"routes":[{"path":"/hi","methods":["GET"]}]}"#,
        )
        .unwrap();
        std::fs::write(dir.join("handler.js"), "// stub").unwrap();
    }

    fn stub_handler() -> Arc<dyn hangar_registry::Handler> {
        Arc::new(ClosureHandler(|_ctx: InvocationContext| async { "ok".into_response() }))
    }

    #[tokio::test]
    async fn successful_deploy_loads_the_package_and_commits() {
        let root = tempfile::tempdir().unwrap();
        let functions_dir = root.path().join("functions");
        let backups_dir = root.path().join(".deployment-backups");
        std::fs::create_dir_all(&functions_dir).unwrap();

        let handler_path = functions_dir.join("hello/handler.js");
        let loader = Arc::new(TestLoader::new().register(handler_path.clone(), stub_handler()));
        let registry = Arc::new(Registry::new(&functions_dir, loader));

        let orchestrator = orchestrator(
            &functions_dir,
            &backups_dir,
            registry.clone(),
            Arc::new(StubRunner(Ok(TestVerdict {
                passed: 0,
                failed: 0,
                total: 0,
                output: String::new(),
            }))),
        );

        let deployment = DeploymentMetadata {
            source: hangar_core::SourceKind::Local,
            git_url: None,
            branch: None,
            commit: None,
            pr_number: None,
            deployed_at: Utc::now(),
            deployed_by: "tester".to_string(),
        };
        let outcome = orchestrator
            .deploy("hello", BackupReason::Deploy, Some(deployment), |dir| async move {
                write_package(&dir, "hello");
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(outcome.package, "hello");
        assert!(registry.snapshot().package("hello").is_some());
        let stamped = std::fs::read_to_string(functions_dir.join("hello/.deployment.json")).unwrap();
        assert!(stamped.contains("\"deployedBy\""));
    }

    #[tokio::test]
    async fn failed_apply_leaves_the_registry_untouched() {
        let root = tempfile::tempdir().unwrap();
        let functions_dir = root.path().join("functions");
        let backups_dir = root.path().join(".deployment-backups");
        std::fs::create_dir_all(&functions_dir).unwrap();

        let loader = Arc::new(TestLoader::new());
        let registry = Arc::new(Registry::new(&functions_dir, loader));
        let orchestrator = orchestrator(
            &functions_dir,
            &backups_dir,
            registry.clone(),
            Arc::new(StubRunner(Ok(TestVerdict {
                passed: 0,
                failed: 0,
                total: 0,
                output: String::new(),
            }))),
        );

        let err = orchestrator
            .deploy("broken", BackupReason::Deploy, None, |_dir| async move {
                Err(HangarError::DeployFailed {
                    package: "broken".to_string(),
                    reason: "clone failed".to_string(),
                })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, HangarError::DeployFailed { .. }));
        assert!(registry.snapshot().package("broken").is_none());
    }

    #[tokio::test]
    async fn a_bad_reload_rolls_back_to_the_previous_backup() {
        let root = tempfile::tempdir().unwrap();
        let functions_dir = root.path().join("functions");
        let backups_dir = root.path().join(".deployment-backups");
        let pkg_dir = functions_dir.join("hello");
        write_package(&pkg_dir, "hello");

        let loader = Arc::new(TestLoader::new().register(pkg_dir.join("handler.js"), stub_handler()));
        let registry = Arc::new(Registry::new(&functions_dir, loader));
        registry.load_all().unwrap();

        let orchestrator = orchestrator(
            &functions_dir,
            &backups_dir,
            registry.clone(),
            Arc::new(StubRunner(Ok(TestVerdict {
                passed: 0,
                failed: 0,
                total: 0,
                output: String::new(),
            }))),
        );

        let err = orchestrator
            .deploy("hello", BackupReason::Reload, None, |dir| async move {
                std::fs::write(dir.join("route.config.json"), "not json").unwrap();
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, HangarError::DeployFailed { .. }));
        let restored = std::fs::read_to_string(pkg_dir.join("route.config.json")).unwrap();
        assert!(restored.contains("\"routes\""));
        assert!(registry.snapshot().package("hello").is_some());
    }

    #[tokio::test]
    async fn validation_failure_rolls_back_and_reports_failed_count() {
        let root = tempfile::tempdir().unwrap();
        let functions_dir = root.path().join("functions");
        let backups_dir = root.path().join(".deployment-backups");
        std::fs::create_dir_all(&functions_dir).unwrap();

        let handler_path = functions_dir.join("hello/handler.js");
        let loader = Arc::new(TestLoader::new().register(handler_path.clone(), stub_handler()));
        let registry = Arc::new(Registry::new(&functions_dir, loader));
        let orchestrator = orchestrator(
            &functions_dir,
            &backups_dir,
            registry.clone(),
            Arc::new(StubRunner(Ok(TestVerdict {
                passed: 1,
                failed: 1,
                total: 2,
                output: "test result: FAILED. 1 passed; 1 failed;".into(),
            }))),
        );

        let err = orchestrator
            .deploy("hello", BackupReason::Deploy, None, |dir| async move {
                write_package(&dir, "hello");
                std::fs::write(dir.join("handler.test.js"), "// test").unwrap();
                Ok(())
            })
            .await
            .unwrap_err();

        match err {
            HangarError::ValidationFailed { failed, total, .. } => {
                assert_eq!(failed, 1);
                assert_eq!(total, 2);
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
        assert!(registry.snapshot().package("hello").is_none());
    }

    #[tokio::test]
    async fn delete_unloads_and_removes_the_package_directory() {
        let root = tempfile::tempdir().unwrap();
        let functions_dir = root.path().join("functions");
        let backups_dir = root.path().join(".deployment-backups");
        let pkg_dir = functions_dir.join("hello");
        write_package(&pkg_dir, "hello");

        let loader = Arc::new(TestLoader::new().register(pkg_dir.join("handler.js"), stub_handler()));
        let registry = Arc::new(Registry::new(&functions_dir, loader));
        registry.load_all().unwrap();

        let orchestrator = orchestrator(
            &functions_dir,
            &backups_dir,
            registry.clone(),
            Arc::new(StubRunner(Ok(TestVerdict {
                passed: 0,
                failed: 0,
                total: 0,
                output: String::new(),
            }))),
        );

        orchestrator.delete("hello").await.unwrap();
        assert!(registry.snapshot().package("hello").is_none());
        assert!(!pkg_dir.exists());
    }

    #[tokio::test]
    async fn delete_of_unknown_package_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let functions_dir = root.path().join("functions");
        let backups_dir = root.path().join(".deployment-backups");
        std::fs::create_dir_all(&functions_dir).unwrap();

        let registry = Arc::new(Registry::new(&functions_dir, Arc::new(TestLoader::new())));
        let orchestrator = orchestrator(
            &functions_dir,
            &backups_dir,
            registry,
            Arc::new(StubRunner(Ok(TestVerdict {
                passed: 0,
                failed: 0,
                total: 0,
                output: String::new(),
            }))),
        );

        let err = orchestrator.delete("ghost").await.unwrap_err();
        assert!(matches!(err, HangarError::UnknownPackage { .. }));
    }

    #[tokio::test]
    async fn concurrent_deploys_of_the_same_package_observe_deploy_busy() {
        let root = tempfile::tempdir().unwrap();
        let functions_dir = root.path().join("functions");
        let backups_dir = root.path().join(".deployment-backups");
        std::fs::create_dir_all(&functions_dir).unwrap();

        let loader = Arc::new(TestLoader::new());
        let registry = Arc::new(Registry::new(&functions_dir, loader));
        let orchestrator = Arc::new(orchestrator(
            &functions_dir,
            &backups_dir,
            registry,
            Arc::new(StubRunner(Ok(TestVerdict {
                passed: 0,
                failed: 0,
                total: 0,
                output: String::new(),
            }))),
        ));

        let held = orchestrator.acquire("busy").unwrap();
        let err = orchestrator
            .deploy("busy", BackupReason::Deploy, None, |_dir| async move { Ok(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, HangarError::DeployBusy { .. }));
        drop(held);
    }
}
