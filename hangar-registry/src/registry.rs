//! The in-memory registry: an atomically-swappable snapshot of every loaded
//! package's routes and cron jobs, plus the `load`/`unload`/`list` surface
//! the filesystem watcher, deploy orchestrator, and HTTP control plane all
//! call into.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hangar_bus::{Bus, LifecycleEvent};
use hangar_core::{FunctionPackage, HangarError, RouteMethod};
use tokio::sync::watch;

use crate::handler::Handler;
use crate::loader::Loader;
use crate::parse::parse_package;
use crate::routes::{resolve_and_check, ResolvedRoute};

/// One handler bound into a generation's dispatch table.
#[derive(Clone)]
pub struct LoadedHandler {
    pub package: String,
    pub handler_file: String,
    pub handler: Arc<dyn Handler>,
}

/// One segment of a route pattern, as split on `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

fn split_pattern(path: &str) -> Vec<Segment> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| {
            if let Some(name) = s.strip_prefix(':') {
                Segment::Param(name.to_string())
            } else {
                Segment::Literal(s.to_string())
            }
        })
        .collect()
}

struct RouteEntry {
    method: RouteMethod,
    pattern: Vec<Segment>,
    full_path: String,
    handler: LoadedHandler,
}

/// An immutable view of the registry as of one generation. Handed to the
/// dispatcher and scheduler; a request or tick that borrowed one snapshot
/// completes entirely against it even if a redeploy publishes a new
/// generation mid-flight.
pub struct RegistrySnapshot {
    pub generation: u64,
    routes: Vec<RouteEntry>,
    cron_handlers: HashMap<(String, String), LoadedHandler>,
    packages: HashMap<String, FunctionPackage>,
}

impl RegistrySnapshot {
    /// Matches an incoming `(method, path)` against every registered route
    /// pattern, extracting `:param` values. Route-uniqueness is enforced at
    /// publish time (`resolve_and_check`), so at most one pattern can match
    /// a given method; if some pattern matches the path under a different
    /// method, that's a 405 instead of a 404.
    pub fn lookup(
        &self,
        method: RouteMethod,
        path: &str,
    ) -> Result<(&LoadedHandler, HashMap<String, String>), HangarError> {
        let requested: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut allowed_other_methods = Vec::new();

        for entry in &self.routes {
            let Some(params) = match_segments(&entry.pattern, &requested) else {
                continue;
            };
            if entry.method == method {
                return Ok((&entry.handler, params));
            }
            allowed_other_methods.push(entry.method);
        }

        if allowed_other_methods.is_empty() {
            Err(HangarError::NotFound {
                path: path.to_string(),
            })
        } else {
            Err(HangarError::MethodNotAllowed {
                path: path.to_string(),
                allowed: allowed_other_methods
                    .iter()
                    .map(|m| m.as_str().to_string())
                    .collect(),
            })
        }
    }

    pub fn packages(&self) -> impl Iterator<Item = &FunctionPackage> {
        self.packages.values()
    }

    pub fn package(&self, name: &str) -> Option<&FunctionPackage> {
        self.packages.get(name)
    }

    pub fn package_count(&self) -> usize {
        self.packages.len()
    }

    /// Returns the bound handler for one package's cron job, keyed
    /// `(package, job name)`. Used by the scheduler to invoke a tick
    /// without re-resolving the handler file itself.
    pub fn cron_handler(&self, package: &str, job_name: &str) -> Option<&LoadedHandler> {
        self.cron_handlers
            .get(&(package.to_string(), job_name.to_string()))
    }

    /// Every enabled cron entry across every loaded package, paired with
    /// its bound handler — exactly the set the scheduler must keep active
    /// (I4: cron-registry consistency).
    pub fn cron_entries(&self) -> impl Iterator<Item = (&FunctionPackage, &hangar_core::CronSpec, &LoadedHandler)> {
        self.packages.values().flat_map(move |pkg| {
            pkg.cron
                .iter()
                .filter(|job| job.enabled)
                .filter_map(move |job| {
                    self.cron_handler(&pkg.name, &job.name)
                        .map(|handler| (pkg, job, handler))
                })
        })
    }
}

fn match_segments(pattern: &[Segment], requested: &[&str]) -> Option<HashMap<String, String>> {
    if pattern.len() != requested.len() {
        return None;
    }
    let mut params = HashMap::new();
    for (segment, value) in pattern.iter().zip(requested.iter()) {
        match segment {
            Segment::Literal(literal) => {
                if literal != value {
                    return None;
                }
            }
            Segment::Param(name) => {
                params.insert(name.clone(), value.to_string());
            }
        }
    }
    Some(params)
}

/// Owns the loader and the current snapshot pointer; every mutation builds
/// a brand new snapshot from scratch and swaps it in, so concurrent readers
/// never observe a partially-updated table.
///
/// The snapshot is held in a `tokio::sync::watch` channel rather than a
/// plain `RwLock` so the Cron Scheduler (C4) can *subscribe* to new
/// generations — "subscribes to registry change events" — instead of
/// polling; the Dispatcher (C3) still just calls `snapshot()` once per
/// request, which reads the watch channel's current value.
pub struct Registry {
    functions_dir: PathBuf,
    loader: Arc<dyn Loader>,
    generation: AtomicU64,
    current: watch::Sender<Arc<RegistrySnapshot>>,
    package_generations: std::sync::RwLock<HashMap<String, u64>>,
    bus: std::sync::RwLock<Option<Arc<Bus>>>,
}

impl Registry {
    pub fn new(functions_dir: impl Into<PathBuf>, loader: Arc<dyn Loader>) -> Self {
        let empty = Arc::new(RegistrySnapshot {
            generation: 0,
            routes: Vec::new(),
            cron_handlers: HashMap::new(),
            packages: HashMap::new(),
        });
        let (current, _) = watch::channel(empty);
        Self {
            functions_dir: functions_dir.into(),
            loader,
            generation: AtomicU64::new(0),
            current,
            package_generations: std::sync::RwLock::new(HashMap::new()),
            bus: std::sync::RwLock::new(None),
        }
    }

    /// Attaches the event bus so `load_all`/`load_one`/`unload` publish
    /// `FunctionLoaded`/`FunctionUnloaded` as they succeed. Separate from
    /// `new` because most callers (tests, the scheduler's own fixtures)
    /// have no subscriber and don't need one.
    pub fn set_bus(&self, bus: Arc<Bus>) {
        *self.bus.write().unwrap() = Some(bus);
    }

    fn publish_loaded(&self, package: &str, generation: u64) {
        if let Some(bus) = self.bus.read().unwrap().as_ref() {
            bus.publish_lifecycle(LifecycleEvent::FunctionLoaded {
                package: package.to_string(),
                generation,
            });
        }
    }

    fn publish_unloaded(&self, package: &str) {
        if let Some(bus) = self.bus.read().unwrap().as_ref() {
            bus.publish_lifecycle(LifecycleEvent::FunctionUnloaded {
                package: package.to_string(),
            });
        }
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.borrow().clone()
    }

    /// Subscribes to every future published snapshot, starting from the
    /// current one. The scheduler reconciles its active tasks against each
    /// value this receiver yields.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RegistrySnapshot>> {
        self.current.subscribe()
    }

    /// Scans every entry directly under `functions/` and (re)loads each as
    /// a package, building one fresh snapshot. Used at startup and by a
    /// full rescan; per-package loads from the watcher use `load_one`.
    pub fn load_all(&self) -> Result<(), Vec<HangarError>> {
        let entries = std::fs::read_dir(&self.functions_dir).map_err(|e| {
            vec![HangarError::PackageIncomplete {
                package: "*".to_string(),
                detail: format!("could not read functions directory: {e}"),
            }]
        })?;

        let mut packages = Vec::new();
        let mut errors = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            match self.parse_and_load_package(&entry.path()) {
                Ok(package) => packages.push(package),
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let loaded: Vec<(String, u64)> = packages
            .iter()
            .map(|p| (p.name.clone(), p.generation))
            .collect();
        self.publish(packages)?;
        for (name, generation) in loaded {
            self.publish_loaded(&name, generation);
        }
        Ok(())
    }

    /// Loads (or reloads) exactly one package directory and republishes a
    /// new snapshot that otherwise keeps every other currently-loaded
    /// package untouched.
    pub fn load_one(&self, dir: &Path) -> Result<(), Vec<HangarError>> {
        let package = self
            .parse_and_load_package(dir)
            .map_err(|e| vec![e])?;
        let (name, generation) = (package.name.clone(), package.generation);

        let mut packages: Vec<FunctionPackage> = self
            .snapshot()
            .packages()
            .filter(|p| p.name != package.name)
            .cloned()
            .collect();
        packages.push(package);
        self.publish(packages)?;
        self.publish_loaded(&name, generation);
        Ok(())
    }

    /// Removes a package from the registry entirely and republishes.
    pub fn unload(&self, name: &str) -> Result<(), Vec<HangarError>> {
        let packages: Vec<FunctionPackage> = self
            .snapshot()
            .packages()
            .filter(|p| p.name != name)
            .cloned()
            .collect();
        self.publish(packages)?;
        self.publish_unloaded(name);
        Ok(())
    }

    fn parse_and_load_package(&self, dir: &Path) -> Result<FunctionPackage, HangarError> {
        let dir_name = dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let next_generation = {
            let mut generations = self.package_generations.write().unwrap();
            let entry = generations.entry(dir_name.clone()).or_insert(0);
            *entry += 1;
            *entry
        };

        let mut package = parse_package(dir, next_generation)?;

        // Bind every route and cron handler eagerly so a load failure is
        // surfaced at load time, never at first invocation.
        for route in &package.routes {
            let handler_file = route
                .handler_file
                .clone()
                .unwrap_or_else(|| package.default_handler_file.clone());
            self.loader
                .load(&package.directory.join(&handler_file))
                .map_err(|e| HangarError::HandlerLoadFailed {
                    package: package.name.clone(),
                    handler: handler_file.clone(),
                    detail: e.to_string(),
                })?;
        }
        for job in &package.cron {
            let handler_file = job
                .handler_file
                .clone()
                .unwrap_or_else(|| package.default_handler_file.clone());
            self.loader
                .load(&package.directory.join(&handler_file))
                .map_err(|e| HangarError::HandlerLoadFailed {
                    package: package.name.clone(),
                    handler: handler_file.clone(),
                    detail: e.to_string(),
                })?;
        }
        package.generation = next_generation;
        Ok(package)
    }

    fn publish(&self, packages: Vec<FunctionPackage>) -> Result<(), Vec<HangarError>> {
        let resolved = resolve_and_check(&packages)?;

        let mut routes = Vec::with_capacity(resolved.len());
        for ResolvedRoute {
            method,
            full_path,
            package,
            handler_file,
        } in resolved
        {
            let pkg = packages.iter().find(|p| p.name == package).unwrap();
            let handler = self
                .loader
                .load(&pkg.directory.join(&handler_file))
                .map_err(|e| {
                    vec![HangarError::HandlerLoadFailed {
                        package: package.clone(),
                        handler: handler_file.clone(),
                        detail: e.to_string(),
                    }]
                })?;
            routes.push(RouteEntry {
                method,
                pattern: split_pattern(&full_path),
                full_path,
                handler: LoadedHandler {
                    package,
                    handler_file,
                    handler,
                },
            });
        }

        let mut cron_handlers = HashMap::new();
        for package in &packages {
            for job in &package.cron {
                let handler_file = job
                    .handler_file
                    .clone()
                    .unwrap_or_else(|| package.default_handler_file.clone());
                let handler = self
                    .loader
                    .load(&package.directory.join(&handler_file))
                    .map_err(|e| {
                        vec![HangarError::HandlerLoadFailed {
                            package: package.name.clone(),
                            handler: handler_file.clone(),
                            detail: e.to_string(),
                        }]
                    })?;
                cron_handlers.insert(
                    (package.name.clone(), job.name.clone()),
                    LoadedHandler {
                        package: package.name.clone(),
                        handler_file,
                        handler,
                    },
                );
            }
        }

        let package_map = packages
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect::<HashMap<_, _>>();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(RegistrySnapshot {
            generation,
            routes,
            cron_handlers,
            packages: package_map,
        });
        // Ignore the "no receivers" error: a registry with no scheduler
        // attached (e.g. most unit tests) still needs `snapshot()` reads to
        // observe the new value, which `send` updates regardless of
        // whether anyone is subscribed.
        let _ = self.current.send(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ClosureHandler, InvocationContext};
    use crate::loader::TestLoader;
    use axum::response::IntoResponse;
    use std::sync::Arc;

    fn write_package(functions_dir: &Path, name: &str, path: &str) -> PathBuf {
        let pkg = functions_dir.join(name);
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("package.json"), format!(r#"{{"name":"{name}"}}"#)).unwrap();
        std::fs::write(
            pkg.join("route.config.json"),
            format!(r#"{{"routes":[{{"path":"{path}","methods":["GET"]}}]}}"#),
        )
        .unwrap();
        std::fs::write(pkg.join("handler.js"), "// stub").unwrap();
        pkg
    }

    fn stub_handler() -> Arc<dyn Handler> {
        Arc::new(ClosureHandler(|_ctx: InvocationContext| async {
            "ok".into_response()
        }))
    }

    #[test]
    fn load_all_then_lookup_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = write_package(dir.path(), "hello", "/hi");

        let loader = Arc::new(
            TestLoader::new().register(pkg_dir.join("handler.js"), stub_handler()),
        );
        let registry = Registry::new(dir.path(), loader);
        registry.load_all().unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.package_count(), 1);
        assert!(snapshot.lookup(RouteMethod::Get, "/hello/hi").is_ok());
    }

    #[test]
    fn unload_removes_package_routes() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = write_package(dir.path(), "hello", "/hi");
        let loader = Arc::new(
            TestLoader::new().register(pkg_dir.join("handler.js"), stub_handler()),
        );
        let registry = Registry::new(dir.path(), loader);
        registry.load_all().unwrap();
        registry.unload("hello").unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.package_count(), 0);
        assert!(snapshot.lookup(RouteMethod::Get, "/hello/hi").is_err());
    }

    #[test]
    fn reload_bumps_generation_without_disturbing_other_packages() {
        let dir = tempfile::tempdir().unwrap();
        let a_dir = write_package(dir.path(), "a", "/hi");
        let b_dir = write_package(dir.path(), "b", "/hi");
        let loader = Arc::new(
            TestLoader::new()
                .register(a_dir.join("handler.js"), stub_handler())
                .register(b_dir.join("handler.js"), stub_handler()),
        );
        let registry = Registry::new(dir.path(), loader);
        registry.load_all().unwrap();
        let gen1 = registry.snapshot().generation;

        registry.load_one(&a_dir).unwrap();
        let snapshot = registry.snapshot();
        assert!(snapshot.generation > gen1);
        assert_eq!(snapshot.package_count(), 2);
    }

    #[test]
    fn route_conflict_between_packages_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_a = dir.path().join("a");
        std::fs::create_dir_all(&pkg_a).unwrap();
        std::fs::write(pkg_a.join("package.json"), r#"{"name":"a"}"#).unwrap();
        std::fs::write(
            pkg_a.join("route.config.json"),
            r#"{"base":"/shared","routes":[{"path":"/x","methods":["GET"]}]}"#,
        )
        .unwrap();
        std::fs::write(pkg_a.join("handler.js"), "// stub").unwrap();

        let pkg_b = dir.path().join("b");
        std::fs::create_dir_all(&pkg_b).unwrap();
        std::fs::write(pkg_b.join("package.json"), r#"{"name":"b"}"#).unwrap();
        std::fs::write(
            pkg_b.join("route.config.json"),
            r#"{"base":"/shared","routes":[{"path":"/x","methods":["GET"]}]}"#,
        )
        .unwrap();
        std::fs::write(pkg_b.join("handler.js"), "// stub").unwrap();

        let loader = Arc::new(
            TestLoader::new()
                .register(pkg_a.join("handler.js"), stub_handler())
                .register(pkg_b.join("handler.js"), stub_handler()),
        );
        let registry = Registry::new(dir.path(), loader);
        let errors = registry.load_all().unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, HangarError::RouteConflict { .. })));
    }

    #[test]
    fn cron_entries_exposes_enabled_jobs_with_bound_handlers() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = dir.path().join("reporter");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::write(pkg.join("package.json"), r#"{"name":"reporter"}"#).unwrap();
        std::fs::write(pkg.join("route.config.json"), r#"{"routes":[]}"#).unwrap();
        std::fs::write(pkg.join("handler.js"), "// stub").unwrap();
        std::fs::write(
            pkg.join("cron.json"),
            r#"{"jobs":[{"name":"nightly","schedule":"0 0 * * *"}]}"#,
        )
        .unwrap();

        let loader = Arc::new(TestLoader::new().register(pkg.join("handler.js"), stub_handler()));
        let registry = Registry::new(dir.path(), loader);
        registry.load_all().unwrap();

        let snapshot = registry.snapshot();
        let entries: Vec<_> = snapshot.cron_entries().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1.name, "nightly");
        assert!(snapshot.cron_handler("reporter", "nightly").is_some());
    }

    #[tokio::test]
    async fn subscribers_observe_every_published_generation() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = write_package(dir.path(), "hello", "/hi");
        let loader = Arc::new(TestLoader::new().register(pkg_dir.join("handler.js"), stub_handler()));
        let registry = Registry::new(dir.path(), loader);
        let mut rx = registry.subscribe();

        registry.load_all().unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().generation, 1);
    }

    #[tokio::test]
    async fn load_and_unload_publish_lifecycle_events_when_a_bus_is_attached() {
        use futures_core::Stream;
        use hangar_bus::{Bus, BusEvent, BusSubscription, LifecycleEvent};
        use std::future::poll_fn;
        use std::pin::Pin;

        async fn next_event(sub: &mut BusSubscription) -> BusEvent {
            tokio::time::timeout(std::time::Duration::from_millis(200), poll_fn(|cx| {
                Pin::new(&mut *sub).poll_next(cx)
            }))
            .await
            .unwrap()
            .unwrap()
            .unwrap()
        }

        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = write_package(dir.path(), "hello", "/hi");
        let loader = Arc::new(TestLoader::new().register(pkg_dir.join("handler.js"), stub_handler()));
        let registry = Registry::new(dir.path(), loader);
        let bus = Arc::new(Bus::new(16));
        registry.set_bus(bus.clone());
        let mut sub = bus.subscribe();

        registry.load_all().unwrap();
        let loaded = next_event(&mut sub).await;
        assert!(matches!(
            loaded,
            BusEvent::Lifecycle(LifecycleEvent::FunctionLoaded { package, .. }) if package == "hello"
        ));

        registry.unload("hello").unwrap();
        let unloaded = next_event(&mut sub).await;
        assert!(matches!(
            unloaded,
            BusEvent::Lifecycle(LifecycleEvent::FunctionUnloaded { package }) if package == "hello"
        ));
    }
}
