//! Per-function cron task lifecycle (C4): one tokio task per
//! `(package, cron job name)`, reconciled against the registry's published
//! snapshots rather than polled.
//!
//! The scheduler never touches the filesystem or the dispatcher directly —
//! it only consumes `RegistrySnapshot::cron_entries()` and the `Handler`
//! trait object bound to each entry, and synthesizes an `InvocationContext`
//! the same way the dispatcher does for a real HTTP request.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use chrono_tz::Tz;
use cron::Schedule;
use hangar_core::{CronSpec, LoggerProvider};
use hangar_registry::{normalise_cron_expression, InvocationContext, LoadedHandler, Registry, RegistrySnapshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Key = (String, String);

/// The part of a cron entry that, if changed, means "stop and restart" —
/// including the handler's own identity, so a reload that swaps in a new
/// `.so` without touching `cron.json` still picks up the new code (I4).
#[derive(Clone, PartialEq, Eq)]
struct Fingerprint {
    schedule: String,
    timezone: String,
    handler_file: String,
    handler_ptr: usize,
}

impl Fingerprint {
    fn of(job: &CronSpec, handler: &LoadedHandler) -> Self {
        Self {
            schedule: job.schedule.clone(),
            timezone: job.timezone.clone(),
            handler_file: handler.handler_file.clone(),
            handler_ptr: Arc::as_ptr(&handler.handler) as *const () as usize,
        }
    }
}

struct ActiveTask {
    fingerprint: Fingerprint,
    cancel: CancellationToken,
    #[allow(dead_code)]
    join: JoinHandle<()>,
}

/// Owns every running cron task and reconciles them against successive
/// `RegistrySnapshot`s.
pub struct CronScheduler {
    loggers: Arc<dyn LoggerProvider>,
    tasks: Mutex<HashMap<Key, ActiveTask>>,
}

impl CronScheduler {
    pub fn new(loggers: Arc<dyn LoggerProvider>) -> Self {
        Self {
            loggers,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Reconciles active tasks against one snapshot: starts tasks for new
    /// entries, stops tasks for entries no longer present, and
    /// stop-then-restarts any whose fingerprint changed (new schedule,
    /// timezone, handler file, or reloaded handler).
    pub fn reconcile(self: &Arc<Self>, snapshot: &RegistrySnapshot) {
        let wanted: HashMap<Key, (CronSpec, LoadedHandler)> = snapshot
            .cron_entries()
            .map(|(pkg, job, handler)| {
                (
                    (pkg.name.clone(), job.name.clone()),
                    (job.clone(), handler.clone()),
                )
            })
            .collect();

        let mut tasks = self.tasks.lock().unwrap();

        let stale: Vec<Key> = tasks
            .iter()
            .filter(|(key, task)| match wanted.get(*key) {
                None => true,
                Some((job, handler)) => task.fingerprint != Fingerprint::of(job, handler),
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            if let Some(task) = tasks.remove(key) {
                task.cancel.cancel();
                info!(package = %key.0, job = %key.1, "cron task stopped");
            }
        }

        for (key, (job, handler)) in &wanted {
            if tasks.contains_key(key) {
                continue;
            }
            let fingerprint = Fingerprint::of(job, handler);
            let cancel = CancellationToken::new();
            let join = spawn_task(
                key.0.clone(),
                job.clone(),
                handler.clone(),
                self.loggers.clone(),
                cancel.clone(),
            );
            info!(package = %key.0, job = %key.1, schedule = %job.schedule, "cron task started");
            tasks.insert(
                key.clone(),
                ActiveTask {
                    fingerprint,
                    cancel,
                    join,
                },
            );
        }
    }

    /// Spawns a background task that awaits every snapshot published on
    /// `registry` (starting from the one current right now) and reconciles
    /// against each in turn. Cancelling the returned handle stops the
    /// reconciliation loop; dropping `self` also stops every active task.
    pub fn spawn_reconciler(self: Arc<Self>, registry: Arc<Registry>) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.reconcile(&registry.snapshot());
            let mut changes = registry.subscribe();
            while changes.changed().await.is_ok() {
                let snapshot = changes.borrow().clone();
                self.reconcile(&snapshot);
            }
        })
    }

    /// Number of currently-active cron tasks. Exposed for status reporting
    /// and tests.
    pub fn active_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().unwrap().values() {
            task.cancel.cancel();
        }
    }
}

fn resolve_timezone(name: &str) -> Tz {
    Tz::from_str(name).unwrap_or_else(|_| {
        warn!(timezone = %name, "unknown cron timezone, falling back to UTC");
        Tz::UTC
    })
}

fn spawn_task(
    package: String,
    job: CronSpec,
    handler: LoadedHandler,
    loggers: Arc<dyn LoggerProvider>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tz = resolve_timezone(&job.timezone);
        let schedule = match Schedule::from_str(&normalise_cron_expression(&job.schedule)) {
            Ok(s) => s,
            Err(e) => {
                // Schedules are validated at load time; reaching this means
                // the registry admitted something the scheduler can't
                // parse, which should never happen in practice.
                error!(package = %package, job = %job.name, error = %e, "cron schedule failed to parse at tick time");
                return;
            }
        };
        let running = Arc::new(AtomicBool::new(false));

        loop {
            let Some(next) = schedule.upcoming(tz).next() else {
                warn!(package = %package, job = %job.name, "cron schedule has no further occurrences");
                return;
            };
            let until = (next.with_timezone(&Utc) - Utc::now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO);

            tokio::select! {
                _ = tokio::time::sleep(until) => {}
                _ = cancel.cancelled() => return,
            }

            if running.swap(true, Ordering::SeqCst) {
                warn!(package = %package, job = %job.name, "previous tick still running, skipping this tick");
                continue;
            }

            let scheduled_at = Utc::now();
            debug!(package = %package, job = %job.name, %scheduled_at, "cron tick firing");

            let ctx = build_context(&package, &job, scheduled_at, loggers.for_function(&package));
            let call_handler = handler.handler.clone();
            let running = running.clone();
            let package_for_log = package.clone();
            let job_name = job.name.clone();
            tokio::spawn(async move {
                let _ = call_handler.call(ctx).await;
                running.store(false, Ordering::SeqCst);
                debug!(package = %package_for_log, job = %job_name, "cron tick finished");
            });
        }
    })
}

fn build_context(
    package: &str,
    job: &CronSpec,
    scheduled_at: chrono::DateTime<Utc>,
    logger: Arc<dyn hangar_core::FunctionLog>,
) -> InvocationContext {
    let body = serde_json::json!({
        "name": job.name,
        "schedule": job.schedule,
        "scheduledAt": scheduled_at.to_rfc3339(),
    });

    InvocationContext {
        package: package.to_string(),
        method: "CRON".to_string(),
        path: format!("/__cron/{}", job.name),
        params: HashMap::new(),
        headers: axum::http::HeaderMap::new(),
        body: axum::body::Bytes::from(body.to_string()),
        correlation_id: uuid::Uuid::new_v4().to_string(),
        cancel: CancellationToken::new(),
        logger,
    }
}
