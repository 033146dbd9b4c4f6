use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use colored::Colorize;
use hangar_bus::Bus;
use hangar_core::{Config, HealthState, LoggerProvider};
use hangar_deploy::{CargoTestRunner, DeployOrchestrator};
use hangar_http::{guard_from_config, AppState, SystemGitCloner};
use hangar_logger::Logger;
use hangar_registry::{DylibLoader, Registry};
use hangar_scheduler::CronScheduler;
use hangar_watcher::PackageChange;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Starts the function host: loads every package under `FUNCTIONS_DIR`,
/// then serves the public dispatch router and the admin control plane on
/// the same port until the process is interrupted.
///
/// Wiring order mirrors the component dependency graph: registry first (it
/// owns no dependencies), then logger and bus (depend on nothing but each
/// other), then the orchestrator and scheduler (depend on the registry),
/// then the watcher (publishes into the registry), then the HTTP layer
/// (depends on everything above).
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    std::fs::create_dir_all(&config.functions_dir)?;
    std::fs::create_dir_all(&config.logs_dir)?;
    std::fs::create_dir_all(&config.backups_dir)?;

    let bus = Arc::new(Bus::new(1024));

    let loader = Arc::new(DylibLoader::new(config.logs_dir.join(".loader-scratch")));
    let registry = Arc::new(Registry::new(config.functions_dir.as_path(), loader));
    registry.set_bus(bus.clone());
    if let Err(errors) = registry.load_all() {
        for e in &errors {
            warn!(error = %e, "package failed to load at startup");
        }
    }

    let logger = Logger::new(
        config.logs_dir.as_path(),
        config.max_log_size_bytes,
        config.max_log_files,
        bus.clone(),
    )?;
    let loggers: Arc<dyn LoggerProvider> = Arc::new(logger.clone());

    let orchestrator = Arc::new(DeployOrchestrator::new(
        config.functions_dir.as_path(),
        config.backups_dir.as_path(),
        registry.clone(),
        Arc::new(CargoTestRunner),
        config.backup_retention,
        Duration::from_secs(config.validation_timeout_secs),
    ));

    let scheduler = Arc::new(CronScheduler::new(loggers.clone()));
    let _reconciler = scheduler.clone().spawn_reconciler(registry.clone());

    spawn_watcher(&config, registry.clone(), orchestrator.clone())?;

    let admin_state = AppState {
        registry: registry.clone(),
        orchestrator,
        logger,
        bus,
        health: Arc::new(HealthState::new()),
        auth: guard_from_config(&config),
        git: Arc::new(SystemGitCloner),
        deployed_by: config.admin_username.clone(),
    };

    let app = Router::new()
        .nest("/api", hangar_http::router(admin_state))
        .fallback_service(hangar_dispatch::router_with_logger(registry, loggers));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(port = config.port, "hangar listening");
    println!("{} listening on {}", "hangar".green().bold(), format!("0.0.0.0:{}", config.port).bold());
    axum::serve(listener, app).await?;
    Ok(())
}

/// Spawns the filesystem watcher and a task that drains its channel,
/// translating each settled change into a reload or unload through the
/// orchestrator so a bad on-disk edit still rolls back cleanly.
fn spawn_watcher(
    config: &Config,
    registry: Arc<Registry>,
    orchestrator: Arc<DeployOrchestrator>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let watcher = hangar_watcher::watch(
        config.functions_dir.as_path(),
        Duration::from_millis(config.debounce_ms),
        tx,
    )?;

    tokio::spawn(async move {
        // Keeping `watcher` alive for the lifetime of this task is the
        // point — dropping it stops the underlying OS watch.
        let _watcher = watcher;
        while let Some(change) = rx.recv().await {
            match change {
                PackageChange::Reload(package) => match orchestrator.reload(&package).await {
                    Ok(_) => info!(package = %package, "reloaded after filesystem change"),
                    Err(e) => error!(package = %package, error = %e, "reload after filesystem change failed"),
                },
                PackageChange::Unload(package) => {
                    if let Err(errors) = registry.unload(&package) {
                        for e in &errors {
                            error!(package = %package, error = %e, "unload after directory removal failed");
                        }
                    } else {
                        info!(package = %package, "unloaded after directory removal");
                    }
                }
            }
        }
    });
    Ok(())
}
