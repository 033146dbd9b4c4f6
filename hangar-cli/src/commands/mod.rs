//! Command implementations for the `hangar` CLI.
//!
//! Each submodule corresponds to a top-level CLI command.

/// Run the function host — `hangar serve`.
///
/// Wires together the registry, dynamic loader, logger, event bus, deploy
/// orchestrator, cron scheduler, and filesystem watcher, then serves both
/// the public dispatch router and the admin API until interrupted.
pub mod serve;

/// Process diagnostics — `hangar doctor`.
///
/// Checks configuration, the `functions/` directory, and the external
/// tools (`cargo`, `git`) the deploy pipeline shells out to.
pub mod doctor;

/// Route listing — `hangar routes`.
///
/// Loads every package under `FUNCTIONS_DIR` and prints its resolved route
/// and cron table.
pub mod routes;
