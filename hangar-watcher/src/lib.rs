//! Debounced recursive watch over `functions/`, attributing every change to
//! the package whose directory it falls under and emitting exactly one
//! reload (or unload, on directory deletion) request per package per
//! settled burst.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher as _};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, RecommendedCache};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

pub const DEFAULT_DEBOUNCE_MS: u64 = 250;

/// One outcome of a settled burst of filesystem events for a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageChange {
    Reload(String),
    Unload(String),
}

/// Owns the OS watch handle; dropping it stops watching.
pub struct FunctionsWatcher {
    _debouncer: Debouncer<notify::RecommendedWatcher, RecommendedCache>,
}

/// Starts watching `functions_dir` recursively. Every settled batch of
/// events is translated into zero or more `PackageChange`s and forwarded to
/// `tx`; the caller is expected to serialise these into registry loads.
pub fn watch(
    functions_dir: impl Into<PathBuf>,
    debounce: Duration,
    tx: UnboundedSender<PackageChange>,
) -> notify::Result<FunctionsWatcher> {
    let functions_dir = functions_dir.into();
    let watch_root = functions_dir.clone();

    let (raw_tx, raw_rx) = std_mpsc::channel::<DebounceEventResult>();
    let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
        let _ = raw_tx.send(result);
    })?;
    debouncer
        .watcher()
        .watch(&functions_dir, RecursiveMode::Recursive)?;

    std::thread::spawn(move || {
        for result in raw_rx {
            match result {
                Ok(events) => {
                    let mut seen = HashSet::new();
                    for event in events {
                        for path in &event.paths {
                            if let Some(package) = package_name_for(&watch_root, path) {
                                if seen.insert(package.clone()) {
                                    let change = if watch_root.join(&package).is_dir() {
                                        PackageChange::Reload(package)
                                    } else {
                                        PackageChange::Unload(package)
                                    };
                                    debug!(?change, "filesystem change settled");
                                    if tx.send(change).is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                }
                Err(errors) => {
                    for error in errors {
                        warn!(%error, "filesystem watcher error");
                    }
                }
            }
        }
    });

    Ok(FunctionsWatcher {
        _debouncer: debouncer,
    })
}

fn package_name_for(functions_dir: &Path, changed_path: &Path) -> Option<String> {
    let relative = changed_path.strip_prefix(functions_dir).ok()?;
    let first = relative.components().next()?;
    Some(first.as_os_str().to_str()?.to_string())
}
