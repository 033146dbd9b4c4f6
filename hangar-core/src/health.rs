//! Process-wide status tracking backing `GET /api/status`:
//! uptime, package count, and the last error observed per package.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

/// A point-in-time view of process health, returned by `GET /api/status`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub uptime_seconds: u64,
    pub package_count: usize,
    pub last_errors: HashMap<String, String>,
}

/// Shared, injectable health tracker.
///
/// `record_error` is called by the registry/orchestrator whenever a
/// package-scoped operation fails; `clear_error` is called on the next
/// successful load of that package so stale errors don't linger forever.
pub struct HealthState {
    start_time: Instant,
    last_errors: Mutex<HashMap<String, String>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            last_errors: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_error(&self, package: &str, detail: impl Into<String>) {
        self.last_errors
            .lock()
            .unwrap()
            .insert(package.to_string(), detail.into());
    }

    pub fn clear_error(&self, package: &str) {
        self.last_errors.lock().unwrap().remove(package);
    }

    pub fn snapshot(&self, package_count: usize) -> HealthSnapshot {
        HealthSnapshot {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            package_count,
            last_errors: self.last_errors.lock().unwrap().clone(),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}
