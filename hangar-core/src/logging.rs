//! The logging seam shared between `hangar-registry`/`hangar-dispatch` (which
//! need to emit log records during handler invocation) and `hangar-logger`
//! (which knows how to persist and rotate them). Keeping the trait here
//! avoids a dependency cycle between the two crates.

/// Severity of a persisted log record. Mirrors `tracing`'s level set so a
/// function's own log stream can share one vocabulary with the process
/// logs emitted through `tracing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handle a function invocation can log through. `hangar-logger`'s
/// `FunctionLogger` is the production implementation; tests can implement
/// this directly over a `Vec<String>` for assertions.
pub trait FunctionLog: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, correlation_id: Option<&str>);
}

/// A `FunctionLog` that discards everything — used where a context is
/// required but output is irrelevant (e.g. loader unit tests).
pub struct NullLogger;

impl FunctionLog for NullLogger {
    fn log(&self, _level: LogLevel, _message: &str, _correlation_id: Option<&str>) {}
}

/// Mints a per-function `FunctionLog` handle on demand. `hangar-logger`'s
/// `Logger` is the production implementation; the dispatcher and scheduler
/// depend on this trait rather than on `hangar-logger` directly so they
/// stay composable with a stub in tests (see "Global singletons → composed
/// collaborators" in the design notes).
pub trait LoggerProvider: Send + Sync {
    fn for_function(&self, name: &str) -> std::sync::Arc<dyn FunctionLog>;
}

/// A `LoggerProvider` that always hands back a `NullLogger` — the default
/// when no real logger is wired in (unit tests, standalone crate tests).
pub struct NullLoggerProvider;

impl LoggerProvider for NullLoggerProvider {
    fn for_function(&self, _name: &str) -> std::sync::Arc<dyn FunctionLog> {
        std::sync::Arc::new(NullLogger)
    }
}
