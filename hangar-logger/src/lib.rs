//! Per-function and system log streams: bounded rotating files on disk plus
//! an in-memory tail ring fanned out over the event bus.

mod sanitize;
mod stream;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use hangar_bus::{Bus, LogRecord};
use hangar_core::{FunctionLog, HangarError, LogLevel, LoggerProvider};

pub use sanitize::sanitize_function_name;
use stream::LogStream;

const DEFAULT_TAIL_CAPACITY: usize = 1000;

struct Tail {
    records: Mutex<VecDeque<LogRecord>>,
    capacity: usize,
}

impl Tail {
    fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    fn push(&self, record: LogRecord) {
        let mut records = self.records.lock().unwrap();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    fn snapshot(&self, limit: usize) -> Vec<LogRecord> {
        let records = self.records.lock().unwrap();
        records.iter().rev().take(limit).rev().cloned().collect()
    }
}

struct Inner {
    logs_dir: PathBuf,
    max_log_size_bytes: u64,
    max_log_files: usize,
    pid: u32,
    function_streams: DashMap<String, Arc<LogStream>>,
    function_error_streams: DashMap<String, Arc<LogStream>>,
    system_stream: Arc<LogStream>,
    system_error_stream: Arc<LogStream>,
    tails: DashMap<String, Arc<Tail>>,
    bus: Arc<Bus>,
}

/// Owns every log stream and tail buffer; one instance is shared by the
/// whole process. Cheaply `Clone`-able (an `Arc<Inner>` handle), so it can
/// be handed to the dispatcher and scheduler directly as a `LoggerProvider`
/// without an extra `Arc<Logger>` wrapper at every call site.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

impl Logger {
    pub fn new(
        logs_dir: impl Into<PathBuf>,
        max_log_size_bytes: u64,
        max_log_files: usize,
        bus: Arc<Bus>,
    ) -> std::io::Result<Self> {
        let logs_dir = logs_dir.into();
        std::fs::create_dir_all(logs_dir.join("functions"))?;
        let system_stream = Arc::new(LogStream::open(
            logs_dir.join("app.log"),
            max_log_size_bytes,
            max_log_files,
        )?);
        let system_error_stream = Arc::new(LogStream::open(
            logs_dir.join("error.log"),
            max_log_size_bytes,
            max_log_files,
        )?);
        Ok(Self {
            inner: Arc::new(Inner {
                logs_dir,
                max_log_size_bytes,
                max_log_files,
                pid: std::process::id(),
                function_streams: DashMap::new(),
                function_error_streams: DashMap::new(),
                system_stream,
                system_error_stream,
                tails: DashMap::new(),
                bus,
            }),
        })
    }

    fn function_stream(&self, name: &str, error: bool) -> Result<Arc<LogStream>, HangarError> {
        let map = if error {
            &self.inner.function_error_streams
        } else {
            &self.inner.function_streams
        };
        if let Some(existing) = map.get(name) {
            return Ok(existing.clone());
        }
        let suffix = if error { "-error.log" } else { ".log" };
        let path = self.inner.logs_dir.join("functions").join(format!("{name}{suffix}"));
        let stream = LogStream::open(path, self.inner.max_log_size_bytes, self.inner.max_log_files)
            .map_err(|e| internal_logger_error(name, &e))?;
        let stream = Arc::new(stream);
        map.insert(name.to_string(), stream.clone());
        Ok(stream)
    }

    fn tail_for(&self, name: &str) -> Arc<Tail> {
        self.inner
            .tails
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Tail::new(DEFAULT_TAIL_CAPACITY)))
            .clone()
    }

    fn write(&self, function: Option<&str>, level: LogLevel, message: &str, correlation_id: Option<&str>) {
        let record = LogRecord {
            timestamp: Utc::now(),
            level: level.as_str().to_string(),
            pid: self.inner.pid,
            message: message.to_string(),
            function: function.map(|s| s.to_string()),
            correlation_id: correlation_id.map(|s| s.to_string()),
            target: None,
        };

        let topic_name = function.unwrap_or("system").to_string();
        self.tail_for(&topic_name).push(record.clone());
        self.inner.bus.publish_log(record.clone());

        let is_error = matches!(level, LogLevel::Error);
        let stream_result = match function {
            Some(name) => self.function_stream(name, is_error),
            None => Ok(if is_error {
                self.inner.system_error_stream.clone()
            } else {
                self.inner.system_stream.clone()
            }),
        };

        match stream_result {
            Ok(stream) => {
                if let Err(e) = stream.append(&record) {
                    eprintln!("hangar-logger: failed to write log record: {e}");
                }
            }
            Err(e) => eprintln!("hangar-logger: {e}"),
        }
    }

    pub fn log_system(&self, level: LogLevel, message: &str) {
        self.write(None, level, message, None);
    }

    pub fn log_function(
        &self,
        function: &str,
        level: LogLevel,
        message: &str,
        correlation_id: Option<&str>,
    ) {
        self.write(Some(function), level, message, correlation_id);
    }

    /// Returns the most recent `limit` records for a function's (non-error)
    /// stream, most-recent-last.
    pub fn tail(&self, function: &str, limit: usize) -> Result<Vec<LogRecord>, HangarError> {
        let safe_name = sanitize_function_name(function);
        Ok(self.tail_for(&safe_name).snapshot(limit))
    }

    /// Resolves a caller-supplied path against `logs_dir`, rejecting any
    /// path that escapes it via `..` or a symlink. Used by admin read APIs.
    pub fn resolve_safe_path(&self, requested: &str) -> Result<PathBuf, HangarError> {
        resolve_within(&self.inner.logs_dir, requested)
    }

    pub fn logs_dir(&self) -> &Path {
        &self.inner.logs_dir
    }

    pub fn as_function_log(&self, function: &str) -> Arc<dyn FunctionLog> {
        Arc::new(FunctionLogger {
            logger: self.clone(),
            function: function.to_string(),
        })
    }
}

impl LoggerProvider for Logger {
    fn for_function(&self, name: &str) -> Arc<dyn FunctionLog> {
        self.as_function_log(name)
    }
}

fn internal_logger_error(name: &str, err: &std::io::Error) -> HangarError {
    HangarError::InternalHandlerError {
        package: name.to_string(),
        correlation_id: "logger".to_string(),
        detail: err.to_string(),
    }
}

fn resolve_within(root: &Path, requested: &str) -> Result<PathBuf, HangarError> {
    if requested.contains("..") {
        return Err(HangarError::InvalidPath {
            requested: requested.to_string(),
        });
    }
    let candidate = root.join(requested.trim_start_matches('/'));
    let canonical_root = std::fs::canonicalize(root).map_err(|_| HangarError::InvalidPath {
        requested: requested.to_string(),
    })?;
    let canonical_candidate = std::fs::canonicalize(&candidate).unwrap_or(candidate);
    if canonical_candidate.starts_with(&canonical_root) {
        Ok(canonical_candidate)
    } else {
        Err(HangarError::InvalidPath {
            requested: requested.to_string(),
        })
    }
}

/// Adapts a `Logger` + fixed function name to the `FunctionLog` capability
/// handed to a handler invocation.
pub struct FunctionLogger {
    logger: Logger,
    function: String,
}

impl FunctionLog for FunctionLogger {
    fn log(&self, level: LogLevel, message: &str, correlation_id: Option<&str>) {
        self.logger.log_function(&self.function, level, message, correlation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_logger() -> (tempfile::TempDir, Logger) {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new(dir.path(), 10 * 1024 * 1024, 5, Arc::new(Bus::new(16))).unwrap();
        (dir, logger)
    }

    #[test]
    fn function_log_appears_in_tail_buffer() {
        let (_dir, logger) = make_logger();
        logger.log_function("hello", LogLevel::Info, "hi there", None);
        let tail = logger.tail("hello", 10).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].message, "hi there");
    }

    #[test]
    fn tail_buffer_is_bounded() {
        let (_dir, logger) = make_logger();
        for i in 0..1500 {
            logger.log_function("hello", LogLevel::Info, &format!("msg {i}"), None);
        }
        let tail = logger.tail("hello", 2000).unwrap();
        assert_eq!(tail.len(), DEFAULT_TAIL_CAPACITY);
        assert_eq!(tail.last().unwrap().message, "msg 1499");
    }

    #[test]
    fn path_traversal_is_rejected() {
        let (_dir, logger) = make_logger();
        let err = logger.resolve_safe_path("../../etc/passwd").unwrap_err();
        assert!(matches!(err, HangarError::InvalidPath { .. }));
    }

    #[test]
    fn legitimate_path_resolves_inside_logs_dir() {
        let (_dir, logger) = make_logger();
        logger.log_function("hello", LogLevel::Info, "hi", None);
        let resolved = logger.resolve_safe_path("functions/hello.log").unwrap();
        assert!(resolved.starts_with(std::fs::canonicalize(logger.logs_dir()).unwrap()));
    }

    #[test]
    fn system_and_function_logs_are_separated() {
        let (_dir, logger) = make_logger();
        logger.log_system(LogLevel::Info, "system message");
        logger.log_function("hello", LogLevel::Info, "function message", None);
        assert_eq!(logger.tail("system", 10).unwrap()[0].message, "system message");
        assert_eq!(logger.tail("hello", 10).unwrap()[0].message, "function message");
    }
}
