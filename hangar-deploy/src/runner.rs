//! Post-deploy validation: runs the package's own test suite with a
//! timeout and reports a structured verdict. Abstracted behind a trait so
//! the orchestrator doesn't hardcode a toolchain invocation — the shipped
//! implementation shells out to `cargo test`, since a handler package is a
//! `cdylib` crate with its own `Cargo.toml`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestVerdict {
    pub passed: u32,
    pub failed: u32,
    pub total: u32,
    pub output: String,
}

impl TestVerdict {
    pub fn ok(&self) -> bool {
        self.failed == 0
    }

    fn empty() -> Self {
        Self {
            passed: 0,
            failed: 0,
            total: 0,
            output: String::new(),
        }
    }
}

#[derive(Debug)]
pub enum RunnerError {
    Timeout,
    Spawn(String),
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerError::Timeout => write!(f, "test run timed out"),
            RunnerError::Spawn(detail) => write!(f, "failed to run test suite: {detail}"),
        }
    }
}

/// Returns whether `dir` contains anything that looks like a test file,
/// per the `*.test.*` / `*.spec.*` naming convention — if nothing matches,
/// validation is skipped entirely and treated as a pass.
pub fn has_test_files(dir: &Path) -> bool {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .any(|e| {
            let name = e.file_name().to_string_lossy();
            let parts: Vec<&str> = name.split('.').collect();
            parts.len() >= 3 && (parts.contains(&"test") || parts.contains(&"spec"))
        })
}

pub trait TestRunner: Send + Sync {
    fn run<'a>(
        &'a self,
        dir: &'a Path,
        timeout: Duration,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<TestVerdict, RunnerError>> + Send + 'a>>;
}

/// Runs `cargo test` in `dir`, capturing combined output and parsing the
/// standard libtest summary line (`test result: ok. 3 passed; 0 failed; ...`).
pub struct CargoTestRunner;

impl TestRunner for CargoTestRunner {
    fn run<'a>(
        &'a self,
        dir: &'a Path,
        timeout: Duration,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<TestVerdict, RunnerError>> + Send + 'a>>
    {
        Box::pin(async move {
            let child = Command::new("cargo")
                .arg("test")
                .arg("--manifest-path")
                .arg(dir.join("Cargo.toml"))
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| RunnerError::Spawn(e.to_string()))?;

            let output = tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| RunnerError::Timeout)?
                .map_err(|e| RunnerError::Spawn(e.to_string()))?;

            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let combined = format!("{stdout}{stderr}");
            let mut verdict = parse_libtest_summary(&combined);
            verdict.output = combined;
            Ok(verdict)
        })
    }
}

fn parse_libtest_summary(output: &str) -> TestVerdict {
    let mut verdict = TestVerdict::empty();
    for line in output.lines() {
        let Some(counts) = line.trim().strip_prefix("test result:") else {
            continue;
        };
        let passed = extract_count(counts, "passed");
        let failed = extract_count(counts, "failed");
        verdict.passed += passed;
        verdict.failed += failed;
        verdict.total += passed + failed;
    }
    verdict
}

fn extract_count(segment: &str, label: &str) -> u32 {
    segment
        .split(';')
        .find_map(|part| {
            let part = part.trim();
            part.strip_suffix(label)
                .and_then(|n| n.trim().parse::<u32>().ok())
        })
        .unwrap_or(0)
}

/// A `TestRunner` that returns a fixed verdict — used in tests so the
/// orchestrator's commit/rollback logic can be exercised without actually
/// compiling anything.
pub struct StubRunner(pub Result<TestVerdict, RunnerError>);

impl TestRunner for StubRunner {
    fn run<'a>(
        &'a self,
        _dir: &'a Path,
        _timeout: Duration,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<TestVerdict, RunnerError>> + Send + 'a>>
    {
        let result = match &self.0 {
            Ok(v) => Ok(v.clone()),
            Err(RunnerError::Timeout) => Err(RunnerError::Timeout),
            Err(RunnerError::Spawn(s)) => Err(RunnerError::Spawn(s.clone())),
        };
        Box::pin(async move { result })
    }
}
