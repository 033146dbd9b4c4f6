use std::path::Path;
use std::process::Command;

use colored::Colorize;
use hangar_core::Config;

enum CheckResult {
    Ok(String),
    Warning(String),
    Error(String),
}

/// Run process health diagnostics against the current configuration and
/// `functions/` directory.
///
/// Checks:
/// 1. `FUNCTIONS_DIR` exists (Error if missing)
/// 2. Every package directory under it parses cleanly (Error per bad package)
/// 3. `LOGS_DIR` is writable (Error if not)
/// 4. `ADMIN_PASSWORD` / `JWT_SECRET` are not left at their defaults (Warning)
/// 5. `cargo` is on `PATH`, needed for package test validation (Warning)
/// 6. `git` is on `PATH`, needed for git-sourced deploys (Warning)
///
/// Always returns `Ok(())`; problems are reported, not propagated, so the
/// process exit code reflects whether any issue was found.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "Hangar Doctor — checking process health".bold());
    println!();

    let config = Config::load()?;
    let mut issues = 0;

    check(
        "functions directory",
        || {
            if config.functions_dir.is_dir() {
                CheckResult::Ok(config.functions_dir.display().to_string())
            } else {
                CheckResult::Error(format!("{} does not exist", config.functions_dir.display()))
            }
        },
        &mut issues,
    );

    check(
        "package manifests",
        || match scan_packages(&config.functions_dir) {
            Ok((total, bad)) if bad.is_empty() => CheckResult::Ok(format!("{total} package(s), all valid")),
            Ok((total, bad)) => CheckResult::Error(format!(
                "{} of {total} package(s) failed to parse: {}",
                bad.len(),
                bad.join(", ")
            )),
            Err(e) => CheckResult::Warning(format!("could not scan: {e}")),
        },
        &mut issues,
    );

    check(
        "logs directory writable",
        || match std::fs::create_dir_all(&config.logs_dir) {
            Ok(()) => CheckResult::Ok(config.logs_dir.display().to_string()),
            Err(e) => CheckResult::Error(format!("{}: {e}", config.logs_dir.display())),
        },
        &mut issues,
    );

    check(
        "admin credentials",
        || {
            if config.admin_password == "admin" || config.jwt_secret == "dev-secret-change-me" {
                CheckResult::Warning("ADMIN_PASSWORD or JWT_SECRET still at its default".into())
            } else {
                CheckResult::Ok("overridden from defaults".into())
            }
        },
        &mut issues,
    );

    check(
        "cargo (needed for package test validation)",
        || match Command::new("cargo").arg("--version").output() {
            Ok(output) if output.status.success() => {
                CheckResult::Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            _ => CheckResult::Warning("not found on PATH".into()),
        },
        &mut issues,
    );

    check(
        "git (needed for git-sourced deploys)",
        || match Command::new("git").arg("--version").output() {
            Ok(output) if output.status.success() => {
                CheckResult::Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            _ => CheckResult::Warning("not found on PATH".into()),
        },
        &mut issues,
    );

    println!();
    if issues == 0 {
        println!("{}", "All checks passed!".green().bold());
    } else {
        println!("{}", format!("{issues} issue(s) found").yellow().bold());
    }

    Ok(())
}

/// Returns `(package count, names that failed to parse)`.
fn scan_packages(functions_dir: &Path) -> std::io::Result<(usize, Vec<String>)> {
    if !functions_dir.is_dir() {
        return Ok((0, Vec::new()));
    }
    let mut total = 0;
    let mut bad = Vec::new();
    for entry in std::fs::read_dir(functions_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        total += 1;
        let name = entry.file_name().to_string_lossy().to_string();
        if hangar_registry::parse::parse_package(&entry.path(), 0).is_err() {
            bad.push(name);
        }
    }
    Ok((total, bad))
}

fn check<F>(name: &str, f: F, issues: &mut usize)
where
    F: FnOnce() -> CheckResult,
{
    let result = f();
    match &result {
        CheckResult::Ok(msg) => {
            println!("  {} {} — {}", "✓".green(), name, msg.dimmed());
        }
        CheckResult::Warning(msg) => {
            println!("  {} {} — {}", "!".yellow(), name, msg.yellow());
            *issues += 1;
        }
        CheckResult::Error(msg) => {
            println!("  {} {} — {}", "x".red(), name, msg.red());
            *issues += 1;
        }
    }
}
