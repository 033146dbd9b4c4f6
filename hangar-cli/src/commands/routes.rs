use std::sync::Arc;

use colored::Colorize;
use hangar_core::Config;
use hangar_registry::{DylibLoader, Registry};

/// Loads every package under `FUNCTIONS_DIR` and prints its resolved route
/// table: method, full path (base + route path), package, and handler file.
/// Exits with an error if any package fails to load — this is the same
/// validation `hangar serve` would apply at startup.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let loader = Arc::new(DylibLoader::new(config.logs_dir.join(".loader-scratch")));
    let registry = Registry::new(config.functions_dir.as_path(), loader);

    if let Err(errors) = registry.load_all() {
        for error in &errors {
            eprintln!("{} {error}", "error:".red().bold());
        }
        return Err(format!("{} package(s) failed to load", errors.len()).into());
    }

    let snapshot = registry.snapshot();
    let mut rows: Vec<(String, String, String, String)> = Vec::new();
    for package in snapshot.packages() {
        let base = package.normalised_base();
        for route in &package.routes {
            let path = format!("{base}{}", route.path);
            let handler = route
                .handler_file
                .clone()
                .unwrap_or_else(|| package.default_handler_file.clone());
            for method in &route.methods {
                rows.push((method.as_str().to_string(), path.clone(), package.name.clone(), handler.clone()));
            }
        }
        for job in &package.cron {
            rows.push((
                "CRON".to_string(),
                job.schedule.clone(),
                package.name.clone(),
                job.handler_file.clone().unwrap_or_else(|| package.default_handler_file.clone()),
            ));
        }
    }

    if rows.is_empty() {
        println!("{}", "No routes or cron jobs loaded.".dimmed());
        return Ok(());
    }

    rows.sort_by(|a, b| a.1.cmp(&b.1));

    println!("{}", "Loaded routes:".bold());
    println!();
    println!(
        "  {:<8} {:<30} {:<20} {}",
        "METHOD".dimmed(),
        "PATH".dimmed(),
        "PACKAGE".dimmed(),
        "HANDLER".dimmed()
    );
    println!("  {}", "-".repeat(80).dimmed());

    for (method, path, package, handler) in &rows {
        let method_colored = match method.as_str() {
            "GET" => method.green(),
            "POST" => method.blue(),
            "PUT" => method.yellow(),
            "DELETE" => method.red(),
            "PATCH" => method.magenta(),
            "CRON" => method.cyan(),
            _ => method.normal(),
        };
        println!("  {:<8} {:<30} {:<20} {}", method_colored, path, package, handler);
    }

    println!();
    println!("  {} entries total", rows.len());

    Ok(())
}
