use std::sync::Mutex;

use serial_test::serial;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FUNCTIONS_DIR",
        "LOGS_DIR",
        "BACKUPS_DIR",
        "ADMIN_PASSWORD",
        "JWT_SECRET",
        "PORT",
    ] {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
#[serial]
fn doctor_runs_clean_against_a_valid_package() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let root = tempfile::tempdir().unwrap();
    let functions_dir = root.path().join("functions");
    let pkg_dir = functions_dir.join("hello");
    std::fs::create_dir_all(&pkg_dir).unwrap();
    std::fs::write(pkg_dir.join("package.json"), r#"{"name":"hello"}"#).unwrap();
    std::fs::write(
        pkg_dir.join("route.config.json"),
        r#"{"routes":[{"path":"/hi","methods":["GET"]}]}"#,
    )
    .unwrap();
    std::fs::write(pkg_dir.join("handler.js"), "// stub").unwrap();

    unsafe {
        std::env::set_var("FUNCTIONS_DIR", &functions_dir);
        std::env::set_var("LOGS_DIR", root.path().join("logs"));
        std::env::set_var("ADMIN_PASSWORD", "not-the-default");
        std::env::set_var("JWT_SECRET", "not-the-default");
    }

    assert!(hangar_cli::commands::doctor::run().is_ok());
    clear_env();
}

#[test]
#[serial]
fn doctor_reports_a_malformed_package_but_still_returns_ok() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    let root = tempfile::tempdir().unwrap();
    let functions_dir = root.path().join("functions");
    let pkg_dir = functions_dir.join("broken");
    std::fs::create_dir_all(&pkg_dir).unwrap();
    std::fs::write(pkg_dir.join("package.json"), "not json").unwrap();

    unsafe {
        std::env::set_var("FUNCTIONS_DIR", &functions_dir);
        std::env::set_var("LOGS_DIR", root.path().join("logs"));
    }

    // doctor reports issues, it never propagates them as an error.
    assert!(hangar_cli::commands::doctor::run().is_ok());
    clear_env();
}
