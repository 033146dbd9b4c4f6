//! Pre-deploy directory snapshots: a full copy of a package's current
//! on-disk contents plus a small metadata stamp, kept under
//! `.deployment-backups/<name>-<timestampUTC>/` so a failed deploy can be
//! rolled back to exactly what was there before.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

const METADATA_FILE: &str = ".backup-metadata.json";

/// Why a given backup was taken — recorded alongside it so pruning and an
/// audit listing can explain its presence without guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupReason {
    Deploy,
    Reload,
}

impl BackupReason {
    fn as_str(self) -> &'static str {
        match self {
            BackupReason::Deploy => "deploy",
            BackupReason::Reload => "reload",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BackupMetadata {
    #[serde(rename = "originPath")]
    origin_path: String,
    #[serde(rename = "backedUpAt")]
    backed_up_at: String,
    reason: String,
}

/// Copies `source` (a package directory) into a fresh timestamped
/// directory under `backups_root`, returning the backup's path. Returns
/// `Ok(None)` if `source` doesn't exist yet — there is nothing to back up
/// for a brand-new package.
pub fn snapshot(
    backups_root: &Path,
    package: &str,
    source: &Path,
    reason: BackupReason,
    now: chrono::DateTime<Utc>,
) -> std::io::Result<Option<PathBuf>> {
    if !source.exists() {
        return Ok(None);
    }
    std::fs::create_dir_all(backups_root)?;
    let stamp = now.format("%Y%m%dT%H%M%S%.3fZ");
    let dest = backups_root.join(format!("{package}-{stamp}"));
    copy_dir_recursive(source, &dest)?;

    let metadata = BackupMetadata {
        origin_path: source.display().to_string(),
        backed_up_at: now.to_rfc3339(),
        reason: reason.as_str().to_string(),
    };
    std::fs::write(dest.join(METADATA_FILE), serde_json::to_vec_pretty(&metadata)?)?;
    Ok(Some(dest))
}

/// Restores a backup directory over `dest`, replacing whatever is (or
/// isn't) there. The metadata stamp is not copied back — it describes the
/// backup, not the restored package.
pub fn restore(backup: &Path, dest: &Path) -> std::io::Result<()> {
    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    copy_dir_recursive(backup, dest)?;
    let _ = std::fs::remove_file(dest.join(METADATA_FILE));
    Ok(())
}

/// Deletes every backup for `package` beyond the newest `retention`,
/// ordered by the timestamp embedded in the directory name (which sorts
/// lexicographically in chronological order).
pub fn prune(backups_root: &Path, package: &str, retention: usize) -> std::io::Result<()> {
    if !backups_root.exists() {
        return Ok(());
    }
    let prefix = format!("{package}-");
    let mut entries: Vec<PathBuf> = std::fs::read_dir(backups_root)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix))
        })
        .collect();
    entries.sort();
    if entries.len() > retention {
        for stale in &entries[..entries.len() - retention] {
            std::fs::remove_dir_all(stale)?;
        }
    }
    Ok(())
}

fn copy_dir_recursive(source: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in walkdir::WalkDir::new(source).min_depth(1) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(source).unwrap();
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_file(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn snapshot_copies_contents_and_writes_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("functions/hello");
        write_file(&source.join("package.json"), r#"{"name":"hello"}"#);
        write_file(&source.join("nested/handler.js"), "// stub");

        let backups_root = dir.path().join(".deployment-backups");
        let backup = snapshot(
            &backups_root,
            "hello",
            &source,
            BackupReason::Deploy,
            Utc::now(),
        )
        .unwrap()
        .unwrap();

        assert!(backup.join("package.json").exists());
        assert!(backup.join("nested/handler.js").exists());
        let metadata: serde_json::Value =
            serde_json::from_slice(&std::fs::read(backup.join(METADATA_FILE)).unwrap()).unwrap();
        assert_eq!(metadata["reason"], "deploy");
    }

    #[test]
    fn snapshot_of_missing_source_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let backup = snapshot(
            &dir.path().join(".deployment-backups"),
            "hello",
            &dir.path().join("functions/hello"),
            BackupReason::Deploy,
            Utc::now(),
        )
        .unwrap();
        assert!(backup.is_none());
    }

    #[test]
    fn restore_replaces_destination_contents() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("functions/hello");
        write_file(&source.join("package.json"), r#"{"name":"hello","v":1}"#);
        let backup = snapshot(
            &dir.path().join(".deployment-backups"),
            "hello",
            &source,
            BackupReason::Deploy,
            Utc::now(),
        )
        .unwrap()
        .unwrap();

        write_file(&source.join("package.json"), r#"{"name":"hello","v":2}"#);
        restore(&backup, &source).unwrap();

        let restored = std::fs::read_to_string(source.join("package.json")).unwrap();
        assert!(restored.contains("\"v\":1"));
        assert!(!source.join(METADATA_FILE).exists());
    }

    #[test]
    fn prune_keeps_only_the_newest_retained_backups() {
        let dir = tempfile::tempdir().unwrap();
        let backups_root = dir.path().join(".deployment-backups");
        let source = dir.path().join("functions/hello");
        write_file(&source.join("package.json"), "{}");

        let mut made = Vec::new();
        for i in 0..7 {
            let now = Utc::now() + chrono::Duration::seconds(i);
            made.push(
                snapshot(&backups_root, "hello", &source, BackupReason::Deploy, now)
                    .unwrap()
                    .unwrap(),
            );
        }

        prune(&backups_root, "hello", 5).unwrap();

        let remaining: Vec<_> = std::fs::read_dir(&backups_root)
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(remaining.len(), 5);
        assert!(!made[0].exists());
        assert!(!made[1].exists());
        assert!(made[6].exists());
    }
}
