//! Database backups with `pg_dump` and count-based retention

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;

use anyhow::Context;
use chrono::{DateTime, Local};

use super::ConnectionParams;

const PREFIX: &str = "backup_";
const SUFFIX: &str = ".sql";

/// `backup_<YYYYMMDD_HHMMSS>.sql`
pub fn backup_file_name(at: DateTime<Local>) -> String {
    format!("{}{}{}", PREFIX, at.format("%Y%m%d_%H%M%S"), SUFFIX)
}

pub fn is_backup_file(name: &str) -> bool {
    name.len() > PREFIX.len() + SUFFIX.len() && name.starts_with(PREFIX) && name.ends_with(SUFFIX)
}

/// A backup file and its modification time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupEntry {
    pub name: String,
    pub modified: SystemTime,
}

/// Names to delete so only the `keep` most recently modified backups remain
pub fn select_for_deletion(mut entries: Vec<BackupEntry>, keep: usize) -> Vec<String> {
    entries.retain(|e| is_backup_file(&e.name));
    entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
    entries.into_iter().skip(keep).map(|e| e.name).collect()
}

fn list_backups(dir: &Path) -> std::io::Result<Vec<BackupEntry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let metadata = entry.metadata()?;
        if metadata.is_file() && is_backup_file(&name) {
            entries.push(BackupEntry {
                name,
                modified: metadata.modified()?,
            });
        }
    }
    Ok(entries)
}

/// Delete all but the `keep` newest backups in `dir`, returning what was removed
pub fn apply_retention(dir: &Path, keep: usize) -> std::io::Result<Vec<PathBuf>> {
    let doomed = select_for_deletion(list_backups(dir)?, keep);
    let mut removed = Vec::with_capacity(doomed.len());
    for name in doomed {
        let path = dir.join(name);
        std::fs::remove_file(&path)?;
        removed.push(path);
    }
    Ok(removed)
}

/// Dump the database into a new timestamped file, then prune old backups
pub async fn run_backup(database_url: &str, dir: &Path, keep: usize) -> anyhow::Result<PathBuf> {
    let params = ConnectionParams::from_url(database_url)?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating backup directory {}", dir.display()))?;

    let path = dir.join(backup_file_name(Local::now()));
    println!("Creating backup of {} at {}", params.dbname, path.display());

    let status = params
        .command("pg_dump")
        .arg("-f")
        .arg(&path)
        .arg(&params.dbname)
        .stdin(Stdio::null())
        .status()
        .await
        .context("running pg_dump")?;

    if !status.success() {
        // Leave no partial dump behind
        let _ = tokio::fs::remove_file(&path).await;
        anyhow::bail!("pg_dump exited with {}", status);
    }

    let removed = apply_retention(dir, keep)?;
    for old in &removed {
        println!("Removed old backup {}", old.display());
    }
    tracing::info!(file = %path.display(), pruned = removed.len(), "Backup completed");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn test_backup_file_name() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(backup_file_name(at), "backup_20240309_070501.sql");
        assert!(is_backup_file(&backup_file_name(at)));
        assert!(!is_backup_file("backup_.sql"));
        assert!(!is_backup_file("notes.sql"));
    }

    #[test]
    fn test_keeps_newest_by_mtime_not_name() {
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        let entries = vec![
            BackupEntry { name: "backup_c.sql".into(), modified: base },
            BackupEntry { name: "backup_a.sql".into(), modified: base + Duration::from_secs(20) },
            BackupEntry { name: "backup_b.sql".into(), modified: base + Duration::from_secs(10) },
            BackupEntry { name: "other.txt".into(), modified: base },
        ];
        assert_eq!(select_for_deletion(entries, 2), vec!["backup_c.sql".to_string()]);
    }

    #[test]
    fn test_eleven_backups_leave_ten() {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::now() - Duration::from_secs(3600);
        for i in 0..11u64 {
            let path = dir.path().join(format!("backup_2024010{}_0000{:02}.sql", i % 10, i));
            std::fs::write(&path, b"-- dump").unwrap();
            let file = std::fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(base + Duration::from_secs(i * 60)).unwrap();
        }
        std::fs::write(dir.path().join("README"), b"keep me").unwrap();

        let removed = apply_retention(dir.path(), 10).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(removed[0].ends_with("backup_20240100_000000.sql"));

        let remaining = list_backups(dir.path()).unwrap();
        assert_eq!(remaining.len(), 10);
        assert!(dir.path().join("README").exists());
    }
}
