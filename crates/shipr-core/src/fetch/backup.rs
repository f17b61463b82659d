//! Timestamped backups for superseded files.

use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat};

use crate::Result;

/// Move an existing file into a sibling `archives/` directory, keeping the
/// original stem and suffix around an ISO-8601 timestamp, then hand the
/// original path back for reuse.
///
/// A path that does not point at a regular file is returned unchanged and
/// nothing on disk is touched. The archive directory is only created when
/// there is actually a file to move.
pub fn take_backup(filename: &Path) -> Result<PathBuf> {
    if !filename.is_file() {
        return Ok(filename.to_path_buf());
    }

    let parent = filename.parent().unwrap_or_else(|| Path::new("."));
    let archive = parent.join("archives");
    if !archive.is_dir() {
        log::warn!("Creating backup directory {}", archive.display());
        std::fs::create_dir_all(&archive)?;
    }

    let stem = filename
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = filename
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let timestamp = Local::now().to_rfc3339_opts(SecondsFormat::Micros, false);

    let backed_up = archive.join(format!("{}_{}{}", stem, timestamp, suffix));
    log::info!(
        "Backing up {} as {}",
        filename.display(),
        backed_up.display()
    );
    std::fs::rename(filename, &backed_up)?;

    Ok(filename.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_backup_preserves_stem_and_suffix() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("test.txt");
        fs::write(&file, "created temporary file 0\n").unwrap();

        let result = take_backup(&file).unwrap();
        assert_eq!(result, file);
        assert!(!file.exists());

        let archived: Vec<_> = fs::read_dir(dir.path().join("archives"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(archived.len(), 1, "there should be only one backup");

        let name = &archived[0];
        assert!(name.starts_with("test_"));
        assert!(name.ends_with(".txt"));

        // The middle part must be a valid ISO-8601 timestamp.
        let stamp = &name["test_".len()..name.len() - ".txt".len()];
        assert!(
            chrono::DateTime::parse_from_rfc3339(stamp).is_ok(),
            "backup timestamp {:?} should parse as ISO-8601",
            stamp
        );
    }

    #[test]
    fn test_backup_missing_file_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("does-not-exist.yaml");

        let result = take_backup(&file).unwrap();
        assert_eq!(result, file);
        assert!(
            !dir.path().join("archives").exists(),
            "no archive directory should appear for a no-op backup"
        );
    }

    #[test]
    fn test_backup_twice_keeps_both_copies() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("values.yaml");

        fs::write(&file, "first").unwrap();
        take_backup(&file).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        fs::write(&file, "second").unwrap();
        take_backup(&file).unwrap();

        let archived = fs::read_dir(dir.path().join("archives")).unwrap().count();
        assert_eq!(archived, 2);
    }
}
