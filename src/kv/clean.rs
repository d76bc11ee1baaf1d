use crate::Result;
use std::fs;
use std::path::Path;
use tracing::info;

/// Discard any sibling per-instance store directory under `directory` whose
/// name does not match `current_uuid`. Run once at startup so a stale cache
/// left behind by a previous process never binds to local-ino assignments
/// made by the current one.
pub fn clean_stores(directory: impl AsRef<Path>, current_uuid: &str) -> Result<()> {
    let directory = directory.as_ref();
    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        if name.to_str() == Some(current_uuid) {
            continue;
        }
        info!(stale_uuid = ?name, "removing stale KV-cache directory");
        fs::remove_dir_all(entry.path())?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_only_mismatched_siblings() {
        let root = tempfile::tempdir().unwrap();
        let keep = root.path().join("keep-uuid");
        let drop1 = root.path().join("old-uuid-1");
        let drop2 = root.path().join("old-uuid-2");
        fs::create_dir(&keep).unwrap();
        fs::create_dir(&drop1).unwrap();
        fs::create_dir(&drop2).unwrap();

        clean_stores(root.path(), "keep-uuid").unwrap();

        assert!(keep.exists());
        assert!(!drop1.exists());
        assert!(!drop2.exists());
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("does-not-exist");
        clean_stores(&missing, "whatever").unwrap();
    }
}
