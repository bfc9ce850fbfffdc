//! Post-run sweep of Chromium-shaped temp directories.
//!
//! Chrome leaves scoped profile directories behind when it is killed
//! rather than closed. After the session's own user-data dir is removed, a
//! second pass deletes anything in the OS temp root that looks like one of
//! ours or like Chromium debris.

use std::path::Path;

use tracing::{debug, warn};

const SWEEP_PREFIXES: &[&str] = &[
    "blockscan-profile-",
    ".com.google.Chrome",
    ".org.chromium.Chromium",
    "scoped_dir",
    "chromium-profile-",
];

/// Delete leftover Chromium temp directories. Returns how many were
/// removed. Never fails; individual removal errors are logged and skipped.
pub fn sweep_chromium_temp_dirs() -> usize {
    sweep_dir(&std::env::temp_dir())
}

fn sweep_dir(root: &Path) -> usize {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("temp sweep could not read {}: {e}", root.display());
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !SWEEP_PREFIXES.iter().any(|p| name.starts_with(p)) {
            continue;
        }
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!("swept {}", path.display());
                removed += 1;
            }
            Err(e) => debug!("could not sweep {}: {e}", path.display()),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweeps_only_matching_directories() {
        let root = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(root.path().join("blockscan-profile-123")).unwrap();
        std::fs::create_dir(root.path().join("scoped_dir456")).unwrap();
        std::fs::create_dir(root.path().join("unrelated-dir")).unwrap();
        std::fs::write(root.path().join("blockscan-profile-file"), b"x").unwrap();

        let removed = sweep_dir(root.path());
        assert_eq!(removed, 2);
        assert!(root.path().join("unrelated-dir").exists());
        assert!(root.path().join("blockscan-profile-file").exists());
    }
}
