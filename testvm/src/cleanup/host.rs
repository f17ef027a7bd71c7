//! Host-side artifact cleanup for the data levels.
//!
//! Artifacts live in four directories under the data dir. Everything here is
//! best effort: a missing directory is skipped and a file that cannot be
//! removed is reported, neither stops the sweep.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Artifact directories below the data dir, all safe to delete.
pub const ARTIFACT_DIRS: [&str; 4] = ["logs", "reports", "results", "artifacts"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostScope {
    /// Files last modified more than this long ago.
    OlderThan(Duration),
    Everything,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSweep {
    pub removed: Vec<PathBuf>,
    pub bytes_freed: u64,
    /// Artifact directories that did not exist.
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

/// The host artifact tree rooted at the data dir.
#[derive(Debug, Clone)]
pub struct HostArtifacts {
    root: PathBuf,
}

impl HostArtifacts {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sweep(&self, scope: HostScope) -> HostSweep {
        self.sweep_at(scope, SystemTime::now())
    }

    /// Sweep relative to a fixed `now`.
    pub fn sweep_at(&self, scope: HostScope, now: SystemTime) -> HostSweep {
        let mut sweep = HostSweep::default();
        for name in ARTIFACT_DIRS {
            let dir = self.root.join(name);
            if !dir.is_dir() {
                debug!(dir = %dir.display(), "Artifact directory missing, skipping");
                sweep.skipped.push(name.to_string());
                continue;
            }
            sweep_dir(&dir, scope, now, &mut sweep);
        }
        debug!(
            removed = sweep.removed.len(),
            bytes = sweep.bytes_freed,
            errors = sweep.errors.len(),
            "Host sweep finished"
        );
        sweep
    }
}

/// Remove matching files below `dir`, then prune subdirectories left empty.
/// `dir` itself is kept. Under `OlderThan` an empty subdirectory is pruned
/// only if this sweep emptied it or it is itself older than the cutoff.
/// Returns whether anything was removed.
fn sweep_dir(dir: &Path, scope: HostScope, now: SystemTime, sweep: &mut HostSweep) -> bool {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            sweep.errors.push(format!("{}: {e}", dir.display()));
            return false;
        }
    };

    let mut removed_any = false;
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(meta) = fs::symlink_metadata(&path) else {
            continue;
        };

        if meta.is_dir() {
            let emptied = sweep_dir(&path, scope, now, sweep);
            if !is_empty_dir(&path) || !(emptied || matches_scope(&meta, scope, now)) {
                continue;
            }
            match fs::remove_dir(&path) {
                Ok(()) => removed_any = true,
                Err(e) => sweep.errors.push(format!("{}: {e}", path.display())),
            }
            continue;
        }

        if !matches_scope(&meta, scope, now) {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                sweep.bytes_freed += meta.len();
                sweep.removed.push(path);
                removed_any = true;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to remove artifact");
                sweep.errors.push(format!("{}: {e}", path.display()));
            }
        }
    }
    removed_any
}

fn matches_scope(meta: &fs::Metadata, scope: HostScope, now: SystemTime) -> bool {
    match scope {
        HostScope::Everything => true,
        HostScope::OlderThan(max_age) => meta
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age > max_age),
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}

/// Total size of the artifact tree, for status output.
pub fn tree_size(root: &Path) -> io::Result<u64> {
    let mut total = 0;
    for name in ARTIFACT_DIRS {
        let dir = root.join(name);
        if dir.is_dir() {
            total += dir_size(&dir)?;
        }
    }
    Ok(total)
}

fn dir_size(dir: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(dir)?.flatten() {
        let meta = fs::symlink_metadata(entry.path())?;
        total += if meta.is_dir() {
            dir_size(&entry.path())?
        } else {
            meta.len()
        };
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 3600);

    fn write_aged(root: &Path, rel: &str, age: Duration, now: SystemTime) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"artifact").unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(now - age).unwrap();
    }

    fn relative(root: &Path, paths: &[PathBuf]) -> BTreeSet<PathBuf> {
        paths
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect()
    }

    #[test]
    fn test_basic_removes_only_old_files_and_prunes_empty_dirs() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        write_aged(dir.path(), "logs/old.log", DAY * 2, now);
        write_aged(dir.path(), "logs/new.log", Duration::from_secs(60), now);
        write_aged(dir.path(), "results/run-1/report.xml", DAY * 3, now);

        let sweep = HostArtifacts::new(dir.path()).sweep_at(HostScope::OlderThan(DAY), now);

        assert_eq!(
            relative(dir.path(), &sweep.removed),
            BTreeSet::from([
                PathBuf::from("logs/old.log"),
                PathBuf::from("results/run-1/report.xml")
            ])
        );
        assert!(dir.path().join("logs/new.log").exists());
        assert!(!dir.path().join("results/run-1").exists());
        assert!(dir.path().join("results").is_dir());
        assert_eq!(sweep.bytes_freed, 16);
    }

    #[test]
    fn test_basic_keeps_fresh_empty_dirs() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        fs::create_dir_all(dir.path().join("results/run-x")).unwrap();
        fs::create_dir_all(dir.path().join("artifacts/run-y/screens")).unwrap();
        write_aged(dir.path(), "logs/session/old.log", DAY * 2, now);

        let sweep = HostArtifacts::new(dir.path()).sweep_at(HostScope::OlderThan(DAY), now);

        assert!(dir.path().join("results/run-x").is_dir());
        assert!(dir.path().join("artifacts/run-y/screens").is_dir());
        // Emptied by this sweep, so pruned even though it is new.
        assert!(!dir.path().join("logs/session").exists());
        assert_eq!(sweep.removed.len(), 1);
        assert!(sweep.errors.is_empty());
    }

    #[test]
    fn test_everything_prunes_fresh_empty_dirs() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("results/run-x")).unwrap();
        HostArtifacts::new(dir.path()).sweep(HostScope::Everything);
        assert!(!dir.path().join("results/run-x").exists());
        assert!(dir.path().join("results").is_dir());
    }

    #[test]
    fn test_missing_dirs_are_skipped_not_errors() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("logs")).unwrap();
        let sweep = HostArtifacts::new(dir.path()).sweep(HostScope::Everything);
        assert_eq!(sweep.skipped, vec!["reports", "results", "artifacts"]);
        assert!(sweep.errors.is_empty());
    }

    #[test]
    fn test_everything_leaves_empty_roots() {
        let dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        write_aged(dir.path(), "artifacts/a/b/c.png", Duration::ZERO, now);
        write_aged(dir.path(), "reports/r.html", DAY * 10, now);
        fs::write(dir.path().join("config-outside.toml"), "x").unwrap();

        let sweep = HostArtifacts::new(dir.path()).sweep(HostScope::Everything);
        assert_eq!(sweep.removed.len(), 2);
        assert!(dir.path().join("artifacts").is_dir());
        assert!(!dir.path().join("artifacts/a").exists());
        assert!(dir.path().join("config-outside.toml").exists());
        assert_eq!(tree_size(dir.path()).unwrap(), 0);
    }

    fn tree_strategy() -> impl Strategy<Value = Vec<(usize, String, u64)>> {
        prop::collection::vec(
            (0..ARTIFACT_DIRS.len(), "[a-z]{1,8}(/[a-z]{1,8})?", 0u64..(72 * 3600)),
            0..20,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_full_removes_superset_of_basic(files in tree_strategy()) {
            let now = SystemTime::now();
            let basic_dir = TempDir::new().unwrap();
            let full_dir = TempDir::new().unwrap();
            for (dir_idx, rel, age_secs) in &files {
                // Directories never end in `.dat`, so files and dirs cannot collide.
                let rel = format!("{}/{rel}.dat", ARTIFACT_DIRS[*dir_idx]);
                let age = Duration::from_secs(*age_secs);
                write_aged(basic_dir.path(), &rel, age, now);
                write_aged(full_dir.path(), &rel, age, now);
            }

            let basic = HostArtifacts::new(basic_dir.path())
                .sweep_at(HostScope::OlderThan(DAY), now);
            let full = HostArtifacts::new(full_dir.path())
                .sweep_at(HostScope::Everything, now);

            let basic_set = relative(basic_dir.path(), &basic.removed);
            let full_set = relative(full_dir.path(), &full.removed);
            prop_assert!(basic_set.is_subset(&full_set));
            prop_assert!(basic.bytes_freed <= full.bytes_freed);
        }
    }
}
