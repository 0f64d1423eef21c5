//! Lookup of the hadoop-unit launcher and installation checks.
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::constants::{LAUNCHER_NAME, LAUNCHER_SUBDIRS};

/// Resolves `name` through the search path, then through `base_dir/<subdir>/name`
/// for each of `subdirs` in order.
///
/// Returns `None` if nothing exists; callers decide whether that is fatal.
pub fn find_program(name: &str, subdirs: &[&str], base_dir: &Path) -> Option<PathBuf> {
    if let Ok(path) = which::which(name) {
        debug!("Found '{name}' on PATH at {}", path.display());
        return Some(path);
    }

    for subdir in subdirs {
        let candidate = base_dir.join(subdir).join(name);
        if candidate.exists() {
            debug!("Found '{name}' under installation at {}", candidate.display());
            return Some(candidate);
        }
    }

    debug!(
        "'{name}' not found on PATH or under {}",
        base_dir.display()
    );
    None
}

/// Resolves the hadoop-unit launcher for an installation root.
pub fn find_launcher(hadoop_unit_path: &Path) -> Option<PathBuf> {
    find_program(LAUNCHER_NAME, LAUNCHER_SUBDIRS, hadoop_unit_path)
}

/// Returns `true` when a hadoop-unit installation can be used from
/// `hadoop_unit_path`.
pub fn installation_available(hadoop_unit_path: &Path) -> bool {
    hadoop_unit_path.is_dir() && find_launcher(hadoop_unit_path).is_some()
}

/// Returns early from the enclosing test when no hadoop-unit installation is
/// present at the given path.
///
/// ```ignore
/// #[test]
/// fn hdfs_comes_up() {
///     hadoop_unit_fixture::require_installation!("/usr/local/hadoop-unit");
///     // ...
/// }
/// ```
#[macro_export]
macro_rules! require_installation {
    ($path:expr) => {{
        let path = ::std::path::Path::new($path);
        if !$crate::locate::installation_available(path) {
            eprintln!(
                "Skipping {}: hadoop-unit not found at {}",
                module_path!(),
                path.display()
            );
            return;
        }
    }};
}
