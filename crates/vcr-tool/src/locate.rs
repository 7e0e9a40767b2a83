//! Render tool binary resolution
//!
//! Resolution happens once at process start, in a fixed order:
//! 1. an explicit path, or the first matching entry on `PATH`
//! 2. `<project_root>/target/debug/<name>`
//! 3. `<project_root>/target/release/<name>`

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::ToolError;
use crate::ToolResult;

/// Default binary name of the render tool.
pub const DEFAULT_BINARY: &str = "vcr";

/// Locate the render tool using the process `PATH`.
pub fn locate_binary(name: &str, project_root: &Path) -> ToolResult<PathBuf> {
    locate_with_path(name, project_root, std::env::var_os("PATH"))
}

/// Locate the render tool against an explicit `PATH` value.
pub fn locate_with_path(
    name: &str,
    project_root: &Path,
    path_var: Option<OsString>,
) -> ToolResult<PathBuf> {
    let mut searched = Vec::new();

    // An explicit path skips the PATH search entirely
    if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
        let candidate = if Path::new(name).is_absolute() {
            PathBuf::from(name)
        } else {
            project_root.join(name)
        };
        if is_executable(&candidate) {
            info!(binary = %candidate.display(), "Resolved render tool (explicit path)");
            return Ok(candidate);
        }
        searched.push(candidate);
    } else if let Some(path_var) = path_var {
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(name);
            if is_executable(&candidate) {
                info!(binary = %candidate.display(), "Resolved render tool on PATH");
                return Ok(candidate);
            }
        }
        searched.push(PathBuf::from(format!("$PATH/{name}")));
    }

    for profile in ["debug", "release"] {
        let candidate = project_root.join("target").join(profile).join(name);
        debug!(candidate = %candidate.display(), "Checking local build");
        if is_executable(&candidate) {
            info!(binary = %candidate.display(), "Resolved render tool ({} build)", profile);
            return Ok(candidate);
        }
        searched.push(candidate);
    }

    Err(ToolError::NotFound {
        name: name.to_string(),
        searched,
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[cfg(unix)]
    fn make_executable(path: &Path) {
        use std::os::unix::fs::PermissionsExt;
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_path_entry_wins_over_local_builds() {
        let root = tempfile::tempdir().unwrap();
        let bin_dir = tempfile::tempdir().unwrap();
        make_executable(&bin_dir.path().join("vcr"));
        make_executable(&root.path().join("target/debug/vcr"));

        let found = locate_with_path(
            "vcr",
            root.path(),
            Some(bin_dir.path().as_os_str().to_owned()),
        )
        .unwrap();
        assert_eq!(found, bin_dir.path().join("vcr"));
    }

    #[cfg(unix)]
    #[test]
    fn test_debug_build_preferred_over_release() {
        let root = tempfile::tempdir().unwrap();
        make_executable(&root.path().join("target/debug/vcr"));
        make_executable(&root.path().join("target/release/vcr"));

        let found = locate_with_path("vcr", root.path(), None).unwrap();
        assert_eq!(found, root.path().join("target/debug/vcr"));
    }

    #[cfg(unix)]
    #[test]
    fn test_release_build_used_last() {
        let root = tempfile::tempdir().unwrap();
        make_executable(&root.path().join("target/release/vcr"));

        let found = locate_with_path("vcr", root.path(), Some(OsString::new())).unwrap();
        assert_eq!(found, root.path().join("target/release/vcr"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_file_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let debug = root.path().join("target/debug/vcr");
        fs::create_dir_all(debug.parent().unwrap()).unwrap();
        fs::write(&debug, "not a program").unwrap();

        assert!(locate_with_path("vcr", root.path(), None).is_err());
    }

    #[test]
    fn test_not_found_reports_every_location() {
        let root = tempfile::tempdir().unwrap();
        let err = locate_with_path("vcr", root.path(), Some(OsString::new())).unwrap_err();

        match err {
            ToolError::NotFound { name, searched } => {
                assert_eq!(name, "vcr");
                assert_eq!(searched.len(), 3);
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}
