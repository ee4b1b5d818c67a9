//! Zip-slip protection.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Whether `target` names something strictly below `base`.
///
/// Both paths are made absolute and lexically normalized first, so `..`
/// segments and absolute targets cannot escape. `base` itself is rejected.
pub fn is_within_base(base: impl AsRef<Path>, target: impl AsRef<Path>) -> bool {
    let (Some(base), Some(target)) = (absolute(base.as_ref()), absolute(target.as_ref())) else {
        return false;
    };
    target != base && target.starts_with(&base)
}

/// Destination of an archive entry below `base`, before validation.
///
/// Backslashes are treated as separators so Windows-style names cannot hide
/// `..` segments.
pub fn target_path(base: &Path, entry_name: &str) -> PathBuf {
    base.join(entry_name.replace('\\', "/"))
}

/// Compute and validate the destination of `entry_name`.
pub fn resolve_target(base: &Path, entry_name: &str) -> Result<PathBuf> {
    validate_target(base, entry_name, &target_path(base, entry_name))
}

/// Check a previously computed `target` for `entry_name` against `base`.
///
/// Returns the normalized absolute path to write to, or
/// [`Error::PathViolation`] if it would land outside `base`.
pub fn validate_target(base: &Path, entry_name: &str, target: &Path) -> Result<PathBuf> {
    match absolute(target) {
        Some(resolved) if is_within_base(base, &resolved) => Ok(resolved),
        resolved => Err(Error::PathViolation {
            entry: entry_name.to_string(),
            resolved: resolved.unwrap_or_else(|| target.to_path_buf()),
        }),
    }
}

/// Absolute, lexically normalized form of `path`; unchanged if it cannot be
/// made absolute.
pub(crate) fn normalized(path: &Path) -> PathBuf {
    absolute(path).unwrap_or_else(|| path.to_path_buf())
}

fn absolute(path: &Path) -> Option<PathBuf> {
    std::path::absolute(path).ok().map(|p| normalize(&p))
}

/// Resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir => {}
            other => result.push(other.as_os_str()),
        }
    }
    result
}
