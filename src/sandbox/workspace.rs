//! Path confinement for file operations inside a sandbox.
//!
//! Paths are normalized lexically (no filesystem access, the sandbox is
//! remote) and must stay under `WORKSPACE_ROOT`.

use std::path::{Component, Path, PathBuf};

pub const WORKSPACE_ROOT: &str = "/workspace";

/// Resolves `path` against the workspace root.
///
/// Relative paths are joined onto the root, `.` and `..` are folded, and
/// the result must be the root itself or a descendant of it. Returns the
/// normalized absolute path, or `None` if it escapes.
pub fn resolve(path: &str) -> Option<String> {
    let root = Path::new(WORKSPACE_ROOT);
    let joined = if Path::new(path).is_absolute() {
        PathBuf::from(path)
    } else {
        root.join(path)
    };

    let mut normalized = PathBuf::from("/");
    for component in joined.components() {
        match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                // Popping past "/" would silently clamp, so treat it as an escape
                if !normalized.pop() {
                    return None;
                }
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    if normalized.starts_with(root) {
        Some(normalized.to_string_lossy().into_owned())
    } else {
        None
    }
}
