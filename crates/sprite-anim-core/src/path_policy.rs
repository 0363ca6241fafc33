//! Resolve and constrain client-supplied paths relative to a workspace root.

use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Resolve a client-supplied path argument against a workspace root.
///
/// `value` is interpreted relative to `workspace_root` unless already absolute.
/// `~` is expanded against the user's home directory. The result is
/// canonicalised (symlinks resolved) when it exists; non-existent paths are
/// lexically normalised instead (there's nothing on disk to canonicalise yet,
/// e.g. an output path about to be created).
///
/// Unless `allow_external` is `true`, the resolved path must be lexically
/// under the resolved workspace root or this returns
/// `CoreError::PathOutsideWorkspace`.
///
/// If `value` is empty, `default` is returned unresolved against the
/// workspace (it may legitimately live outside it, e.g. a default sourced
/// from `Settings`).
pub fn resolve_workspace_path(
    value: &str,
    workspace_root: &Path,
    allow_external: bool,
    field_name: &str,
    default: Option<&Path>,
) -> Result<PathBuf, CoreError> {
    if value.is_empty() {
        if let Some(default) = default {
            return Ok(default.to_path_buf());
        }
    }

    let expanded = expand_tilde(value);
    let joined = if expanded.is_absolute() {
        expanded
    } else {
        workspace_root.join(expanded)
    };

    let resolved = normalize(&joined);
    let resolved_root = normalize(workspace_root);

    if !allow_external && !is_lexically_under(&resolved, &resolved_root) {
        return Err(CoreError::PathOutsideWorkspace {
            field: field_name.to_string(),
            path: resolved,
            workspace_root: resolved_root,
        });
    }

    Ok(resolved)
}

fn expand_tilde(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    } else if value == "~" {
        if let Some(home) = home_dir() {
            return home;
        }
    }
    PathBuf::from(value)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Resolve symlinks when the path exists; otherwise lexically normalise `..`
/// and `.` components so containment checks never rely on textual prefixes.
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canon) = path.canonicalize() {
        return canon;
    }
    lexical_normalize(path)
}

fn lexical_normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True if `path` is `root` or a descendant of `root`, compared
/// component-wise over already-normalised paths (never a textual/string
/// prefix check, which would wrongly accept `/ws-evil` against root `/ws`).
fn is_lexically_under(path: &Path, root: &Path) -> bool {
    path == root || path.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn relative_path_resolves_under_workspace() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        fs::create_dir_all(root.join("inbox")).unwrap();

        let resolved =
            resolve_workspace_path("inbox/walk.png", &root, false, "input_path", None).unwrap();
        assert!(resolved.starts_with(&root));
    }

    #[test]
    fn absolute_outside_path_rejected_by_default() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        let err =
            resolve_workspace_path("/tmp/outside.png", &root, false, "input_path", None)
                .unwrap_err();
        match err {
            CoreError::PathOutsideWorkspace { field, .. } => assert_eq!(field, "input_path"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn allow_external_relaxes_containment() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        let resolved =
            resolve_workspace_path("/tmp/outside.png", &root, true, "input_path", None).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/outside.png"));
    }

    #[test]
    fn empty_value_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let default = PathBuf::from("/elsewhere/default.png");

        let resolved =
            resolve_workspace_path("", &root, false, "out_dir", Some(&default)).unwrap();
        assert_eq!(resolved, default);
    }

    #[test]
    fn traversal_outside_root_is_rejected() {
        let dir = tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        let err = resolve_workspace_path("../escape.png", &root, false, "input_path", None)
            .unwrap_err();
        assert!(matches!(err, CoreError::PathOutsideWorkspace { .. }));
    }
}
