//! Path canonicalization and boundary-safe prefix matching.
//!
//! Filesystem policy checks resolve the input to a canonical absolute path
//! without requiring the target to exist: the path is made absolute,
//! lexically normalized (`.` dropped, `..` pops a component), and the longest
//! existing prefix is resolved through the OS so symlinks cannot smuggle a
//! path out of an allowed root. Inputs carrying NUL bytes are rejected
//! outright.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Why a path could not be canonicalized.
#[derive(Debug, Error)]
pub enum PathError {
    #[error("path contains a NUL byte")]
    NulByte,

    #[error("path traversal escapes the filesystem root: {path}")]
    Traversal { path: String },

    #[error("cannot resolve relative path, no working directory: {0}")]
    NoCwd(String),
}

/// Resolve `input` to a canonical absolute path.
///
/// The target does not need to exist; the existing prefix is resolved through
/// `std::fs::canonicalize` (symlinks), the rest is appended lexically.
pub fn canonical_path(input: &str) -> Result<PathBuf, PathError> {
    if input.as_bytes().contains(&0) {
        return Err(PathError::NulByte);
    }

    let raw = Path::new(input);
    let absolute = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        let cwd = std::env::current_dir().map_err(|e| PathError::NoCwd(e.to_string()))?;
        cwd.join(raw)
    };

    let normalized = normalize_lexically(&absolute)?;
    Ok(resolve_existing_prefix(&normalized))
}

/// Drop `.` components and pop one component per `..`.
///
/// A `..` that would pop past the root is a traversal error rather than being
/// silently clamped.
fn normalize_lexically(path: &Path) -> Result<PathBuf, PathError> {
    let mut out = PathBuf::new();
    let mut depth: usize = 0;

    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => {
                out.push(Component::RootDir.as_os_str());
                depth = 0;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(PathError::Traversal {
                        path: path.display().to_string(),
                    });
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(seg) => {
                out.push(seg);
                depth += 1;
            }
        }
    }

    Ok(out)
}

/// Canonicalize the longest existing ancestor and re-append the remainder.
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut tail: Vec<&std::ffi::OsStr> = Vec::new();

    loop {
        if let Ok(resolved) = std::fs::canonicalize(existing) {
            let mut out = resolved;
            for seg in tail.iter().rev() {
                out.push(seg);
            }
            return out;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name);
                existing = parent;
            }
            // Hit the root without finding anything on disk.
            _ => return path.to_path_buf(),
        }
    }
}

/// Does `path` start with `prefix` at a path-component boundary?
///
/// `/app/data` matches `/app/data` and `/app/data/x`, never `/app/database`.
pub fn starts_at_boundary(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path.starts_with('/');
    }
    if !path.starts_with(prefix) {
        return false;
    }
    match path.as_bytes().get(prefix.len()) {
        None => true,
        Some(b'/') => true,
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nul_byte_rejected() {
        let err = canonical_path("/app/data/\0evil").unwrap_err();
        assert!(matches!(err, PathError::NulByte));
    }

    #[test]
    fn dotdot_collapses() {
        let p = canonical_path("/app/data/../../etc/shadow").unwrap();
        assert_eq!(p, PathBuf::from("/etc/shadow"));
    }

    #[test]
    fn curdir_dropped() {
        let p = canonical_path("/app/./data/./notes.txt").unwrap();
        assert_eq!(p, PathBuf::from("/app/data/notes.txt"));
    }

    #[test]
    fn escape_past_root_rejected() {
        let err = canonical_path("/../../etc/passwd").unwrap_err();
        assert!(matches!(err, PathError::Traversal { .. }));
    }

    #[test]
    fn relative_paths_anchor_to_cwd() {
        let p = canonical_path("some/file.txt").unwrap();
        assert!(p.is_absolute());
        assert!(p.ends_with("some/file.txt"));
    }

    #[test]
    fn nonexistent_path_still_resolves() {
        let p = canonical_path("/definitely/not/on/disk/file.bin").unwrap();
        assert_eq!(p, PathBuf::from("/definitely/not/on/disk/file.bin"));
    }

    #[test]
    fn symlinks_in_existing_prefix_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        std::fs::create_dir(&real).unwrap();
        let link = dir.path().join("link");
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(&real, &link).unwrap();
            let p = canonical_path(&format!("{}/new.txt", link.display())).unwrap();
            let expected = std::fs::canonicalize(&real).unwrap().join("new.txt");
            assert_eq!(p, expected);
        }
    }

    #[test]
    fn boundary_exact_match() {
        assert!(starts_at_boundary("/app/data", "/app/data"));
        assert!(starts_at_boundary("/app/data", "/app/data/"));
    }

    #[test]
    fn boundary_child_match() {
        assert!(starts_at_boundary("/app/data/x/y.txt", "/app/data"));
        assert!(starts_at_boundary("/app/data/x/y.txt", "/app/data/"));
    }

    #[test]
    fn boundary_rejects_partial_component() {
        assert!(!starts_at_boundary("/app/database/x", "/app/data"));
        assert!(!starts_at_boundary("/app/data2", "/app/data"));
    }

    #[test]
    fn boundary_root_prefix() {
        assert!(starts_at_boundary("/anything", "/"));
    }
}
