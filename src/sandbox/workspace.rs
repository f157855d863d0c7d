//! Host-side file operations on a session's bind-mounted workspace.
//!
//! Callers pass workspace-relative paths as a model would write them
//! (`/src/main.py`, `workspace/src/main.py`, `src/main.py` all name the same
//! file). Nothing here may touch anything outside the workspace root.

use std::fs;
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};

use super::error::ErrorKind;
use super::types::{FileEntry, FileType};

/// Mode applied when the caller does not pick one.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Canonical workspace-relative form of a caller-supplied path.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_start_matches('/');
    let rel = if trimmed == "workspace" {
        ""
    } else {
        trimmed.strip_prefix("workspace/").unwrap_or(trimmed)
    };
    if rel.is_empty() {
        ".".to_string()
    } else {
        rel.to_string()
    }
}

/// A path checked against the workspace root.
#[derive(Debug)]
struct Resolved {
    abs: PathBuf,
    /// Lexically cleaned relative path; empty for the root.
    rel: PathBuf,
}

fn outside(path: &str) -> ErrorKind {
    ErrorKind::PathOutsideWorkspace {
        path: path.to_string(),
    }
}

fn resolve(root: &Path, path: &str) -> Result<Resolved, ErrorKind> {
    let normalized = normalize_path(path);
    let mut rel = PathBuf::new();
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !rel.pop() {
                    return Err(outside(path));
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(outside(path)),
        }
    }

    let abs = root.join(&rel);
    let real_root = root.canonicalize()?;

    // Symlinks are checked on the deepest ancestor that exists.
    let mut cursor = Some(abs.as_path());
    while let Some(candidate) = cursor {
        match candidate.canonicalize() {
            Ok(real) => {
                if !real.starts_with(&real_root) {
                    return Err(outside(path));
                }
                break;
            }
            Err(_) => cursor = candidate.parent(),
        }
    }

    Ok(Resolved { abs, rel })
}

fn is_dangling_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink()) && !path.exists()
}

/// Creates `<base>/<session_id>`, failing if it already exists.
///
/// The returned path is absolute so it can be bind-mounted.
pub fn create_workspace(base: &Path, session_id: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(base)?;
    let dir = fs::canonicalize(base)?.join(session_id);
    fs::create_dir(&dir)?;
    Ok(dir)
}

/// Removes a session workspace. A missing directory is not an error.
pub fn remove_workspace(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Writes `content`, creating parent directories, then applies `mode`.
pub fn write_file(root: &Path, path: &str, content: &[u8], mode: u32) -> Result<(), ErrorKind> {
    let target = resolve(root, path)?;
    if target.rel.as_os_str().is_empty() {
        return Err(ErrorKind::InvalidPath {
            path: path.to_string(),
            reason: "cannot write to workspace root".to_string(),
        });
    }
    if is_dangling_symlink(&target.abs) {
        return Err(outside(path));
    }
    if let Some(parent) = target.abs.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&target.abs, content)?;
    fs::set_permissions(&target.abs, fs::Permissions::from_mode(mode))?;
    Ok(())
}

/// Reads at most `max_bytes`, reporting whether the file was longer.
pub fn read_file(root: &Path, path: &str, max_bytes: usize) -> Result<(Vec<u8>, bool), ErrorKind> {
    let target = resolve(root, path)?;
    let meta = fs::metadata(&target.abs)?;
    if meta.is_dir() {
        return Err(ErrorKind::InvalidPath {
            path: path.to_string(),
            reason: "is a directory".to_string(),
        });
    }

    let file = fs::File::open(&target.abs)?;
    let mut content = Vec::new();
    let cap = u64::try_from(max_bytes).unwrap_or(u64::MAX).saturating_add(1);
    file.take(cap).read_to_end(&mut content)?;
    let truncated = content.len() > max_bytes;
    content.truncate(max_bytes);
    Ok((content, truncated))
}

/// Lists a directory, one level or recursively, sorted by path.
pub fn list_files(root: &Path, path: &str, recursive: bool) -> Result<Vec<FileEntry>, ErrorKind> {
    let target = resolve(root, path)?;
    if !fs::metadata(&target.abs)?.is_dir() {
        return Err(ErrorKind::InvalidPath {
            path: path.to_string(),
            reason: "not a directory".to_string(),
        });
    }

    let mut entries = Vec::new();
    walk(&target.abs, &target.rel, recursive, &mut entries)?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn walk(dir: &Path, rel: &Path, recursive: bool, out: &mut Vec<FileEntry>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.path().symlink_metadata()?;
        let child_rel = rel.join(entry.file_name());

        let file_type = if meta.file_type().is_symlink() {
            FileType::Symlink
        } else if meta.is_dir() {
            FileType::Dir
        } else {
            FileType::File
        };

        out.push(FileEntry {
            path: child_rel.to_string_lossy().into_owned(),
            file_type,
            size: meta.len(),
            mode: meta.permissions().mode() & 0o7777,
            mtime_unix: meta
                .modified()
                .map(|t| DateTime::<Utc>::from(t).timestamp())
                .unwrap_or_default(),
        });

        if recursive && file_type == FileType::Dir {
            walk(&entry.path(), &child_rel, recursive, out)?;
        }
    }
    Ok(())
}

/// Deletes a file or directory. Non-empty directories need `recursive`.
pub fn delete_file(root: &Path, path: &str, recursive: bool) -> Result<(), ErrorKind> {
    let target = resolve(root, path)?;
    if target.rel.as_os_str().is_empty() {
        return Err(ErrorKind::InvalidPath {
            path: path.to_string(),
            reason: "cannot delete workspace root".to_string(),
        });
    }

    let meta = fs::symlink_metadata(&target.abs)?;
    if meta.is_dir() {
        if recursive {
            fs::remove_dir_all(&target.abs)?;
        } else {
            if fs::read_dir(&target.abs)?.next().is_some() {
                return Err(ErrorKind::InvalidPath {
                    path: path.to_string(),
                    reason: "directory not empty (set recursive)".to_string(),
                });
            }
            fs::remove_dir(&target.abs)?;
        }
    } else {
        fs::remove_file(&target.abs)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_path_equivalences() {
        for p in ["/src/main.py", "workspace/src/main.py", "/workspace/src/main.py", "src/main.py"] {
            assert_eq!(normalize_path(p), "src/main.py", "input {p}");
        }
        for p in ["", "/", "workspace", "/workspace", "."] {
            assert_eq!(normalize_path(p), ".", "input {p:?}");
        }
        // Only a whole leading segment is stripped.
        assert_eq!(normalize_path("workspaces/a"), "workspaces/a");
    }

    #[test]
    fn test_equivalent_paths_name_same_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "/workspace/a/b.txt", b"hi", DEFAULT_FILE_MODE).unwrap();
        let (content, truncated) = read_file(dir.path(), "a/b.txt", 100).unwrap();
        assert_eq!(content, b"hi");
        assert!(!truncated);
        assert!(dir.path().join("a/b.txt").is_file());
    }

    #[test]
    fn test_parent_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let err = write_file(dir.path(), "../evil.txt", b"x", DEFAULT_FILE_MODE).unwrap_err();
        assert!(matches!(err, ErrorKind::PathOutsideWorkspace { .. }));
        let err = read_file(dir.path(), "a/../../etc/passwd", 10).unwrap_err();
        assert!(matches!(err, ErrorKind::PathOutsideWorkspace { .. }));

        // Climbing back down inside the root is fine.
        write_file(dir.path(), "a/../b.txt", b"x", DEFAULT_FILE_MODE).unwrap();
        assert!(dir.path().join("b.txt").exists());
    }

    #[test]
    fn test_symlink_escape_rejected() {
        let outside_dir = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside_dir.path(), dir.path().join("link")).unwrap();

        let err = write_file(dir.path(), "link/x.txt", b"x", DEFAULT_FILE_MODE).unwrap_err();
        assert!(matches!(err, ErrorKind::PathOutsideWorkspace { .. }));
        assert!(!outside_dir.path().join("x.txt").exists());
    }

    #[test]
    fn test_write_applies_mode() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "run.sh", b"#!/bin/sh\n", 0o755).unwrap();
        let mode = fs::metadata(dir.path().join("run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_read_truncates_and_rejects_dirs() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "big.txt", b"0123456789", DEFAULT_FILE_MODE).unwrap();
        let (content, truncated) = read_file(dir.path(), "big.txt", 4).unwrap();
        assert_eq!(content, b"0123");
        assert!(truncated);

        let (content, truncated) = read_file(dir.path(), "big.txt", 10).unwrap();
        assert_eq!(content.len(), 10);
        assert!(!truncated);

        fs::create_dir(dir.path().join("sub")).unwrap();
        let err = read_file(dir.path(), "sub", 10).unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidPath { .. }));
    }

    #[test]
    fn test_read_with_max_limit_returns_whole_file() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "f.txt", b"hello", DEFAULT_FILE_MODE).unwrap();
        let (content, truncated) = read_file(dir.path(), "f.txt", usize::MAX).unwrap();
        assert_eq!(content, b"hello");
        assert!(!truncated);
    }

    #[test]
    fn test_list_one_level_and_recursive() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "b.txt", b"bb", DEFAULT_FILE_MODE).unwrap();
        write_file(dir.path(), "a/c.txt", b"c", DEFAULT_FILE_MODE).unwrap();

        let top = list_files(dir.path(), "/", false).unwrap();
        let paths: Vec<&str> = top.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "b.txt"]);
        assert_eq!(top[0].file_type, FileType::Dir);
        assert_eq!(top[1].size, 2);
        assert_eq!(top[1].mode, 0o644);

        let all = list_files(dir.path(), ".", true).unwrap();
        let paths: Vec<&str> = all.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a", "a/c.txt", "b.txt"]);

        let sub = list_files(dir.path(), "workspace/a", false).unwrap();
        assert_eq!(sub[0].path, "a/c.txt");
    }

    #[test]
    fn test_delete_root_refused() {
        let dir = TempDir::new().unwrap();
        for p in [".", "/", "workspace", ""] {
            let err = delete_file(dir.path(), p, true).unwrap_err();
            assert!(matches!(err, ErrorKind::InvalidPath { .. }), "input {p:?}");
        }
        assert!(dir.path().exists());
    }

    #[test]
    fn test_delete_non_empty_dir_requires_recursive() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "d/f.txt", b"x", DEFAULT_FILE_MODE).unwrap();

        let err = delete_file(dir.path(), "d", false).unwrap_err();
        assert!(matches!(err, ErrorKind::InvalidPath { .. }));
        assert!(dir.path().join("d/f.txt").exists());

        delete_file(dir.path(), "d", true).unwrap();
        assert!(!dir.path().join("d").exists());

        fs::create_dir(dir.path().join("empty")).unwrap();
        delete_file(dir.path(), "empty", false).unwrap();
        assert!(!dir.path().join("empty").exists());
    }

    #[test]
    fn test_create_workspace_fails_if_exists() {
        let base = TempDir::new().unwrap();
        let ws = create_workspace(base.path(), "abc").unwrap();
        assert!(ws.is_dir());
        assert!(create_workspace(base.path(), "abc").is_err());

        remove_workspace(&ws).unwrap();
        assert!(!ws.exists());
        remove_workspace(&ws).unwrap();
    }
}
