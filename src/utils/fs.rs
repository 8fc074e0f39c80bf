//! Filesystem helpers shared by every step.

use anyhow::{Context, Result};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// Result of producing one output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Destination created or rewritten.
    Written,
    /// Destination already held identical bytes and was left alone.
    Unchanged,
}

/// Normalize a path to absolute form for reliable comparison.
///
/// Config paths are canonicalized when they exist; watcher events carry
/// canonical paths too, so both sides compare equal.
pub fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
        }
    })
}

/// Collect all files below `dir`, sorted for deterministic processing order.
pub fn collect_all_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// Write `contents` to `path` unless the file already holds exactly these bytes.
///
/// Leaving identical files untouched keeps their mtime, so rebuilding an
/// unchanged tree is invisible to the browser cache and to the watcher.
pub fn write_if_changed(path: &Path, contents: &[u8]) -> Result<Outcome> {
    if fs::read(path).is_ok_and(|existing| existing == contents) {
        return Ok(Outcome::Unchanged);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(Outcome::Written)
}

/// Copy `src` to `dst` through [`write_if_changed`].
pub fn copy_if_changed(src: &Path, dst: &Path) -> Result<Outcome> {
    let contents = fs::read(src).with_context(|| format!("Failed to read {}", src.display()))?;
    write_if_changed(dst, &contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_path_relative() {
        let path = normalize_path(Path::new("kiln-missing-dir/file.txt"));
        assert!(path.is_absolute());
        assert!(path.ends_with("kiln-missing-dir/file.txt"));
    }

    #[test]
    fn test_normalize_path_existing() {
        let dir = TempDir::new().unwrap();
        let path = normalize_path(dir.path());
        assert_eq!(path, dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_collect_all_files_sorted_and_recursive() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b/c")).unwrap();
        fs::write(dir.path().join("b/c/z.txt"), "").unwrap();
        fs::write(dir.path().join("a.txt"), "").unwrap();

        let files = collect_all_files(dir.path());
        assert_eq!(files, vec![dir.path().join("a.txt"), dir.path().join("b/c/z.txt")]);
    }

    #[test]
    fn test_write_if_changed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/out.css");

        assert_eq!(write_if_changed(&path, b"a{}").unwrap(), Outcome::Written);
        let mtime = fs::metadata(&path).unwrap().modified().unwrap();

        assert_eq!(write_if_changed(&path, b"a{}").unwrap(), Outcome::Unchanged);
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), mtime);

        assert_eq!(write_if_changed(&path, b"b{}").unwrap(), Outcome::Written);
        assert_eq!(fs::read(&path).unwrap(), b"b{}");
    }

    #[test]
    fn test_copy_if_changed_missing_source() {
        let dir = TempDir::new().unwrap();
        let result = copy_if_changed(&dir.path().join("nope"), &dir.path().join("out"));
        assert!(result.is_err());
        assert!(!dir.path().join("out").exists());
    }
}
