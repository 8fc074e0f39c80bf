//! In-memory cache of library scripts already copied in this session.
//!
//! Library scripts are copied unchanged on every scripts step. During a
//! watch session the step reruns on every `.ts` edit, so copies whose
//! source bytes were seen before are skipped. Nothing is persisted.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct FileCache {
    seen: Mutex<FxHashMap<PathBuf, blake3::Hash>>,
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `path` was recorded earlier with exactly `contents`.
    pub fn is_fresh(&self, path: &Path, contents: &[u8]) -> bool {
        let hash = blake3::hash(contents);
        self.seen.lock().get(path) == Some(&hash)
    }

    /// Remember `contents` as the last copied version of `path`.
    pub fn record(&self, path: &Path, contents: &[u8]) {
        self.seen.lock().insert(path.to_path_buf(), blake3::hash(contents));
    }

    /// Forget everything, e.g. after the output tree was cleaned.
    pub fn clear(&self) {
        self.seen.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
