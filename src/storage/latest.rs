//! Bounded FIFO of the most recently written result names.
//!
//! Persisted as one line of space separated names. Re-writing a package that
//! is already in the window moves it to the newest position.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use super::atomic::write_atomic;
use crate::error::DacaResult;

/// Capacity used by the coordinator.
pub const DEFAULT_LATEST_CAPACITY: usize = 20;

pub struct LatestResultsWindow {
    path: PathBuf,
    capacity: usize,
    names: Mutex<VecDeque<String>>,
}

impl std::fmt::Debug for LatestResultsWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatestResultsWindow")
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .field("entries", &self.names.lock().len())
            .finish()
    }
}

impl LatestResultsWindow {
    /// Load the window from `path`; a missing file is an empty window.
    pub fn open<P: AsRef<Path>>(path: P, capacity: usize) -> DacaResult<Self> {
        let path = path.as_ref().to_path_buf();
        let capacity = capacity.max(1);

        let mut names = VecDeque::with_capacity(capacity);
        match std::fs::read_to_string(&path) {
            Ok(line) => {
                for name in line.split_whitespace() {
                    names.retain(|n: &String| n != name);
                    names.push_back(name.to_string());
                    if names.len() > capacity {
                        names.pop_front();
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(Self {
            path,
            capacity,
            names: Mutex::new(names),
        })
    }

    /// Record `name` as the newest entry and persist the window.
    pub fn push(&self, name: &str) -> DacaResult<()> {
        let mut names = self.names.lock();
        names.retain(|n| n != name);
        names.push_back(name.to_string());
        while names.len() > self.capacity {
            names.pop_front();
        }

        let line = names.iter().cloned().collect::<Vec<_>>().join(" ");
        write_atomic(&self.path, line.as_bytes())
    }

    /// Entries oldest first.
    pub fn names(&self) -> Vec<String> {
        self.names.lock().iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_keeps_most_recent() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("latest.txt");
        let window = LatestResultsWindow::open(&path, 3).unwrap();

        for i in 0..7 {
            window.push(&format!("pkg{}", i)).unwrap();
        }

        assert_eq!(window.names(), vec!["pkg4", "pkg5", "pkg6"]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "pkg4 pkg5 pkg6");
    }

    #[test]
    fn test_rewrite_moves_to_newest() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let window = LatestResultsWindow::open(tmp_dir.path().join("latest.txt"), 3).unwrap();
        window.push("a").unwrap();
        window.push("b").unwrap();
        window.push("a").unwrap();
        assert_eq!(window.names(), vec!["b", "a"]);
    }

    #[test]
    fn test_reload_truncates_to_capacity() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = tmp_dir.path().join("latest.txt");
        std::fs::write(&path, "a b c d e").unwrap();
        let window = LatestResultsWindow::open(&path, 2).unwrap();
        assert_eq!(window.names(), vec!["d", "e"]);
    }
}
