//! Strategies for files that moved after they were registered

use std::path::{Path, PathBuf};

use tracing::debug;

/// Finds a replacement for a file path that no longer exists
pub trait PathFallback: Send + Sync {
    fn relocate(&self, missing: &Path) -> Option<PathBuf>;
}

/// Never relocates
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFallback;

impl PathFallback for NoFallback {
    fn relocate(&self, _missing: &Path) -> Option<PathBuf> {
        None
    }
}

/// Looks for a file with the same name in each search directory, in order
#[derive(Debug, Clone, Default)]
pub struct RelocatedPathFallback {
    search_dirs: Vec<PathBuf>,
}

impl RelocatedPathFallback {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }
}

impl PathFallback for RelocatedPathFallback {
    fn relocate(&self, missing: &Path) -> Option<PathBuf> {
        let file_name = missing.file_name()?;
        let found = self
            .search_dirs
            .iter()
            .map(|dir| dir.join(file_name))
            .find(|candidate| candidate.is_file());
        debug!(?missing, ?found, "RelocatedPathFallback::relocate: called");
        found
    }
}
