use std::path::{Path, PathBuf};

/// Configuration for the file-backed catalog.
#[derive(Debug, Clone)]
pub struct FileCatalogConfig {
    path: PathBuf,
}

impl FileCatalogConfig {
    /// Create a new config pointing at a yaml share file.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: PathBuf::from(path.as_ref()),
        }
    }

    /// Path of the share file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
