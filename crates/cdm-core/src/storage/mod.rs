//! Storage gateway: durable-file operations the coordinator and reconciler rely on.
//!
//! The trait is the seam; `FsStorage` is the local-filesystem implementation.
//! Collision-free naming is a default method so every gateway resolves names
//! the same way (`name.ext`, `name (1).ext`, `name (2).ext`, ...).

mod fs;
mod naming;
mod sanitize;

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};

pub use fs::FsStorage;
pub use naming::{numbered_candidate, split_extension};
pub use sanitize::{destination_file_name, sanitize_filename_for_linux};

#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn exists(&self, path: &Path) -> bool;

    /// Create `path`. An already existing directory is not an error.
    async fn create_directory(&self, path: &Path, create_intermediate: bool) -> io::Result<()>;

    /// Move `from` to `to`; `from` no longer exists afterwards.
    async fn move_item(&self, from: &Path, to: &Path) -> io::Result<()>;

    async fn copy_item(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Remove a file or a whole directory tree.
    async fn remove(&self, path: &Path) -> io::Result<()>;

    /// Directory under which each item gets its own `<item_id>/` folder.
    fn downloads_root(&self) -> PathBuf;

    /// First name in `base_name`, `stem (1).ext`, `stem (2).ext`, ... that does
    /// not exist in `directory`. Existence is re-checked for every candidate.
    async fn unique_name(&self, base_name: &str, directory: &Path) -> String {
        let mut candidate = base_name.to_string();
        let mut counter: u32 = 0;
        while self.exists(&directory.join(&candidate)).await {
            counter += 1;
            candidate = numbered_candidate(base_name, counter);
        }
        if counter > 0 {
            tracing::debug!(base = base_name, chosen = %candidate, "resolved name collision");
        }
        candidate
    }
}
