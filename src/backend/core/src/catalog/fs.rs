//! File system access used by the catalog.

use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// What the change detector compares between two scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSignature {
    pub modified: Option<SystemTime>,
    pub len: u64,
}

/// One regular file found by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub signature: FileSignature,
}

/// Storage the catalog reads job files from.
pub trait FileSystem: Send + Sync + Debug {
    /// Every regular file below `root`, recursively, ordered by path.
    /// A missing root yields an empty listing.
    fn list_files(&self, root: &Path) -> io::Result<Vec<FileEntry>>;

    /// Regular files directly inside `dir`. A missing directory yields an
    /// empty listing.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<FileEntry>>;

    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    fn is_file(&self, path: &Path) -> bool;
}

/// [`FileSystem`] over the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    fn walk(&self, root: &Path, max_depth: usize) -> io::Result<Vec<FileEntry>> {
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(root)
            .follow_links(true)
            .max_depth(max_depth)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = entry.metadata()?;
            entries.push(FileEntry {
                path: entry.into_path(),
                signature: FileSignature {
                    modified: metadata.modified().ok(),
                    len: metadata.len(),
                },
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

impl FileSystem for LocalFileSystem {
    fn list_files(&self, root: &Path) -> io::Result<Vec<FileEntry>> {
        self.walk(root, usize::MAX)
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<FileEntry>> {
        self.walk(dir, 1)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }
}
