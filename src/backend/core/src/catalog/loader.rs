//! Loading of job files and the global configuration merged underneath them.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::decoder::ConfigDecoder;
use super::fs::{FileEntry, FileSystem};
use super::spec::{JobConfig, LoadedConfig, JOB_CONFIG_FILE_PATH_KEY};
use super::CatalogError;
use crate::config::CatalogConfig;

/// Role of a recognized file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Job,
    Global,
}

/// Reads job files below a root directory.
///
/// Global files found in the directories from the root down to a job's own
/// directory are merged underneath the job: deeper directories win, the job
/// file wins over all of them, and the caller-supplied base is the bottom.
#[derive(Debug, Clone)]
pub struct SpecFileLoader {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    decoder: Arc<dyn ConfigDecoder>,
    job_extensions: BTreeSet<String>,
    global_extension: String,
}

impl SpecFileLoader {
    pub fn new(
        config: &CatalogConfig,
        fs: Arc<dyn FileSystem>,
        decoder: Arc<dyn ConfigDecoder>,
    ) -> Self {
        Self {
            root: config.job_config_dir.clone(),
            fs,
            decoder,
            job_extensions: config.job_extensions(),
            global_extension: config.global_extension(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Classify `path` by extension, case-insensitively.
    pub fn file_kind(&self, path: &Path) -> Option<FileKind> {
        let extension = path.extension()?.to_string_lossy().to_lowercase();
        if extension == self.global_extension {
            Some(FileKind::Global)
        } else if self.job_extensions.contains(&extension) {
            Some(FileKind::Job)
        } else {
            None
        }
    }

    pub fn is_job_file(&self, path: &Path) -> bool {
        self.file_kind(path) == Some(FileKind::Job)
    }

    /// Every job and global file below the root.
    pub fn list_recognized(&self) -> io::Result<Vec<FileEntry>> {
        let mut files = self.fs.list_files(&self.root)?;
        files.retain(|f| self.file_kind(&f.path).is_some());
        Ok(files)
    }

    /// Load one job file.
    pub fn load_file(
        &self,
        path: &Path,
        base: &JobConfig,
        load_global: bool,
    ) -> Result<LoadedConfig, CatalogError> {
        let mut cache = HashMap::new();
        self.load_with_cache(path, base, load_global, &mut cache)
    }

    /// Load every job file below `dir`. Files that cannot be read or decoded
    /// are skipped with a warning; only a failed listing is an error.
    pub fn load_recursively(
        &self,
        dir: &Path,
        base: &JobConfig,
        load_global: bool,
    ) -> Result<Vec<LoadedConfig>, CatalogError> {
        let files = self.fs.list_files(dir).map_err(|source| CatalogError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut cache = HashMap::new();
        let mut loaded = Vec::new();
        for file in files.iter().filter(|f| self.is_job_file(&f.path)) {
            match self.load_with_cache(&file.path, base, load_global, &mut cache) {
                Ok(config) => loaded.push(config),
                Err(e) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "Skipping job file");
                }
            }
        }
        Ok(loaded)
    }

    fn load_with_cache(
        &self,
        path: &Path,
        base: &JobConfig,
        load_global: bool,
        cache: &mut HashMap<PathBuf, JobConfig>,
    ) -> Result<LoadedConfig, CatalogError> {
        let underlay = match (load_global, path.parent()) {
            (true, Some(dir)) => self.global_config_for(dir, base, cache)?,
            _ => base.clone(),
        };

        let mut config = self.decode(path)?.merged_over(&underlay);
        config.insert(JOB_CONFIG_FILE_PATH_KEY, path.to_string_lossy());

        Ok(LoadedConfig {
            path: path.to_path_buf(),
            config,
        })
    }

    /// Merged global configuration in effect for jobs in `dir`.
    fn global_config_for(
        &self,
        dir: &Path,
        base: &JobConfig,
        cache: &mut HashMap<PathBuf, JobConfig>,
    ) -> Result<JobConfig, CatalogError> {
        let mut chain: Vec<&Path> = dir
            .ancestors()
            .take_while(|a| a.starts_with(&self.root))
            .collect();
        if chain.is_empty() {
            chain.push(dir);
        }
        chain.reverse();

        let mut merged = base.clone();
        for level in chain {
            if let Some(hit) = cache.get(level) {
                merged = hit.clone();
                continue;
            }

            let globals = self.fs.list_dir(level).map_err(|source| CatalogError::Io {
                path: level.to_path_buf(),
                source,
            })?;
            for global in globals
                .iter()
                .filter(|f| self.file_kind(&f.path) == Some(FileKind::Global))
            {
                merged = self.decode(&global.path)?.merged_over(&merged);
            }
            cache.insert(level.to_path_buf(), merged.clone());
        }
        Ok(merged)
    }

    fn decode(&self, path: &Path) -> Result<JobConfig, CatalogError> {
        let contents = self.fs.read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        self.decoder
            .decode(path, &contents)
            .map_err(|e| CatalogError::Decode {
                path: path.to_path_buf(),
                details: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::decoder::FormatDecoder;
    use crate::catalog::fs::LocalFileSystem;
    use tempfile::TempDir;

    fn loader(root: &Path) -> SpecFileLoader {
        SpecFileLoader::new(
            &CatalogConfig::new(root),
            Arc::new(LocalFileSystem),
            Arc::new(FormatDecoder::default()),
        )
    }

    #[test]
    fn test_file_kind() {
        let loader = loader(Path::new("/jobs"));
        assert_eq!(loader.file_kind(Path::new("/jobs/a.pull")), Some(FileKind::Job));
        assert_eq!(loader.file_kind(Path::new("/jobs/a.JOB")), Some(FileKind::Job));
        assert_eq!(loader.file_kind(Path::new("/jobs/x.yml")), Some(FileKind::Job));
        assert_eq!(
            loader.file_kind(Path::new("/jobs/common.properties")),
            Some(FileKind::Global)
        );
        assert_eq!(loader.file_kind(Path::new("/jobs/readme.md")), None);
        assert_eq!(loader.file_kind(Path::new("/jobs/noext")), None);
    }

    #[test]
    fn test_global_configs_merge_deeper_wins() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("root.properties"), "owner=root\nregion=us\nlevel=0\n").unwrap();
        std::fs::write(root.join("sub/sub.properties"), "level=1\n").unwrap();
        std::fs::write(root.join("sub/b.pull"), "job.name=b\nregion=eu\n").unwrap();

        let base = JobConfig::new().with("owner", "system").with("env", "prod");
        let loaded = loader(root).load_file(&root.join("sub/b.pull"), &base, true).unwrap();

        assert_eq!(loaded.config.get("env"), Some("prod"));
        assert_eq!(loaded.config.get("owner"), Some("root"));
        assert_eq!(loaded.config.get("level"), Some("1"));
        assert_eq!(loaded.config.get("region"), Some("eu"));
        assert_eq!(
            loaded.config.get(JOB_CONFIG_FILE_PATH_KEY),
            Some(root.join("sub/b.pull").to_string_lossy().as_ref())
        );
    }

    #[test]
    fn test_load_without_globals() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("g.properties"), "owner=root\n").unwrap();
        std::fs::write(dir.path().join("a.pull"), "job.name=a\n").unwrap();

        let loaded = loader(dir.path())
            .load_file(&dir.path().join("a.pull"), &JobConfig::new(), false)
            .unwrap();
        assert_eq!(loaded.config.get("owner"), None);
    }

    #[test]
    fn test_load_recursively_skips_bad_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("a.pull"), "job.name=a\n").unwrap();
        std::fs::write(root.join("sub/b.pull"), "job.name=b\n").unwrap();
        std::fs::write(root.join("broken.json"), "{ nope").unwrap();
        std::fs::write(root.join("notes.txt"), "ignored").unwrap();

        let loaded = loader(root).load_recursively(root, &JobConfig::new(), true).unwrap();
        let paths: Vec<_> = loaded.iter().map(|l| l.path.clone()).collect();
        assert_eq!(paths, vec![root.join("a.pull"), root.join("sub/b.pull")]);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = loader(dir.path()).load_file(
            &dir.path().join("missing.pull"),
            &JobConfig::new(),
            true,
        );
        assert!(matches!(result, Err(CatalogError::Io { .. })));
    }
}
