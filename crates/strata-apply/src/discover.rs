use std::path::{Path, PathBuf};
use strata_core::model::{MigrationFile, MigrationName, Version};
use strata_core::{Error, Result};
use walkdir::WalkDir;

/// Discovered migrations, sorted by ascending version.
///
/// Versions are unique and strictly increasing; gaps are allowed. The set
/// can be iterated as many times as needed.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    files: Vec<MigrationFile>,
}

impl MigrationSet {
    /// Sort `files` by version and reject duplicate versions.
    pub fn from_files(mut files: Vec<MigrationFile>) -> Result<Self> {
        files.sort_by(|a, b| a.version().cmp(b.version()));

        for pair in files.windows(2) {
            if pair[0].version() == pair[1].version() {
                return Err(Error::DuplicateVersion {
                    version: pair[0].version().clone(),
                    first: pair[0].path().to_path_buf(),
                    second: pair[1].path().to_path_buf(),
                });
            }
        }

        Ok(Self { files })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MigrationFile> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, version: &Version) -> Option<&MigrationFile> {
        self.files
            .binary_search_by(|f| f.version().cmp(version))
            .ok()
            .map(|i| &self.files[i])
    }

    /// File names in version order.
    pub fn file_names(&self) -> Vec<&str> {
        self.files.iter().map(MigrationFile::file_name).collect()
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a MigrationFile;
    type IntoIter = std::slice::Iter<'a, MigrationFile>;

    fn into_iter(self) -> Self::IntoIter {
        self.files.iter()
    }
}

/// Finds migration files under a directory.
///
/// Every `*.sql` file, and every file that starts like a versioned name,
/// must follow `V<version>__<description>.sql`. Anything else (a manifest,
/// a README) is ignored. Hidden files and directories are skipped.
#[derive(Debug, Clone)]
pub struct Discoverer {
    dir: PathBuf,
}

impl Discoverer {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Walk the directory and build the ordered migration set.
    pub fn discover(&self) -> Result<MigrationSet> {
        log::debug!("Discovering migrations in {}", self.dir.display());

        if !self.dir.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("migrations directory {} not found", self.dir.display()),
            )));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()));

        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(file_name) = entry.file_name().to_str() else {
                return Err(Error::MalformedName {
                    path: path.to_path_buf(),
                    reason: "file name is not valid UTF-8".to_string(),
                });
            };

            if !MigrationName::looks_like_migration(file_name) {
                log::debug!("Ignoring non-migration file {}", path.display());
                continue;
            }

            files.push(MigrationFile::from_path(path)?);
        }

        let set = MigrationSet::from_files(files)?;
        log::debug!("Discovered {} migrations", set.len());
        Ok(set)
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}
