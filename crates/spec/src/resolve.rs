//! Dataset name → instrument file resolution.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::LineErrorKind;

/// Resolves dataset names to input files below a base path.
///
/// Lookup order for `<name>.<ext>`:
/// 1. the base path itself, when it is a file with that name;
/// 2. `<base_dir>/<name>.<ext>`;
/// 3. a recursive search of `<base_dir>`, entries visited in sorted order.
#[derive(Debug, Clone)]
pub struct DatasetResolver {
    base: PathBuf,
    extension: String,
}

impl DatasetResolver {
    pub fn new(base: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension: String = extension.into();
        Self {
            base: base.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    /// Directory that is searched: the base itself, or its parent when the
    /// base is a file.
    pub fn base_dir(&self) -> &Path {
        if self.base.is_file() {
            self.base.parent().unwrap_or_else(|| Path::new("."))
        } else {
            &self.base
        }
    }

    fn file_name(&self, dataset: &str) -> String {
        format!("{dataset}.{}", self.extension)
    }

    /// Resolve `dataset` to an absolute input path.
    pub fn resolve(&self, dataset: &str) -> Result<PathBuf, LineErrorKind> {
        let file_name = self.file_name(dataset);

        let found = if self.base.is_file()
            && self.base.file_name().is_some_and(|n| n == file_name.as_str())
        {
            Some(self.base.clone())
        } else {
            let direct = self.base_dir().join(&file_name);
            if direct.exists() {
                Some(direct)
            } else {
                search(self.base_dir(), &file_name).map_err(|e| LineErrorKind::Io(e.to_string()))?
            }
        };

        let path = found.ok_or_else(|| LineErrorKind::DatasetNotFound {
            dataset: dataset.to_string(),
            base: self.base_dir().display().to_string(),
        })?;

        fs::canonicalize(&path).map_err(|e| LineErrorKind::Io(format!("{}: {e}", path.display())))
    }
}

/// Depth-first search for an entry named `file_name`. Symlinked directories
/// are not followed.
fn search(dir: &Path, file_name: &str) -> io::Result<Option<PathBuf>> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        if entry.file_name() == file_name {
            return Ok(Some(entry.path()));
        }
        if entry.file_type()?.is_dir() {
            if let Some(found) = search(&entry.path(), file_name)? {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}
