//! Output directory preparation before a job is (re)launched.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

/// Extensions of visual / report byproducts the engine regenerates on every run.
pub const BYPRODUCT_EXTENSIONS: [&str; 5] = ["png", "svg", "pdf", "html", "log"];

/// Remove stale byproducts and the stale result artifact from `dir`, then
/// make sure `dir` exists.
///
/// Only files directly inside `dir` are considered. Returns the number of
/// files removed.
pub fn prepare_output_dir(dir: &Path, artifact: &Path) -> io::Result<usize> {
    let mut removed = 0;

    if dir.is_dir() {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            let is_byproduct = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| {
                    BYPRODUCT_EXTENSIONS
                        .iter()
                        .any(|b| b.eq_ignore_ascii_case(ext))
                });
            if is_byproduct || path == artifact {
                fs::remove_file(&path)?;
                debug!(path = %path.display(), "removed stale output");
                removed += 1;
            }
        }
    }

    fs::create_dir_all(dir)?;
    Ok(removed)
}
