use crate::error::Result;
use log::{debug, error};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const INVALID_FOLDER_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Strip characters that are not allowed in folder names and normalize whitespace.
pub fn sanitize_folder_name(name: &str) -> String {
    let stripped: String = name
        .chars()
        .filter(|c| !INVALID_FOLDER_CHARS.contains(c))
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First free path for `file_name` inside `dir`, appending ` (n)` before the
/// extension when the plain name is taken.
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let extension = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut n = 1usize;
    loop {
        let candidate = dir.join(format!("{} ({}){}", stem, n, extension));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Move a single file, falling back to copy + remove across filesystems.
pub fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(
                "rename '{}' -> '{}' failed ({}), copying instead",
                src.display(),
                dst.display(),
                rename_err
            );
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
    }
}

/// Move a file into `dir` without overwriting anything already there.
pub fn move_into_dir(src: &Path, dir: &Path) -> io::Result<PathBuf> {
    let file_name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let dst = unique_destination(dir, &file_name);
    move_file(src, &dst)?;
    Ok(dst)
}

/// Outcome of relocating a directory tree file by file.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    pub moved: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

/// Move every file under `src` into the same relative location under `dst`.
///
/// Existing files in `dst` are kept; incoming files that collide get a
/// numbered suffix. A failed file is recorded and the walk continues.
pub fn merge_directory(src: &Path, dst: &Path) -> Result<MergeOutcome> {
    fs::create_dir_all(dst)?;
    let mut outcome = MergeOutcome::default();

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
                error!("Failed to read '{}': {}", path.display(), e);
                outcome.failed.push((path, e.to_string()));
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target_dir = match relative.parent() {
            Some(parent) => dst.join(parent),
            None => dst.to_path_buf(),
        };

        match move_into_dir(entry.path(), &target_dir) {
            Ok(moved_to) => {
                debug!("Moved '{}' to '{}'", entry.path().display(), moved_to.display());
                outcome.moved.push(moved_to);
            }
            Err(e) => {
                error!(
                    "Failed to move '{}' into '{}': {}",
                    entry.path().display(),
                    target_dir.display(),
                    e
                );
                outcome.failed.push((entry.path().to_path_buf(), e.to_string()));
            }
        }
    }

    Ok(outcome)
}

/// All regular files under `dir`, sorted, at any depth.
pub fn files_recursive(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

pub fn file_stem_lossy(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
