use crate::error::{PipelineError, Result};
use log::{debug, info, warn};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tempfile::TempDir;
use zip::ZipArchive;

const ARCHIVE_COPY_NAME: &str = "upload.zip";
const EXTRACT_DIR_NAME: &str = "extracted";

/// A ZIP upload as received from the caller.
#[derive(Debug, Clone)]
pub struct UploadArchive {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadArchive {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.zip".to_string());
        Ok(Self::new(name, fs::read(path)?))
    }
}

/// A file sitting in the extraction root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
    /// Top-level directory the file came from; `None` for root-level files
    pub source_subdir: Option<String>,
}

impl StagedFile {
    pub fn is_root_level(&self) -> bool {
        self.source_subdir.is_none()
    }
}

/// Top-level classification of an extracted archive.
#[derive(Debug, Default)]
pub struct UnpackedArchive {
    /// Files directly under the extraction root, sorted
    pub root_files: Vec<PathBuf>,
    /// Directories directly under the extraction root, sorted
    pub subdirectories: Vec<PathBuf>,
    /// Names of file entries that could not be placed inside the extraction root
    pub rejected: Vec<String>,
}

impl UnpackedArchive {
    pub fn staged_files(&self) -> Vec<StagedFile> {
        let mut staged: Vec<StagedFile> = self
            .root_files
            .iter()
            .map(|path| StagedFile {
                path: path.clone(),
                source_subdir: None,
            })
            .collect();

        for dir in &self.subdirectories {
            let name = crate::utils::file_name_lossy(dir);
            staged.extend(crate::utils::files_recursive(dir).into_iter().map(|path| {
                StagedFile {
                    path,
                    source_subdir: Some(name.clone()),
                }
            }));
        }

        staged
    }

    pub fn is_empty(&self) -> bool {
        self.root_files.is_empty() && self.subdirectories.is_empty() && self.rejected.is_empty()
    }
}

/// Uniquely named scratch space for one ingestion run. Removed on drop;
/// [`StagingArea::close`] removes it eagerly and logs failures.
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    pub fn create(parent: Option<&Path>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ingest-");
        let dir = match parent {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        debug!("Staging area created at '{}'", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn archive_copy_path(&self) -> PathBuf {
        self.dir.path().join(ARCHIVE_COPY_NAME)
    }

    pub fn extract_root(&self) -> PathBuf {
        self.dir.path().join(EXTRACT_DIR_NAME)
    }

    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!("Staging area '{}' removed", path.display()),
            Err(e) => warn!("Failed to remove staging area '{}': {}", path.display(), e),
        }
    }
}

pub struct ArchiveUnpacker;

impl ArchiveUnpacker {
    /// Extract `archive` into the staging area and classify its top level.
    ///
    /// Either every entry is extracted or an error is returned; callers must
    /// not use the staging contents after a failure.
    pub fn unpack(archive: &UploadArchive, staging: &StagingArea) -> Result<UnpackedArchive> {
        let copy_path = staging.archive_copy_path();
        fs::write(&copy_path, &archive.bytes)?;
        debug!("Temp archive copy written to '{}'", copy_path.display());

        let extract_root = staging.extract_root();
        let mut rejected = Vec::new();
        let extracted = extract_all(&copy_path, &extract_root, &mut rejected);

        if let Err(e) = fs::remove_file(&copy_path) {
            warn!("Failed to delete temp archive '{}': {}", copy_path.display(), e);
        }

        let entries = extracted?;
        info!(
            "Extracted {} entries from '{}' to '{}'",
            entries,
            archive.name,
            extract_root.display()
        );

        let mut unpacked = classify_top_level(&extract_root)?;
        unpacked.rejected = rejected;
        Ok(unpacked)
    }
}

/// Entry name reduced to its normal components: a leading `/` or drive and
/// any `.` or `..` parts are dropped, so `/abs/a.pdf` lands at `abs/a.pdf`.
fn sanitized_entry_path(name: &str) -> Option<PathBuf> {
    if name.contains('\0') {
        return None;
    }
    let path: PathBuf = Path::new(name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();
    if path.as_os_str().is_empty() {
        None
    } else {
        Some(path)
    }
}

fn extract_all(archive_path: &Path, extract_root: &Path, rejected: &mut Vec<String>) -> Result<usize> {
    fs::create_dir_all(extract_root)?;
    let file = File::open(archive_path)?;
    let mut zip = ZipArchive::new(file)?;
    let mut extracted = 0;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let relative = match sanitized_entry_path(entry.name()) {
            Some(path) => path,
            None if entry.is_dir() => continue,
            None => {
                warn!("Skipping archive entry with unusable path '{}'", entry.name());
                rejected.push(entry.name().to_string());
                continue;
            }
        };
        if Path::new(entry.name()) != relative.as_path() {
            debug!("Archive entry '{}' extracted as '{}'", entry.name(), relative.display());
        }
        let out_path = extract_root.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out_file = File::create(&out_path)?;
        io::copy(&mut entry, &mut out_file).map_err(|e| {
            PipelineError::Archive(format!("failed to extract '{}': {}", entry.name(), e))
        })?;
        extracted += 1;
    }

    Ok(extracted)
}

fn classify_top_level(extract_root: &Path) -> Result<UnpackedArchive> {
    let mut unpacked = UnpackedArchive::default();

    for entry in fs::read_dir(extract_root)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_file() {
            unpacked.root_files.push(entry.path());
        } else if file_type.is_dir() {
            unpacked.subdirectories.push(entry.path());
        }
    }

    unpacked.root_files.sort();
    unpacked.subdirectories.sort();
    Ok(unpacked)
}
