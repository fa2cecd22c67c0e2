use crate::archive::{ArchiveUnpacker, StagingArea, UnpackedArchive, UploadArchive};
use crate::clustering::{pick_representative, Clusterer, FALLBACK_CLUSTER_NAME};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::names::NameExtractor;
use crate::ner::EntityRecognizer;
use crate::similarity::TokenSetRatio;
use crate::utils::{
    file_name_lossy, file_stem_lossy, files_recursive, merge_directory, move_into_dir,
    sanitize_folder_name, unique_destination,
};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Map key for files sitting directly in the bulk directory.
pub const ROOT_KEY: &str = ".";

/// Relative directory name -> files it contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BulkDirectoryMap {
    groups: BTreeMap<String, Vec<PathBuf>>,
}

impl BulkDirectoryMap {
    /// Walk `bulk_dir` one level deep: root files under [`ROOT_KEY`], every
    /// immediate subdirectory as one group holding all files beneath it.
    pub fn scan(bulk_dir: &Path) -> Result<Self> {
        let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        let mut root_files = Vec::new();

        for entry in fs::read_dir(bulk_dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_file() {
                root_files.push(entry.path());
            } else if file_type.is_dir() {
                let files = files_recursive(&entry.path());
                if files.is_empty() {
                    continue;
                }
                let key = entry.file_name().to_string_lossy().into_owned();
                debug!("Found {} files in '{}'", files.len(), key);
                groups.insert(key, files);
            }
        }

        if !root_files.is_empty() {
            root_files.sort();
            debug!("Found {} files in '{}'", root_files.len(), ROOT_KEY);
            groups.insert(ROOT_KEY.to_string(), root_files);
        }

        Ok(Self { groups })
    }

    pub fn get(&self, key: &str) -> Option<&[PathBuf]> {
        self.groups.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[PathBuf])> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn total_files(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn contains_file(&self, path: &Path) -> bool {
        self.groups.values().flatten().any(|p| p == path)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct IngestReport {
    pub map: BulkDirectoryMap,
    /// Files found in the archive
    pub staged_files: usize,
    /// Directories created or reused for clustered root files
    pub company_groups: Vec<String>,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug)]
pub enum UploadOutcome {
    Archive(IngestReport),
    Saved(PathBuf),
}

/// Turns uploads into a stable bulk-directory layout.
///
/// The organization recognizer is borrowed: load it once (see
/// [`crate::ner::OrganizationModel::ensure`]) and share it across runs.
pub struct Ingestor<'m> {
    config: PipelineConfig,
    extractor: NameExtractor<'m>,
    clusterer: Clusterer<TokenSetRatio>,
}

impl<'m> Ingestor<'m> {
    pub fn new(config: PipelineConfig, recognizer: &'m dyn EntityRecognizer) -> Result<Self> {
        config.validate()?;
        let clusterer = Clusterer::new(TokenSetRatio, config.similarity_threshold)?
            .with_mode(config.cluster_mode);
        Ok(Self {
            extractor: NameExtractor::new(recognizer),
            clusterer,
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Unpack `archive` into the bulk directory and report the resulting layout.
    ///
    /// Archive-level failures are returned before the bulk directory is
    /// touched. Individual files that cannot be moved are logged, listed in
    /// [`IngestReport::skipped`], and left out of the map.
    pub fn ingest(&self, archive: &UploadArchive) -> Result<IngestReport> {
        info!(
            "Ingesting archive '{}' ({} bytes)",
            archive.name,
            archive.bytes.len()
        );
        let staging = StagingArea::create(self.config.staging_dir.as_deref())?;
        let result = self.ingest_staged(archive, &staging);
        staging.close();
        result
    }

    pub fn ingest_path(&self, path: &Path) -> Result<IngestReport> {
        self.ingest(&UploadArchive::from_path(path)?)
    }

    /// Save a loose document into the bulk directory root.
    pub fn save_upload(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let file_name = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                PipelineError::InvalidConfig(format!("upload name '{}' has no file name", name))
            })?;

        let bulk_dir = self.prepare_bulk_dir()?;
        let path = unique_destination(&bulk_dir, &file_name);
        fs::write(&path, bytes)?;
        info!("File {} uploaded successfully to {}", name, path.display());
        Ok(path)
    }

    /// ZIP uploads are ingested; anything else is saved as a loose document.
    pub fn accept_upload(&self, name: &str, bytes: Vec<u8>) -> Result<UploadOutcome> {
        let is_zip = Path::new(name)
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("zip"));
        if is_zip {
            let archive = UploadArchive::new(name, bytes);
            Ok(UploadOutcome::Archive(self.ingest(&archive)?))
        } else {
            Ok(UploadOutcome::Saved(self.save_upload(name, &bytes)?))
        }
    }

    fn prepare_bulk_dir(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.config.bulk_dir)?;
        Ok(fs::canonicalize(&self.config.bulk_dir)?)
    }

    fn ingest_staged(&self, archive: &UploadArchive, staging: &StagingArea) -> Result<IngestReport> {
        let unpacked = ArchiveUnpacker::unpack(archive, staging)?;
        let staged_files = unpacked.staged_files().len() + unpacked.rejected.len();

        let bulk_dir = self.prepare_bulk_dir()?;
        info!("Bulk directory '{}' is ready", bulk_dir.display());

        let mut skipped: Vec<SkippedFile> = unpacked
            .rejected
            .iter()
            .map(|name| SkippedFile {
                path: PathBuf::from(name),
                reason: "archive entry has no usable path".to_string(),
            })
            .collect();
        self.place_subdirectories(&unpacked, &bulk_dir, &mut skipped);

        let company_groups = if unpacked.root_files.is_empty() {
            info!("No root-level files to organize");
            Vec::new()
        } else {
            info!("Organizing {} root-level files", unpacked.root_files.len());
            self.organize_root_files(&unpacked.root_files, &bulk_dir, &mut skipped)
        };

        let map = BulkDirectoryMap::scan(&bulk_dir)?;
        info!(
            "Ingestion of '{}' complete: {} groups, {} files in bulk directory, {} skipped",
            archive.name,
            map.len(),
            map.total_files(),
            skipped.len()
        );

        Ok(IngestReport {
            map,
            staged_files,
            company_groups,
            skipped,
        })
    }

    /// Pre-grouped directories keep their name; an existing directory of the
    /// same name absorbs the incoming files.
    fn place_subdirectories(
        &self,
        unpacked: &UnpackedArchive,
        bulk_dir: &Path,
        skipped: &mut Vec<SkippedFile>,
    ) {
        for subdir in &unpacked.subdirectories {
            let name = file_name_lossy(subdir);
            let dst = group_directory(bulk_dir, &name);

            if !dst.exists() {
                match fs::rename(subdir, &dst) {
                    Ok(()) => {
                        info!("Moved subdirectory '{}' to '{}'", subdir.display(), dst.display());
                        continue;
                    }
                    Err(e) => debug!(
                        "Cannot rename '{}' ({}), moving files individually",
                        subdir.display(),
                        e
                    ),
                }
            } else {
                info!("Merging subdirectory '{}' into existing '{}'", name, dst.display());
            }

            match merge_directory(subdir, &dst) {
                Ok(outcome) => {
                    skipped.extend(
                        outcome
                            .failed
                            .into_iter()
                            .map(|(path, reason)| SkippedFile { path, reason }),
                    );
                }
                Err(e) => {
                    error!("Failed to move subdirectory '{}': {}", name, e);
                    skipped.extend(files_recursive(subdir).into_iter().map(|path| SkippedFile {
                        path,
                        reason: e.to_string(),
                    }));
                }
            }
        }
    }

    /// Cluster loose files by extracted company name and move each cluster
    /// into its own directory.
    fn organize_root_files(
        &self,
        files: &[PathBuf],
        bulk_dir: &Path,
        skipped: &mut Vec<SkippedFile>,
    ) -> Vec<String> {
        let stems: Vec<String> = files.iter().map(|f| file_stem_lossy(f)).collect();
        let names = self.extractor.extract_all(&stems);
        let clusters = self.clusterer.cluster(&names);
        debug!(
            "{} root files formed {} clusters at threshold {}",
            files.len(),
            clusters.len(),
            self.clusterer.threshold()
        );

        let mut groups = Vec::with_capacity(clusters.len());

        for cluster in clusters {
            let member_names: Vec<&str> = cluster.iter().map(|&i| names[i].as_str()).collect();
            let folder = folder_name_for(&pick_representative(&member_names));
            let group_dir = group_directory(bulk_dir, &folder);

            if let Err(e) = fs::create_dir_all(&group_dir) {
                error!("Failed to create folder '{}': {}", group_dir.display(), e);
                skipped.extend(cluster.iter().map(|&i| SkippedFile {
                    path: files[i].clone(),
                    reason: e.to_string(),
                }));
                continue;
            }

            for &i in &cluster {
                match move_into_dir(&files[i], &group_dir) {
                    Ok(dst) => info!("Moved '{}' to '{}'", files[i].display(), dst.display()),
                    Err(e) => {
                        error!(
                            "Failed to move '{}' to '{}': {}",
                            files[i].display(),
                            group_dir.display(),
                            e
                        );
                        skipped.push(SkippedFile {
                            path: files[i].clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }

            groups.push(file_name_lossy(&group_dir));
        }

        groups
    }
}

/// Folder name for a cluster's representative company name.
fn folder_name_for(representative: &str) -> String {
    let sanitized = sanitize_folder_name(representative);
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        warn!(
            "Company name '{}' is not usable as a folder, using '{}'",
            representative, FALLBACK_CLUSTER_NAME
        );
        FALLBACK_CLUSTER_NAME.to_string()
    } else {
        sanitized
    }
}

/// Existing directories are reused; a name taken by a plain file gets a suffix.
fn group_directory(bulk_dir: &Path, name: &str) -> PathBuf {
    let candidate = bulk_dir.join(name);
    if candidate.exists() && !candidate.is_dir() {
        let alternative = unique_destination(bulk_dir, name);
        warn!(
            "'{}' is taken by a file, using '{}'",
            candidate.display(),
            alternative.display()
        );
        return alternative;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_scan_groups_root_and_subdirectories() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("Acme/nested")).unwrap();
        fs::create_dir_all(dir.path().join("Empty")).unwrap();
        fs::write(dir.path().join("loose.pdf"), b"x").unwrap();
        fs::write(dir.path().join("Acme/a.pdf"), b"x").unwrap();
        fs::write(dir.path().join("Acme/nested/b.pdf"), b"x").unwrap();

        let map = BulkDirectoryMap::scan(dir.path()).unwrap();

        assert_eq!(map.keys().collect::<Vec<_>>(), vec![".", "Acme"]);
        assert_eq!(map.get(ROOT_KEY).unwrap(), &[dir.path().join("loose.pdf")]);
        assert_eq!(
            map.get("Acme").unwrap(),
            &[dir.path().join("Acme/a.pdf"), dir.path().join("Acme/nested/b.pdf")]
        );
        assert_eq!(map.total_files(), 3);
        assert!(map.get("Empty").is_none());
    }

    #[test]
    fn test_folder_name_falls_back_when_sanitized_away() {
        assert_eq!(folder_name_for("Acme: Corp"), "Acme Corp");
        assert_eq!(folder_name_for("???"), FALLBACK_CLUSTER_NAME);
        assert_eq!(folder_name_for(".."), FALLBACK_CLUSTER_NAME);
    }

    #[test]
    fn test_group_directory_avoids_plain_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("Acme"), b"file").unwrap();
        fs::create_dir(dir.path().join("Beta")).unwrap();

        assert_eq!(group_directory(dir.path(), "Acme"), dir.path().join("Acme (1)"));
        assert_eq!(group_directory(dir.path(), "Beta"), dir.path().join("Beta"));
        assert_eq!(group_directory(dir.path(), "Gamma"), dir.path().join("Gamma"));
    }

    #[test]
    fn test_map_serializes_as_plain_object() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.csv"), b"x").unwrap();
        let map = BulkDirectoryMap::scan(dir.path()).unwrap();
        let json = serde_json::to_value(&map).unwrap();
        assert!(json.get(".").unwrap().is_array());
    }
}
