use crate::config::PipelineConfig;
use crate::error::Result;
use crate::utils::file_name_lossy;
use log::{error, info};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Zip every `*.{extension}` directly under `dir` into `dir/archive_name`,
/// stored flat by file name. Any previous bundle is replaced.
pub fn bundle_results(dir: &Path, extension: &str, archive_name: &str) -> Result<PathBuf> {
    let mut reports: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(extension))
        })
        .collect();
    reports.sort();

    let archive_path = dir.join(archive_name);
    let mut writer = ZipWriter::new(File::create(&archive_path)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for report in &reports {
        writer.start_file(file_name_lossy(report), options)?;
        let mut source = File::open(report)?;
        io::copy(&mut source, &mut writer)?;
    }
    writer.finish()?;

    info!(
        "Zipped {} report files into {}",
        reports.len(),
        archive_path.display()
    );
    Ok(archive_path)
}

/// Delete and recreate the output, bulk and bulk-output directories.
///
/// Every directory is attempted; failures are logged and the first one is
/// returned.
pub fn reset_workspace(config: &PipelineConfig) -> Result<()> {
    let directories = [
        &config.output_dir,
        &config.bulk_dir,
        &config.bulk_output_dir,
    ];
    let mut first_error = None;

    for dir in directories {
        info!("Refreshing directory: {}", dir.display());
        if let Err(e) = refresh_directory(dir) {
            error!("Error deleting or recreating directory {}: {}", dir.display(), e);
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn refresh_directory(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}
