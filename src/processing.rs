use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::ingestion::{BulkDirectoryMap, ROOT_KEY};
use crate::report::{ReportContent, ReportRenderer};
use crate::utils::{file_name_lossy, file_stem_lossy, sanitize_folder_name};
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// One call to the analysis service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    /// Company or file name the report is about
    pub report_name: String,
    pub files: Vec<PathBuf>,
}

/// External document-analysis service.
pub trait AnalysisService {
    fn analyze(&self, request: &AnalysisRequest) -> Result<ReportContent>;
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupFailure {
    pub group: String,
    pub report_name: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct ProcessingSummary {
    pub reports: Vec<PathBuf>,
    pub failures: Vec<GroupFailure>,
    /// Files left out because their type is not accepted
    pub unsupported: Vec<PathBuf>,
}

/// Walks a [`BulkDirectoryMap`]: root files are analyzed one by one, every
/// other group is analyzed as a single batch.
pub struct BulkProcessor<'a> {
    config: &'a PipelineConfig,
    service: &'a dyn AnalysisService,
    renderer: &'a dyn ReportRenderer,
}

impl<'a> BulkProcessor<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        service: &'a dyn AnalysisService,
        renderer: &'a dyn ReportRenderer,
    ) -> Self {
        Self {
            config,
            service,
            renderer,
        }
    }

    pub fn process(&self, map: &BulkDirectoryMap) -> Result<ProcessingSummary> {
        let output_dir = &self.config.bulk_output_dir;
        if !output_dir.is_dir() {
            fs::create_dir_all(output_dir)?;
            info!("Created output directory: {}", output_dir.display());
        }

        let mut summary = ProcessingSummary::default();
        let mut claimed = HashSet::new();

        if let Some(root_files) = map.get(ROOT_KEY) {
            for file in self.supported(ROOT_KEY, root_files, &mut summary) {
                let report_name = file_name_lossy(&file);
                let output = self.output_path(&file_stem_lossy(&file), &mut claimed);
                info!("Processing parent directory file: {}", report_name);
                self.run(ROOT_KEY, report_name, vec![file], &output, &mut summary);
            }
        }

        for (group, files) in map.iter().filter(|(key, _)| *key != ROOT_KEY) {
            let files = self.supported(group, files, &mut summary);
            if files.is_empty() {
                warn!("No supported files found in subdirectory {}", group);
                continue;
            }
            info!(
                "Processing subdirectory '{}' with files: {}",
                group,
                files
                    .iter()
                    .map(|f| file_name_lossy(f))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let output = self.output_path(group, &mut claimed);
            self.run(group, group.to_string(), files, &output, &mut summary);
        }

        info!(
            "Bulk processing finished: {} reports, {} failures",
            summary.reports.len(),
            summary.failures.len()
        );
        Ok(summary)
    }

    fn supported(&self, group: &str, files: &[PathBuf], summary: &mut ProcessingSummary) -> Vec<PathBuf> {
        let mut accepted = Vec::new();
        for file in files {
            if self.config.is_allowed_extension(file) {
                accepted.push(file.clone());
            } else {
                info!("Skipping unsupported file: {} in {}", file_name_lossy(file), group);
                summary.unsupported.push(file.clone());
            }
        }
        accepted
    }

    /// `<base>_report.<ext>`, with a ` (n)` suffix when an earlier report of
    /// this run already took the name. Reports left by previous runs are
    /// overwritten.
    fn output_path(&self, base: &str, claimed: &mut HashSet<PathBuf>) -> PathBuf {
        let base = format!("{}_report", sanitize_folder_name(base));
        let extension = self.renderer.extension();
        let dir = &self.config.bulk_output_dir;

        let mut output = dir.join(format!("{}.{}", base, extension));
        let mut n = 1usize;
        while claimed.contains(&output) {
            output = dir.join(format!("{} ({}).{}", base, n, extension));
            n += 1;
        }
        if n > 1 {
            warn!("Report name for '{}' already used, writing {}", base, output.display());
        }
        claimed.insert(output.clone());
        output
    }

    fn run(
        &self,
        group: &str,
        report_name: String,
        files: Vec<PathBuf>,
        output: &Path,
        summary: &mut ProcessingSummary,
    ) {
        let request = AnalysisRequest { report_name, files };
        let outcome = self
            .service
            .analyze(&request)
            .and_then(|content| self.renderer.render(&content, output));

        match outcome {
            Ok(path) => {
                info!("Saved analysis result to {}", path.display());
                summary.reports.push(path);
            }
            Err(e) => {
                error!("Failed to analyze '{}': {}", request.report_name, e);
                summary.failures.push(GroupFailure {
                    group: group.to_string(),
                    report_name: request.report_name,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Analysis service that always fails; stands in when no backend is compiled in.
pub struct UnavailableService;

impl AnalysisService for UnavailableService {
    fn analyze(&self, request: &AnalysisRequest) -> Result<ReportContent> {
        Err(PipelineError::Analysis(format!(
            "no analysis backend available for '{}'",
            request.report_name
        )))
    }
}
