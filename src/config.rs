use crate::clustering::ClusterMode;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SIMILARITY_THRESHOLD: u8 = 80;
pub const DEFAULT_RESULTS_ARCHIVE: &str = "analysis_results.zip";

/// Settings for the organization model used by the name extractor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding `<model_name>.json`
    pub model_dir: PathBuf,
    pub model_name: String,
    /// Where to fetch the model from when it is missing locally
    pub download_url: Option<String>,
    pub fetch_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("resources"),
            model_name: "org-gazetteer-en".to_string(),
            download_url: None,
            fetch_timeout_secs: 30,
        }
    }
}

impl ModelConfig {
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(format!("{}.json", self.model_name))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Working directory the ingestor fills and the bulk processor reads
    pub bulk_dir: PathBuf,
    /// Single-document analysis output
    pub output_dir: PathBuf,
    /// Rendered reports and the results bundle
    pub bulk_output_dir: PathBuf,
    /// Parent for per-run staging directories; system temp when unset
    pub staging_dir: Option<PathBuf>,
    pub similarity_threshold: u8,
    pub cluster_mode: ClusterMode,
    /// Lower-case extensions, without the dot, sent to the analysis service
    pub allowed_extensions: Vec<String>,
    pub results_archive_name: String,
    pub model: ModelConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bulk_dir: PathBuf::from("bulk"),
            output_dir: PathBuf::from("output"),
            bulk_output_dir: PathBuf::from("bulk_output"),
            staging_dir: None,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            cluster_mode: ClusterMode::Greedy,
            allowed_extensions: ["pdf", "docx", "xlsx", "csv"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            results_archive_name: DEFAULT_RESULTS_ARCHIVE.to_string(),
            model: ModelConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_bulk_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bulk_dir = dir.into();
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: u8) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.similarity_threshold > 100 {
            return Err(PipelineError::InvalidThreshold(self.similarity_threshold));
        }
        if self.results_archive_name.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "results_archive_name must not be empty".to_string(),
            ));
        }
        if self.model.fetch_timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig(
                "model.fetch_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.bulk_dir == self.bulk_output_dir {
            return Err(PipelineError::InvalidConfig(
                "bulk_dir and bulk_output_dir must differ".to_string(),
            ));
        }
        Ok(())
    }

    pub fn is_allowed_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                let ext = ext.to_lowercase();
                self.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext))
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert_eq!(config.similarity_threshold, 80);
        assert_eq!(config.cluster_mode, ClusterMode::Greedy);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_threshold_above_100_is_rejected() {
        let config = PipelineConfig::default().with_similarity_threshold(101);
        match config.validate() {
            Err(PipelineError::InvalidThreshold(101)) => {}
            other => panic!("expected InvalidThreshold, got {:?}", other),
        }
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{ "similarity_threshold": 95, "cluster_mode": "transitive" }"#)
                .unwrap();
        assert_eq!(config.similarity_threshold, 95);
        assert_eq!(config.cluster_mode, ClusterMode::TransitiveClosure);
        assert_eq!(config.bulk_dir, PathBuf::from("bulk"));
        assert_eq!(config.model.fetch_timeout_secs, 30);
    }

    #[test]
    fn test_allowed_extension_is_case_insensitive() {
        let config = PipelineConfig::default();
        assert!(config.is_allowed_extension(Path::new("a/Report.PDF")));
        assert!(config.is_allowed_extension(Path::new("ledger.xlsx")));
        assert!(!config.is_allowed_extension(Path::new("notes.txt")));
        assert!(!config.is_allowed_extension(Path::new("README")));
    }
}
