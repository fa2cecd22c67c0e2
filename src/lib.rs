//! # Financial Report Pipeline
//!
//! Ingests bundles of financial documents, groups them into one directory per
//! company, and drives per-company report generation.
//!
//! ## Core Concepts
//!
//! - **Upload Archive**: a ZIP of PDFs, spreadsheets, CSVs and Word documents
//! - **Bulk Directory**: the working area that receives every upload, one
//!   subdirectory per company
//! - **Clustering**: root-level files are named after the organization found in
//!   their file name and grouped by token-set similarity
//! - **Bulk Directory Map**: relative directory name to the files inside it,
//!   the artifact consumed by report generation
//!
//! ## Example
//!
//! ```rust,ignore
//! use financial_report_pipeline::*;
//!
//! let config = PipelineConfig::default();
//! let model = OrganizationModel::ensure(&config.model)?;
//! let ingestor = Ingestor::new(config, &model)?;
//!
//! let report = ingestor.ingest_path(Path::new("upload.zip"))?;
//! for (group, files) in report.map.iter() {
//!     println!("{}: {} files", group, files.len());
//! }
//! ```

pub mod archive;
pub mod clustering;
pub mod config;
#[cfg(feature = "gemini")]
pub mod documents;
pub mod error;
pub mod ingestion;
pub mod names;
pub mod ner;
pub mod processing;
pub mod report;
pub mod similarity;
pub mod utils;
pub mod workspace;

#[cfg(feature = "gemini")]
pub mod llm;

pub use archive::{ArchiveUnpacker, StagedFile, StagingArea, UnpackedArchive, UploadArchive};
pub use clustering::{pick_representative, Cluster, ClusterMode, Clusterer};
pub use config::{ModelConfig, PipelineConfig};
#[cfg(feature = "gemini")]
pub use documents::{combine_text, extract_text, DocumentKind};
pub use error::{PipelineError, Result};
pub use ingestion::*;
pub use names::NameExtractor;
pub use ner::{EntityRecognizer, ModelResource, OrganizationModel};
pub use processing::*;
pub use report::*;
pub use similarity::{token_set_ratio, SimilarityScorer, TokenSetRatio};
pub use workspace::{bundle_results, reset_workspace};
