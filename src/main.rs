use clap::{Parser, Subcommand};
use financial_report_pipeline::{
    bundle_results, reset_workspace, HtmlReportRenderer, Ingestor, OrganizationModel,
    PipelineConfig, PipelineError, ReportRenderer, Result, UploadOutcome,
};
use log::error;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "fin-report")]
#[command(about = "Group uploaded financial documents by company and build reports", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the bulk directory
    #[arg(long, global = true)]
    bulk_dir: Option<PathBuf>,

    /// Override the similarity threshold (0-100)
    #[arg(long, global = true)]
    threshold: Option<u8>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Unpack a ZIP into the bulk directory and print the resulting map
    Ingest { archive: PathBuf },

    /// Accept a single upload: ZIPs are ingested, other documents are saved as-is
    Upload { file: PathBuf },

    /// Generate one report per company in the bulk directory
    Process {
        /// Gemini model name
        #[arg(long, default_value = "gemini-2.5-flash")]
        model: String,

        /// Send extracted text and request structured output instead of uploading files
        #[arg(long)]
        inline: bool,

        /// System prompt file replacing the built-in one
        #[arg(long)]
        prompt: Option<PathBuf>,
    },

    /// Zip every generated report into the results archive
    Bundle,

    /// Delete and recreate the working directories
    Reset,
}

#[derive(Serialize)]
struct UploadResult<'a> {
    outcome: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_to: Option<&'a Path>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a financial_report_pipeline::IngestReport>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            if e.is_fatal_configuration() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &cli.bulk_dir {
        config = config.with_bulk_dir(dir);
    }
    if let Some(threshold) = cli.threshold {
        config = config.with_similarity_threshold(threshold);
    }
    config.validate()?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Command::Ingest { archive } => {
            let model = OrganizationModel::ensure(&config.model)?;
            let ingestor = Ingestor::new(config, &model)?;
            let report = ingestor.ingest_path(&archive)?;
            print_json(&report)
        }
        Command::Upload { file } => {
            let model = OrganizationModel::ensure(&config.model)?;
            let ingestor = Ingestor::new(config, &model)?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| PipelineError::InvalidConfig(format!("not a file: {}", file.display())))?;
            let bytes = fs::read(&file)?;
            match ingestor.accept_upload(&name, bytes)? {
                UploadOutcome::Archive(report) => print_json(&UploadResult {
                    outcome: "archive",
                    saved_to: None,
                    report: Some(&report),
                }),
                UploadOutcome::Saved(path) => print_json(&UploadResult {
                    outcome: "saved",
                    saved_to: Some(path.as_path()),
                    report: None,
                }),
            }
        }
        Command::Process {
            model,
            inline,
            prompt,
        } => process(&config, &model, inline, prompt.as_deref()),
        Command::Bundle => {
            fs::create_dir_all(&config.bulk_output_dir)?;
            let renderer = HtmlReportRenderer::new();
            let path = bundle_results(
                &config.bulk_output_dir,
                renderer.extension(),
                &config.results_archive_name,
            )?;
            print_json(&path)
        }
        Command::Reset => reset_workspace(&config),
    }
}

#[cfg(feature = "gemini")]
fn process(config: &PipelineConfig, model: &str, inline: bool, prompt: Option<&Path>) -> Result<()> {
    use financial_report_pipeline::llm::{AnalysisMode, GeminiAnalyzer, GeminiClient};
    use financial_report_pipeline::{BulkDirectoryMap, BulkProcessor};

    let api_key = std::env::var("GEMINI_API_KEY")
        .map_err(|_| PipelineError::InvalidConfig("GEMINI_API_KEY is not set".to_string()))?;

    let mode = if inline {
        AnalysisMode::Inline
    } else {
        AnalysisMode::Attachments
    };
    let mut analyzer = GeminiAnalyzer::new(GeminiClient::new(api_key), model).with_mode(mode);
    if let Some(path) = prompt {
        analyzer = analyzer.with_system_prompt(fs::read_to_string(path)?);
    }

    fs::create_dir_all(&config.bulk_dir)?;
    let map = BulkDirectoryMap::scan(&config.bulk_dir)?;
    let renderer = HtmlReportRenderer::new();
    let summary = BulkProcessor::new(config, &analyzer, &renderer).process(&map)?;
    print_json(&summary)
}

#[cfg(not(feature = "gemini"))]
fn process(_config: &PipelineConfig, _model: &str, _inline: bool, _prompt: Option<&Path>) -> Result<()> {
    Err(PipelineError::InvalidConfig(
        "report generation requires building with the `gemini` feature".to_string(),
    ))
}
