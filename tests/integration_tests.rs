use financial_report_pipeline::*;
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default();
    for (name, data) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

fn bundled_model() -> OrganizationModel {
    let config = ModelConfig {
        model_dir: Path::new(env!("CARGO_MANIFEST_DIR")).join("resources"),
        ..ModelConfig::default()
    };
    OrganizationModel::ensure(&config).expect("bundled organization model loads")
}

fn workspace_config(root: &TempDir) -> PipelineConfig {
    PipelineConfig {
        bulk_dir: root.path().join("bulk"),
        output_dir: root.path().join("output"),
        bulk_output_dir: root.path().join("bulk_output"),
        staging_dir: Some(root.path().join("staging")),
        ..PipelineConfig::default()
    }
}

fn canonical_bulk(config: &PipelineConfig) -> PathBuf {
    fs::canonicalize(&config.bulk_dir).unwrap()
}

fn file_names(files: &[PathBuf]) -> Vec<String> {
    files
        .iter()
        .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

struct StubAnalysis;

impl AnalysisService for StubAnalysis {
    fn analyze(&self, request: &AnalysisRequest) -> Result<ReportContent> {
        Ok(ReportContent::Structured(ReportData {
            title: format!("{} Financial Analysis", request.report_name),
            summary: format!("{} documents reviewed", request.files.len()),
            evidence: "Stub evidence".to_string(),
            score_items: vec![ScoreItem {
                criteria: "Liquidity".to_string(),
                score: "3/5".to_string(),
                description: "Adequate".to_string(),
            }],
            overall_score: "C".to_string(),
            questions: vec![],
        }))
    }
}

#[test]
fn test_pre_grouped_and_loose_files_form_two_groups() {
    let root = tempdir().unwrap();
    let config = workspace_config(&root);
    let model = bundled_model();
    let ingestor = Ingestor::new(config.clone(), &model).unwrap();

    let bytes = build_zip(&[
        ("reports/", b""),
        ("reports/CompanyX/", b""),
        ("reports/CompanyX/a.pdf", b"a"),
        ("reports/CompanyX/b.pdf", b"b"),
        ("Acme Corp Q3.pdf", b"q3"),
    ]);
    let report = ingestor.ingest(&UploadArchive::new("upload.zip", bytes)).unwrap();

    println!("{}", serde_json::to_string_pretty(&report).unwrap());

    let bulk = canonical_bulk(&config);
    assert_eq!(report.map.keys().collect::<Vec<_>>(), vec!["Acme Corp", "reports"]);
    assert_eq!(
        report.map.get("reports").unwrap(),
        &[
            bulk.join("reports/CompanyX/a.pdf"),
            bulk.join("reports/CompanyX/b.pdf")
        ]
    );
    assert_eq!(
        report.map.get("Acme Corp").unwrap(),
        &[bulk.join("Acme Corp/Acme Corp Q3.pdf")]
    );
    assert_eq!(report.company_groups, vec!["Acme Corp".to_string()]);
    assert_eq!(report.staged_files, 3);
    assert!(report.skipped.is_empty());
    assert!(report.map.get(ROOT_KEY).is_none());
}

#[test]
fn test_threshold_boundary_for_similar_file_names() {
    let model = bundled_model();
    let bytes = build_zip(&[
        ("Acme_Corp_2023.pdf", b"a"),
        ("Acme_Corporation_2023.docx", b"b"),
    ]);

    let root = tempdir().unwrap();
    let config = workspace_config(&root).with_similarity_threshold(80);
    let report = Ingestor::new(config, &model)
        .unwrap()
        .ingest(&UploadArchive::new("upload.zip", bytes.clone()))
        .unwrap();
    assert_eq!(report.map.len(), 1);
    assert_eq!(
        file_names(report.map.get("Acme_Corp_2023").unwrap()),
        vec!["Acme_Corp_2023.pdf", "Acme_Corporation_2023.docx"]
    );

    let root = tempdir().unwrap();
    let config = workspace_config(&root).with_similarity_threshold(95);
    let report = Ingestor::new(config, &model)
        .unwrap()
        .ingest(&UploadArchive::new("upload.zip", bytes))
        .unwrap();
    assert_eq!(
        report.map.keys().collect::<Vec<_>>(),
        vec!["Acme_Corp_2023", "Acme_Corporation_2023"]
    );
}

#[test]
fn test_empty_archive_yields_empty_map() {
    let root = tempdir().unwrap();
    let config = workspace_config(&root);
    let model = bundled_model();
    let ingestor = Ingestor::new(config, &model).unwrap();

    let report = ingestor
        .ingest(&UploadArchive::new("empty.zip", build_zip(&[])))
        .unwrap();

    assert!(report.map.is_empty());
    assert_eq!(report.staged_files, 0);
    assert!(report.company_groups.is_empty());
}

#[test]
fn test_corrupt_archive_leaves_bulk_directory_untouched() {
    let root = tempdir().unwrap();
    let config = workspace_config(&root);
    fs::create_dir_all(config.bulk_dir.join("Existing")).unwrap();
    fs::write(config.bulk_dir.join("Existing/keep.pdf"), b"keep").unwrap();
    let before = BulkDirectoryMap::scan(&config.bulk_dir).unwrap();

    let model = bundled_model();
    let ingestor = Ingestor::new(config.clone(), &model).unwrap();
    let err = ingestor
        .ingest(&UploadArchive::new("broken.zip", b"PK\x03\x04 not really a zip".to_vec()))
        .unwrap_err();

    assert!(err.is_archive_error(), "unexpected error: {}", err);
    assert_eq!(BulkDirectoryMap::scan(&config.bulk_dir).unwrap(), before);
    // staging is cleaned up on the failure path too
    let leftovers = fs::read_dir(config.staging_dir.as_ref().unwrap())
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn test_corrupt_archive_does_not_create_bulk_directory() {
    let root = tempdir().unwrap();
    let config = workspace_config(&root);
    let model = bundled_model();
    let ingestor = Ingestor::new(config.clone(), &model).unwrap();

    assert!(ingestor
        .ingest(&UploadArchive::new("broken.zip", b"garbage".to_vec()))
        .is_err());
    assert!(!config.bulk_dir.exists());
}

#[test]
fn test_every_archived_file_appears_exactly_once() {
    let root = tempdir().unwrap();
    let config = workspace_config(&root);
    let model = bundled_model();
    let ingestor = Ingestor::new(config, &model).unwrap();

    let bytes = build_zip(&[
        ("Northwind Traders Ltd balance sheet.pdf", b"1"),
        ("Northwind Traders Ltd P&L.xlsx", b"2"),
        ("Globex Inc 2022.csv", b"3"),
        ("Globex Inc 2023.csv", b"4"),
        ("quarterly summary.docx", b"5"),
        ("Initech/", b""),
        ("Initech/2021/ledger.csv", b"6"),
        ("Initech/2022/ledger.csv", b"7"),
        ("Initech/notes.pdf", b"8"),
    ]);
    let report = ingestor.ingest(&UploadArchive::new("mixed.zip", bytes)).unwrap();

    let all: Vec<&PathBuf> = report.map.iter().flat_map(|(_, files)| files.iter()).collect();
    let unique: BTreeSet<&PathBuf> = all.iter().copied().collect();

    assert_eq!(all.len(), unique.len());
    assert_eq!(report.staged_files, report.map.total_files() + report.skipped.len());
    assert_eq!(report.map.total_files(), 8);
    assert_eq!(report.map.get("Initech").unwrap().len(), 3);
    assert_eq!(report.map.get("quarterly summary").unwrap().len(), 1);
    assert_eq!(report.map.get("Globex Inc").unwrap().len(), 2);
    assert_eq!(report.map.get("Northwind Traders Ltd").unwrap().len(), 2);
    for file in all {
        assert!(file.is_file(), "{} should exist", file.display());
    }
}

#[test]
fn test_entries_with_absolute_or_parent_paths_are_kept_or_reported() {
    let root = tempdir().unwrap();
    let config = workspace_config(&root);
    let model = bundled_model();
    let ingestor = Ingestor::new(config, &model).unwrap();

    let bytes = build_zip(&[
        ("/abs/a.pdf", b"1"),
        ("Beta Inc report.pdf", b"2"),
        ("..", b"3"),
    ]);
    let report = ingestor.ingest(&UploadArchive::new("odd.zip", bytes)).unwrap();

    assert_eq!(report.map.get("abs").map(file_names), Some(vec!["a.pdf".to_string()]));
    assert_eq!(report.map.total_files(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].path, PathBuf::from(".."));
    assert_eq!(report.staged_files, report.map.total_files() + report.skipped.len());
}

#[test]
fn test_collisions_merge_without_overwriting() {
    let root = tempdir().unwrap();
    let config = workspace_config(&root);
    fs::create_dir_all(config.bulk_dir.join("reports")).unwrap();
    fs::write(config.bulk_dir.join("reports/a.pdf"), b"old").unwrap();
    fs::create_dir_all(config.bulk_dir.join("Acme Corp")).unwrap();
    fs::write(config.bulk_dir.join("Acme Corp/Acme Corp Q3.pdf"), b"old q3").unwrap();

    let model = bundled_model();
    let ingestor = Ingestor::new(config.clone(), &model).unwrap();
    let bytes = build_zip(&[
        ("reports/a.pdf", b"new"),
        ("reports/b.pdf", b"b"),
        ("Acme Corp Q3.pdf", b"new q3"),
    ]);
    let report = ingestor.ingest(&UploadArchive::new("again.zip", bytes)).unwrap();

    assert_eq!(
        file_names(report.map.get("reports").unwrap()),
        vec!["a (1).pdf", "a.pdf", "b.pdf"]
    );
    assert_eq!(
        file_names(report.map.get("Acme Corp").unwrap()),
        vec!["Acme Corp Q3 (1).pdf", "Acme Corp Q3.pdf"]
    );
    assert_eq!(fs::read(config.bulk_dir.join("reports/a.pdf")).unwrap(), b"old");
    assert_eq!(fs::read(config.bulk_dir.join("reports/a (1).pdf")).unwrap(), b"new");
    assert_eq!(
        fs::read(config.bulk_dir.join("Acme Corp/Acme Corp Q3 (1).pdf")).unwrap(),
        b"new q3"
    );
}

#[test]
fn test_repeated_ingestion_reuses_company_directories() {
    let root = tempdir().unwrap();
    let config = workspace_config(&root);
    let model = bundled_model();
    let ingestor = Ingestor::new(config, &model).unwrap();

    ingestor
        .ingest(&UploadArchive::new("one.zip", build_zip(&[("Globex Inc 2022.pdf", b"1")])))
        .unwrap();
    let report = ingestor
        .ingest(&UploadArchive::new("two.zip", build_zip(&[("Globex Inc 2023.pdf", b"2")])))
        .unwrap();

    assert_eq!(report.map.len(), 1);
    assert_eq!(
        file_names(report.map.get("Globex Inc").unwrap()),
        vec!["Globex Inc 2022.pdf", "Globex Inc 2023.pdf"]
    );
}

#[test]
fn test_transitive_mode_joins_chained_names() {
    let chained = |a: &str, b: &str| -> f64 {
        let pair = [a, b];
        if (pair.contains(&"A") && pair.contains(&"B")) || (pair.contains(&"B") && pair.contains(&"C"))
        {
            90.0
        } else {
            10.0
        }
    };
    let greedy = Clusterer::new(chained, 80).unwrap();
    assert_eq!(greedy.cluster(&["A", "B", "C"]), vec![vec![0, 1], vec![2]]);

    let transitive = Clusterer::new(chained, 80)
        .unwrap()
        .with_mode(ClusterMode::TransitiveClosure);
    assert_eq!(transitive.cluster(&["A", "B", "C"]), vec![vec![0, 1, 2]]);
}

#[test]
fn test_accept_upload_dispatches_by_extension() {
    let root = tempdir().unwrap();
    let config = workspace_config(&root);
    let model = bundled_model();
    let ingestor = Ingestor::new(config.clone(), &model).unwrap();

    let saved = ingestor.accept_upload("Beta Ltd accounts.pdf", b"pdf".to_vec()).unwrap();
    let saved_path = match saved {
        UploadOutcome::Saved(path) => path,
        other => panic!("expected a saved file, got {:?}", other),
    };
    assert_eq!(saved_path, canonical_bulk(&config).join("Beta Ltd accounts.pdf"));

    let again = ingestor.save_upload("Beta Ltd accounts.pdf", b"pdf 2").unwrap();
    assert_eq!(again, canonical_bulk(&config).join("Beta Ltd accounts (1).pdf"));

    let outcome = ingestor
        .accept_upload("bundle.ZIP", build_zip(&[("Gamma/x.csv", b"x")]))
        .unwrap();
    match outcome {
        UploadOutcome::Archive(report) => {
            assert_eq!(report.map.get("Gamma").unwrap().len(), 1);
            // loose uploads stay at the root until the next archive clusters them
            assert_eq!(report.map.get(ROOT_KEY).unwrap().len(), 2);
        }
        other => panic!("expected an ingested archive, got {:?}", other),
    }
}

#[test]
fn test_config_round_trip_from_json_file() -> anyhow::Result<()> {
    let root = tempdir()?;
    let path = root.path().join("pipeline.json");
    fs::write(
        &path,
        r#"{
            "bulk_dir": "work/bulk",
            "similarity_threshold": 90,
            "cluster_mode": "transitive",
            "model": { "model_name": "custom" }
        }"#,
    )?;

    let config = PipelineConfig::from_json_file(&path)?;
    assert_eq!(config.bulk_dir, PathBuf::from("work/bulk"));
    assert_eq!(config.similarity_threshold, 90);
    assert_eq!(config.cluster_mode, ClusterMode::TransitiveClosure);
    assert_eq!(config.model.model_name, "custom");
    assert_eq!(config.model.fetch_timeout_secs, 30);
    assert_eq!(config.output_dir, PathBuf::from("output"));

    fs::write(&path, r#"{ "similarity_threshold": 101 }"#)?;
    assert!(matches!(
        PipelineConfig::from_json_file(&path),
        Err(PipelineError::InvalidThreshold(101))
    ));
    Ok(())
}

#[test]
fn test_missing_model_is_fatal_before_ingestion() {
    let root = tempdir().unwrap();
    let config = ModelConfig {
        model_dir: root.path().join("models"),
        model_name: "absent".to_string(),
        download_url: None,
        fetch_timeout_secs: 1,
    };
    let err = OrganizationModel::ensure(&config).unwrap_err();
    assert!(err.is_fatal_configuration());
}

#[test]
fn test_end_to_end_ingest_process_bundle_reset() {
    let root = tempdir().unwrap();
    let config = workspace_config(&root);
    let model = bundled_model();
    let ingestor = Ingestor::new(config.clone(), &model).unwrap();

    let bytes = build_zip(&[
        ("Acme Corp Q3.pdf", b"%PDF-stub"),
        ("Acme Corp Q4.pdf", b"%PDF-stub"),
        ("Initech/ledger.csv", b"account,amount\ncash,10\n"),
        ("Initech/readme.txt", b"not sent"),
    ]);
    let report = ingestor.ingest(&UploadArchive::new("batch.zip", bytes)).unwrap();
    ingestor.save_upload("Standalone.csv", b"a,b\n1,2\n").unwrap();
    let map = BulkDirectoryMap::scan(&config.bulk_dir).unwrap();
    assert_eq!(map.len(), report.map.len() + 1);

    let renderer = HtmlReportRenderer::new();
    let summary = BulkProcessor::new(&config, &StubAnalysis, &renderer)
        .process(&map)
        .unwrap();

    let mut produced = file_names(&summary.reports);
    produced.sort();
    assert_eq!(
        produced,
        vec![
            "Acme Corp_report.html",
            "Initech_report.html",
            "Standalone_report.html"
        ]
    );
    assert!(summary.failures.is_empty());
    assert_eq!(file_names(&summary.unsupported), vec!["readme.txt"]);

    let html = fs::read_to_string(config.bulk_output_dir.join("Acme Corp_report.html")).unwrap();
    assert!(html.contains("Acme Corp Financial Analysis"));
    assert!(html.contains("2 documents reviewed"));

    let archive_path = bundle_results(
        &config.bulk_output_dir,
        renderer.extension(),
        &config.results_archive_name,
    )
    .unwrap();
    let mut archive = ZipArchive::new(File::open(&archive_path).unwrap()).unwrap();
    assert_eq!(archive.len(), 3);
    let mut body = String::new();
    archive
        .by_name("Initech_report.html")
        .unwrap()
        .read_to_string(&mut body)
        .unwrap();
    assert!(body.contains("Initech Financial Analysis"));

    reset_workspace(&config).unwrap();
    assert!(BulkDirectoryMap::scan(&config.bulk_dir).unwrap().is_empty());
    assert_eq!(fs::read_dir(&config.bulk_output_dir).unwrap().count(), 0);
}

#[cfg(feature = "gemini")]
#[test]
fn test_extracted_text_from_office_and_csv_documents() {
    let root = tempdir().unwrap();

    let docx = root.path().join("memo.docx");
    fs::write(
        &docx,
        build_zip(&[(
            "word/document.xml",
            br#"<w:document xmlns:w="w"><w:body><w:p><w:r><w:t>Revenue grew</w:t></w:r></w:p><w:p><w:r><w:t>Costs fell</w:t></w:r></w:p><w:p><w:r><w:t>Smith &amp; Sons &#163;4m</w:t></w:r></w:p></w:body></w:document>"#,
        )]),
    )
    .unwrap();

    let csv = root.path().join("ledger.csv");
    fs::write(&csv, "account,amount\ncash,100\n").unwrap();

    let text = combine_text(&[docx, csv, root.path().join("ignored.txt")]);
    assert!(text.contains("Revenue grew"));
    assert!(text.contains("Costs fell"));
    assert!(text.contains("Smith & Sons \u{a3}4m"));
    assert!(text.contains("cash,100"));
}
