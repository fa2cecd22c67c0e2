use crate::documents::{combine_text, extract_text, DocumentKind};
use crate::error::{PipelineError, Result};
use crate::llm::{client::GeminiClient, types::*};
use crate::processing::{AnalysisRequest, AnalysisService};
use crate::report::{ReportContent, ReportData};
use crate::utils::file_name_lossy;
use log::{info, warn};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnalysisMode {
    /// Upload PDFs and CSVs as attachments; the model answers in HTML.
    #[default]
    Attachments,
    /// Send the extracted text of every document and ask for a [`ReportData`].
    Inline,
}

pub struct GeminiAnalyzer {
    client: GeminiClient,
    model: String,
    system_prompt: String,
    mode: AnalysisMode,
}

impl GeminiAnalyzer {
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        let default_prompt = include_str!("../../ANALYSIS_PROMPT.md").to_string();
        Self {
            client,
            model: model.into(),
            system_prompt: default_prompt,
            mode: AnalysisMode::default(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_mode(mut self, mode: AnalysisMode) -> Self {
        self.mode = mode;
        self
    }

    fn analyze_attachments(&self, request: &AnalysisRequest) -> Result<ReportContent> {
        let (uploadable, textual): (Vec<PathBuf>, Vec<PathBuf>) =
            request.files.iter().cloned().partition(|path| {
                matches!(
                    DocumentKind::from_path(path),
                    Some(DocumentKind::Pdf) | Some(DocumentKind::Csv)
                )
            });

        let mut documents = Vec::with_capacity(uploadable.len());
        for path in &uploadable {
            info!("Uploading {}", path.display());
            documents.push(self.client.upload_document(path)?);
        }

        let mut inline_text = String::new();
        for path in &textual {
            match extract_text(path) {
                Ok(text) => {
                    inline_text.push_str(&format!("\n--- {} ---\n", file_name_lossy(path)));
                    inline_text.push_str(&text);
                }
                Err(e) => warn!("Leaving {} out of the request: {}", path.display(), e),
            }
        }

        if documents.is_empty() && inline_text.trim().is_empty() {
            return Err(PipelineError::Analysis(format!(
                "no readable documents for '{}'",
                request.report_name
            )));
        }

        let mut instructions = format!(
            "Write a financial analysis report for '{}' from the attached documents.\n\
            Return a complete HTML document.\n",
            request.report_name
        );
        if !documents.is_empty() {
            instructions.push_str("\nAttached files:\n");
            for (i, doc) in documents.iter().enumerate() {
                instructions.push_str(&format!("{}. \"{}\"\n", i + 1, doc.display_name));
            }
        }
        if !inline_text.is_empty() {
            instructions.push_str("\nContents of the remaining documents:\n");
            instructions.push_str(&inline_text);
        }

        let text = self.client.generate_content(
            &self.model,
            &self.system_prompt,
            vec![Content::user_with_files(instructions, &documents)],
            None,
            "text/plain",
        )?;
        Ok(ReportContent::Markup(text))
    }

    fn analyze_inline(&self, request: &AnalysisRequest) -> Result<ReportContent> {
        let text = combine_text(&request.files);
        if text.trim().is_empty() {
            return Err(PipelineError::Analysis(format!(
                "no text could be extracted for '{}'",
                request.report_name
            )));
        }

        let prompt = format!(
            "Analyze the financial documents of '{}' below.\n\
            Return ONLY valid JSON matching the response schema.\n\n{}",
            request.report_name, text
        );

        let raw_json = self.client.generate_content(
            &self.model,
            &self.system_prompt,
            vec![Content::user_text(prompt)],
            Some(ReportData::json_schema()),
            "application/json",
        )?;
        let data: ReportData = serde_json::from_str(strip_json_fence(&raw_json))?;
        Ok(ReportContent::Structured(data))
    }
}

impl AnalysisService for GeminiAnalyzer {
    fn analyze(&self, request: &AnalysisRequest) -> Result<ReportContent> {
        match self.mode {
            AnalysisMode::Attachments => self.analyze_attachments(request),
            AnalysisMode::Inline => self.analyze_inline(request),
        }
    }
}

fn strip_json_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_json_fence() {
        assert_eq!(strip_json_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_json_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_default_mode_uploads_attachments() {
        let analyzer = GeminiAnalyzer::new(GeminiClient::new("key".to_string()), "gemini-2.5-flash");
        assert_eq!(analyzer.mode, AnalysisMode::Attachments);
        assert!(analyzer.system_prompt.contains("Financial Document Analyst"));
    }

    #[test]
    fn test_inline_without_text_fails_before_network() {
        let analyzer = GeminiAnalyzer::new(GeminiClient::new("key".to_string()), "gemini-2.5-flash")
            .with_mode(AnalysisMode::Inline);
        let request = AnalysisRequest {
            report_name: "Acme".to_string(),
            files: vec![PathBuf::from("missing/nothing.txt")],
        };
        let err = analyzer.analyze(&request).unwrap_err();
        assert!(matches!(err, PipelineError::Analysis(_)));
    }
}
