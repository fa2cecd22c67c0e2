use crate::error::{PipelineError, Result};
use chrono::Local;
use log::{debug, info};
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScoreItem {
    #[schemars(description = "The criterion being assessed, e.g. 'Liquidity'")]
    pub criteria: String,
    #[schemars(description = "Score awarded for this criterion")]
    pub score: String,
    #[schemars(description = "Why this score was given, citing the documents")]
    pub description: String,
}

/// Structured report returned by the analysis service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReportData {
    pub title: String,
    pub summary: String,
    pub evidence: String,
    pub score_items: Vec<ScoreItem>,
    pub overall_score: String,
    #[schemars(description = "Open questions for the company's management")]
    pub questions: Vec<String>,
}

impl ReportData {
    /// JSON schema handed to services that support structured output.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schema_for!(ReportData)).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum ReportContent {
    Structured(ReportData),
    /// Free-form HTML or markdown produced by the service
    Markup(String),
}

/// Turns analysis content into a report file.
pub trait ReportRenderer {
    /// Extension (without dot) of the files this renderer writes.
    fn extension(&self) -> &str;

    /// Render `content` to `output_path`, returning the written path.
    fn render(&self, content: &ReportContent, output_path: &Path) -> Result<PathBuf>;
}

const REPORT_STYLE: &str = r#"
    body { font-family: Arial, Helvetica, sans-serif; margin: 40px; color: #333333; }
    header { text-align: center; padding-bottom: 20px; border-bottom: 2px solid #eaeaea; }
    h1 { font-size: 24px; color: #1a1a1a; }
    h2 { font-size: 20px; color: #1a1a1a; }
    table { width: 100%; border-collapse: collapse; margin-top: 20px; }
    table, th, td { border: 1px solid #cccccc; }
    th, td { padding: 12px; text-align: left; }
    th { background-color: #f2f2f2; }
    tr:nth-child(even) { background-color: #f9f9f9; }
    footer { text-align: center; margin-top: 40px; font-size: 12px; color: #777777; }
    .company-logo { width: 100px; height: auto; }
"#;

/// Styled standalone HTML reports.
#[derive(Debug, Clone, Default)]
pub struct HtmlReportRenderer {
    logo: Option<PathBuf>,
}

impl HtmlReportRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logo(mut self, logo: impl Into<PathBuf>) -> Self {
        self.logo = Some(logo.into());
        self
    }

    pub fn to_html(&self, content: &ReportContent) -> String {
        let (title, body) = match content {
            ReportContent::Structured(data) => (data.title.clone(), structured_body(data)),
            ReportContent::Markup(markup) => ("Financial Analysis".to_string(), markup_body(markup)),
        };

        let logo = self
            .logo
            .as_ref()
            .map(|path| {
                format!(
                    "<img class=\"company-logo\" src=\"file://{}\" alt=\"Logo\">\n",
                    escape_html(&path.display().to_string())
                )
            })
            .unwrap_or_default();

        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>{}</style>\n</head>\n<body>\n{}{}\n<footer>Generated {}</footer>\n</body>\n</html>\n",
            escape_html(&title),
            REPORT_STYLE,
            logo,
            body,
            Local::now().format("%Y-%m-%d %H:%M")
        )
    }
}

impl ReportRenderer for HtmlReportRenderer {
    fn extension(&self) -> &str {
        "html"
    }

    fn render(&self, content: &ReportContent, output_path: &Path) -> Result<PathBuf> {
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let html = self.to_html(content);
        fs::write(output_path, html).map_err(|e| {
            PipelineError::Render(format!("cannot write '{}': {}", output_path.display(), e))
        })?;
        info!("Report saved at {}", output_path.display());
        Ok(output_path.to_path_buf())
    }
}

fn structured_body(data: &ReportData) -> String {
    let mut html = String::new();
    html.push_str(&format!(
        "<header><h1>{}</h1></header>\n",
        escape_html(&data.title)
    ));
    html.push_str(&format!(
        "<h2>Summary</h2>\n<p>{}</p>\n",
        escape_html(&data.summary)
    ));
    html.push_str(&format!(
        "<h2>Evidence</h2>\n<p>{}</p>\n",
        escape_html(&data.evidence)
    ));

    html.push_str("<h2>Scores</h2>\n<table>\n<tr><th>Criteria</th><th>Score</th><th>Description</th></tr>\n");
    for item in &data.score_items {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(&item.criteria),
            escape_html(&item.score),
            escape_html(&item.description)
        ));
    }
    html.push_str("</table>\n");
    html.push_str(&format!(
        "<p><strong>Overall score:</strong> {}</p>\n",
        escape_html(&data.overall_score)
    ));

    if !data.questions.is_empty() {
        html.push_str("<h2>Questions</h2>\n<ul>\n");
        for question in &data.questions {
            html.push_str(&format!("<li>{}</li>\n", escape_html(question)));
        }
        html.push_str("</ul>\n");
    }

    html
}

/// Services often wrap HTML in a fenced code block; unwrap it, otherwise
/// treat the text as preformatted.
fn markup_body(markup: &str) -> String {
    let fenced = markup.split("```").nth(1).map(|inner| {
        inner
            .strip_prefix("html")
            .unwrap_or(inner)
            .trim()
            .to_string()
    });

    let candidate = fenced.unwrap_or_else(|| markup.trim().to_string());
    if looks_like_html(&candidate) {
        debug!("Embedding HTML returned by the analysis service");
        strip_document_shell(&candidate)
    } else {
        format!("<pre>{}</pre>", escape_html(&candidate))
    }
}

fn looks_like_html(text: &str) -> bool {
    let lower = text.trim_start().to_lowercase();
    lower.starts_with('<')
}

fn strip_document_shell(html: &str) -> String {
    let lower = html.to_lowercase();
    match (lower.find("<body"), lower.rfind("</body>")) {
        (Some(start), Some(end)) if start < end => {
            let after_tag = html[start..].find('>').map(|i| start + i + 1).unwrap_or(start);
            html[after_tag..end].trim().to_string()
        }
        _ => html.to_string(),
    }
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> ReportData {
        ReportData {
            title: "Acme Corp <Review>".to_string(),
            summary: "Stable".to_string(),
            evidence: "FY23 accounts".to_string(),
            score_items: vec![ScoreItem {
                criteria: "Liquidity".to_string(),
                score: "4/5".to_string(),
                description: "Current ratio 1.8".to_string(),
            }],
            overall_score: "B+".to_string(),
            questions: vec!["Why did receivables grow?".to_string()],
        }
    }

    #[test]
    fn test_structured_report_is_escaped_and_styled() {
        let html = HtmlReportRenderer::new().to_html(&ReportContent::Structured(sample()));
        assert!(html.contains("<style>"));
        assert!(html.contains("Acme Corp &lt;Review&gt;"));
        assert!(html.contains("<td>Liquidity</td><td>4/5</td>"));
        assert!(html.contains("<li>Why did receivables grow?</li>"));
    }

    #[test]
    fn test_fenced_html_is_unwrapped() {
        let markup = "Here you go:\n```html\n<!DOCTYPE html><html><head></head><body><h1>Beta</h1></body></html>\n```";
        let html = HtmlReportRenderer::new().to_html(&ReportContent::Markup(markup.to_string()));
        assert!(html.contains("<h1>Beta</h1>"));
        assert_eq!(html.matches("<body>").count(), 1);
    }

    #[test]
    fn test_plain_text_is_preformatted() {
        let html = HtmlReportRenderer::new()
            .to_html(&ReportContent::Markup("Revenue up 5% & margins flat".to_string()));
        assert!(html.contains("<pre>Revenue up 5% &amp; margins flat</pre>"));
    }

    #[test]
    fn test_render_writes_file() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("reports/acme_report.html");
        let renderer = HtmlReportRenderer::new().with_logo("/app/imgs/logo.svg");
        let written = renderer
            .render(&ReportContent::Structured(sample()), &out)
            .unwrap();
        assert_eq!(written, out);
        let html = fs::read_to_string(&out).unwrap();
        assert!(html.contains("file:///app/imgs/logo.svg"));
    }

    #[test]
    fn test_schema_lists_report_fields() {
        let schema = ReportData::json_schema();
        let properties = schema.get("properties").unwrap();
        for field in ["title", "summary", "evidence", "score_items", "overall_score", "questions"] {
            assert!(properties.get(field).is_some(), "missing {}", field);
        }
    }

    #[test]
    fn test_content_round_trips_through_json() {
        let content = ReportContent::Structured(sample());
        let json = serde_json::to_string(&content).unwrap();
        let back: ReportContent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, content);
    }
}
