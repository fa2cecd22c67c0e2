//! Organization recognition.
//!
//! The recognizer is an explicitly constructed capability: build it once
//! with [`OrganizationModel::ensure`], then lend it to every extraction
//! call. Nothing here is global.
//!
//! The model is a gazetteer resource (`<model_dir>/<model_name>.json`):
//!
//! ```json
//! {
//!   "name": "org-gazetteer-en",
//!   "designators": ["Inc", "Corp", "LLC", "Ltd"],
//!   "organizations": ["Northwind Traders"]
//! }
//! ```
//!
//! When the resource is missing locally it is fetched once from the
//! configured URL. A failed fetch leaves the extractor unusable and is
//! reported as a fatal configuration error.

use crate::config::ModelConfig;
use crate::error::{PipelineError, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;

/// Capability: find organization entities in a short piece of text.
pub trait EntityRecognizer {
    /// Entity texts in order of appearance.
    fn organizations(&self, text: &str) -> Vec<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResource {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Legal-form suffixes that close an organization name
    pub designators: Vec<String>,
    /// Names recognized as organizations wherever they appear
    #[serde(default)]
    pub organizations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OrganizationModel {
    name: String,
    designators: HashSet<String>,
    /// Lower-cased token sequences, longest first
    known: Vec<Vec<String>>,
}

impl OrganizationModel {
    pub fn from_resource(resource: ModelResource) -> Result<Self> {
        if resource.designators.is_empty() && resource.organizations.is_empty() {
            return Err(PipelineError::ModelUnavailable {
                model: resource.name,
                reason: "model defines no designators or organizations".to_string(),
            });
        }

        let designators = resource
            .designators
            .iter()
            .map(|d| normalize_token(d))
            .filter(|d| !d.is_empty())
            .collect();

        let mut known: Vec<Vec<String>> = resource
            .organizations
            .iter()
            .map(|org| org.split_whitespace().map(normalize_token).collect::<Vec<_>>())
            .filter(|tokens| !tokens.is_empty())
            .collect();
        known.sort_by(|a, b| b.len().cmp(&a.len()));

        Ok(Self {
            name: resource.name,
            designators,
            known,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let resource: ModelResource = serde_json::from_str(raw)?;
        Self::from_resource(resource)
    }

    /// Load the model, fetching it once if it is not installed.
    pub fn ensure(config: &ModelConfig) -> Result<Self> {
        let path = config.model_path();

        if !path.is_file() {
            warn!(
                "Organization model '{}' not found at '{}'",
                config.model_name,
                path.display()
            );
            fetch_model(config)?;
        }

        let raw = fs::read_to_string(&path).map_err(|e| PipelineError::ModelUnavailable {
            model: config.model_name.clone(),
            reason: format!("cannot read '{}': {}", path.display(), e),
        })?;

        let model = Self::from_json(&raw).map_err(|e| PipelineError::ModelUnavailable {
            model: config.model_name.clone(),
            reason: e.to_string(),
        })?;

        info!(
            "Organization model '{}' loaded ({} designators, {} known organizations)",
            model.name,
            model.designators.len(),
            model.known.len()
        );
        Ok(model)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn is_designator(&self, token: &str) -> bool {
        self.designators.contains(&normalize_token(token))
    }

    fn known_match_len(&self, tokens: &[&str], start: usize) -> Option<usize> {
        self.known
            .iter()
            .find(|org| {
                start + org.len() <= tokens.len()
                    && org
                        .iter()
                        .zip(&tokens[start..])
                        .all(|(want, got)| *want == normalize_token(got))
            })
            .map(|org| org.len())
    }
}

impl EntityRecognizer for OrganizationModel {
    fn organizations(&self, text: &str) -> Vec<String> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let mut entities = Vec::new();
        // start of the current run of capitalized tokens
        let mut run_start: Option<usize> = None;
        let mut i = 0;

        while i < tokens.len() {
            if let Some(len) = self.known_match_len(&tokens, i) {
                entities.push(tokens[i..i + len].join(" "));
                run_start = None;
                i += len;
                continue;
            }

            let token = tokens[i];
            if let Some(start) = run_start {
                if self.is_designator(token) {
                    let mut end = i;
                    while end + 1 < tokens.len() && self.is_designator(tokens[end + 1]) {
                        end += 1;
                    }
                    entities.push(tokens[start..=end].join(" "));
                    run_start = None;
                    i = end + 1;
                    continue;
                }
            }

            run_start = if starts_uppercase(token) && !self.is_designator(token) {
                run_start.or(Some(i))
            } else {
                None
            };
            i += 1;
        }

        entities
    }
}

/// Blocking one-shot download of the model resource, bounded by the configured timeout.
fn fetch_model(config: &ModelConfig) -> Result<()> {
    let url = config
        .download_url
        .as_deref()
        .ok_or_else(|| PipelineError::ModelUnavailable {
            model: config.model_name.clone(),
            reason: "not installed and no download_url configured".to_string(),
        })?;

    info!("Fetching organization model '{}' from {}", config.model_name, url);

    let client = reqwest::blocking::Client::builder()
        .timeout(config.fetch_timeout())
        .build()
        .map_err(|e| PipelineError::ModelFetch(e.to_string()))?;

    let response = client.get(url).send().map_err(|e| {
        if e.is_timeout() {
            PipelineError::ModelFetch(format!(
                "timed out after {}s fetching {}",
                config.fetch_timeout_secs, url
            ))
        } else {
            PipelineError::ModelFetch(e.to_string())
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::ModelFetch(format!(
            "download of {} returned status {}",
            url, status
        )));
    }

    let body = response
        .text()
        .map_err(|e| PipelineError::ModelFetch(e.to_string()))?;

    // refuse to install something that would not load
    OrganizationModel::from_json(&body)
        .map_err(|e| PipelineError::ModelFetch(format!("downloaded model is invalid: {}", e)))?;

    fs::create_dir_all(&config.model_dir)?;
    fs::write(config.model_path(), body)?;
    info!(
        "Installed organization model '{}' at '{}'",
        config.model_name,
        config.model_path().display()
    );
    Ok(())
}

fn normalize_token(token: &str) -> String {
    token
        .trim_matches(|c: char| c == '.' || c == ',' || c == '(' || c == ')')
        .to_lowercase()
}

fn starts_uppercase(token: &str) -> bool {
    token.chars().next().is_some_and(|c| c.is_uppercase())
}
