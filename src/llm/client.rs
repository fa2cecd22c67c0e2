use crate::error::{PipelineError, Result};
use crate::llm::types::*;
use log::debug;
use reqwest::blocking::Client;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_UPLOAD_URL: &str = "https://generativelanguage.googleapis.com/upload/v1beta/files";
const MAX_STATE_POLLS: usize = 90;

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn upload_document(&self, path: &Path) -> Result<RemoteDocument> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::Analysis("Invalid file name".to_string()))?;

        let file_size = fs::metadata(path)?.len();
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();
        let file_bytes = fs::read(path)?;

        let start_url = format!("{}?key={}", GEMINI_UPLOAD_URL, self.api_key);
        let metadata = json!({ "file": { "display_name": file_name } });

        let init_res = self
            .client
            .post(&start_url)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", file_size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", &mime_type)
            .header("Content-Type", "application/json")
            .json(&metadata)
            .send()?;

        let init_status = init_res.status();
        if !init_status.is_success() {
            let error_text = init_res.text()?;
            return Err(PipelineError::Analysis(format!(
                "Upload init failed (status {}): {}",
                init_status, error_text
            )));
        }

        let upload_url = init_res
            .headers()
            .get("x-goog-upload-url")
            .ok_or_else(|| PipelineError::Analysis("No upload URL in headers".to_string()))?
            .to_str()
            .map_err(|e| PipelineError::Analysis(e.to_string()))?
            .to_string();

        let upload_res = self
            .client
            .post(&upload_url)
            .header("Content-Length", file_size.to_string())
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(file_bytes)
            .send()?;

        let upload_status = upload_res.status();
        if !upload_status.is_success() {
            let error_text = upload_res.text()?;
            return Err(PipelineError::Analysis(format!(
                "File upload failed (status {}): {}",
                upload_status, error_text
            )));
        }

        let upload_body: serde_json::Value = upload_res.json()?;
        let file_obj = upload_body
            .get("file")
            .ok_or_else(|| PipelineError::Analysis("Upload response missing 'file'".to_string()))?;

        let uri = json_str(file_obj, "uri")?;
        let name = json_str(file_obj, "name")?;
        let mut state = file_obj
            .get("state")
            .and_then(|v| v.as_str())
            .unwrap_or("PROCESSING")
            .to_string();

        let mut polls = 0;
        while state != "ACTIVE" {
            if polls >= MAX_STATE_POLLS {
                return Err(PipelineError::Analysis(format!(
                    "'{}' still {} after {} checks",
                    file_name, state, polls
                )));
            }
            polls += 1;

            let check_url = format!("{}/{}?key={}", self.base_url, name, self.api_key);
            let check_json: serde_json::Value = self.client.get(&check_url).send()?.json()?;
            let file_obj = check_json.get("file").unwrap_or(&check_json);
            state = file_obj
                .get("state")
                .and_then(|v| v.as_str())
                .unwrap_or("PROCESSING")
                .to_string();

            match state.as_str() {
                "ACTIVE" => break,
                "FAILED" => {
                    return Err(PipelineError::Analysis(
                        "Google failed to process the file".to_string(),
                    ))
                }
                _ => sleep(Duration::from_secs(2)),
            }
        }

        debug!("Uploaded '{}' as {}", file_name, name);
        Ok(RemoteDocument {
            uri,
            name,
            display_name: file_name.to_string(),
            mime_type,
            state,
        })
    }

    pub fn generate_content(
        &self,
        model: &str,
        system_prompt: &str,
        messages: Vec<Content>,
        response_schema: Option<serde_json::Value>,
        response_mime_type: &str,
    ) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        let payload = GenerateContentRequest {
            contents: messages,
            system_instruction: Some(Content::user_text(system_prompt)),
            generation_config: GenerationConfig {
                response_mime_type: response_mime_type.to_string(),
                response_schema,
            },
        };

        let res = self.client.post(&url).json(&payload).send()?;
        let status = res.status();

        if !status.is_success() {
            let err_text = res.text()?;
            return Err(PipelineError::Analysis(format!(
                "Gemini API Error (status {}): {}",
                status, err_text
            )));
        }

        let body: GenerateContentResponse = res.json()?;

        let part = body
            .candidates
            .ok_or_else(|| PipelineError::Analysis("No candidates returned".to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Analysis("Empty candidates list".to_string()))?
            .content
            .parts
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::Analysis("No parts in content".to_string()))?;

        match part {
            Part::Text { text } => Ok(text),
            _ => Err(PipelineError::Analysis(
                "Model returned non-text content".to_string(),
            )),
        }
    }
}

fn json_str(obj: &serde_json::Value, field: &str) -> Result<String> {
    obj.get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::Analysis(format!("Upload response missing {}", field)))
}
