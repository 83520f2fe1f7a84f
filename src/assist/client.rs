//! HTTP client for the `generateContent` endpoint.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::SYSTEM_INSTRUCTION;
use crate::error::SathiError;
use crate::language::Language;
use crate::voice::Role;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Reply when the model could not produce usable text.
const FALLBACK_REPLY: &str = "I apologize, I could not process that query.";

/// Sentinel the analysis prompt asks the model to return for
/// non-legal uploads.
const NOT_LEGAL_SENTINEL: &str = "NOT_LEGAL_DOC";

/// One prior exchange in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

/// Client for single-shot completion and document analysis.
pub struct AssistClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AssistClient {
    pub fn new(api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the client at a different endpoint (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Ask for legal advice, carrying the prior conversation.
    pub async fn legal_advice(
        &self,
        model: &str,
        history: &[ChatMessage],
        message: &str,
        language: Language,
    ) -> Result<String, SathiError> {
        let prompt = build_advice_prompt(history, message, language);
        let text = self
            .generate(model, vec![json!({ "text": prompt })])
            .await?;
        Ok(text)
    }

    /// Analyze an uploaded document (image or PDF bytes).
    pub async fn analyze_document(
        &self,
        model: &str,
        data: &[u8],
        mime_type: &str,
        language: Language,
    ) -> Result<String, SathiError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(data);
        let prompt = build_analysis_prompt(language);
        let text = self
            .generate(
                model,
                vec![
                    json!({ "inlineData": { "mimeType": mime_type, "data": encoded } }),
                    json!({ "text": prompt }),
                ],
            )
            .await?;

        if text.contains(NOT_LEGAL_SENTINEL) {
            return Ok("Please upload a valid legal document.".to_string());
        }
        Ok(text)
    }

    /// POST `{contents}` to `models/{model}:generateContent` and pull the
    /// reply text out of the first candidate.
    async fn generate(&self, model: &str, parts: Vec<Value>) -> Result<String, SathiError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        let body = json!({ "contents": [{ "parts": parts }] });

        tracing::debug!(model = model, "Requesting completion");
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let value: Value = response.json().await?;

        Ok(extract_text(&value).unwrap_or_else(|| FALLBACK_REPLY.to_string()))
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: &Value) -> Option<String> {
    let parts = response.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
        .collect();
    let text = text.trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn build_advice_prompt(history: &[ChatMessage], message: &str, language: Language) -> String {
    let mut prompt = format!(
        "{SYSTEM_INSTRUCTION}\n\nIMPORTANT: {}\n\n",
        language.directive()
    );
    for entry in history {
        let speaker = match entry.role {
            Role::User => "User",
            Role::Model => "Legal Sathi",
        };
        prompt.push_str(&format!("{speaker}: {}\n", entry.text));
    }
    prompt.push_str(&format!("User: {message}\nLegal Sathi:"));
    prompt
}

fn build_analysis_prompt(language: Language) -> String {
    format!(
        "Analyze this document in {}.\n\
         Identify document type, summarize key points, highlight risks/dates, \
         and cite relevant Indian Law sections.\n\
         If it is not a legal document, return \"{NOT_LEGAL_SENTINEL}\".",
        language.script_name()
    )
}
