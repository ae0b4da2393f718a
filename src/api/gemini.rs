// Nochistlán Marketplace - community listings for items, jobs and rentals
// Copyright (C) 2025 Marketplace Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Document analysis through the Gemini `generateContent` endpoint

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use std::time::Instant;
use tracing::{debug, warn};

use super::{DocumentAnalyzer, USER_AGENT};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::log_api_call;
use crate::models::{DocumentAnalysis, MediaUpload};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Instruction sent alongside the document photo
const ID_PROMPT: &str = "Analiza esta imagen. ¿Es una credencial para votar mexicana (INE/IFE) válida? Extrae el nombre completo que aparece en el campo 'NOMBRE'. Responde únicamente con un objeto JSON con dos claves: `isIdValid` (booleano) y `extractedName` (string, o null si no se encuentra o no es válida).";

pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    /// `None` when no API key is configured
    pub fn from_config(config: &Config) -> AppResult<Option<Self>> {
        config
            .gemini_api_key
            .as_deref()
            .map(|key| Self::new(key, &config.gemini_model))
            .transpose()
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", API_BASE, self.model)
    }
}

/// Request body for one image plus the ID prompt
pub fn build_request(image: &MediaUpload) -> Value {
    json!({
        "contents": [{
            "parts": [
                {
                    "inlineData": {
                        "mimeType": image.content_type,
                        "data": STANDARD.encode(&image.bytes),
                    }
                },
                { "text": ID_PROMPT }
            ]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "isIdValid": { "type": "BOOLEAN" },
                    "extractedName": { "type": "STRING" }
                }
            }
        }
    })
}

/// Pull the JSON judgment out of a `generateContent` response
pub fn parse_generate_content(response: &Value) -> AppResult<DocumentAnalysis> {
    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::Analysis("response has no candidates".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        return Err(AppError::Analysis("response has no text".to_string()));
    }

    serde_json::from_str(strip_code_fence(&text))
        .map_err(|e| AppError::Analysis(format!("unparseable analysis: {}", e)))
}

/// Models occasionally wrap JSON in a markdown fence
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

#[async_trait]
impl DocumentAnalyzer for GeminiClient {
    async fn analyze_id_document(&self, image: &MediaUpload) -> AppResult<DocumentAnalysis> {
        let url = self.endpoint();
        let started = Instant::now();
        log_api_call!(start, "POST", url.as_str());

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(image))
            .send()
            .await?;

        let status = response.status();
        log_api_call!(done, "POST", url.as_str(), status.as_u16(), started);

        let body: Value = response.json().await?;

        if !status.is_success() {
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("analysis request failed")
                .to_string();
            warn!("Document analysis returned {}: {}", status, message);
            return Err(AppError::Analysis(message));
        }

        let analysis = parse_generate_content(&body)?;
        debug!(
            "Document analysis: valid={}, name present={}",
            analysis.is_document_valid,
            analysis.extracted_name.is_some()
        );
        Ok(analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(text: &str) -> Value {
        json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }], "role": "model" },
                "finishReason": "STOP"
            }]
        })
    }

    #[test]
    fn parses_structured_answer() {
        let analysis =
            parse_generate_content(&response_with(r#"{"isIdValid": true, "extractedName": "ANA LÓPEZ PÉREZ"}"#))
                .unwrap();
        assert!(analysis.is_document_valid);
        assert_eq!(analysis.extracted_name.as_deref(), Some("ANA LÓPEZ PÉREZ"));
    }

    #[test]
    fn tolerates_fenced_json() {
        let analysis = parse_generate_content(&response_with(
            "```json\n{\"isIdValid\": false, \"extractedName\": null}\n```",
        ))
        .unwrap();
        assert!(!analysis.is_document_valid);
        assert!(analysis.extracted_name.is_none());
    }

    #[test]
    fn empty_response_is_an_analysis_error() {
        assert!(matches!(
            parse_generate_content(&json!({"candidates": []})),
            Err(AppError::Analysis(_))
        ));
        assert!(matches!(
            parse_generate_content(&response_with("no soy json")),
            Err(AppError::Analysis(_))
        ));
    }

    #[test]
    fn request_inlines_image_and_schema() {
        let image = MediaUpload::new("ine.jpg", "image/jpeg", vec![1, 2, 3]);
        let body = build_request(&image);
        assert_eq!(body.pointer("/contents/0/parts/0/inlineData/mimeType"), Some(&json!("image/jpeg")));
        assert_eq!(body.pointer("/contents/0/parts/0/inlineData/data"), Some(&json!("AQID")));
        assert_eq!(
            body.pointer("/generationConfig/responseMimeType"),
            Some(&json!("application/json"))
        );
    }
}
