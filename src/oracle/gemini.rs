use std::env;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{EvaluationOracle, EvaluationRequest, OracleError, RawVerdict};
use crate::config::OracleConfig;
use crate::lesson::SignKind;

/// `generateContent` client for a multimodal Gemini model in JSON mode
pub struct GeminiOracle {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiOracle {
    pub fn new(endpoint: &str, model: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Reads the API key from the environment variable named in the config
    pub fn from_config(config: &OracleConfig) -> Result<Self> {
        let api_key = env::var(&config.api_key_env).unwrap_or_default();
        if api_key.is_empty() {
            bail!("{} is not set", config.api_key_env);
        }
        Ok(Self::new(&config.endpoint, &config.model, &api_key))
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

/// Instructor prompt asking for `{score, isCorrect, feedback}`
pub fn build_prompt(request: &EvaluationRequest) -> String {
    let kind = match request.sign_kind {
        SignKind::Static => "STATIC",
        SignKind::Dynamic => "DYNAMIC",
    };
    format!(
        "Act as a strict ASL instructor.\n\
         The user is attempting to perform the sign for: \"{}\".\n\
         Sign type: {}.\n\
         Expected visual description: \"{}\".\n\n\
         Task:\n\
         1. Analyze the hand shape and orientation in the image.\n\
         2. Return JSON:\n\
         {{ \"score\": (integer 0-100), \"isCorrect\": (boolean, true if score > 75), \"feedback\": (string, max 15 words) }}",
        request.target_sign_id, kind, request.target_description
    )
}

/// Removes a `data:image/...;base64,` prefix if present
pub fn strip_data_url(image: &str) -> &str {
    match image.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:image/") => data,
        _ => image,
    }
}

/// Pulls the verdict JSON out of a `generateContent` response body
pub fn parse_response(body: &Value) -> Result<RawVerdict, OracleError> {
    let text = body["candidates"][0]["content"]["parts"]
        .as_array()
        .and_then(|parts| parts.iter().find_map(|p| p["text"].as_str()))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(OracleError::Empty)?;

    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .map(|t| t.trim_end().trim_end_matches("```").trim())
        .unwrap_or(text);

    serde_json::from_str(text).map_err(|e| OracleError::Malformed(e.to_string()))
}

#[async_trait]
impl EvaluationOracle for GeminiOracle {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<RawVerdict, OracleError> {
        let body = json!({
            "contents": [{
                "parts": [
                    { "inline_data": { "mime_type": "image/jpeg", "data": strip_data_url(&request.image) } },
                    { "text": build_prompt(request) }
                ]
            }],
            "generationConfig": { "responseMimeType": "application/json" }
        });

        debug!(model = %self.model, sign = %request.target_sign_id, "dispatching evaluation");

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status { code, body });
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| OracleError::Malformed(e.to_string()))?;
        parse_response(&data)
    }
}
