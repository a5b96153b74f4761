use crate::api::{SamplingParams, TextGenerator};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::logw;
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 180;

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::with_client(client, cfg))
    }

    pub fn with_client(client: Client, cfg: &Config) -> Self {
        Self {
            client,
            api_url: cfg.gemini_api_url.trim_end_matches('/').to_string(),
            model: cfg.gemini_model.clone(),
            api_key: cfg.gemini_api_key.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", self.api_url, self.model)
    }
}

pub(crate) fn request_body(prompt: &str, params: Option<SamplingParams>) -> Value {
    let mut body = json!({
        "contents": [
            {"role": "user", "parts": [{"text": prompt}]}
        ],
    });
    if let Some(p) = params {
        body["generationConfig"] = json!({
            "temperature": p.temperature,
            "topP": p.top_p,
            "topK": p.top_k,
            "maxOutputTokens": p.max_output_tokens,
        });
    }
    body
}

/// First text part of the first candidate, or a description of why there is
/// none.
pub(crate) fn extract_output_text(root: &Value) -> std::result::Result<String, String> {
    if let Some(err) = root.get("error") {
        let msg = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(format!("Gemini error: {}", msg));
    }

    if let Some(reason) = root
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(format!("prompt blocked: {}", reason));
    }

    let parts = root
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            let finish = root
                .pointer("/candidates/0/finishReason")
                .and_then(Value::as_str)
                .unwrap_or("none");
            format!("response has no content parts (finishReason: {})", finish)
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    if text.trim().is_empty() {
        return Err("response text is empty".to_string());
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str, params: Option<SamplingParams>) -> Result<String> {
        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(prompt, params))
            .send()
            .await
            .context("Gemini request failed")?;

        let status = resp.status();
        let raw = resp.text().await.context("Gemini body read failed")?;

        if !status.is_success() {
            let snippet = raw.chars().take(800).collect::<String>();
            logw(format!("Gemini HTTP {}", status.as_u16()));
            return Err(anyhow::anyhow!("Gemini HTTP {}: {}", status.as_u16(), snippet).into());
        }

        let root: Value = serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Parse(format!("Gemini response is not JSON: {}", e)))?;
        extract_output_text(&root).map_err(PipelineError::Parse)
    }
}
