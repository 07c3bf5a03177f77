//! gemini.rs — Gemini generateContent client.
//!
//! Server-side API calls keep the key out of transcripts and terminal
//! scrollback. The key comes from an explicit override (entered in the
//! chat) or the `GEMINI_API_KEY` env var, usually via `.env`.

use async_trait::async_trait;
use serde_json::Value;
use std::env;

use crate::error::{Result, TabletalkError};
use crate::logging::{app_error, app_info};
use crate::settings::Settings;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// The language-model collaborator: one prompt in, one completion out,
/// synchronously from the caller's point of view.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

pub struct GeminiClient {
    api_key: String,
    model_name: String,
    temperature: f32,
    top_p: f32,
    top_k: u32,
    max_output_tokens: u32,
    http: reqwest::Client,
}

impl GeminiClient {
    /// Configure a client from settings, with `api_key_override` taking
    /// precedence over the environment.
    pub fn new(settings: &Settings, api_key_override: Option<&str>) -> Result<Self> {
        let api_key = match api_key_override {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => env::var("GEMINI_API_KEY").unwrap_or_default(),
        };

        if api_key.is_empty() {
            return Err(TabletalkError::Model(
                "Gemini API key not found. Please set the GEMINI_API_KEY environment variable."
                    .into(),
            ));
        }

        Ok(GeminiClient {
            api_key,
            model_name: settings.model_name.clone(),
            temperature: settings.temperature,
            top_p: settings.top_p,
            top_k: settings.top_k,
            max_output_tokens: settings.max_output_tokens,
            http: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl TextModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        app_info(format!(
            "Calling {} (prompt_len={})",
            self.model_name,
            prompt.len()
        ));

        let url = format!(
            "{GEMINI_BASE}/{}:generateContent?key={}",
            self.model_name, self.api_key
        );
        let payload = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": self.temperature,
                "topP": self.top_p,
                "topK": self.top_k,
                "maxOutputTokens": self.max_output_tokens,
            }
        });

        let resp = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                app_error(format!("Model HTTP request failed: {e}"));
                TabletalkError::Model(format!("Request failed: {e}"))
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let truncated = crate::error::body_preview(&body);
            app_error(format!("Model HTTP error {status}: {truncated}"));
            return Err(TabletalkError::Model(format!("HTTP {status}: {truncated}")));
        }

        let data: Value = resp.json().await.map_err(|e| {
            app_error(format!("Failed to parse model JSON response: {e}"));
            TabletalkError::Model(format!("JSON parse error: {e}"))
        })?;

        let text = data["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or("")
            .to_string();

        if text.is_empty() {
            return Err(TabletalkError::Model("Model returned an empty completion".into()));
        }

        app_info(format!("Model response received (text_len={})", text.len()));
        Ok(text)
    }
}
