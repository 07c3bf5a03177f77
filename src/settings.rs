/// Settings management — load and save generation/pipeline settings.

use crate::logging::{app_error, app_info, app_warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// How many rows to sample per table for prompt grounding.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
    /// Display-time cap; fetch is never limited, only rendering.
    #[serde(default = "default_display_rows")]
    pub display_rows: usize,
    /// How many times the model may be asked to correct a failed query per
    /// turn. Bounds cost and latency of the conversational loop.
    #[serde(default = "default_max_correction_attempts")]
    pub max_correction_attempts: u32,
    /// Directory transcripts are saved to and listed from.
    #[serde(default = "default_chats_dir")]
    pub chats_dir: String,
}

fn default_model_name() -> String {
    env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string())
}
fn default_temperature() -> f32 { 0.2 }
fn default_top_p() -> f32 { 0.95 }
fn default_top_k() -> u32 { 40 }
fn default_max_output_tokens() -> u32 { 8192 }
fn default_sample_rows() -> usize { 5 }
fn default_display_rows() -> usize { 100 }
fn default_max_correction_attempts() -> u32 { 1 }
fn default_chats_dir() -> String { "chats".to_string() }

impl Default for Settings {
    fn default() -> Self {
        Settings {
            model_name: default_model_name(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_output_tokens: default_max_output_tokens(),
            sample_rows: default_sample_rows(),
            display_rows: default_display_rows(),
            max_correction_attempts: default_max_correction_attempts(),
            chats_dir: default_chats_dir(),
        }
    }
}

pub fn settings_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tabletalk");
    if let Err(err) = fs::create_dir_all(&config_dir) {
        app_warn(format!(
            "Failed to create config directory {}: {}",
            config_dir.display(),
            err
        ));
    }
    config_dir.join("settings.json")
}

/// Load settings from disk, falling back to defaults on any problem.
pub fn load_settings() -> Settings {
    let path = settings_path();

    if !path.exists() {
        app_info(format!(
            "Settings file not found at {}. Using defaults.",
            path.display()
        ));
        return Settings::default();
    }

    let data = match fs::read_to_string(&path) {
        Ok(data) => data,
        Err(err) => {
            app_error(format!("Failed to read settings file {}: {}", path.display(), err));
            return Settings::default();
        }
    };

    match serde_json::from_str::<Settings>(&data) {
        Ok(settings) => settings,
        Err(err) => {
            app_error(format!("Failed to parse settings: {}", err));
            Settings::default()
        }
    }
}

pub fn save_settings(settings: &Settings) -> Result<(), String> {
    let path = settings_path();
    let json = serde_json::to_string_pretty(settings).map_err(|e| {
        app_error(format!("Failed to serialize settings: {}", e));
        e.to_string()
    })?;
    fs::write(&path, json).map_err(|e| {
        app_error(format!("Failed to write settings file {}: {}", path.display(), e));
        e.to_string()
    })?;
    app_info(format!("Settings saved to {}", path.display()));
    Ok(())
}
