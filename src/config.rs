use crate::error::{PipelineError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gemini_api_key: String,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default = "default_gemini_api_url")]
    pub gemini_api_url: String,
    #[serde(default = "default_flow_url")]
    pub flow_url: String,
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default)]
    pub headless: bool,
    #[serde(default = "default_cookies_path")]
    pub cookies_path: PathBuf,
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    #[serde(default = "default_videos_dir")]
    pub videos_dir: PathBuf,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
    #[serde(default = "default_add_transitions")]
    pub add_transitions: bool,
    #[serde(default = "default_transition_duration")]
    pub transition_duration: f64,
    #[serde(default = "default_login_markers")]
    pub login_markers: Vec<String>,
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash-exp".to_string()
}

fn default_gemini_api_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models".to_string()
}

fn default_flow_url() -> String {
    "https://labs.google/fx/vi/tools/flow".to_string()
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_cookies_path() -> PathBuf {
    PathBuf::from("config/cookies.json")
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("data/scripts")
}

fn default_videos_dir() -> PathBuf {
    PathBuf::from("data/videos")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("data/logs")
}

fn default_add_transitions() -> bool {
    true
}

fn default_transition_duration() -> f64 {
    0.5
}

fn default_login_markers() -> Vec<String> {
    vec!["đăng nhập".to_string(), "sign in".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: String::new(),
            gemini_model: default_gemini_model(),
            gemini_api_url: default_gemini_api_url(),
            flow_url: default_flow_url(),
            webdriver_url: default_webdriver_url(),
            headless: false,
            cookies_path: default_cookies_path(),
            scripts_dir: default_scripts_dir(),
            videos_dir: default_videos_dir(),
            logs_dir: default_logs_dir(),
            add_transitions: default_add_transitions(),
            transition_duration: default_transition_duration(),
            login_markers: default_login_markers(),
        }
    }
}

impl Config {
    /// Reads `path` when present, applies the `GEMINI_API_KEY` environment
    /// override, then checks for the credential.
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if fs::metadata(path).await.is_ok() {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            serde_json::from_str::<Config>(&content).map_err(|e| {
                PipelineError::Configuration(format!("{}: {}", path.display(), e))
            })?
        } else {
            Config::default()
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.gemini_api_key = key.trim().to_string();
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gemini_api_key.trim().is_empty() {
            return Err(PipelineError::Configuration(format!(
                "{} not found (set it in .env or gemini_api_key in the config file)",
                API_KEY_ENV
            )));
        }
        if self.transition_duration < 0.0 {
            return Err(PipelineError::Configuration(
                "transition_duration must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}
