use crate::error::{PipelineError, Result};
use crate::logok;
use anyhow::Context;
use chrono::{DateTime, Local, NaiveDateTime};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub scene_number: u32,
    pub duration: u32,
    pub description: String,
    pub veo_prompt: String,
    pub camera_movement: String,
    pub time_of_day: String,
    pub mood: String,
}

impl Scene {
    /// Text submitted to the renderer; the description stands in for a
    /// missing prompt.
    pub fn render_prompt(&self) -> &str {
        if self.veo_prompt.trim().is_empty() {
            &self.description
        } else {
            &self.veo_prompt
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub title: String,
    pub description: String,
    pub total_duration: u32,
    pub num_scenes: u32,
    pub style: String,
    pub aspect_ratio: String,
    #[serde(deserialize_with = "deserialize_created_at")]
    pub created_at: DateTime<Local>,
    pub scenes: Vec<Scene>,
}

/// RFC 3339, or a local wall-clock time with no offset
/// (`2025-01-01T12:00:00.123456`).
pub(crate) fn parse_created_at(raw: &str) -> Option<DateTime<Local>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.with_timezone(&Local));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| naive.and_local_timezone(Local).earliest())
}

fn deserialize_created_at<'de, D>(
    deserializer: D,
) -> std::result::Result<DateTime<Local>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_created_at(raw.trim())
        .ok_or_else(|| serde::de::Error::custom(format!("invalid created_at: {}", raw)))
}

/// Shape the text model is asked to return; lenient about the metadata it
/// tends to omit.
#[derive(Debug, Deserialize)]
pub(crate) struct ScriptDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub style: String,
    pub scenes: Vec<DraftScene>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DraftScene {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub veo_prompt: String,
    #[serde(default)]
    pub camera_movement: String,
    #[serde(default)]
    pub time_of_day: String,
    #[serde(default)]
    pub mood: String,
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE_RE: OnceCell<Regex> = OnceCell::new();
    FENCE_RE
        .get_or_try_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)(?:```|\z)"))
        .ok()
}

/// Pulls the structured payload out of a model response: a ```json fence
/// first, then the first fence of any kind, else the whole text. An
/// unterminated fence runs to the end of the text.
pub fn extract_payload(raw: &str) -> &str {
    if let Some(start) = raw.find("```json") {
        let body = &raw[start + "```json".len()..];
        let end = body.find("```").unwrap_or(body.len());
        return body[..end].trim();
    }

    if let Some(caps) = fence_regex().and_then(|re| re.captures(raw)) {
        if let Some(m) = caps.get(1) {
            return m.as_str().trim();
        }
    }

    raw.trim()
}

pub(crate) fn parse_draft(raw: &str) -> Result<ScriptDraft> {
    let payload = extract_payload(raw);
    serde_json::from_str::<ScriptDraft>(payload).map_err(|e| {
        let snippet = payload.chars().take(200).collect::<String>();
        PipelineError::Parse(format!("{} (payload starts: {})", e, snippet))
    })
}

pub fn script_file_name(at: DateTime<Local>) -> String {
    format!("script_{}.json", at.format("%Y%m%d_%H%M%S"))
}

pub async fn save_script(script: &Script, output_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("Failed to create dir {}", output_dir.display()))?;

    let path = output_dir.join(script_file_name(Local::now()));
    let body = serde_json::to_string_pretty(script)?;
    fs::write(&path, body)
        .await
        .with_context(|| format!("Failed to write script {}", path.display()))?;

    logok(format!("Script saved: {}", path.display()));
    Ok(path)
}

pub async fn load_script(path: &Path) -> Result<Script> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| PipelineError::Parse(format!("{}: {}", path.display(), e)))
}
