use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use tokio::process::Command;

/// What the assembler needs to know about one clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_audio: bool,
}

#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ClipInfo>;
    /// Runs the encoder with `args` (everything after the program name).
    async fn encode(&self, args: &[String]) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// "30000/1001" -> 29.97; "0/0" and garbage -> None.
fn parse_rate(raw: &str) -> Option<f64> {
    let (num, den) = match raw.split_once('/') {
        Some((n, d)) => (n.trim().parse::<f64>().ok()?, d.trim().parse::<f64>().ok()?),
        None => (raw.trim().parse::<f64>().ok()?, 1.0),
    };
    (num > 0.0 && den > 0.0).then(|| num / den)
}

pub fn parse_probe(json: &str) -> Result<ClipInfo> {
    let out: ProbeOutput = serde_json::from_str(json).context("ffprobe output is not JSON")?;

    let video = out
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| anyhow!("no video stream"))?;
    let has_audio = out
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let duration = out
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok())
        .unwrap_or(0.0);

    let width = video.width.unwrap_or(0);
    let height = video.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(anyhow!("invalid dimensions {}x{}", width, height));
    }

    Ok(ClipInfo {
        duration,
        width,
        height,
        fps: video
            .r_frame_rate
            .as_deref()
            .and_then(parse_rate)
            .unwrap_or(0.0),
        has_audio,
    })
}

async fn run_cmd(program: &str, args: &[String]) -> Result<Vec<u8>> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .with_context(|| format!("{} execution failed", program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        return Err(anyhow!(
            "{} exited with {}: {}",
            program,
            output.status,
            tail.join(" | ")
        ));
    }

    Ok(output.stdout)
}

/// First line of `<program> -version`.
pub async fn tool_version(program: &str) -> Result<String> {
    let stdout = run_cmd(program, &["-version".to_string()]).await?;
    Ok(String::from_utf8_lossy(&stdout)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string())
}

/// The system `ffmpeg`/`ffprobe` pair.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ffmpeg;

#[async_trait]
impl MediaBackend for Ffmpeg {
    async fn probe(&self, path: &Path) -> Result<ClipInfo> {
        let args = vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration:stream=codec_type,width,height,r_frame_rate,duration".to_string(),
            "-of".to_string(),
            "json".to_string(),
            path.display().to_string(),
        ];
        let stdout = run_cmd("ffprobe", &args)
            .await
            .with_context(|| format!("ffprobe {}", path.display()))?;
        parse_probe(&String::from_utf8_lossy(&stdout))
            .with_context(|| format!("ffprobe {}", path.display()))
    }

    async fn encode(&self, args: &[String]) -> Result<()> {
        run_cmd("ffmpeg", args).await?;
        Ok(())
    }
}
