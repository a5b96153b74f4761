use crate::config::Config;
use crate::ffmpeg::tool_version;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::fs;

fn required_dirs(cfg: &Config) -> Vec<PathBuf> {
    let mut dirs = vec![
        cfg.scripts_dir.clone(),
        cfg.videos_dir.clone(),
        cfg.logs_dir.clone(),
    ];
    if let Some(parent) = cfg.cookies_path.parent() {
        if !parent.as_os_str().is_empty() {
            dirs.push(parent.to_path_buf());
        }
    }
    dirs
}

pub async fn ensure_directories(cfg: &Config) -> Result<()> {
    for dir in required_dirs(cfg) {
        if fs::metadata(&dir).await.is_err() {
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create dir {}", dir.display()))?;
            logi(format!("Created directory: {}", dir.display()));
        }
    }
    Ok(())
}

/// Whether both `ffmpeg` and `ffprobe` run. Missing tools are only warned
/// about; the merge phase reports the failure when it happens.
pub async fn check_ffmpeg() -> bool {
    let mut ok = true;
    for tool in ["ffmpeg", "ffprobe"] {
        match tool_version(tool).await {
            Ok(version) => logok(version),
            Err(err) => {
                logw(format!("{} not available: {:#}", tool, err));
                ok = false;
            }
        }
    }
    ok
}
