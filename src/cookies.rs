use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_same_site")]
    pub same_site: String,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_same_site() -> String {
    "Lax".to_string()
}

impl Cookie {
    /// Session cookies (no expiry, or a non-positive one) never expire here.
    pub fn is_expired(&self, now_secs: f64) -> bool {
        matches!(self.expires, Some(exp) if exp > 0.0 && exp < now_secs)
    }
}

/// Cookie-Editor / EditThisCookie export entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportedCookie {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
    domain: Option<String>,
    path: Option<String>,
    expiration_date: Option<f64>,
    #[serde(default)]
    http_only: bool,
    #[serde(default)]
    secure: bool,
    same_site: Option<String>,
    #[serde(default)]
    session: bool,
}

pub fn normalize_same_site(raw: Option<&str>) -> String {
    match raw.map(|s| s.to_ascii_lowercase()) {
        Some(s) if s == "strict" => "Strict".to_string(),
        Some(s) if s == "none" || s == "no_restriction" => "None".to_string(),
        _ => "Lax".to_string(),
    }
}

impl From<ExportedCookie> for Cookie {
    fn from(c: ExportedCookie) -> Self {
        let expires = match c.expiration_date {
            Some(exp) if !c.session && exp > 0.0 => Some(exp),
            _ => None,
        };
        Cookie {
            name: c.name,
            value: c.value,
            domain: c.domain.unwrap_or_else(|| ".google.com".to_string()),
            path: c.path.unwrap_or_else(default_path),
            expires,
            http_only: c.http_only,
            secure: c.secure,
            same_site: normalize_same_site(c.same_site.as_deref()),
        }
    }
}

/// `Ok(None)` when the store does not exist yet.
pub async fn load_cookies(path: &Path) -> Result<Option<Vec<Cookie>>> {
    if fs::metadata(path).await.is_err() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read cookies {}", path.display()))?;
    let cookies: Vec<Cookie> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse cookies {}", path.display()))?;
    Ok(Some(cookies))
}

pub async fn save_cookies(path: &Path, cookies: &[Cookie]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create dir {}", parent.display()))?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(cookies)?)
        .await
        .with_context(|| format!("Failed to write cookies {}", path.display()))?;
    Ok(())
}

pub fn expired<'a>(cookies: &'a [Cookie], now_secs: f64) -> Vec<&'a Cookie> {
    cookies.iter().filter(|c| c.is_expired(now_secs)).collect()
}

pub fn has_auth_cookies(cookies: &[Cookie]) -> bool {
    cookies
        .iter()
        .any(|c| c.name.contains("SID") || c.name.contains("SSID"))
}

/// Converts a browser-extension export into the store format and writes it to
/// `output`. Returns the number of cookies written.
pub async fn convert_cookie_editor_export(input: &Path, output: &Path) -> Result<usize> {
    logi(format!("Reading cookies from: {}", input.display()));
    let content = fs::read_to_string(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let exported: Vec<ExportedCookie> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a cookie export array", input.display()))?;

    let cookies: Vec<Cookie> = exported.into_iter().map(Cookie::from).collect();
    save_cookies(output, &cookies).await?;
    logok(format!(
        "Converted {} cookies -> {}",
        cookies.len(),
        output.display()
    ));

    if has_auth_cookies(&cookies) {
        let names: Vec<&str> = cookies
            .iter()
            .filter(|c| c.name.contains("SID"))
            .map(|c| c.name.as_str())
            .collect();
        logok(format!("Auth cookies found: {}", names.join(", ")));
    } else {
        logw("No authentication cookies found (SID, SSID)");
    }

    Ok(cookies.len())
}
