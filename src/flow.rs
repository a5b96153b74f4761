use crate::clock::{Clock, PollOutcome, PollPolicy, poll_until};
use crate::config::Config;
use crate::cookies::{self, Cookie};
use crate::error::{PipelineError, Result};
use crate::webdriver::{ChromeOptions, ElementRef, Locator, WebDriver};
use crate::{logi, logok, logw};
use anyhow::{Context, anyhow};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use walkdir::WalkDir;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";
const NAVIGATION_SETTLE: Duration = Duration::from_secs(3);
const PROMPT_SETTLE: Duration = Duration::from_secs(1);
const DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DOWNLOAD_CEILING: Duration = Duration::from_secs(60);

/// What `submit` hands back: media already on the page is not this render's
/// output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderHandle {
    pub baseline: HashSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderPoll {
    Pending,
    Ready(String),
    Failed(String),
}

/// A web tool that turns prompts into downloadable clips.
#[async_trait]
pub trait VideoStudio: Send + Sync {
    /// Launches the browser, attaches stored cookies and navigates to the
    /// tool. A login prompt is `PipelineError::Authentication`.
    async fn open(&mut self) -> Result<()>;
    async fn persist_cookies(&mut self) -> Result<()>;
    async fn submit(&mut self, prompt: &str) -> Result<RenderHandle>;
    async fn poll(&self, handle: &RenderHandle) -> Result<RenderPoll>;
    async fn fetch(&mut self, locator: &str) -> Result<Vec<u8>>;
    async fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Strategy {
    pub name: &'static str,
    pub locator: Locator,
}

impl Strategy {
    fn css(name: &'static str, selector: &str) -> Self {
        Self {
            name,
            locator: Locator::css(selector),
        }
    }
}

pub fn prompt_field_strategies() -> Vec<Strategy> {
    vec![
        Strategy::css("textarea[placeholder*=prompt]", r#"textarea[placeholder*="prompt" i]"#),
        Strategy::css("textarea[aria-label*=prompt]", r#"textarea[aria-label*="prompt" i]"#),
        Strategy::css("any textarea", "textarea"),
    ]
}

pub fn submit_strategies() -> Vec<Strategy> {
    vec![
        Strategy {
            name: "button text 'Tạo'",
            locator: Locator::button_text("Tạo"),
        },
        Strategy {
            name: "button text 'Generate'",
            locator: Locator::button_text("Generate"),
        },
        Strategy::css("button[type=submit]", r#"button[type="submit"]"#),
        Strategy::css("button.generate-btn", "button.generate-btn"),
    ]
}

/// Media selectors with the attributes that may carry the clip locator.
pub fn media_strategies() -> Vec<(Strategy, &'static [&'static str])> {
    const SRC: &[&str] = &["src"];
    const HREF: &[&str] = &["href"];
    const DATA_URL: &[&str] = &["data-video-url", "src", "href"];
    vec![
        (Strategy::css("video[src]", "video[src]"), SRC),
        (Strategy::css("video source[src]", "video source[src]"), SRC),
        (Strategy::css("a[href*=.mp4]", r#"a[href*=".mp4"]"#), HREF),
        (Strategy::css("[data-video-url]", "[data-video-url]"), DATA_URL),
    ]
}

pub fn error_strategies() -> Vec<Strategy> {
    vec![
        Strategy::css("[role=alert]", r#"[role="alert"]"#),
        Strategy::css(".error", ".error"),
        Strategy::css(".error-message", ".error-message"),
    ]
}

/// First login marker found in the page text, case-insensitively.
pub fn detect_login_prompt<'a>(page_text: &str, markers: &'a [String]) -> Option<&'a str> {
    let lower = page_text.to_lowercase();
    markers
        .iter()
        .find(|m| !m.is_empty() && lower.contains(&m.to_lowercase()))
        .map(String::as_str)
}

fn is_partial_download(path: &Path) -> bool {
    matches!(
        path.extension().and_then(OsStr::to_str),
        Some("crdownload") | Some("tmp") | Some("part")
    )
}

/// Finished, non-empty files directly inside `dir`.
pub fn completed_downloads(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.metadata().map(|m| m.len() > 0).unwrap_or(false))
        .map(|e| e.into_path())
        .filter(|p| !is_partial_download(p))
        .collect()
}

/// Reads a finished browser download and clears it from the download dir.
async fn take_download(path: &Path) -> Result<Vec<u8>> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if let Err(err) = fs::remove_file(path).await {
        logw(format!("Failed to remove {}: {}", path.display(), err));
    }
    Ok(bytes)
}

fn cdp_cookie_params(c: &Cookie) -> Value {
    let mut params = json!({
        "name": c.name,
        "value": c.value,
        "domain": c.domain,
        "path": c.path,
        "httpOnly": c.http_only,
        "secure": c.secure,
        "sameSite": c.same_site,
    });
    if let Some(exp) = c.expires.filter(|e| *e > 0.0) {
        params["expires"] = json!(exp);
    }
    params
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Google Labs Flow driven through chromedriver.
pub struct FlowSession {
    flow_url: String,
    webdriver_url: String,
    headless: bool,
    cookies_path: PathBuf,
    login_markers: Vec<String>,
    download_dir: PathBuf,
    clock: Arc<dyn Clock>,
    driver: Option<WebDriver>,
}

impl FlowSession {
    pub fn new(cfg: &Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            flow_url: cfg.flow_url.clone(),
            webdriver_url: cfg.webdriver_url.clone(),
            headless: cfg.headless,
            cookies_path: cfg.cookies_path.clone(),
            login_markers: cfg.login_markers.clone(),
            download_dir: cfg.videos_dir.join(".downloads"),
            clock,
            driver: None,
        }
    }

    fn driver(&self) -> Result<&WebDriver> {
        self.driver
            .as_ref()
            .ok_or_else(|| anyhow!("browser session is not open").into())
    }

    async fn attach_cookies(&self, driver: &WebDriver) -> Result<()> {
        let stored = match cookies::load_cookies(&self.cookies_path).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                logw(format!(
                    "Cookies file not found: {} (continuing without login state)",
                    self.cookies_path.display()
                ));
                return Ok(());
            }
            Err(err) => {
                logw(format!("Ignoring unreadable cookies file: {:#}", err));
                return Ok(());
            }
        };

        let stale = cookies::expired(&stored, now_secs());
        if !stale.is_empty() {
            let names: Vec<&str> = stale.iter().map(|c| c.name.as_str()).collect();
            logw(format!("Expired cookies: {}", names.join(", ")));
        }

        driver.cdp("Network.enable", json!({})).await?;
        let mut attached = 0usize;
        for cookie in &stored {
            match driver.cdp("Network.setCookie", cdp_cookie_params(cookie)).await {
                Ok(v) if v.get("success").and_then(Value::as_bool) == Some(false) => {
                    logw(format!("Browser rejected cookie {}", cookie.name));
                }
                Ok(_) => attached += 1,
                Err(err) => logw(format!("Failed to set cookie {}: {:#}", cookie.name, err)),
            }
        }
        logi(format!(
            "Loaded {}/{} cookies from {}",
            attached,
            stored.len(),
            self.cookies_path.display()
        ));
        Ok(())
    }

    async fn media_locators(&self, driver: &WebDriver) -> Result<Vec<String>> {
        let mut found = Vec::new();
        for (strategy, attrs) in media_strategies() {
            for el in driver.find_all(&strategy.locator).await? {
                for attr in attrs.iter() {
                    if let Some(url) = driver.attribute(&el, attr).await? {
                        if !url.trim().is_empty() {
                            found.push(url);
                            break;
                        }
                    }
                }
            }
        }
        Ok(found)
    }

    async fn first_match(&self, driver: &WebDriver, strategies: &[Strategy]) -> Result<Option<(&'static str, ElementRef)>> {
        for strategy in strategies {
            if let Some(el) = driver.find_all(&strategy.locator).await?.into_iter().next() {
                return Ok(Some((strategy.name, el)));
            }
        }
        Ok(None)
    }

    async fn fetch_direct(&self, driver: &WebDriver, locator: &str) -> Result<Vec<u8>> {
        let reply = driver
            .cdp("Network.getCookies", json!({ "urls": [locator] }))
            .await?;
        let header = reply
            .get("cookies")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|c| {
                        Some(format!(
                            "{}={}",
                            c.get("name")?.as_str()?,
                            c.get("value")?.as_str()?
                        ))
                    })
                    .collect::<Vec<_>>()
                    .join("; ")
            })
            .unwrap_or_default();

        let resp = reqwest::Client::new()
            .get(locator)
            .header("User-Agent", USER_AGENT)
            .header("Cookie", header)
            .timeout(Duration::from_secs(300))
            .send()
            .await
            .context("clip request failed")?;
        if !resp.status().is_success() {
            return Err(anyhow!("clip request HTTP {}", resp.status().as_u16()).into());
        }
        Ok(resp.bytes().await.context("clip body read failed")?.to_vec())
    }

    async fn return_to_flow(&self, driver: &WebDriver) {
        if let Err(err) = driver.goto(&self.flow_url).await {
            logw(format!("Failed to return to Flow: {:#}", err));
        }
        self.clock.sleep(NAVIGATION_SETTLE).await;
    }
}

#[async_trait]
impl VideoStudio for FlowSession {
    async fn open(&mut self) -> Result<()> {
        fs::create_dir_all(&self.download_dir)
            .await
            .with_context(|| format!("Failed to create dir {}", self.download_dir.display()))?;
        let download_dir = fs::canonicalize(&self.download_dir)
            .await
            .with_context(|| format!("Failed to resolve {}", self.download_dir.display()))?;

        logi("Starting browser...");
        let opts = ChromeOptions {
            headless: self.headless,
            user_agent: USER_AGENT.to_string(),
            download_dir: download_dir.display().to_string(),
        };
        self.driver = Some(WebDriver::launch(&self.webdriver_url, &opts).await?);
        logok("Browser started");

        let driver = self.driver()?;
        self.attach_cookies(driver).await?;

        logi(format!("Navigating to {}", self.flow_url));
        driver.goto(&self.flow_url).await?;
        self.clock.sleep(NAVIGATION_SETTLE).await;

        let text = driver.visible_text().await?;
        if let Some(marker) = detect_login_prompt(&text, &self.login_markers) {
            return Err(PipelineError::Authentication(format!(
                "login page detected (\"{}\"); refresh {}",
                marker,
                self.cookies_path.display()
            )));
        }

        logok("Flow loaded");
        Ok(())
    }

    async fn persist_cookies(&mut self) -> Result<()> {
        let driver = self.driver()?;
        let reply = driver.cdp("Network.getAllCookies", json!({})).await?;
        let current: Vec<Cookie> =
            serde_json::from_value(reply.get("cookies").cloned().unwrap_or(Value::Null))?;
        cookies::save_cookies(&self.cookies_path, &current).await?;
        logok(format!(
            "Saved {} cookies to {}",
            current.len(),
            self.cookies_path.display()
        ));
        Ok(())
    }

    async fn submit(&mut self, prompt: &str) -> Result<RenderHandle> {
        let driver = self.driver()?;
        let baseline: HashSet<String> = self.media_locators(driver).await?.into_iter().collect();

        let (field_name, field) = self
            .first_match(driver, &prompt_field_strategies())
            .await?
            .ok_or_else(|| anyhow!("prompt field not found"))?;
        driver.clear(&field).await?;
        driver.send_keys(&field, prompt).await?;
        logi(format!("Prompt entered via {}", field_name));
        self.clock.sleep(PROMPT_SETTLE).await;

        for strategy in submit_strategies() {
            let Some(button) = driver.find_all(&strategy.locator).await?.into_iter().next() else {
                continue;
            };
            match driver.click(&button).await {
                Ok(()) => {
                    logok(format!("Generate clicked via {}", strategy.name));
                    return Ok(RenderHandle { baseline });
                }
                Err(err) => logw(format!("Click via {} failed: {:#}", strategy.name, err)),
            }
        }

        Err(anyhow!("could not find a generate button").into())
    }

    async fn poll(&self, handle: &RenderHandle) -> Result<RenderPoll> {
        let driver = self.driver()?;

        for url in self.media_locators(driver).await? {
            if !handle.baseline.contains(&url) {
                return Ok(RenderPoll::Ready(url));
            }
        }

        if let Some((name, el)) = self.first_match(driver, &error_strategies()).await? {
            let text = driver.text(&el).await.unwrap_or_default();
            let message = if text.trim().is_empty() {
                format!("error indicator {}", name)
            } else {
                text.trim().to_string()
            };
            return Ok(RenderPoll::Failed(message));
        }

        Ok(RenderPoll::Pending)
    }

    async fn fetch(&mut self, locator: &str) -> Result<Vec<u8>> {
        let driver = self.driver()?;
        let before: HashSet<PathBuf> = completed_downloads(&self.download_dir).into_iter().collect();

        logi(format!("Downloading clip: {}", locator));
        if let Err(err) = driver.goto(locator).await {
            // Navigations that turn into downloads are often reported as aborted.
            logw(format!("Navigation to clip reported: {:#}", err));
        }

        let dir = self.download_dir.clone();
        let policy = PollPolicy::with_ceiling(DOWNLOAD_POLL_INTERVAL, DOWNLOAD_CEILING);
        let outcome = poll_until(policy, self.clock.as_ref(), |_| {
            let dir = dir.clone();
            let before = &before;
            async move {
                Ok::<_, anyhow::Error>(
                    completed_downloads(&dir)
                        .into_iter()
                        .find(|p| !before.contains(p)),
                )
            }
        })
        .await;

        let bytes = match outcome {
            PollOutcome::Ready(path) => take_download(&path).await,
            PollOutcome::TimedOut { .. } if locator.starts_with("http") => {
                logw("No browser download appeared; fetching the clip directly");
                self.fetch_direct(driver, locator).await
            }
            PollOutcome::TimedOut { .. } => Err(anyhow!(
                "no download appeared within {}s",
                policy.ceiling().as_secs()
            )
            .into()),
        };

        self.return_to_flow(driver).await;
        bytes
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(driver) = self.driver.take() {
            driver.quit().await?;
            logok("Browser closed");
        }
        Ok(())
    }
}
