use anyhow::{Context, Result, anyhow, bail};
use reqwest::{Client, Method};
use serde_json::{Value, json};
use std::time::Duration;

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52f-4a7c4e1f1e4c";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub using: &'static str,
    pub value: String,
}

impl Locator {
    pub fn css(value: impl Into<String>) -> Self {
        Self {
            using: "css selector",
            value: value.into(),
        }
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self {
            using: "xpath",
            value: value.into(),
        }
    }

    /// Buttons whose visible text contains `text`.
    pub fn button_text(text: &str) -> Self {
        Self::xpath(format!(
            "//button[contains(normalize-space(.), '{}')]",
            text.replace('\'', "")
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(pub String);

pub(crate) fn element_ids(value: &Value) -> Vec<ElementRef> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.get(ELEMENT_KEY).and_then(Value::as_str))
                .map(|id| ElementRef(id.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Unwraps the `{"value": ...}` envelope, turning driver errors into `Err`.
pub(crate) fn unwrap_response(body: Value) -> Result<Value> {
    let value = body
        .get("value")
        .cloned()
        .ok_or_else(|| anyhow!("WebDriver response without value: {}", body))?;
    if let Some(err) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        bail!("WebDriver {}: {}", err, message.lines().next().unwrap_or(""));
    }
    Ok(value)
}

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    pub user_agent: String,
    pub download_dir: String,
}

pub(crate) fn chrome_capabilities(opts: &ChromeOptions) -> Value {
    let mut args = vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--no-sandbox".to_string(),
        "--window-size=1920,1080".to_string(),
        format!("--user-agent={}", opts.user_agent),
    ];
    if opts.headless {
        args.push("--headless=new".to_string());
    }

    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "pageLoadStrategy": "eager",
                "goog:chromeOptions": {
                    "args": args,
                    "excludeSwitches": ["enable-automation"],
                    "prefs": {
                        "download.default_directory": opts.download_dir,
                        "download.prompt_for_download": false,
                        "download.directory_upgrade": true,
                        "safebrowsing.enabled": true,
                    },
                },
                "timeouts": {"pageLoad": 60_000, "script": 30_000, "implicit": 0},
            }
        }
    })
}

pub struct WebDriver {
    client: Client,
    base: String,
    session_id: String,
}

impl WebDriver {
    /// Starts a new browser session on the driver at `base_url`.
    pub async fn launch(base_url: &str, opts: &ChromeOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to build WebDriver HTTP client")?;
        let base = base_url.trim_end_matches('/').to_string();

        let resp = client
            .post(format!("{}/session", base))
            .json(&chrome_capabilities(opts))
            .send()
            .await
            .with_context(|| format!("WebDriver not reachable at {}", base))?;
        let value = unwrap_response(resp.json().await.context("WebDriver session reply")?)?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("WebDriver did not return a session id"))?
            .to_string();

        Ok(Self {
            client,
            base,
            session_id,
        })
    }

    async fn cmd(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/session/{}{}", self.base, self.session_id, path);
        let mut req = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            req = req.json(&body);
        } else if method == Method::POST {
            req = req.json(&json!({}));
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("WebDriver {} {}", method, path))?;
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("WebDriver {} {} reply", method, path))?;
        unwrap_response(body)
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.cmd(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    /// Rendered text of the document body.
    pub async fn visible_text(&self) -> Result<String> {
        let v = self
            .cmd(
                Method::POST,
                "/execute/sync",
                Some(json!({
                    "script": "return document.body ? document.body.innerText : '';",
                    "args": [],
                })),
            )
            .await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    pub async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementRef>> {
        let v = self
            .cmd(
                Method::POST,
                "/elements",
                Some(json!({ "using": locator.using, "value": locator.value })),
            )
            .await?;
        Ok(element_ids(&v))
    }

    pub async fn attribute(&self, el: &ElementRef, name: &str) -> Result<Option<String>> {
        let v = self
            .cmd(Method::GET, &format!("/element/{}/attribute/{}", el.0, name), None)
            .await?;
        Ok(v.as_str().map(str::to_string))
    }

    pub async fn text(&self, el: &ElementRef) -> Result<String> {
        let v = self
            .cmd(Method::GET, &format!("/element/{}/text", el.0), None)
            .await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    pub async fn clear(&self, el: &ElementRef) -> Result<()> {
        self.cmd(Method::POST, &format!("/element/{}/clear", el.0), None)
            .await?;
        Ok(())
    }

    pub async fn send_keys(&self, el: &ElementRef, text: &str) -> Result<()> {
        self.cmd(
            Method::POST,
            &format!("/element/{}/value", el.0),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    pub async fn click(&self, el: &ElementRef) -> Result<()> {
        self.cmd(Method::POST, &format!("/element/{}/click", el.0), None)
            .await?;
        Ok(())
    }

    /// Runs a Chrome DevTools Protocol command.
    pub async fn cdp(&self, command: &str, params: Value) -> Result<Value> {
        self.cmd(
            Method::POST,
            "/goog/cdp/execute",
            Some(json!({ "cmd": command, "params": params })),
        )
        .await
    }

    pub async fn quit(&self) -> Result<()> {
        let url = format!("{}/session/{}", self.base, self.session_id);
        self.client
            .delete(&url)
            .send()
            .await
            .context("WebDriver delete session")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_errors_become_err() {
        let body = json!({"value": {"error": "no such element", "message": "Unable to locate\nstack"}});
        let err = unwrap_response(body).unwrap_err().to_string();
        assert_eq!(err, "WebDriver no such element: Unable to locate");
        assert_eq!(unwrap_response(json!({"value": null})).unwrap(), Value::Null);
    }

    #[test]
    fn collects_element_references() {
        let v = json!([{ELEMENT_KEY: "a"}, {"other": "x"}, {ELEMENT_KEY: "b"}]);
        assert_eq!(
            element_ids(&v),
            vec![ElementRef("a".to_string()), ElementRef("b".to_string())]
        );
    }

    #[test]
    fn capabilities_hide_automation() {
        let caps = chrome_capabilities(&ChromeOptions {
            headless: true,
            user_agent: "UA".to_string(),
            download_dir: "/tmp/dl".to_string(),
        });
        let chrome = &caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"];
        let args: Vec<&str> = chrome["args"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(args.contains(&"--disable-blink-features=AutomationControlled"));
        assert!(args.contains(&"--headless=new"));
        assert_eq!(chrome["excludeSwitches"][0], "enable-automation");
        assert_eq!(chrome["prefs"]["download.default_directory"], "/tmp/dl");
    }

    #[test]
    fn button_text_locator_is_xpath() {
        let loc = Locator::button_text("Generate");
        assert_eq!(loc.using, "xpath");
        assert_eq!(loc.value, "//button[contains(normalize-space(.), 'Generate')]");
    }
}
