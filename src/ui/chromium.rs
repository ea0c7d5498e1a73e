//! Chromium [`UiDriver`] over the DevTools protocol.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig as CdpConfig, Element, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{scripts, BrowserCookie, ContextId, ElementRef, OptionChoice, UiDriver};
use crate::config::BrowserConfig;
use crate::error::UiError;

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/opt/google/chrome/google-chrome",
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
];

/// CDP error text that means the node went away under us.
const STALE_MARKERS: &[&str] = &[
    "Could not find node",
    "No node with given id",
    "Node is detached",
    "Cannot find context with specified id",
    "Cannot find object with id",
];

/// Live element handles kept per page. Table polling registers fresh
/// handles on every read.
const ELEMENT_CAPACITY: usize = 4096;

/// Token-addressed handles, oldest evicted first once `capacity` is
/// reached. An evicted token reads as stale.
struct ElementRegistry<T> {
    entries: HashMap<String, T>,
    order: VecDeque<String>,
    capacity: usize,
    next: u64,
}

impl<T> ElementRegistry<T> {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            next: 0,
        }
    }

    fn insert(&mut self, value: T) -> String {
        while self.order.len() >= self.capacity {
            match self.order.pop_front() {
                Some(old) => {
                    self.entries.remove(&old);
                }
                None => break,
            }
        }
        let token = format!("el-{}", self.next);
        self.next += 1;
        self.entries.insert(token.clone(), value);
        self.order.push_back(token.clone());
        token
    }

    fn get(&self, token: &str) -> Option<&T> {
        self.entries.get(token)
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct ChromiumDriver {
    browser: Mutex<Browser>,
    page: Mutex<Page>,
    elements: Mutex<ElementRegistry<Element>>,
    timeout: Duration,
    launched: bool,
}

impl ChromiumDriver {
    /// Launch Chrome, or attach to the remote DevTools endpoint when one is
    /// configured (reusing its first open tab).
    pub async fn start(config: &BrowserConfig) -> anyhow::Result<Self> {
        let launched = config.remote_url.is_none();
        let browser = match &config.remote_url {
            Some(url) => connect_remote(url).await?,
            None => launch(config).await?,
        };

        let existing = browser.pages().await.unwrap_or_default();
        let page = match existing.into_iter().next() {
            Some(page) => page,
            None => browser
                .new_page("about:blank")
                .await
                .context("Failed to open browser tab")?,
        };

        Ok(Self {
            browser: Mutex::new(browser),
            page: Mutex::new(page),
            elements: Mutex::new(ElementRegistry::new(ELEMENT_CAPACITY)),
            timeout: Duration::from_secs(config.timeout),
            launched,
        })
    }

    /// Close a launched browser. Remote browsers are left running.
    pub async fn shutdown(&self) {
        if !self.launched {
            return;
        }
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            debug!("Browser close failed: {}", e);
        }
    }

    async fn current_page(&self) -> Page {
        self.page.lock().await.clone()
    }

    async fn register(&self, element: Element) -> ElementRef {
        ElementRef(self.elements.lock().await.insert(element))
    }

    async fn register_all(&self, elements: Vec<Element>) -> Vec<ElementRef> {
        let mut registry = self.elements.lock().await;
        elements
            .into_iter()
            .map(|el| ElementRef(registry.insert(el)))
            .collect()
    }

    async fn find_page(&self, id: &ContextId) -> Result<Page, UiError> {
        let browser = self.browser.lock().await;
        let pages = browser.pages().await.map_err(browser_err)?;
        pages
            .into_iter()
            .find(|p| p.target_id().inner() == &id.0)
            .ok_or_else(|| UiError::NoSuchContext(id.to_string()))
    }
}

fn find_chrome(config: &BrowserConfig) -> anyhow::Result<PathBuf> {
    if let Some(path) = &config.chrome_path {
        return Ok(path.clone());
    }
    for path in CHROME_PATHS {
        let p = std::path::Path::new(path);
        if p.exists() {
            info!("Found Chrome at: {}", path);
            return Ok(p.to_path_buf());
        }
    }
    for cmd in &[
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ] {
        if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    info!("Found Chrome in PATH: {}", path);
                    return Ok(PathBuf::from(path));
                }
            }
        }
    }
    Err(anyhow::anyhow!(
        "Chrome/Chromium not found. Install it, set browser.chrome_path, \
         or point browser.remote_url at a running instance"
    ))
}

async fn launch(config: &BrowserConfig) -> anyhow::Result<Browser> {
    info!("Launching browser (headless={})", config.headless);
    let chrome = find_chrome(config)?;

    let mut builder = CdpConfig::builder()
        .chrome_executable(chrome)
        .request_timeout(Duration::from_secs(config.timeout));
    if !config.headless {
        builder = builder.with_head();
    }
    if let Some(proxy) = &config.proxy {
        builder = builder.arg(format!("--proxy-server={}", proxy));
    }
    builder = builder
        .arg("--disable-infobars")
        .arg("--disable-dev-shm-usage")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-popup-blocking");
    for arg in &config.chrome_args {
        builder = builder.arg(arg);
    }

    let cdp_config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;
    let (browser, mut handler) = Browser::launch(cdp_config)
        .await
        .context("Failed to launch browser")?;

    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });
    Ok(browser)
}

async fn connect_remote(url: &str) -> anyhow::Result<Browser> {
    info!("Connecting to remote browser at {}", url);

    let http_url = url
        .replace("ws://", "http://")
        .replace("wss://", "https://");
    let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

    let resp: serde_json::Value = reqwest::Client::new()
        .get(&version_url)
        .send()
        .await
        .context("Failed to connect to remote browser")?
        .json()
        .await
        .context("Failed to parse browser version info")?;
    let ws_url = resp
        .get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("No webSocketDebuggerUrl in response"))?;

    let (browser, mut handler) = Browser::connect(ws_url)
        .await
        .context("Failed to connect to remote browser")?;

    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });
    Ok(browser)
}

fn classify(e: CdpError, what: &str) -> UiError {
    let msg = e.to_string();
    if STALE_MARKERS.iter().any(|m| msg.contains(m)) {
        UiError::Stale(format!("{}: {}", what, msg))
    } else if msg.contains("not clickable") || msg.contains("not visible") {
        UiError::NotInteractable(format!("{}: {}", what, msg))
    } else {
        UiError::Browser(format!("{}: {}", what, msg))
    }
}

fn browser_err(e: CdpError) -> UiError {
    UiError::Browser(e.to_string())
}

#[async_trait]
impl UiDriver for ChromiumDriver {
    async fn navigate(&self, url: &str) -> Result<(), UiError> {
        let page = self.current_page().await;
        self.elements.lock().await.clear();
        match tokio::time::timeout(self.timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(browser_err(e)),
            Err(_) => Err(UiError::Timeout(self.timeout, url.to_string())),
        }
    }

    async fn locate(&self, selector: &str) -> Result<Option<ElementRef>, UiError> {
        let page = self.current_page().await;
        let found = page
            .find_elements(selector)
            .await
            .map_err(|e| classify(e, selector))?;
        match found.into_iter().next() {
            Some(el) => Ok(Some(self.register(el).await)),
            None => Ok(None),
        }
    }

    async fn locate_all(&self, selector: &str) -> Result<Vec<ElementRef>, UiError> {
        let page = self.current_page().await;
        let found = page
            .find_elements(selector)
            .await
            .map_err(|e| classify(e, selector))?;
        Ok(self.register_all(found).await)
    }

    async fn locate_within(
        &self,
        parent: &ElementRef,
        selector: &str,
    ) -> Result<Option<ElementRef>, UiError> {
        Ok(self
            .locate_all_within(parent, selector)
            .await?
            .into_iter()
            .next())
    }

    async fn locate_all_within(
        &self,
        parent: &ElementRef,
        selector: &str,
    ) -> Result<Vec<ElementRef>, UiError> {
        let found = {
            let elements = self.elements.lock().await;
            let el = elements
                .get(&parent.0)
                .ok_or_else(|| UiError::Stale(parent.0.clone()))?;
            el.find_elements(selector)
                .await
                .map_err(|e| classify(e, selector))?
        };
        Ok(self.register_all(found).await)
    }

    async fn click(&self, element: &ElementRef) -> Result<(), UiError> {
        let elements = self.elements.lock().await;
        let el = elements
            .get(&element.0)
            .ok_or_else(|| UiError::Stale(element.0.clone()))?;
        el.click().await.map_err(|e| classify(e, "click"))?;
        Ok(())
    }

    async fn read_text(&self, element: &ElementRef) -> Result<String, UiError> {
        let elements = self.elements.lock().await;
        let el = elements
            .get(&element.0)
            .ok_or_else(|| UiError::Stale(element.0.clone()))?;
        let text = el.inner_text().await.map_err(|e| classify(e, "text"))?;
        Ok(text.unwrap_or_default())
    }

    async fn read_attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, UiError> {
        let elements = self.elements.lock().await;
        let el = elements
            .get(&element.0)
            .ok_or_else(|| UiError::Stale(element.0.clone()))?;
        el.attribute(name).await.map_err(|e| classify(e, name))
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), UiError> {
        let elements = self.elements.lock().await;
        let el = elements
            .get(&element.0)
            .ok_or_else(|| UiError::Stale(element.0.clone()))?;
        el.focus().await.map_err(|e| classify(e, "focus"))?;
        el.type_str(text).await.map_err(|e| classify(e, "type"))?;
        Ok(())
    }

    async fn press_enter(&self, element: &ElementRef) -> Result<(), UiError> {
        let elements = self.elements.lock().await;
        let el = elements
            .get(&element.0)
            .ok_or_else(|| UiError::Stale(element.0.clone()))?;
        el.press_key("Enter")
            .await
            .map_err(|e| classify(e, "enter"))?;
        Ok(())
    }

    async fn select_option(
        &self,
        select: &ElementRef,
        choice: &OptionChoice,
    ) -> Result<Option<String>, UiError> {
        let script = match choice {
            OptionChoice::Value(v) => scripts::select_option("value", v),
            OptionChoice::Label(l) => scripts::select_option("label", l),
            OptionChoice::Last => scripts::select_option("last", ""),
        };
        let value = self.execute(&script, Some(select)).await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn execute(
        &self,
        script: &str,
        receiver: Option<&ElementRef>,
    ) -> Result<serde_json::Value, UiError> {
        match receiver {
            Some(element) => {
                let elements = self.elements.lock().await;
                let el = elements
                    .get(&element.0)
                    .ok_or_else(|| UiError::Stale(element.0.clone()))?;
                let ret = el
                    .call_js_fn(script, true)
                    .await
                    .map_err(|e| classify(e, "script"))?;
                if let Some(details) = ret.exception_details {
                    return Err(UiError::Script(details.text));
                }
                Ok(ret.result.value.unwrap_or(serde_json::Value::Null))
            }
            None => {
                let page = self.current_page().await;
                let result = page
                    .evaluate(script.to_string())
                    .await
                    .map_err(|e| UiError::Script(e.to_string()))?;
                Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
            }
        }
    }

    async fn cookies(&self) -> Result<Vec<BrowserCookie>, UiError> {
        let page = self.current_page().await;
        let cookies = page.get_cookies().await.map_err(browser_err)?;
        debug!("Got {} cookies from browser", cookies.len());
        Ok(cookies
            .into_iter()
            .map(|c| BrowserCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                secure: c.secure,
                http_only: c.http_only,
            })
            .collect())
    }

    async fn current_context(&self) -> Result<ContextId, UiError> {
        let page = self.current_page().await;
        Ok(ContextId(page.target_id().inner().clone()))
    }

    async fn contexts(&self) -> Result<Vec<ContextId>, UiError> {
        let browser = self.browser.lock().await;
        let pages = browser.pages().await.map_err(browser_err)?;
        Ok(pages
            .iter()
            .map(|p| ContextId(p.target_id().inner().clone()))
            .collect())
    }

    async fn switch_context(&self, id: &ContextId) -> Result<(), UiError> {
        let page = self.find_page(id).await?;
        if let Err(e) = page.bring_to_front().await {
            debug!("bring_to_front failed: {}", e);
        }
        *self.page.lock().await = page;
        self.elements.lock().await.clear();
        Ok(())
    }

    async fn close_context(&self, id: &ContextId) -> Result<(), UiError> {
        let page = self.find_page(id).await?;
        page.close().await.map_err(browser_err)
    }

    async fn current_location(&self) -> Result<Option<String>, UiError> {
        let page = self.current_page().await;
        page.url().await.map_err(browser_err)
    }
}
