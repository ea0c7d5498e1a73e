//! Authenticated side-channel HTTP session.
//!
//! The browser holds the login; documents are fetched with a plain HTTP
//! client seeded from the browser's cookies once per harvest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, CONTENT_DISPOSITION, CONTENT_TYPE};
use tracing::debug;
use url::Url;

use super::response::{parse_content_disposition_filename, DocumentResponse};
use crate::error::{HarvestError, RetrievalError};
use crate::ui::{BrowserCookie, UiDriver};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// HTTP GET seam.
#[async_trait]
pub trait DocumentClient: Send + Sync {
    async fn get(&self, url: &Url) -> Result<DocumentResponse, RetrievalError>;
}

/// Builds a [`DocumentClient`] from the live browser session.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn establish(&self, ui: &dyn UiDriver) -> Result<Box<dyn DocumentClient>, HarvestError>;
}

/// reqwest client carrying the browser's cookies.
pub struct HttpSession {
    client: reqwest::Client,
}

impl HttpSession {
    pub fn from_cookies(
        cookies: &[BrowserCookie],
        origin: Option<&Url>,
        timeout: Duration,
        proxy: Option<&str>,
    ) -> Result<Self, RetrievalError> {
        let jar = reqwest::cookie::Jar::default();
        let mut seeded = 0;
        for cookie in cookies {
            if cookie.name.is_empty() {
                continue;
            }
            let Some(url) = cookie_url(cookie, origin) else {
                continue;
            };
            let mut cookie_str = format!("{}={}; Path={}", cookie.name, cookie.value, cookie.path);
            if !cookie.domain.is_empty() {
                cookie_str.push_str(&format!("; Domain={}", cookie.domain));
            }
            if cookie.secure {
                cookie_str.push_str("; Secure");
            }
            jar.add_cookie_str(&cookie_str, &url);
            seeded += 1;
        }
        debug!("Seeded {} of {} browser cookies", seeded, cookies.len());

        let mut builder = reqwest::Client::builder()
            .cookie_provider(Arc::new(jar))
            .user_agent(USER_AGENT)
            .timeout(timeout);
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

/// URL a cookie applies to: its own domain, else the page origin.
fn cookie_url(cookie: &BrowserCookie, origin: Option<&Url>) -> Option<Url> {
    let host = cookie.domain.trim_start_matches('.');
    if host.is_empty() {
        return origin.cloned();
    }
    let scheme = if cookie.secure {
        "https"
    } else {
        origin.map(Url::scheme).unwrap_or("https")
    };
    let path = if cookie.path.is_empty() { "/" } else { &cookie.path };
    Url::parse(&format!("{}://{}{}", scheme, host, path)).ok()
}

#[async_trait]
impl DocumentClient for HttpSession {
    async fn get(&self, url: &Url) -> Result<DocumentResponse, RetrievalError> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status().as_u16();
        let header = |name: HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_type = header(CONTENT_TYPE);
        let filename_hint = header(CONTENT_DISPOSITION)
            .as_deref()
            .and_then(parse_content_disposition_filename);
        let body = response.bytes().await?.to_vec();

        Ok(DocumentResponse {
            url: url.clone(),
            status,
            content_type,
            filename_hint,
            body,
        })
    }
}

/// Seeds an [`HttpSession`] from the browser's current cookies.
pub struct HttpSessionFactory {
    pub timeout: Duration,
    pub proxy: Option<String>,
}

#[async_trait]
impl SessionFactory for HttpSessionFactory {
    async fn establish(&self, ui: &dyn UiDriver) -> Result<Box<dyn DocumentClient>, HarvestError> {
        let cookies = ui
            .cookies()
            .await
            .map_err(|e| HarvestError::Session(e.to_string()))?;
        if cookies.is_empty() {
            return Err(HarvestError::Session("browser has no cookies".into()));
        }
        let origin = ui
            .current_location()
            .await
            .ok()
            .flatten()
            .and_then(|l| Url::parse(&l).ok());
        let session =
            HttpSession::from_cookies(&cookies, origin.as_ref(), self.timeout, self.proxy.as_deref())
                .map_err(|e| HarvestError::Session(e.to_string()))?;
        Ok(Box::new(session))
    }
}
