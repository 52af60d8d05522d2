//! Headless browser session management.
//!
//! A single browser and page are lazily created and reused across all
//! publication calls in the process. Authentication prefers cookies loaded
//! from a JSON file, falling back to credential login when the home page
//! still shows a login form.

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::PublicationError;
use crate::publisher::selectors::{LOGIN_PASSWORD, LOGIN_SUBMIT, LOGIN_USERNAME};

const VIEWPORT_WIDTH: u32 = 1280;
const VIEWPORT_HEIGHT: u32 = 900;
const PAGE_TIMEOUT_SECS: u64 = 60;
const LOGIN_SETTLE_MS: u64 = 5000;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub cookies_file: Option<PathBuf>,
    pub chrome_path: Option<String>,
}

/// A stored cookie as serialized in the cookies file.
#[derive(Debug, Deserialize)]
struct StoredCookie {
    name: String,
    value: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

struct SessionInner {
    browser: Browser,
    page: Page,
}

/// Lazily initialized, process-wide browser session.
pub struct BrowserSession {
    config: SessionConfig,
    inner: Mutex<Option<SessionInner>>,
}

impl BrowserSession {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(None),
        }
    }

    /// Get the shared page, launching the browser and authenticating on
    /// first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the browser cannot be launched or login fails.
    pub async fn page(&self) -> Result<Page, PublicationError> {
        let mut guard = self.inner.lock().await;
        if let Some(inner) = guard.as_ref() {
            return Ok(inner.page.clone());
        }

        info!("Launching headless browser for publishing");
        let browser_config = self.browser_config()?;
        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| PublicationError::Browser(format!("failed to launch browser: {e}")))?;

        // Drive the CDP event loop in the background.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {e}");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| PublicationError::Browser(format!("failed to create page: {e}")))?;

        self.load_cookies(&page).await;
        self.ensure_logged_in(&page).await?;

        *guard = Some(SessionInner {
            browser,
            page: page.clone(),
        });
        info!("Browser session ready");

        Ok(page)
    }

    fn browser_config(&self) -> Result<BrowserConfig, PublicationError> {
        let mut builder = BrowserConfig::builder()
            .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
            .request_timeout(Duration::from_secs(PAGE_TIMEOUT_SECS))
            .no_sandbox()
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--mute-audio")
            .arg("--hide-scrollbars")
            .arg("--lang=en-US");

        if let Some(ref chrome_path) = self.config.chrome_path {
            builder = builder.chrome_executable(chrome_path);
        }

        builder
            .build()
            .map_err(|e| PublicationError::Browser(format!("invalid browser config: {e}")))
    }

    /// Load cookies from the configured file, best effort.
    async fn load_cookies(&self, page: &Page) {
        let Some(path) = &self.config.cookies_file else {
            debug!("No cookies file configured");
            return;
        };

        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), "Cookies file unreadable, will rely on credential login: {e}");
                return;
            }
        };

        let stored: Vec<StoredCookie> = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!(path = %path.display(), "Cookies file unparseable, will rely on credential login: {e}");
                return;
            }
        };

        let default_domain = cookie_domain(&self.config.base_url);
        let mut params = Vec::new();
        for cookie in stored {
            let builder = CookieParam::builder()
                .name(cookie.name)
                .value(cookie.value)
                .domain(cookie.domain.unwrap_or_else(|| default_domain.clone()))
                .path(cookie.path.unwrap_or_else(|| "/".to_string()));
            match builder.build() {
                Ok(param) => params.push(param),
                Err(e) => warn!("Skipping invalid cookie: {e}"),
            }
        }

        let count = params.len();
        if let Err(e) = page.set_cookies(params).await {
            warn!("Failed to set cookies: {e}");
        } else {
            info!(count, "Session cookies loaded");
        }
    }

    /// Navigate home and log in with credentials when the cookie session is
    /// absent or stale.
    async fn ensure_logged_in(&self, page: &Page) -> Result<(), PublicationError> {
        page.goto(self.config.base_url.clone())
            .await
            .map_err(|e| PublicationError::Browser(format!("failed to open home page: {e}")))?;
        let _ = page.wait_for_navigation().await;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        if page.find_element(LOGIN_USERNAME).await.is_err() {
            debug!("No login form present, session is authenticated");
            return Ok(());
        }

        let (Some(username), Some(password)) =
            (&self.config.username, &self.config.password)
        else {
            return Err(PublicationError::Login(
                "login form shown but no credentials configured".to_string(),
            ));
        };

        info!("Cookie session invalid, logging in with credentials");

        let user_field = page
            .find_element(LOGIN_USERNAME)
            .await
            .map_err(|e| PublicationError::Login(format!("username field: {e}")))?;
        user_field
            .click()
            .await
            .map_err(|e| PublicationError::Login(format!("focusing username: {e}")))?;
        user_field
            .type_str(username)
            .await
            .map_err(|e| PublicationError::Login(format!("typing username: {e}")))?;

        let pass_field = page
            .find_element(LOGIN_PASSWORD)
            .await
            .map_err(|e| PublicationError::Login(format!("password field: {e}")))?;
        pass_field
            .click()
            .await
            .map_err(|e| PublicationError::Login(format!("focusing password: {e}")))?;
        pass_field
            .type_str(password)
            .await
            .map_err(|e| PublicationError::Login(format!("typing password: {e}")))?;

        let submit = page
            .find_element(LOGIN_SUBMIT)
            .await
            .map_err(|e| PublicationError::Login(format!("submit button: {e}")))?;
        submit
            .click()
            .await
            .map_err(|e| PublicationError::Login(format!("submitting login: {e}")))?;

        let _ = page.wait_for_navigation().await;
        tokio::time::sleep(Duration::from_millis(LOGIN_SETTLE_MS)).await;

        // Still on the login form means the credentials were rejected.
        if page.find_element(LOGIN_USERNAME).await.is_ok() {
            return Err(PublicationError::Login(
                "login form still present after credential submit".to_string(),
            ));
        }

        info!("Credential login succeeded");
        Ok(())
    }

    /// Shutdown the browser gracefully.
    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut inner) = guard.take() {
            if let Err(e) = inner.browser.close().await {
                error!("Failed to close browser: {e}");
            } else {
                info!("Browser shutdown complete");
            }
        }
    }
}

/// Derive the cookie domain from the base URL (e.g. `.instagram.com`).
fn cookie_domain(base_url: &str) -> String {
    let host = base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default();
    let bare = host.strip_prefix("www.").unwrap_or(host);
    format!(".{bare}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_domain() {
        assert_eq!(cookie_domain("https://www.instagram.com"), ".instagram.com");
        assert_eq!(
            cookie_domain("https://instagram.com/some/path"),
            ".instagram.com"
        );
    }

    #[test]
    fn test_stored_cookie_parsing() {
        let json = r#"[{"name": "sessionid", "value": "abc"},
                       {"name": "csrftoken", "value": "x", "domain": ".instagram.com", "path": "/"}]"#;
        let cookies: Vec<StoredCookie> = serde_json::from_str(json).unwrap();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "sessionid");
        assert!(cookies[0].domain.is_none());
        assert_eq!(cookies[1].domain.as_deref(), Some(".instagram.com"));
    }
}
