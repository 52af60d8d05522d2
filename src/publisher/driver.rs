//! The publication state machine.
//!
//! Drives Instagram's multi-step create-post flow:
//! `Idle → HomeLoaded → CreateMenuOpened → FileSelected → EditingStep1 →
//! EditingStep2 → CaptionEntered → Submitted → Confirmed`.
//!
//! Every locate operation resolves against an ordered candidate list from
//! [`super::selectors`] and reports which heuristic matched. Failure at any
//! state captures a timestamped screenshot and surfaces the error to the
//! orchestrator; the driver itself never retries.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::page::{Page, ScreenshotParams};
use tracing::{debug, error, info, warn};

use super::selectors::{
    Locator, CAPTION_BOX, CREATE_BUTTON, CREATE_MENU_POST_OPTION, FILE_INPUT, NEXT_BUTTON,
    PROGRESS_INDICATOR, SELECT_FROM_COMPUTER, SHARE_BUTTON, SUCCESS_INDICATOR,
};
use super::{BrowserSession, PublicationError};

const POLL_INTERVAL_MS: u64 = 250;
const AFFORDANCE_TIMEOUT: Duration = Duration::from_secs(10);
const NEXT_TIMEOUT: Duration = Duration::from_secs(8);
const PROGRESS_TIMEOUT: Duration = Duration::from_secs(30);
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);
const SETTLE_MS: u64 = 1500;

/// States of the publication flow, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishState {
    Idle,
    HomeLoaded,
    CreateMenuOpened,
    FileSelected,
    EditingStep1,
    EditingStep2,
    CaptionEntered,
    Submitted,
    Confirmed,
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::HomeLoaded => "home_loaded",
            Self::CreateMenuOpened => "create_menu_opened",
            Self::FileSelected => "file_selected",
            Self::EditingStep1 => "editing_step_1",
            Self::EditingStep2 => "editing_step_2",
            Self::CaptionEntered => "caption_entered",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
        };
        f.write_str(name)
    }
}

/// What an evaluated locator should do with its match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Exists,
    Click,
    ClickEnabled,
}

/// Publishes an image+caption pair through the shared browser session.
pub struct PublishDriver {
    session: Arc<BrowserSession>,
    base_url: String,
    screenshots_dir: PathBuf,
}

impl PublishDriver {
    #[must_use]
    pub fn new(session: Arc<BrowserSession>, base_url: String, screenshots_dir: PathBuf) -> Self {
        Self {
            session,
            base_url,
            screenshots_dir,
        }
    }

    /// Publish an image with its caption.
    ///
    /// # Errors
    ///
    /// Returns an error on any unrecoverable step failure; a screenshot is
    /// captured for diagnosis before the error propagates.
    pub async fn publish(&self, image_path: &Path, caption: &str) -> Result<(), PublicationError> {
        let page = self.session.page().await?;
        let mut state = PublishState::Idle;

        let result = self.run_flow(&page, image_path, caption, &mut state).await;
        if let Err(e) = &result {
            error!(state = %state, "Publication failed: {e}");
            self.capture_failure_screenshot(&page).await;
        }
        result
    }

    async fn run_flow(
        &self,
        page: &Page,
        image_path: &Path,
        caption: &str,
        state: &mut PublishState,
    ) -> Result<(), PublicationError> {
        self.open_home(page).await?;
        *state = PublishState::HomeLoaded;

        self.open_create_menu(page).await?;
        *state = PublishState::CreateMenuOpened;

        self.attach_image(page, image_path).await?;
        *state = PublishState::FileSelected;

        // Instagram's two-step edit flow; either step may be absent.
        for step in [PublishState::EditingStep1, PublishState::EditingStep2] {
            match wait_for(page, "next", NEXT_BUTTON, NEXT_TIMEOUT, Action::Click).await {
                Ok(idx) => debug!(state = %step, candidate = idx, "Clicked next"),
                Err(_) => warn!(state = %step, "No next control found, continuing"),
            }
            *state = step;
            settle().await;
        }

        self.enter_caption(page, caption).await?;
        *state = PublishState::CaptionEntered;

        self.submit(page).await?;
        *state = PublishState::Submitted;

        self.confirm(page).await;
        *state = PublishState::Confirmed;

        info!("Post published");
        Ok(())
    }

    async fn open_home(&self, page: &Page) -> Result<(), PublicationError> {
        page.goto(self.base_url.clone())
            .await
            .map_err(|e| PublicationError::Browser(format!("failed to open home: {e}")))?;
        let _ = page.wait_for_navigation().await;
        settle().await;
        Ok(())
    }

    async fn open_create_menu(&self, page: &Page) -> Result<(), PublicationError> {
        wait_for(page, "create", CREATE_BUTTON, AFFORDANCE_TIMEOUT, Action::Click).await?;
        settle().await;

        // A secondary menu ("Post" vs "AI") appears on some accounts only.
        if let Some(idx) =
            try_candidates(page, CREATE_MENU_POST_OPTION, Action::Click).await
        {
            debug!(candidate = idx, "Selected plain-post menu option");
            settle().await;
        }
        Ok(())
    }

    async fn attach_image(&self, page: &Page, image_path: &Path) -> Result<(), PublicationError> {
        let input = match find_file_input(page).await {
            Some(input) => input,
            None => {
                // The input is often hidden until the dialog affordance is used.
                if let Some(idx) =
                    try_candidates(page, SELECT_FROM_COMPUTER, Action::Click).await
                {
                    debug!(candidate = idx, "Revealed file input via dialog affordance");
                    settle().await;
                }
                find_file_input(page)
                    .await
                    .ok_or(PublicationError::ElementNotFound {
                        step: "file_input",
                        candidates: FILE_INPUT.len(),
                    })?
            }
        };

        let absolute = image_path
            .canonicalize()
            .map_err(|e| PublicationError::FileAttach(format!("bad image path: {e}")))?;

        let params = SetFileInputFilesParams {
            files: vec![absolute.to_string_lossy().into_owned()],
            node_id: None,
            backend_node_id: Some(input.backend_node_id),
            object_id: None,
        };
        page.execute(params)
            .await
            .map_err(|e| PublicationError::FileAttach(e.to_string()))?;

        info!(path = %absolute.display(), "Image attached");
        settle().await;
        Ok(())
    }

    async fn enter_caption(&self, page: &Page, caption: &str) -> Result<(), PublicationError> {
        let mut field = None;
        let deadline = tokio::time::Instant::now() + AFFORDANCE_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            for (idx, css) in CAPTION_BOX.iter().enumerate() {
                if let Ok(el) = page.find_element(*css).await {
                    debug!(candidate = idx, "Caption box located");
                    field = Some(el);
                    break;
                }
            }
            if field.is_some() {
                break;
            }
            poll_sleep().await;
        }
        let field = field.ok_or(PublicationError::ElementNotFound {
            step: "caption_box",
            candidates: CAPTION_BOX.len(),
        })?;

        field
            .click()
            .await
            .map_err(|e| PublicationError::Caption(format!("focusing caption box: {e}")))?;

        // Clear any placeholder content before typing.
        let _ = page.evaluate("document.execCommand('selectAll', false, null)").await;
        let _ = page.evaluate("document.execCommand('delete', false, null)").await;

        field
            .type_str(caption)
            .await
            .map_err(|e| PublicationError::Caption(format!("typing caption: {e}")))?;

        // Blur and read back to confirm the text landed.
        let _ = page.evaluate("document.activeElement && document.activeElement.blur()").await;
        let entered = field
            .inner_text()
            .await
            .map_err(|e| PublicationError::Caption(format!("reading caption back: {e}")))?
            .unwrap_or_default();
        if entered.trim().is_empty() {
            return Err(PublicationError::Caption(
                "caption field empty after typing".to_string(),
            ));
        }

        debug!(chars = entered.chars().count(), "Caption entered");
        Ok(())
    }

    async fn submit(&self, page: &Page) -> Result<(), PublicationError> {
        if !wait_until_gone(page, PROGRESS_INDICATOR, PROGRESS_TIMEOUT).await {
            warn!("Progress indicator still visible, attempting to share anyway");
        }

        wait_for(page, "share", SHARE_BUTTON, AFFORDANCE_TIMEOUT, Action::ClickEnabled).await?;
        info!("Share clicked");
        Ok(())
    }

    /// Wait for a completion signal. Instagram does not reliably expose one,
    /// so absence is logged as a warning rather than treated as a failure.
    async fn confirm(&self, page: &Page) {
        let home_path = self.base_url.trim_end_matches('/').to_string();
        let deadline = tokio::time::Instant::now() + CONFIRM_TIMEOUT;

        while tokio::time::Instant::now() < deadline {
            if let Ok(Some(url)) = page.url().await {
                let trimmed = url.trim_end_matches('/');
                if trimmed == home_path {
                    debug!("Returned to home URL, treating post as confirmed");
                    return;
                }
            }
            if try_candidates(page, SUCCESS_INDICATOR, Action::Exists)
                .await
                .is_some()
            {
                debug!("Success indicator visible");
                return;
            }
            poll_sleep().await;
        }

        warn!("No completion signal within bound; post may still have been shared");
    }

    /// Capture a timestamped screenshot for offline diagnosis, best effort.
    async fn capture_failure_screenshot(&self, page: &Page) {
        let params = ScreenshotParams::builder().full_page(true).build();
        let png = match page.screenshot(params).await {
            Ok(png) => png,
            Err(e) => {
                warn!("Failed to capture failure screenshot: {e}");
                return;
            }
        };

        let filename = format!(
            "publish-failure-{}.png",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        );
        let path = self.screenshots_dir.join(filename);
        if let Err(e) = tokio::fs::create_dir_all(&self.screenshots_dir).await {
            warn!("Failed to create screenshots dir: {e}");
            return;
        }
        match tokio::fs::write(&path, &png).await {
            Ok(()) => info!(path = %path.display(), "Failure screenshot saved"),
            Err(e) => warn!("Failed to write failure screenshot: {e}"),
        }
    }
}

/// Locate the file input, trying each CSS candidate in order.
async fn find_file_input(page: &Page) -> Option<chromiumoxide::element::Element> {
    for (idx, css) in FILE_INPUT.iter().enumerate() {
        if let Ok(el) = page.find_element(*css).await {
            debug!(candidate = idx, "File input located");
            return Some(el);
        }
    }
    None
}

/// Try each candidate once; return the index of the first that matched.
async fn try_candidates(page: &Page, candidates: &[Locator], action: Action) -> Option<usize> {
    for (idx, locator) in candidates.iter().enumerate() {
        match eval_locator(page, locator, action).await {
            Ok(true) => return Some(idx),
            Ok(false) => {}
            Err(e) => debug!(candidate = idx, "Locator evaluation failed: {e}"),
        }
    }
    None
}

/// Poll the candidate list until one matches or the timeout elapses.
async fn wait_for(
    page: &Page,
    step: &'static str,
    candidates: &[Locator],
    timeout: Duration,
    action: Action,
) -> Result<usize, PublicationError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(idx) = try_candidates(page, candidates, action).await {
            debug!(step, candidate = idx, "Locator matched");
            return Ok(idx);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(PublicationError::ElementNotFound {
                step,
                candidates: candidates.len(),
            });
        }
        poll_sleep().await;
    }
}

/// Wait until none of the candidates are visible. Returns false on timeout.
async fn wait_until_gone(page: &Page, candidates: &[Locator], timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if try_candidates(page, candidates, Action::Exists).await.is_none() {
            return true;
        }
        poll_sleep().await;
    }
    false
}

/// Evaluate one locator in the page, optionally clicking its match.
async fn eval_locator(
    page: &Page,
    locator: &Locator,
    action: Action,
) -> Result<bool, PublicationError> {
    let script = locator_script(locator, action);
    let result = page
        .evaluate(script)
        .await
        .map_err(|e| PublicationError::Browser(e.to_string()))?;
    result
        .into_value::<bool>()
        .map_err(|e| PublicationError::Browser(format!("locator script result: {e}")))
}

/// Build the in-page script for a locator + action pair.
///
/// All matching happens in one evaluation so visibility, enablement, and the
/// click are consistent with a single DOM snapshot.
fn locator_script(locator: &Locator, action: Action) -> String {
    let finder = match locator {
        Locator::Css(css) => format!(
            "const el = document.querySelector({});",
            js_string(css)
        ),
        Locator::Text { tag, needle } => format!(
            "const els = Array.from(document.querySelectorAll({tag}));
             const needle = {needle};
             const el = els.find((e) => e.innerText && e.innerText.trim() === needle);",
            tag = js_string(tag),
            needle = js_string(needle),
        ),
    };

    let enabled_check = if action == Action::ClickEnabled {
        "const btn = el.closest('button') || el;
         if (btn.disabled || btn.getAttribute('aria-disabled') === 'true') return false;"
    } else {
        ""
    };

    let act = if matches!(action, Action::Click | Action::ClickEnabled) {
        "const target = el.closest(\"button, a, div[role='button']\") || el;
         target.click();"
    } else {
        ""
    };

    format!(
        "(() => {{
            {finder}
            if (!el) return false;
            const rect = el.getBoundingClientRect();
            const style = window.getComputedStyle(el);
            if (rect.width === 0 || rect.height === 0) return false;
            if (style.visibility === 'hidden' || style.display === 'none') return false;
            {enabled_check}
            {act}
            return true;
        }})()"
    )
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(SETTLE_MS)).await;
}

async fn poll_sleep() {
    tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
}
