//! Browser-driven publication of image+caption pairs.
//!
//! Instagram exposes no posting API, so publishing drives the web UI
//! through a headless Chromium session: a linear state machine over
//! drift-tolerant candidate selectors.

mod driver;
pub mod selectors;
mod session;

pub use driver::{PublishDriver, PublishState};
pub use session::{BrowserSession, SessionConfig};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublicationError {
    #[error("browser error: {0}")]
    Browser(String),
    #[error("login failed: {0}")]
    Login(String),
    #[error("no candidate matched for step '{step}' ({candidates} tried)")]
    ElementNotFound {
        step: &'static str,
        candidates: usize,
    },
    #[error("caption entry failed: {0}")]
    Caption(String),
    #[error("file attach failed: {0}")]
    FileAttach(String),
}
