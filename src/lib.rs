//! Instagram auto-poster library.
//!
//! A service that periodically selects a content theme, generates a caption
//! and an image through a generative AI provider, and publishes the pair to
//! Instagram through a headless browser session. Every posting attempt is
//! persisted for history, similarity avoidance, and statistics.

pub mod config;
pub mod db;
pub mod generation;
pub mod metrics;
pub mod orchestrator;
pub mod publisher;
pub mod scheduler;
pub mod themes;
pub mod weather;
pub mod web;
