use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use instagram_auto_poster::config::Config;
use instagram_auto_poster::db::Database;
use instagram_auto_poster::generation::caption::CaptionGenerator;
use instagram_auto_poster::generation::gemini::GeminiClient;
use instagram_auto_poster::generation::image::{ImageSynthesizer, SynthesizerConfig};
use instagram_auto_poster::generation::{CredentialPool, GenerativeModel};
use instagram_auto_poster::metrics::Metrics;
use instagram_auto_poster::orchestrator::Orchestrator;
use instagram_auto_poster::publisher::{BrowserSession, PublishDriver, SessionConfig};
use instagram_auto_poster::scheduler::Scheduler;
use instagram_auto_poster::themes::ThemeLibrary;
use instagram_auto_poster::weather::{LlmWeatherProvider, OpenMeteoProvider, WeatherService};
use instagram_auto_poster::web;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting instagram-auto-poster");

    // Load and validate configuration; startup fails closed.
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(mode = ?config.run_mode, keys = config.gemini_api_keys.len(), "Configuration loaded");

    let themes = ThemeLibrary::load(&config.themes_config_path)
        .context("Failed to load theme configuration")?;
    themes
        .validate(&config.prompts_dir)
        .context("Invalid theme configuration")?;
    info!(themes = themes.themes.len(), "Theme configuration validated");

    match config.cookies_file_path.as_deref() {
        Some(path) if path.exists() => {
            info!(path = %path.display(), "Cookies file configured and found");
        }
        Some(path) => {
            warn!(path = %path.display(), "Cookies file configured but not found - credential login will be used");
        }
        None => {
            warn!("No cookies file configured - credential login will be used");
        }
    }

    // Ensure data directories exist
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create work directory: {}",
                config.work_dir.display()
            )
        })?;
    tokio::fs::create_dir_all(&config.screenshots_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create screenshots directory: {}",
                config.screenshots_dir.display()
            )
        })?;
    if let Some(parent) = config.database_path.parent() {
        tokio::fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create database directory: {}", parent.display())
        })?;
    }

    let db = Database::new(&config.database_path)
        .await
        .context("Failed to initialize database")?;
    info!("Database initialized");

    let metrics = Arc::new(Metrics::new());

    // Generation stack: one Gemini client shared by captions, images, and
    // the weather fallback; one rotation pool shared the same way.
    let model: Arc<dyn GenerativeModel> = Arc::new(GeminiClient::new());
    let pool = Arc::new(CredentialPool::new(config.gemini_api_keys.clone()));

    let captions = Arc::new(CaptionGenerator::new(
        Arc::clone(&model),
        Arc::clone(&pool),
        config.text_model.clone(),
        themes.defaults.clone(),
    ));

    let images = Arc::new(ImageSynthesizer::new(
        Arc::clone(&model),
        Arc::clone(&pool),
        SynthesizerConfig::new(
            config.image_model.clone(),
            config.image_fallback_model.clone(),
            config.reference_images_dir.clone(),
        ),
        Some(db.clone()),
    ));

    let weather = Arc::new(WeatherService::new(
        OpenMeteoProvider::new(config.weather_latitude, config.weather_longitude),
        LlmWeatherProvider::new(
            Arc::clone(&model),
            config.text_model.clone(),
            config.weather_location_name.clone(),
        ),
        Arc::clone(&pool),
    ));

    let session = Arc::new(BrowserSession::new(SessionConfig {
        base_url: config.instagram_url.clone(),
        username: config.instagram_username.clone(),
        password: config.instagram_password.clone(),
        cookies_file: config.cookies_file_path.clone(),
        chrome_path: config.chrome_path.clone(),
    }));
    let publisher = Arc::new(PublishDriver::new(
        Arc::clone(&session),
        config.instagram_url.clone(),
        config.screenshots_dir.clone(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        themes,
        weather,
        captions,
        images,
        publisher,
        db.clone(),
        Arc::clone(&metrics),
        config.prompts_dir.clone(),
        config.work_dir.clone(),
    ));

    // Start web server in background
    let web_state = web::AppState {
        db,
        metrics: Arc::clone(&metrics),
    };
    let web_host = config.web_host.clone();
    let web_port = config.web_port;
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web::serve(&web_host, web_port, web_state).await {
            error!("Web server error: {e:#}");
        }
    });

    // Start the posting scheduler
    let scheduler = Scheduler::new(
        Arc::clone(&orchestrator),
        config.run_mode,
        config.test_interval,
        config.live_window_min_hours,
        config.live_window_max_hours,
    );
    let scheduler_handle = tokio::spawn(async move {
        scheduler.run().await;
    });
    info!("Scheduler started");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down...");

    scheduler_handle.abort();
    web_handle.abort();
    session.shutdown().await;

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,instagram_auto_poster=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
