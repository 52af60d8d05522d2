//! Integration tests for the posting cycle, driven with stub collaborators.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use instagram_auto_poster::db::{get_recent_posts, Database, PostStatus};
use instagram_auto_poster::generation::caption::GeneratedContent;
use instagram_auto_poster::generation::GenerationError;
use instagram_auto_poster::metrics::Metrics;
use instagram_auto_poster::orchestrator::{
    CaptionSource, CycleOutcome, ImageSource, Orchestrator, PostPublisher, WeatherSource,
};
use instagram_auto_poster::publisher::PublicationError;
use instagram_auto_poster::themes::{
    Defaults, ImageSettings, PromptSource, ReferenceImages, Theme, ThemeLibrary,
};
use instagram_auto_poster::weather::{
    Sky, Verdict, WeatherDetails, WeatherError, WeatherObservation, Wind,
};
use tempfile::TempDir;

struct StubWeather {
    observation: WeatherObservation,
}

#[async_trait]
impl WeatherSource for StubWeather {
    async fn observe(&self) -> Result<WeatherObservation, WeatherError> {
        Ok(self.observation.clone())
    }
}

struct FailingWeather;

#[async_trait]
impl WeatherSource for FailingWeather {
    async fn observe(&self) -> Result<WeatherObservation, WeatherError> {
        Err(WeatherError::Status(500))
    }
}

struct StubCaptions {
    caption: String,
    prompts_seen: Mutex<Vec<String>>,
}

impl StubCaptions {
    fn new(caption: &str) -> Self {
        Self {
            caption: caption.to_string(),
            prompts_seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CaptionSource for StubCaptions {
    async fn generate(
        &self,
        _db: &Database,
        _theme: &Theme,
        prompt_text: &str,
    ) -> Result<GeneratedContent, GenerationError> {
        self.prompts_seen
            .lock()
            .expect("lock")
            .push(prompt_text.to_string());
        Ok(GeneratedContent {
            caption: self.caption.clone(),
            hashtags: vec![],
            tone: "warm".to_string(),
            similarity_report: "{}".to_string(),
        })
    }
}

struct StubImages {
    prompts_seen: Mutex<Vec<String>>,
    references_seen: Mutex<Vec<Option<String>>>,
    fail: bool,
}

impl StubImages {
    fn new() -> Self {
        Self {
            prompts_seen: Mutex::new(Vec::new()),
            references_seen: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl ImageSource for StubImages {
    async fn synthesize(
        &self,
        prompt: &str,
        reference: Option<&ReferenceImages>,
    ) -> Result<Vec<u8>, GenerationError> {
        self.prompts_seen
            .lock()
            .expect("lock")
            .push(prompt.to_string());
        let reference_name = reference.map(|r| match r {
            ReferenceImages::One(name) => name.clone(),
            ReferenceImages::Many(names) => names.join(","),
        });
        self.references_seen
            .lock()
            .expect("lock")
            .push(reference_name);
        if self.fail {
            return Err(GenerationError::Exhausted {
                attempts: 3,
                last: "boom".to_string(),
            });
        }
        Ok(b"fake-png".to_vec())
    }
}

struct StubPublisher {
    calls: AtomicUsize,
    captions_seen: Mutex<Vec<String>>,
    fail_first: bool,
}

impl StubPublisher {
    fn new(fail_first: bool) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            captions_seen: Mutex::new(Vec::new()),
            fail_first,
        }
    }
}

#[async_trait]
impl PostPublisher for StubPublisher {
    async fn publish(&self, image_path: &Path, caption: &str) -> Result<(), PublicationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(image_path.exists(), "image must exist during publication");
        self.captions_seen
            .lock()
            .expect("lock")
            .push(caption.to_string());
        if self.fail_first && call == 0 {
            return Err(PublicationError::ElementNotFound {
                step: "share",
                candidates: 2,
            });
        }
        Ok(())
    }
}

fn defaults() -> Defaults {
    Defaults {
        max_caption_length: 300,
        include_hashtags: true,
        hashtag_count: 3,
        language: "en".to_string(),
    }
}

fn static_theme(prompt_file: &str) -> Theme {
    Theme {
        id: "cocktails".to_string(),
        name: "Cocktails".to_string(),
        enabled: true,
        weight: 1.0,
        prompt: PromptSource::Static {
            file: prompt_file.to_string(),
        },
        image: ImageSettings::Standard {
            base_prompt: "A cocktail on a bar counter".to_string(),
            reference: None,
            append_caption: false,
            extra_detail: None,
        },
    }
}

fn weather_theme(good_file: &str, bad_file: &str) -> Theme {
    Theme {
        id: "terrace".to_string(),
        name: "Terrace".to_string(),
        enabled: true,
        weight: 1.0,
        prompt: PromptSource::Weather {
            good_file: good_file.to_string(),
            bad_file: bad_file.to_string(),
        },
        image: ImageSettings::Weather {
            good_prompt: "Sunny terrace at {{temperature}} degrees".to_string(),
            bad_prompt: "Cozy indoor bar, {{weatherDescription}} outside".to_string(),
            good_reference: Some(ReferenceImages::One("terrace-sunny.png".to_string())),
            bad_reference: Some(ReferenceImages::One("bar-cozy.png".to_string())),
        },
    }
}

fn library(themes: Vec<Theme>) -> ThemeLibrary {
    ThemeLibrary {
        defaults: defaults(),
        backup_captions: vec!["See you at the bar tonight!".to_string()],
        themes,
    }
}

struct Harness {
    db: Database,
    _temp: TempDir,
    prompts_dir: PathBuf,
    work_dir: PathBuf,
}

async fn setup() -> Harness {
    let temp = TempDir::new().expect("temp dir");
    let prompts_dir = temp.path().join("prompts");
    let work_dir = temp.path().join("work");
    std::fs::create_dir_all(&prompts_dir).expect("prompts dir");
    std::fs::create_dir_all(&work_dir).expect("work dir");

    let db = Database::new(&temp.path().join("test.sqlite"))
        .await
        .expect("database");

    Harness {
        db,
        _temp: temp,
        prompts_dir,
        work_dir,
    }
}

fn write_prompt(dir: &Path, name: &str, body: &str) {
    std::fs::write(dir.join(name), body).expect("write prompt");
}

#[allow(clippy::too_many_arguments)]
fn orchestrator(
    harness: &Harness,
    themes: ThemeLibrary,
    weather: Arc<dyn WeatherSource>,
    captions: Arc<dyn CaptionSource>,
    images: Arc<dyn ImageSource>,
    publisher: Arc<dyn PostPublisher>,
    metrics: Arc<Metrics>,
) -> Orchestrator {
    Orchestrator::new(
        themes,
        weather,
        captions,
        images,
        publisher,
        harness.db.clone(),
        metrics,
        harness.prompts_dir.clone(),
        harness.work_dir.clone(),
    )
}

fn assert_success(outcome: &CycleOutcome) {
    assert!(outcome.success, "cycle failed: {:?}", outcome.error);
    assert!(outcome.post_id.is_some());
}

#[tokio::test]
async fn test_successful_cycle_records_post_and_cleans_up() {
    let harness = setup().await;
    write_prompt(&harness.prompts_dir, "cocktails.txt", "Write about cocktails");

    let captions = Arc::new(StubCaptions::new("Cheers to the weekend"));
    let images = Arc::new(StubImages::new());
    let publisher = Arc::new(StubPublisher::new(false));
    let metrics = Arc::new(Metrics::new());

    let orch = orchestrator(
        &harness,
        library(vec![static_theme("cocktails.txt")]),
        Arc::new(FailingWeather),
        Arc::clone(&captions) as Arc<dyn CaptionSource>,
        Arc::clone(&images) as Arc<dyn ImageSource>,
        Arc::clone(&publisher) as Arc<dyn PostPublisher>,
        Arc::clone(&metrics),
    );

    let outcome = orch.execute_post().await;
    assert_success(&outcome);

    // The non-gated theme never touched the (failing) weather source.
    let prompts = captions.prompts_seen.lock().expect("lock");
    assert_eq!(prompts.as_slice(), ["Write about cocktails"]);

    let posts = get_recent_posts(harness.db.pool(), 10).await.expect("posts");
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].theme_id, "cocktails");
    assert_eq!(posts[0].caption, "Cheers to the weekend");
    assert_eq!(posts[0].status_enum(), Some(PostStatus::Success));
    assert!(posts[0].weather_json.is_none());

    // Temp images are deleted after publication.
    let leftovers: Vec<_> = std::fs::read_dir(&harness.work_dir)
        .expect("read work dir")
        .collect();
    assert!(leftovers.is_empty());

    let snap = metrics.snapshot();
    assert_eq!(snap.cycles_run, 1);
    assert_eq!(snap.posts_succeeded, 1);
}

#[tokio::test]
async fn test_weather_gated_bad_weather_uses_bad_branch() {
    let harness = setup().await;
    write_prompt(
        &harness.prompts_dir,
        "good.txt",
        "Sunny day, {{temperature}} degrees: invite people to the terrace",
    );
    write_prompt(
        &harness.prompts_dir,
        "bad.txt",
        "It is {{weatherDescription}}: invite people inside",
    );

    let weather = Arc::new(StubWeather {
        observation: WeatherObservation {
            condition: Verdict::Bad,
            temperature: 9.5,
            description: "rainy".to_string(),
            details: WeatherDetails {
                sky: Sky::Rainy,
                wind: Wind::Moderate,
                precipitation: true,
            },
        },
    });
    let captions = Arc::new(StubCaptions::new("Rainy day special"));
    let images = Arc::new(StubImages::new());
    let publisher = Arc::new(StubPublisher::new(false));

    let orch = orchestrator(
        &harness,
        library(vec![weather_theme("good.txt", "bad.txt")]),
        weather,
        Arc::clone(&captions) as Arc<dyn CaptionSource>,
        Arc::clone(&images) as Arc<dyn ImageSource>,
        publisher,
        Arc::new(Metrics::new()),
    );

    let outcome = orch.execute_post().await;
    assert_success(&outcome);

    // Bad-weather prompt chosen, placeholders substituted.
    let prompts = captions.prompts_seen.lock().expect("lock");
    assert_eq!(prompts.as_slice(), ["It is rainy: invite people inside"]);

    let image_prompts = images.prompts_seen.lock().expect("lock");
    assert_eq!(image_prompts.as_slice(), ["Cozy indoor bar, rainy outside"]);

    // The bad-weather reference set is the one handed to synthesis.
    let references = images.references_seen.lock().expect("lock");
    assert_eq!(references.as_slice(), [Some("bar-cozy.png".to_string())]);

    let posts = get_recent_posts(harness.db.pool(), 10).await.expect("posts");
    let weather_json = posts[0].weather_json.as_deref().expect("weather json");
    assert!(weather_json.contains("\"bad\""));
    assert!(weather_json.contains("9.5"));
}

#[tokio::test]
async fn test_weather_failure_aborts_gated_cycle() {
    let harness = setup().await;
    write_prompt(&harness.prompts_dir, "good.txt", "good");
    write_prompt(&harness.prompts_dir, "bad.txt", "bad");

    let captions = Arc::new(StubCaptions::new("unused"));
    let publisher = Arc::new(StubPublisher::new(false));

    let orch = orchestrator(
        &harness,
        library(vec![weather_theme("good.txt", "bad.txt")]),
        Arc::new(FailingWeather),
        Arc::clone(&captions) as Arc<dyn CaptionSource>,
        Arc::new(StubImages::new()),
        Arc::clone(&publisher) as Arc<dyn PostPublisher>,
        Arc::new(Metrics::new()),
    );

    let outcome = orch.execute_post().await;
    assert!(!outcome.success);
    let error = outcome.error.expect("error");
    assert!(error.contains("weather resolution failed"), "{error}");

    // No generic-prompt fallback: caption generation never ran.
    assert!(captions.prompts_seen.lock().expect("lock").is_empty());
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);

    // The failure is still recorded.
    let posts = get_recent_posts(harness.db.pool(), 10).await.expect("posts");
    assert_eq!(posts[0].status_enum(), Some(PostStatus::Failed));
    assert_eq!(posts[0].theme_id, "terrace");
}

#[tokio::test]
async fn test_fallback_posts_backup_caption_after_primary_failure() {
    let harness = setup().await;
    write_prompt(&harness.prompts_dir, "cocktails.txt", "Write about cocktails");

    let captions = Arc::new(StubCaptions::new("Primary caption"));
    let images = Arc::new(StubImages::new());
    // First publish (primary) fails, second (backup) succeeds.
    let publisher = Arc::new(StubPublisher::new(true));
    let metrics = Arc::new(Metrics::new());

    let orch = orchestrator(
        &harness,
        library(vec![static_theme("cocktails.txt")]),
        Arc::new(FailingWeather),
        captions,
        Arc::clone(&images) as Arc<dyn ImageSource>,
        Arc::clone(&publisher) as Arc<dyn PostPublisher>,
        Arc::clone(&metrics),
    );

    let outcome = orch.execute_post_with_fallback().await;
    assert!(outcome.success);
    assert!(outcome.post_id.is_some());
    // The primary error stays visible in the outcome.
    assert!(outcome.error.expect("error").contains("publication failed"));

    let published = publisher.captions_seen.lock().expect("lock");
    assert_eq!(published.len(), 2);
    assert_eq!(published[1], "See you at the bar tonight!");

    // The backup image is generated without a reference.
    assert_eq!(images.references_seen.lock().expect("lock").as_slice(), [None, None]);

    let posts = get_recent_posts(harness.db.pool(), 10).await.expect("posts");
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].theme_id, "backup");
    assert_eq!(posts[0].status_enum(), Some(PostStatus::Success));
    assert_eq!(posts[1].status_enum(), Some(PostStatus::Failed));

    assert_eq!(metrics.snapshot().fallbacks_attempted, 1);
}

#[tokio::test]
async fn test_double_failure_reports_both_errors() {
    let harness = setup().await;
    write_prompt(&harness.prompts_dir, "cocktails.txt", "Write about cocktails");

    let orch = orchestrator(
        &harness,
        library(vec![static_theme("cocktails.txt")]),
        Arc::new(FailingWeather),
        Arc::new(StubCaptions::new("unused")),
        Arc::new(StubImages::failing()),
        Arc::new(StubPublisher::new(false)),
        Arc::new(Metrics::new()),
    );

    let outcome = orch.execute_post_with_fallback().await;
    assert!(!outcome.success);
    let error = outcome.error.expect("error");
    assert!(error.contains("primary:"), "{error}");
    assert!(error.contains("backup:"), "{error}");

    let posts = get_recent_posts(harness.db.pool(), 10).await.expect("posts");
    // One failed primary record plus one failed backup record.
    assert_eq!(posts.len(), 2);
    assert!(posts.iter().all(|p| p.status_enum() == Some(PostStatus::Failed)));
    assert!(posts.iter().any(|p| p.theme_id == "backup"));
}

#[tokio::test]
async fn test_missing_prompt_file_fails_validation() {
    let harness = setup().await;
    // No prompt file written: validation must abort the cycle.

    let publisher = Arc::new(StubPublisher::new(false));
    let orch = orchestrator(
        &harness,
        library(vec![static_theme("missing.txt")]),
        Arc::new(FailingWeather),
        Arc::new(StubCaptions::new("unused")),
        Arc::new(StubImages::new()),
        Arc::clone(&publisher) as Arc<dyn PostPublisher>,
        Arc::new(Metrics::new()),
    );

    let outcome = orch.execute_post().await;
    assert!(!outcome.success);
    assert!(outcome
        .error
        .expect("error")
        .contains("theme validation failed"));
    assert_eq!(publisher.calls.load(Ordering::SeqCst), 0);
}
