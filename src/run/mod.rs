//! Run orchestration: option validation, the shared run state, and the
//! generator that turns a theme into stored dataset items.

mod pipeline;
mod scheduler;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::events::RunObserver;
use crate::fal::{FalApi, FalError};
use crate::plan::{self, GenerationMode, PlanError, PlanRequest};
use crate::results::{ResultItem, ResultStore};

use pipeline::UnitContext;

// ---------------------------------------------------------------------------
// Valid values: single source of truth for the CLI and library callers
// ---------------------------------------------------------------------------

/// Hard per-run ceiling. Larger datasets come from repeated runs; results
/// accumulate in the store and keep numbering across runs.
pub const MAX_ITEMS_PER_RUN: usize = 40;
pub const DEFAULT_COUNT: usize = 20;

/// In-flight ceiling. FAL starts queueing aggressively past this, so a wider
/// window only reorders failures.
pub const MAX_CONCURRENT: usize = 8;
pub const DEFAULT_CONCURRENT: usize = 3;

pub const ASPECT_RATIOS: &[&str] = &[
    "1:1", "16:9", "9:16", "4:3", "3:4", "3:2", "2:3", "21:9",
];
pub const DEFAULT_ASPECT_RATIO: &str = "1:1";

/// Models routable through `fal-ai/any-llm` and the vision router.
pub const TEXT_MODELS: &[&str] = &[
    "google/gemini-2.5-pro",
    "google/gemini-2.5-flash",
    "anthropic/claude-sonnet-4.5",
    "openai/gpt-5-chat",
];
pub const DEFAULT_TEXT_MODEL: &str = "google/gemini-2.5-pro";

/// Output resolution tier of the image endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Resolution {
    #[serde(rename = "1K")]
    #[value(name = "1K", alias = "1k")]
    OneK,
    #[serde(rename = "2K")]
    #[value(name = "2K", alias = "2k")]
    TwoK,
    #[serde(rename = "4K")]
    #[value(name = "4K", alias = "4k")]
    FourK,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }
}

// ---------------------------------------------------------------------------
// Run options: validation + defaults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: GenerationMode,
    pub theme: String,
    /// Pair mode only: the edit transformation the dataset teaches.
    pub transformation: String,
    /// Pair mode only: fixed action name; blank lets the model pick one.
    pub action_name: String,
    /// Prefixed to every caption when non-blank.
    pub trigger_word: String,
    pub count: usize,
    pub max_concurrent: usize,
    pub aspect_ratio: String,
    pub resolution: Resolution,
    /// Caption finished images with the vision model instead of reusing the
    /// generation prompt.
    pub caption: bool,
    pub text_model: Option<String>,
    pub caption_model: Option<String>,
    /// Replaces the built-in planning system prompt when set.
    pub system_prompt: Option<String>,
    /// Reference mode only: local image the run derives variations from.
    pub reference_image: Option<PathBuf>,
}

impl RunOptions {
    pub fn new(mode: GenerationMode, theme: impl Into<String>) -> Self {
        Self {
            mode,
            theme: theme.into(),
            transformation: String::new(),
            action_name: String::new(),
            trigger_word: String::new(),
            count: DEFAULT_COUNT,
            max_concurrent: DEFAULT_CONCURRENT,
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
            resolution: Resolution::TwoK,
            caption: false,
            text_model: None,
            caption_model: None,
            system_prompt: None,
            reference_image: None,
        }
    }

    /// Apply defaults and validate. Called before any remote work; a rejected
    /// run issues zero API calls.
    pub fn normalize(&mut self) -> Result<(), RunError> {
        if self.theme.trim().is_empty() {
            return Err(RunError::Config("dataset theme must not be empty".into()));
        }
        if !(1..=MAX_ITEMS_PER_RUN).contains(&self.count) {
            return Err(RunError::Config(format!(
                "count must be 1-{MAX_ITEMS_PER_RUN}, got {}. Run multiple generations for larger datasets; results accumulate",
                self.count
            )));
        }
        if !(1..=MAX_CONCURRENT).contains(&self.max_concurrent) {
            return Err(RunError::Config(format!(
                "max_concurrent must be 1-{MAX_CONCURRENT}, got {}",
                self.max_concurrent
            )));
        }
        if !ASPECT_RATIOS.contains(&self.aspect_ratio.as_str()) {
            return Err(RunError::Config(format!(
                "invalid aspect ratio \"{}\". Valid: {}",
                self.aspect_ratio,
                ASPECT_RATIOS.join(", ")
            )));
        }
        let text_model = self
            .text_model
            .get_or_insert_with(|| DEFAULT_TEXT_MODEL.into());
        if !TEXT_MODELS.contains(&text_model.as_str()) {
            return Err(RunError::Config(format!(
                "invalid text model \"{text_model}\". Valid: {}",
                TEXT_MODELS.join(", ")
            )));
        }
        let text_model = text_model.clone();
        let caption_model = self.caption_model.get_or_insert(text_model);
        if !TEXT_MODELS.contains(&caption_model.as_str()) {
            return Err(RunError::Config(format!(
                "invalid caption model \"{caption_model}\". Valid: {}",
                TEXT_MODELS.join(", ")
            )));
        }
        if self.mode == GenerationMode::Pair && self.transformation.trim().is_empty() {
            return Err(RunError::Config(
                "pair mode needs the transformation to learn".into(),
            ));
        }
        if self.mode == GenerationMode::Reference && self.reference_image.is_none() {
            return Err(RunError::Config(
                "reference mode needs a reference image".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Errors and summary
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RunError {
    /// Only one run may execute at a time; the store and counters are shared.
    #[error("a run is already in progress")]
    Busy,

    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Auth(FalError),

    #[error("prompt planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("could not read reference image {}: {source}", path.display())]
    ReferenceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reference upload failed: {0}")]
    ReferenceUpload(#[source] FalError),
}

/// One unit that settled as a failure. `position` is the 1-based place of
/// the unit in the plan, matching the run log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub position: usize,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub failures: Vec<UnitFailure>,
}

// ---------------------------------------------------------------------------
// Shared run state
// ---------------------------------------------------------------------------

/// Flag-and-counter cell shared between a running generator and any stop
/// handles. `busy` guards the single run slot and is held until the run has
/// fully settled; `stop` is cooperative and the scheduler reads it at window
/// boundaries only.
#[derive(Debug, Default)]
pub(crate) struct RunState {
    busy: AtomicBool,
    stop: AtomicBool,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl RunState {
    /// Claims the run slot and resets per-run state. Returns false when a run
    /// already holds the slot; a stopped run keeps holding it until its
    /// in-flight window settles.
    fn begin(&self) -> bool {
        let claimed = self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if claimed {
            self.stop.store(false, Ordering::SeqCst);
            self.completed.store(0, Ordering::SeqCst);
            self.failed.store(0, Ordering::SeqCst);
        }
        claimed
    }

    fn finish(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub(crate) fn record_success(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn counts(&self) -> (usize, usize) {
        (
            self.completed.load(Ordering::SeqCst),
            self.failed.load(Ordering::SeqCst),
        )
    }
}

/// Cloneable handle for observing and stopping a run from another task.
#[derive(Clone)]
pub struct RunHandle {
    state: Arc<RunState>,
}

impl RunHandle {
    /// Requests a cooperative stop. The window in flight still settles and
    /// is recorded; no further window starts.
    pub fn request_stop(&self) {
        self.state.request_stop();
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }
}

// ---------------------------------------------------------------------------
// Generator: owns the API client, result store and observer
// ---------------------------------------------------------------------------

pub struct Generator<C: FalApi> {
    api: C,
    store: Mutex<ResultStore>,
    observer: RunObserver,
    state: Arc<RunState>,
}

impl<C: FalApi> Generator<C> {
    pub fn new(api: C) -> Self {
        Self {
            api,
            store: Mutex::new(ResultStore::new()),
            observer: RunObserver::new(),
            state: Arc::new(RunState::default()),
        }
    }

    pub fn with_observer(mut self, observer: RunObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn handle(&self) -> RunHandle {
        RunHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Runs one generation batch to completion: plan, windowed execution,
    /// aggregation. Succeeded units are in the store when this returns, even
    /// when others failed or the run was stopped early.
    pub async fn start_run(&self, mut opts: RunOptions) -> Result<RunSummary, RunError> {
        opts.normalize()?;
        if !self.state.begin() {
            return Err(RunError::Busy);
        }
        let outcome = self.execute(opts).await;
        self.state.finish();
        outcome
    }

    /// All items generated so far, across runs, in id order.
    pub async fn results(&self) -> Vec<ResultItem> {
        self.store.lock().await.items().to_vec()
    }

    /// Drops every stored item and restarts sequence numbering at 0001.
    pub async fn clear_results(&self) {
        self.store.lock().await.clear();
    }

    async fn execute(&self, opts: RunOptions) -> Result<RunSummary, RunError> {
        self.api.check_auth().await.map_err(RunError::Auth)?;

        info!(
            mode = opts.mode.unit_label(),
            count = opts.count,
            max_concurrent = opts.max_concurrent,
            "starting generation run"
        );
        self.observer
            .progress(0, opts.count, "Generating prompts with AI...");
        self.observer.info("Generating creative prompts...");

        let reference_url = match (&opts.mode, &opts.reference_image) {
            (GenerationMode::Reference, Some(path)) => {
                self.observer.info("Uploading reference image...");
                let url = self.upload_reference(path).await?;
                self.observer.success("Reference uploaded");
                Some(url)
            }
            _ => None,
        };

        // Filled in by normalize().
        let text_model = opts
            .text_model
            .clone()
            .unwrap_or_else(|| DEFAULT_TEXT_MODEL.into());
        let caption_model = opts
            .caption_model
            .clone()
            .unwrap_or_else(|| DEFAULT_TEXT_MODEL.into());

        let units = plan::plan(
            &self.api,
            &PlanRequest {
                mode: opts.mode,
                theme: opts.theme.clone(),
                transformation: opts.transformation.clone(),
                action_name: opts.action_name.clone(),
                count: opts.count,
                model: text_model,
                system_prompt: opts.system_prompt.clone(),
            },
        )
        .await?;

        // From here on the plan length is authoritative, not the requested
        // count; the model occasionally returns a different number of units.
        let total = units.len();
        self.observer
            .success(format!("Generated {total} unique prompts"));
        self.observer.info(format!(
            "Starting parallel generation ({} at a time)...",
            opts.max_concurrent
        ));

        let ctx = UnitContext {
            mode: opts.mode,
            total,
            aspect_ratio: opts.aspect_ratio.clone(),
            resolution: opts.resolution,
            caption: opts.caption,
            caption_model,
            trigger_word: opts.trigger_word.clone(),
            reference_url,
            observer: self.observer.clone(),
        };

        let failures = scheduler::run_windows(
            units,
            opts.max_concurrent,
            &self.state,
            &self.store,
            &self.observer,
            |index, unit| pipeline::run_unit(&self.api, &ctx, index, unit),
        )
        .await;

        let (completed, failed) = self.state.counts();
        let fail_info = if failed > 0 {
            format!(" ({failed} failed)")
        } else {
            String::new()
        };
        self.observer.progress(total, total, "Complete!");
        self.observer.success(format!(
            "Done! {completed} {} generated{fail_info}",
            opts.mode.unit_label()
        ));
        info!(completed, failed, total, "generation run finished");

        Ok(RunSummary {
            total,
            completed,
            failed,
            failures,
        })
    }

    /// Reads the reference image from disk and uploads it once; every edit
    /// call of the run reuses the returned URL.
    async fn upload_reference(&self, path: &Path) -> Result<String, RunError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| RunError::ReferenceRead {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("png")
            .to_ascii_lowercase();
        let file_name = format!("{}.{ext}", uuid::Uuid::new_v4());

        self.api
            .upload_asset(file_name, guess_content_type(&ext).to_string(), bytes)
            .await
            .map_err(RunError::ReferenceUpload)
    }
}

fn guess_content_type(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => "image/png",
    }
}
