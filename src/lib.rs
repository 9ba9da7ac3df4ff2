//! Batch generator for LoRA training datasets: plans prompts with a text
//! model, renders them through FAL image endpoints, and captions the results.

pub mod estimate;
pub mod events;
pub mod export;
pub mod fal;
pub mod plan;
pub mod results;
pub mod run;

use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub use events::{LogCallback, LogLevel, ProgressCallback, ProgressUpdate, RunObserver};
pub use export::{default_export_dir, export_dataset, ExportError, ExportSummary};
pub use fal::{CredentialStore, FalApi, FalClient, FalError};
pub use plan::{GenerationMode, PlanError, PromptUnit};
pub use results::{ResultItem, ResultKind};
pub use run::{
    Generator, Resolution, RunError, RunHandle, RunOptions, RunSummary, UnitFailure,
};

// ---------------------------------------------------------------------------
// Settings: read from {config_dir}/loraforge/settings.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_storage_url")]
    pub storage_url: String,
    #[serde(default)]
    pub default_text_model: Option<String>,
}

fn default_base_url() -> String {
    "https://fal.run".to_string()
}

fn default_storage_url() -> String {
    "https://rest.fal.ai".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            storage_url: default_storage_url(),
            default_text_model: None,
        }
    }
}

/// Settings file location, `None` when the platform has no config dir.
pub fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("loraforge").join("settings.json"))
}

/// Missing or unparseable files fall back to defaults. `FAL_KEY` in the
/// environment overrides the stored key.
pub fn load_settings() -> Settings {
    let mut settings: Settings = settings_path()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .map(|contents| serde_json::from_str(&contents).unwrap_or_default())
        .unwrap_or_default();

    if let Ok(key) = std::env::var("FAL_KEY") {
        if !key.trim().is_empty() {
            settings.api_key = key.trim().to_string();
        }
    }

    settings
}

pub fn save_settings(settings: &Settings) -> anyhow::Result<PathBuf> {
    let path = settings_path().context("could not determine config directory")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let contents =
        serde_json::to_string_pretty(settings).context("failed to serialize settings")?;
    std::fs::write(&path, contents)
        .with_context(|| format!("failed to write {}", path.display()))?;

    Ok(path)
}
