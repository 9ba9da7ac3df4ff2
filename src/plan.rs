//! Prompt-plan generation: one LLM call that turns a dataset theme into the
//! per-item prompts a run will execute.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fal::types::TextGenRequest;
use crate::fal::{FalApi, FalError};

/// Token allowance for the planning call; 40 detailed pairs fit well inside.
const PLAN_MAX_TOKENS: u32 = 16_000;

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Start/end image pairs that teach an edit transformation.
    Pair,
    /// Standalone images that teach a style or aesthetic.
    Single,
    /// Variations of an uploaded reference image.
    Reference,
}

impl GenerationMode {
    /// Noun used in progress and summary messages.
    pub fn unit_label(&self) -> &'static str {
        match self {
            Self::Pair => "pairs",
            Self::Single | Self::Reference => "images",
        }
    }

    pub fn images_per_item(&self) -> usize {
        match self {
            Self::Pair => 2,
            Self::Single | Self::Reference => 1,
        }
    }

    pub fn default_system_prompt(&self) -> &'static str {
        match self {
            Self::Pair => PAIR_SYSTEM_PROMPT,
            Self::Single => SINGLE_SYSTEM_PROMPT,
            Self::Reference => REFERENCE_SYSTEM_PROMPT,
        }
    }
}

const PAIR_SYSTEM_PROMPT: &str = "\
You are a creative prompt engineer for AI image generation. Generate diverse, detailed prompts for creating training data.

RULES:
1. Each prompt must be unique and creative
2. base_prompt: Detailed description for generating the START image
3. edit_prompt: Instruction for transforming START → END image
4. action_name: Short identifier for this transformation type";

const SINGLE_SYSTEM_PROMPT: &str = "\
You are a creative prompt engineer for AI image generation. Generate diverse, detailed prompts for creating style/aesthetic training data.

RULES:
1. Each prompt must be unique and creative
2. prompt: Detailed description capturing the desired aesthetic, style, composition, lighting, and mood
3. Focus on visual consistency and aesthetic qualities that define the style";

const REFERENCE_SYSTEM_PROMPT: &str = "\
You are a creative prompt engineer for AI image generation. Generate diverse prompts for creating variations of a reference image.

RULES:
1. Each prompt must be unique while maintaining consistency with the reference
2. prompt: Detailed description for generating a variation that preserves key elements of the reference
3. Vary poses, angles, backgrounds, lighting, and contexts while keeping the subject recognizable";

// ---------------------------------------------------------------------------
// Plan request
// ---------------------------------------------------------------------------

/// Inputs to the planning call. `transformation` and `action_name` only
/// matter in pair mode; `system_prompt` replaces the mode default wholesale
/// when set.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub mode: GenerationMode,
    pub theme: String,
    pub transformation: String,
    pub action_name: String,
    pub count: usize,
    pub model: String,
    pub system_prompt: Option<String>,
}

impl PlanRequest {
    fn base_system_prompt(&self) -> String {
        self.system_prompt
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.mode.default_system_prompt())
            .to_string()
    }

    fn system_prompt(&self) -> String {
        match self.mode {
            GenerationMode::Pair => {
                let action_hint = if self.action_name.trim().is_empty() {
                    "Generate a short, descriptive action name (like \"unzoom\", \"add_bg\", \"enhance\")"
                        .to_string()
                } else {
                    format!("Use this action name: \"{}\"", self.action_name.trim())
                };
                format!(
                    "{}\n\nThe transformation to learn: \"{}\"\n{}",
                    self.base_system_prompt(),
                    self.transformation.trim(),
                    action_hint,
                )
            }
            GenerationMode::Single | GenerationMode::Reference => self.base_system_prompt(),
        }
    }

    fn user_prompt(&self) -> String {
        match self.mode {
            GenerationMode::Pair => format!(
                "\
Generate {} unique prompt pairs for the theme: \"{}\"

Return ONLY valid JSON array:
[
  {{
    \"base_prompt\": \"detailed start image description...\",
    \"edit_prompt\": \"transformation instruction...\",
    \"action_name\": \"short_action\"
  }}
]",
                self.count, self.theme,
            ),
            GenerationMode::Single => format!(
                "\
Generate {} unique image prompts for the theme/style: \"{}\"

Return ONLY valid JSON array:
[
  {{
    \"prompt\": \"detailed image description capturing the style, aesthetic, composition, lighting, colors...\"
  }}
]",
                self.count, self.theme,
            ),
            GenerationMode::Reference => format!(
                "\
Generate {} unique variation prompts for: \"{}\"

These prompts will be used to create variations of a reference image (character/product/style).
Each prompt should describe a different scenario, pose, angle, background, or context while keeping the subject consistent.

Return ONLY valid JSON array:
[
  {{
    \"prompt\": \"detailed description of the variation, keeping subject consistent but varying context...\"
  }}
]",
                self.count, self.theme,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Prompt units
// ---------------------------------------------------------------------------

/// One planned unit of work. Pair mode plans start/edit pairs; single and
/// reference modes plan one prompt per image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptUnit {
    Pair {
        base_prompt: String,
        edit_prompt: String,
        action_name: String,
    },
    Image {
        prompt: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPairUnit {
    base_prompt: String,
    edit_prompt: String,
    action_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawImageUnit {
    prompt: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Plan failures abort the run before any image work is scheduled.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Remote(#[from] FalError),

    #[error("no JSON array in model output")]
    MissingArray,

    #[error("model output was not a valid JSON array: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// `index` is 1-based to match the positions reported in run logs.
    #[error("prompt {index} is malformed: {reason}")]
    BadUnit { index: usize, reason: String },

    #[error("model returned no prompts")]
    Empty,
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Asks the LLM for `req.count` prompts and validates the response into
/// executable units. A malformed unit fails the whole plan; delivering fewer
/// items than requested would silently skew the dataset.
pub async fn plan<C: FalApi>(api: &C, req: &PlanRequest) -> Result<Vec<PromptUnit>, PlanError> {
    let raw = api
        .generate_text(TextGenRequest {
            model: req.model.clone(),
            system_prompt: req.system_prompt(),
            prompt: req.user_prompt(),
            max_tokens: Some(PLAN_MAX_TOKENS),
        })
        .await?;

    parse_units(req.mode, &raw)
}

/// Parses LLM output into prompt units. Tolerates prose around the JSON
/// array (first `[` through last `]`) but is strict about the items inside.
pub fn parse_units(mode: GenerationMode, raw: &str) -> Result<Vec<PromptUnit>, PlanError> {
    let json = extract_json_array(raw).ok_or(PlanError::MissingArray)?;
    let items: Vec<serde_json::Value> =
        serde_json::from_str(json).map_err(PlanError::InvalidJson)?;
    if items.is_empty() {
        return Err(PlanError::Empty);
    }

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| parse_unit(mode, i + 1, item))
        .collect()
}

fn extract_json_array(raw: &str) -> Option<&str> {
    let start = raw.find('[')?;
    let end = raw.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&raw[start..=end])
}

fn parse_unit(
    mode: GenerationMode,
    index: usize,
    item: serde_json::Value,
) -> Result<PromptUnit, PlanError> {
    let bad = |reason: String| PlanError::BadUnit { index, reason };

    match mode {
        GenerationMode::Pair => {
            let raw: RawPairUnit =
                serde_json::from_value(item).map_err(|e| bad(e.to_string()))?;
            for (field, value) in [
                ("base_prompt", &raw.base_prompt),
                ("edit_prompt", &raw.edit_prompt),
                ("action_name", &raw.action_name),
            ] {
                if value.trim().is_empty() {
                    return Err(bad(format!("{field} is blank")));
                }
            }
            Ok(PromptUnit::Pair {
                base_prompt: raw.base_prompt,
                edit_prompt: raw.edit_prompt,
                action_name: raw.action_name,
            })
        }
        GenerationMode::Single | GenerationMode::Reference => {
            let raw: RawImageUnit =
                serde_json::from_value(item).map_err(|e| bad(e.to_string()))?;
            if raw.prompt.trim().is_empty() {
                return Err(bad("prompt is blank".to_string()));
            }
            Ok(PromptUnit::Image { prompt: raw.prompt })
        }
    }
}
