//! Per-unit pipelines for the three modes. A unit either yields a complete
//! pending result or fails as a whole; captions are best-effort and fall
//! back to prompt text rather than failing the unit.

use tracing::warn;

use crate::events::RunObserver;
use crate::fal::types::{CaptionRequest, ImageEditRequest, ImageGenRequest};
use crate::fal::{FalApi, FalError};
use crate::plan::{GenerationMode, PromptUnit};
use crate::results::{PendingResult, ResultKind};

use super::Resolution;

const CAPTION_PROMPT: &str = "Caption this image for a text-to-image model. Describe everything visible in detail: subject, appearance, clothing, pose, expression, background, lighting, colors, style. Be specific and comprehensive.";
const CAPTION_SYSTEM_PROMPT: &str =
    "Only answer the question, do not provide any additional information. Don't use markdown.";

/// Everything a unit needs besides its own prompts. Built once per run.
pub(crate) struct UnitContext {
    pub mode: GenerationMode,
    pub total: usize,
    pub aspect_ratio: String,
    pub resolution: Resolution,
    pub caption: bool,
    pub caption_model: String,
    pub trigger_word: String,
    /// Uploaded reference URL; present exactly in reference mode.
    pub reference_url: Option<String>,
    pub observer: RunObserver,
}

/// Runs one unit start to finish. `index` is the unit's 0-based place in the
/// plan; log lines show it 1-based.
pub(crate) async fn run_unit<C: FalApi>(
    api: &C,
    ctx: &UnitContext,
    index: usize,
    unit: PromptUnit,
) -> Result<PendingResult, FalError> {
    match unit {
        PromptUnit::Pair {
            base_prompt,
            edit_prompt,
            action_name,
        } => run_pair(api, ctx, index, base_prompt, edit_prompt, action_name).await,
        PromptUnit::Image { prompt } => match ctx.reference_url.clone() {
            Some(reference_url) => run_reference(api, ctx, index, prompt, reference_url).await,
            None => run_single(api, ctx, index, prompt).await,
        },
    }
}

/// Pair mode: synthesize the START image, derive the END image from it, then
/// caption the END image (the edited state is what the dataset teaches).
async fn run_pair<C: FalApi>(
    api: &C,
    ctx: &UnitContext,
    index: usize,
    base_prompt: String,
    edit_prompt: String,
    action_name: String,
) -> Result<PendingResult, FalError> {
    let pos = index + 1;
    ctx.observer.info(format!(
        "[{pos}/{}] Starting: {}",
        ctx.total,
        truncate(&base_prompt, 35)
    ));

    ctx.observer.info(format!("[{pos}] Generating START image..."));
    let start_url = api
        .generate_image(ImageGenRequest {
            prompt: base_prompt.clone(),
            aspect_ratio: ctx.aspect_ratio.clone(),
            resolution: ctx.resolution.as_str().to_string(),
            num_images: 1,
        })
        .await?;

    ctx.observer
        .info(format!("[{pos}] START done, generating END..."));
    let end_url = api
        .edit_image(ImageEditRequest {
            image_urls: vec![start_url.clone()],
            prompt: edit_prompt.clone(),
            aspect_ratio: "auto".to_string(),
            resolution: ctx.resolution.as_str().to_string(),
        })
        .await?;
    ctx.observer.info(format!("[{pos}] END done"));

    let text = caption_or_fallback(api, ctx, &end_url, action_name.clone()).await;

    Ok(PendingResult {
        mode: ctx.mode,
        text: with_trigger_word(&ctx.trigger_word, text),
        kind: ResultKind::Pair {
            start_url,
            end_url,
            start_prompt: base_prompt,
            end_prompt: edit_prompt,
            action_name,
        },
    })
}

/// Single mode: one synthesized image per prompt.
async fn run_single<C: FalApi>(
    api: &C,
    ctx: &UnitContext,
    index: usize,
    prompt: String,
) -> Result<PendingResult, FalError> {
    let pos = index + 1;
    ctx.observer.info(format!(
        "[{pos}/{}] Generating: {}",
        ctx.total,
        truncate(&prompt, 40)
    ));

    let url = api
        .generate_image(ImageGenRequest {
            prompt: prompt.clone(),
            aspect_ratio: ctx.aspect_ratio.clone(),
            resolution: ctx.resolution.as_str().to_string(),
            num_images: 1,
        })
        .await?;
    ctx.observer.info(format!("[{pos}] Image done"));

    let text = caption_or_fallback(api, ctx, &url, prompt.clone()).await;

    Ok(PendingResult {
        mode: ctx.mode,
        text: with_trigger_word(&ctx.trigger_word, text),
        kind: ResultKind::Image { url, prompt },
    })
}

/// Reference mode: every unit edits the same uploaded reference image.
async fn run_reference<C: FalApi>(
    api: &C,
    ctx: &UnitContext,
    index: usize,
    prompt: String,
    reference_url: String,
) -> Result<PendingResult, FalError> {
    let pos = index + 1;
    ctx.observer.info(format!(
        "[{pos}/{}] Variation: {}",
        ctx.total,
        truncate(&prompt, 40)
    ));

    let url = api
        .edit_image(ImageEditRequest {
            image_urls: vec![reference_url],
            prompt: prompt.clone(),
            aspect_ratio: "auto".to_string(),
            resolution: ctx.resolution.as_str().to_string(),
        })
        .await?;
    ctx.observer.info(format!("[{pos}] Variation done"));

    let text = caption_or_fallback(api, ctx, &url, prompt.clone()).await;

    Ok(PendingResult {
        mode: ctx.mode,
        text: with_trigger_word(&ctx.trigger_word, text),
        kind: ResultKind::Image { url, prompt },
    })
}

/// Best-effort vision captioning. Any failure, and an empty caption, falls
/// back to the provided text; a lost caption is not worth a lost image.
async fn caption_or_fallback<C: FalApi>(
    api: &C,
    ctx: &UnitContext,
    image_url: &str,
    fallback: String,
) -> String {
    if !ctx.caption {
        return fallback;
    }

    let req = CaptionRequest {
        model: ctx.caption_model.clone(),
        prompt: CAPTION_PROMPT.to_string(),
        system_prompt: CAPTION_SYSTEM_PROMPT.to_string(),
        image_urls: vec![image_url.to_string()],
        temperature: 1.0,
    };

    match api.caption_image(req).await {
        Ok(caption) if !caption.trim().is_empty() => caption.trim().to_string(),
        Ok(_) => {
            ctx.observer
                .warn("Vision caption came back empty, using fallback text");
            fallback
        }
        Err(e) => {
            warn!(error = %e, "vision caption failed");
            ctx.observer.warn(format!("Vision caption failed: {e}"));
            fallback
        }
    }
}

fn with_trigger_word(trigger: &str, text: String) -> String {
    let trigger = trigger.trim();
    if trigger.is_empty() {
        text
    } else {
        format!("{trigger} {text}")
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    }
}
