use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Text generation
// POST {baseURL}/fal-ai/any-llm
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct TextGenRequest {
    pub model: String,
    pub system_prompt: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct TextOutput {
    pub output: Option<String>,
}

// ---------------------------------------------------------------------------
// Image synthesis
// POST {baseURL}/fal-ai/nano-banana-pro
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ImageGenRequest {
    pub prompt: String,
    pub aspect_ratio: String,
    pub resolution: String, // "1K", "2K", or "4K"
    pub num_images: u32,
}

// ---------------------------------------------------------------------------
// Image edit: derives a new image from one or more source images
// POST {baseURL}/fal-ai/nano-banana-pro/edit
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct ImageEditRequest {
    pub image_urls: Vec<String>,
    pub prompt: String,
    /// Always "auto"; the edit endpoint keeps the source geometry.
    pub aspect_ratio: String,
    pub resolution: String,
}

#[derive(Debug, Deserialize)]
pub struct ImagesOutput {
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Deserialize)]
pub struct ImageRef {
    pub url: Option<String>,
    pub content_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Vision captioning
// POST {baseURL}/openrouter/router/vision
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct CaptionRequest {
    pub model: String,
    pub prompt: String,
    pub system_prompt: String,
    pub image_urls: Vec<String>,
    pub temperature: f32,
}

// ---------------------------------------------------------------------------
// Storage upload: two-step handshake
// POST {restURL}/storage/upload/initiate  → signed PUT target + final URL
// PUT  {upload_url} with the raw bytes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct InitiateUploadRequest {
    pub file_name: String,
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
pub struct InitiateUploadResponse {
    pub upload_url: String,
    pub file_url: String,
}
