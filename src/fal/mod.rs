pub mod types;

use std::future::Future;
use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use types::{
    CaptionRequest, ImageEditRequest, ImageGenRequest, ImagesOutput, InitiateUploadRequest,
    InitiateUploadResponse, TextGenRequest, TextOutput,
};

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// LLM router used for prompt-plan generation.
pub const TEXT_ENDPOINT: &str = "fal-ai/any-llm";
/// Text-to-image synthesis.
pub const IMAGE_ENDPOINT: &str = "fal-ai/nano-banana-pro";
/// Image-to-image edit (also used for reference variations).
pub const EDIT_ENDPOINT: &str = "fal-ai/nano-banana-pro/edit";
/// Vision model used for dataset captioning.
pub const VISION_ENDPOINT: &str = "openrouter/router/vision";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FalError {
    #[error("no FAL API key configured; run `loraforge config set-key` or set FAL_KEY")]
    MissingCredentials,

    /// The endpoint answered with a non-success status.
    #[error("{endpoint} returned HTTP {status}: {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    /// The request never produced a usable response.
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// 2xx response whose body did not match the expected schema.
    #[error("unexpected response from {endpoint}: {detail}")]
    Decode { endpoint: String, detail: String },
}

impl FalError {
    fn transport(endpoint: &str, source: reqwest::Error) -> Self {
        Self::Transport {
            endpoint: endpoint.to_string(),
            source,
        }
    }

    fn decode(endpoint: &str, detail: impl Into<String>) -> Self {
        Self::Decode {
            endpoint: endpoint.to_string(),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Shared API-key cell, read at call time so a key set or rotated mid-run
/// applies to every request issued afterwards.
#[derive(Clone, Default)]
pub struct CredentialStore {
    key: Arc<RwLock<Option<String>>>,
}

impl CredentialStore {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: Arc::new(RwLock::new(key.filter(|k| !k.trim().is_empty()))),
        }
    }

    pub async fn set(&self, key: String) {
        *self.key.write().await = Some(key);
    }

    pub async fn clear(&self) {
        *self.key.write().await = None;
    }

    pub async fn get(&self) -> Option<String> {
        self.key.read().await.clone()
    }

    pub async fn is_configured(&self) -> bool {
        self.key.read().await.is_some()
    }
}

// ---------------------------------------------------------------------------
// Capability surface
// ---------------------------------------------------------------------------

/// The remote capabilities the generation pipeline consumes. `FalClient` is
/// the production implementation; tests substitute scripted fakes.
pub trait FalApi: Send + Sync {
    /// Fails with [`FalError::MissingCredentials`] when no key is configured.
    fn check_auth(&self) -> impl Future<Output = Result<(), FalError>> + Send;

    /// Returns the raw output text of the LLM call.
    fn generate_text(
        &self,
        req: TextGenRequest,
    ) -> impl Future<Output = Result<String, FalError>> + Send;

    /// Returns the URL of the first synthesized image.
    fn generate_image(
        &self,
        req: ImageGenRequest,
    ) -> impl Future<Output = Result<String, FalError>> + Send;

    /// Returns the URL of the first edited image.
    fn edit_image(
        &self,
        req: ImageEditRequest,
    ) -> impl Future<Output = Result<String, FalError>> + Send;

    /// Returns the caption text for the image referenced by the request.
    fn caption_image(
        &self,
        req: CaptionRequest,
    ) -> impl Future<Output = Result<String, FalError>> + Send;

    /// Uploads raw bytes to FAL storage, yielding a URL usable in
    /// `image_urls` fields.
    fn upload_asset(
        &self,
        file_name: String,
        content_type: String,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<String, FalError>> + Send;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct FalClient {
    base_url: String,
    storage_url: String,
    credentials: CredentialStore,
    http: Client,
}

impl FalClient {
    pub fn new(base_url: String, storage_url: String, credentials: CredentialStore) -> Self {
        Self {
            base_url,
            storage_url,
            credentials,
            http: Client::new(),
        }
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// POST {base_url}/{endpoint} with `Authorization: Key ...`. One attempt,
    /// no retry; callers decide what a failure means for their unit of work.
    pub async fn invoke<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        input: &T,
    ) -> Result<Value, FalError> {
        let key = self
            .credentials
            .get()
            .await
            .ok_or(FalError::MissingCredentials)?;

        let url = format!("{}/{}", self.base_url, endpoint);
        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Key {key}"))
            .json(input)
            .send()
            .await
            .map_err(|e| FalError::transport(endpoint, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FalError::Api {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                message: error_detail(&body),
            });
        }

        resp.json::<Value>()
            .await
            .map_err(|e| FalError::transport(endpoint, e))
    }

    fn parse<T: serde::de::DeserializeOwned>(endpoint: &str, value: Value) -> Result<T, FalError> {
        serde_json::from_value(value).map_err(|e| FalError::decode(endpoint, e.to_string()))
    }

    fn first_image_url(endpoint: &str, value: Value) -> Result<String, FalError> {
        let out: ImagesOutput = Self::parse(endpoint, value)?;
        out.images
            .into_iter()
            .find_map(|img| img.url)
            .ok_or_else(|| FalError::decode(endpoint, "no image in response"))
    }
}

impl FalApi for FalClient {
    async fn check_auth(&self) -> Result<(), FalError> {
        if self.credentials.is_configured().await {
            Ok(())
        } else {
            Err(FalError::MissingCredentials)
        }
    }

    async fn generate_text(&self, req: TextGenRequest) -> Result<String, FalError> {
        let value = self.invoke(TEXT_ENDPOINT, &req).await?;
        let out: TextOutput = Self::parse(TEXT_ENDPOINT, value)?;
        out.output
            .ok_or_else(|| FalError::decode(TEXT_ENDPOINT, "no output text in response"))
    }

    async fn generate_image(&self, req: ImageGenRequest) -> Result<String, FalError> {
        let value = self.invoke(IMAGE_ENDPOINT, &req).await?;
        Self::first_image_url(IMAGE_ENDPOINT, value)
    }

    async fn edit_image(&self, req: ImageEditRequest) -> Result<String, FalError> {
        let value = self.invoke(EDIT_ENDPOINT, &req).await?;
        Self::first_image_url(EDIT_ENDPOINT, value)
    }

    async fn caption_image(&self, req: CaptionRequest) -> Result<String, FalError> {
        let value = self.invoke(VISION_ENDPOINT, &req).await?;
        let out: TextOutput = Self::parse(VISION_ENDPOINT, value)?;
        out.output
            .ok_or_else(|| FalError::decode(VISION_ENDPOINT, "no caption text in response"))
    }

    async fn upload_asset(
        &self,
        file_name: String,
        content_type: String,
        bytes: Vec<u8>,
    ) -> Result<String, FalError> {
        const UPLOAD: &str = "storage/upload";

        let key = self
            .credentials
            .get()
            .await
            .ok_or(FalError::MissingCredentials)?;

        let url = format!("{}/storage/upload/initiate", self.storage_url);
        let init = InitiateUploadRequest {
            file_name,
            content_type: content_type.clone(),
        };
        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Key {key}"))
            .json(&init)
            .send()
            .await
            .map_err(|e| FalError::transport(UPLOAD, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FalError::Api {
                endpoint: UPLOAD.to_string(),
                status: status.as_u16(),
                message: error_detail(&body),
            });
        }

        let target: InitiateUploadResponse = resp
            .json()
            .await
            .map_err(|e| FalError::transport(UPLOAD, e))?;

        // The signed PUT target carries its own authorization.
        let put = self
            .http
            .put(&target.upload_url)
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| FalError::transport(UPLOAD, e))?;

        let put_status = put.status();
        if !put_status.is_success() {
            let body = put.text().await.unwrap_or_default();
            return Err(FalError::Api {
                endpoint: UPLOAD.to_string(),
                status: put_status.as_u16(),
                message: error_detail(&body),
            });
        }

        Ok(target.file_url)
    }
}

/// Pull the most useful diagnostic out of a FAL error body. Validation
/// failures arrive as `{"detail": [{"msg": ...}]}`, runtime errors as
/// `{"detail": "..."}` or `{"message": "..."}`; anything else falls back to
/// the raw body.
fn error_detail(body: &str) -> String {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        match v.get("detail") {
            Some(Value::String(s)) => return s.clone(),
            Some(Value::Array(items)) => {
                let msgs: Vec<&str> = items
                    .iter()
                    .filter_map(|i| i.get("msg").and_then(Value::as_str))
                    .collect();
                if !msgs.is_empty() {
                    return msgs.join("; ");
                }
            }
            _ => {}
        }
        for field in ["message", "error"] {
            if let Some(s) = v.get(field).and_then(Value::as_str) {
                return s.to_string();
            }
        }
    }

    if body.trim().is_empty() {
        "FAL API call failed".to_string()
    } else {
        body.trim().to_string()
    }
}
