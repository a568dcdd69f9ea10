//! Extraction client: turns one artifact image into structured text.
//!
//! Defines the [`Extractor`] trait and its implementations:
//! - **[`DisabledExtractor`]**: always fails. Used when extraction is not configured.
//! - **[`AnthropicExtractor`]**: sends the image and a CSV prompt to the
//!   Anthropic Messages API.
//!
//! Extractors make exactly one attempt per call. Retry policy belongs to the
//! [`processor`](crate::processor), which counts failures against the
//! import and tries again on a later cycle.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ExtractionConfig;

/// Default prompt sent along with each image.
pub const DEFAULT_CSV_PROMPT: &str = r#"Perform OCR on this image and extract the schedules (like "matutino" or "nocturno"), the list of locations, and the location types (like COLONIA or FRACCIONAMIENTOS, always in singular form and lowercase) from the text content.

Output the information as CSV with the following columns: "date", "schedule", "location_type", "location_name". For the date column use the format "YYYY-MM-DD" (for example "2025-03-14" for "14 de marzo de 2025"). Quote attributes that may contain commas.

Do not include any other details about the image or any other text."#;

const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Bytes of one artifact plus what the extractor needs to describe them.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
}

impl Artifact {
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("can't read artifact {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            media_type: media_type_for(path),
        })
    }
}

/// Guess an image media type from the file extension. Defaults to JPEG.
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

/// An external capability that extracts structured text from an image.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short identifier used in logs (e.g. `"anthropic"`).
    fn name(&self) -> &str;

    /// Extract CSV text from `artifact`. Every error is treated as retryable.
    async fn extract(&self, artifact: &Artifact) -> Result<String>;
}

/// Create the extractor selected by `[extraction] provider`.
pub fn create_extractor(config: &ExtractionConfig) -> Result<Arc<dyn Extractor>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledExtractor)),
        "anthropic" => Ok(Arc::new(AnthropicExtractor::new(config)?)),
        other => bail!("Unknown extraction provider: {}", other),
    }
}

// ============ Disabled ============

/// Extractor used when no provider is configured. Every call fails.
pub struct DisabledExtractor;

#[async_trait]
impl Extractor for DisabledExtractor {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn extract(&self, _artifact: &Artifact) -> Result<String> {
        bail!("Extraction provider is disabled. Set [extraction] provider in config.")
    }
}

// ============ Anthropic ============

/// Extractor backed by the Anthropic Messages API.
///
/// Requires the `ANTHROPIC_API_KEY` environment variable.
pub struct AnthropicExtractor {
    client: reqwest::Client,
    api_key: String,
    url: String,
    model: String,
    max_tokens: u32,
    prompt: String,
}

impl AnthropicExtractor {
    /// # Errors
    ///
    /// Returns an error if `ANTHROPIC_API_KEY` is not set or the HTTP client
    /// cannot be built.
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow::anyhow!("ANTHROPIC_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_ANTHROPIC_URL.to_string()),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            prompt: config
                .prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_CSV_PROMPT.to_string()),
        })
    }

    fn request_body(&self, artifact: &Artifact) -> serde_json::Value {
        let data = base64::engine::general_purpose::STANDARD.encode(&artifact.bytes);
        serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": self.prompt },
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": artifact.media_type,
                            "data": data,
                        }
                    }
                ]
            }]
        })
    }
}

#[async_trait]
impl Extractor for AnthropicExtractor {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn extract(&self, artifact: &Artifact) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&self.request_body(artifact))
            .send()
            .await
            .with_context(|| format!("Anthropic request failed for {}", artifact.path.display()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!(
                "Anthropic API error {} for {}: {}",
                status,
                artifact.path.display(),
                body_text
            );
        }

        let json: serde_json::Value = response.json().await?;
        parse_messages_response(&json)
    }
}

/// Extract the text of the last text content block.
fn parse_messages_response(json: &serde_json::Value) -> Result<String> {
    let content = json
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Anthropic response: missing content array"))?;

    content
        .iter()
        .rev()
        .find_map(|block| {
            if block.get("type").and_then(|t| t.as_str()) == Some("text") {
                block.get("text").and_then(|t| t.as_str())
            } else {
                None
            }
        })
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid Anthropic response: no text block"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_from_extension() {
        assert_eq!(media_type_for(Path::new("a/b.PNG")), "image/png");
        assert_eq!(media_type_for(Path::new("b.webp")), "image/webp");
        assert_eq!(media_type_for(Path::new("b.jpg")), "image/jpeg");
        assert_eq!(media_type_for(Path::new("noext")), "image/jpeg");
    }

    #[test]
    fn last_text_block_wins() {
        let json = serde_json::json!({
            "content": [
                { "type": "text", "text": "thinking out loud" },
                { "type": "tool_use", "id": "x" },
                { "type": "text", "text": "date,schedule,location_type,location_name" }
            ]
        });
        assert_eq!(
            parse_messages_response(&json).unwrap(),
            "date,schedule,location_type,location_name"
        );
    }

    #[test]
    fn missing_content_is_error() {
        let json = serde_json::json!({ "type": "error" });
        assert!(parse_messages_response(&json).is_err());
    }

    #[tokio::test]
    async fn disabled_extractor_always_fails() {
        let artifact = Artifact {
            path: PathBuf::from("x.jpg"),
            bytes: vec![1, 2, 3],
            media_type: "image/jpeg",
        };
        let err = DisabledExtractor.extract(&artifact).await.unwrap_err();
        assert!(err.to_string().contains("disabled"));
    }

    #[test]
    fn factory_rejects_unknown_provider() {
        let cfg = ExtractionConfig {
            provider: "tesseract".to_string(),
            ..Default::default()
        };
        assert!(create_extractor(&cfg).is_err());
    }
}
