use crate::error::{Error, Result};
use crate::frame::Still;
use crate::settings::Settings;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const INSTRUCTION: &str = "Remove any watermark, logo, caption or other overlaid foreign element from this image. \
Treat those overlays as inpainting targets and fill them with plausible background. \
Keep everything else exactly the same and return only the edited image.";

pub trait WatermarkRemover: Send + Sync {
    fn remove(&self, still: &Still) -> Result<Still>;
}

/// Client for a `generateContent` style image-editing endpoint.
pub struct GeminiRemover {
    client: Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [RequestPart<'a>; 2],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum RequestPart<'a> {
    InlineData(InlineData),
    Text(&'a str),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: [&'static str; 2],
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(alias = "mime_type")]
    mime_type: String,
    data: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct Candidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ResponsePart {
    text: Option<String>,
    #[serde(alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiRemover {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings.api_key.clone().filter(|key| !key.is_empty());
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;
        let url = format!("{}/models/{}:generateContent", settings.endpoint.trim_end_matches('/'), settings.model);
        Ok(Self { client, url, api_key })
    }

    fn request_body(still: &Still) -> GenerateRequest<'static> {
        let image = InlineData { mime_type: still.media_type.clone(), data: STANDARD.encode(&still.bytes) };
        GenerateRequest {
            contents: [Content { parts: [RequestPart::InlineData(image), RequestPart::Text(INSTRUCTION)] }],
            generation_config: GenerationConfig { response_modalities: ["TEXT", "IMAGE"] },
        }
    }

    fn parse_response(response: GenerateResponse) -> Result<Still> {
        let mut diagnostics = Vec::new();
        if let Some(reason) = response.prompt_feedback.and_then(|feedback| feedback.block_reason) {
            diagnostics.push(format!("blocked: {}", reason));
        }

        for candidate in response.candidates {
            for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
                if let Some(image) = part.inline_data {
                    let bytes = STANDARD
                        .decode(image.data.as_bytes())
                        .map_err(|e| Error::Removal(format!("Invalid image payload: {}", e)))?;
                    return Ok(Still::new(bytes, image.mime_type));
                }
                if let Some(text) = part.text.filter(|text| !text.trim().is_empty()) {
                    diagnostics.push(text.trim().to_string());
                }
            }
            if let Some(reason) = candidate.finish_reason.filter(|reason| reason != "STOP") {
                diagnostics.push(format!("finish reason: {}", reason));
            }
        }

        if diagnostics.is_empty() {
            Err(Error::Removal("response contained no image".to_string()))
        } else {
            Err(Error::Removal(format!("response contained no image: {}", diagnostics.join("; "))))
        }
    }
}

impl WatermarkRemover for GeminiRemover {
    fn remove(&self, still: &Still) -> Result<Still> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Removal("No API key configured (set UNMARK_API_KEY)".to_string()))?;

        debug!(bytes = still.bytes.len(), media_type = %still.media_type, "requesting inpainting");
        let response = self
            .client
            .post(&self.url)
            .header("x-goog-api-key", api_key)
            .json(&Self::request_body(still))
            .send()
            .map_err(|e| Error::Removal(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(Error::Removal(format!("Service returned {}: {}", status, body.trim())));
        }

        let response = response
            .json::<GenerateResponse>()
            .map_err(|e| Error::Removal(format!("Unreadable response: {}", e)))?;
        Self::parse_response(response)
    }
}
