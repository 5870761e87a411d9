//! Gemini `generateContent` client.
//!
//! One REST endpoint serves all three operations; they differ only in the
//! model, the request parts, and how the response is read:
//!
//! ```text
//! transform_image -> image model,  inline image + prompt  -> first inlineData part
//! generate_plan   -> plan model,   prompt + JSON schema   -> text parts -> parse_plan
//! search          -> search model, prompt + maps grounding -> groundingChunks[].maps
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::presets::StylePreset;

use super::plan::parse_plan;
use super::trait_def::{RemoteError, SupplierSearch, SynthesisClient};
use super::types::{Coordinates, EncodedImage, MaintenancePlan, SupplierResult};

/// Title used for grounded results that carry no title of their own.
pub const FALLBACK_SUPPLIER_TITLE: &str = "Specialized Botanical Supplier";

/// Connection settings for [`GeminiClient`].
#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub image_model: String,
    pub plan_model: String,
    pub search_model: String,
    /// Per-request timeout. Image synthesis is slow; keep this generous.
    pub timeout: Duration,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("image_model", &self.image_model)
            .field("plan_model", &self.plan_model)
            .field("search_model", &self.search_model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GeminiConfig {
    pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
    pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
    pub const DEFAULT_PLAN_MODEL: &str = "gemini-3-flash-preview";
    pub const DEFAULT_SEARCH_MODEL: &str = "gemini-2.5-flash";

    /// Config with default endpoint and models.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            image_model: Self::DEFAULT_IMAGE_MODEL.to_string(),
            plan_model: Self::DEFAULT_PLAN_MODEL.to_string(),
            search_model: Self::DEFAULT_SEARCH_MODEL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        )
    }
}

/// HTTP client implementing [`SynthesisClient`] and [`SupplierSearch`].
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, RemoteError> {
        if config.api_key.trim().is_empty() {
            return Err(RemoteError::MissingApiKey);
        }
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn generate_content(&self, model: &str, body: &Value) -> Result<Value, RemoteError> {
        let url = self.config.endpoint(model);
        tracing::debug!(model = %model, "calling generateContent");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| RemoteError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let err = api_error(status.as_u16(), &text);
            tracing::warn!(model = %model, error = %err, "generateContent failed");
            return Err(err);
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| RemoteError::Http(format!("invalid response body: {e}")))
    }
}

#[async_trait]
impl SynthesisClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn transform_image(
        &self,
        image: &EncodedImage,
        style: &StylePreset,
    ) -> Result<EncodedImage, RemoteError> {
        let body = image_request(image, style);
        let response = self
            .generate_content(&self.config.image_model, &body)
            .await?;
        extract_image(&response)
    }

    async fn generate_plan(&self, style: &StylePreset) -> Result<MaintenancePlan, RemoteError> {
        let body = plan_request(style);
        let response = self
            .generate_content(&self.config.plan_model, &body)
            .await?;
        Ok(parse_plan(&extract_text(&response)))
    }
}

#[async_trait]
impl SupplierSearch for GeminiClient {
    async fn search(
        &self,
        items: &[String],
        location: Coordinates,
    ) -> Result<Vec<SupplierResult>, RemoteError> {
        let body = supplier_request(items, location);
        let response = self
            .generate_content(&self.config.search_model, &body)
            .await?;
        Ok(extract_suppliers(&response))
    }
}

// ---------------------------------------------------------------------------
// Request builders
// ---------------------------------------------------------------------------

fn image_prompt(style: &StylePreset) -> String {
    format!(
        "You are a landscape architect and architectural photographer. Redesign the \
         outdoor space in the attached photo.\n\
         Keep buildings and permanent structures exactly where they are. Replace \
         patchy lawn with dense, edged turf, swap weeds for healthy planting, restore \
         paths and decking, remove clutter, and light the scene at golden hour.\n\
         Style: {name}. {description}\n\
         Return only the final image.",
        name = style.name,
        description = style.description,
    )
}

fn plan_prompt(style: &StylePreset) -> String {
    format!(
        "Write an implementation and maintenance plan for a yard restoration in the \
         \"{name}\" style ({description}).\n\
         Include: 6 maintenance products with descriptions and price ranges ($ to $$$); \
         a 4-phase guide (Clearing, Preparation, Installation, Refinement) with actions; \
         and a maintenance checklist of 8-10 items.\n\
         Respond with JSON only.",
        name = style.name,
        description = style.description,
    )
}

fn supplier_prompt(items: &[String]) -> String {
    format!(
        "Find well-rated landscape supply centers, plant nurseries, and garden tool \
         suppliers within 20 miles of my location that carry: {}.",
        items.join(", ")
    )
}

/// Request body for image transformation.
pub fn image_request(image: &EncodedImage, style: &StylePreset) -> Value {
    json!({
        "contents": [{
            "parts": [
                {
                    "inlineData": {
                        "mimeType": image.mime_type(),
                        "data": image.base64_payload(),
                    }
                },
                { "text": image_prompt(style) }
            ]
        }]
    })
}

/// The response schema the plan model is constrained to.
fn plan_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "inventory": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "item": { "type": "STRING" },
                        "description": { "type": "STRING" },
                        "priceRange": { "type": "STRING" }
                    },
                    "required": ["item", "description", "priceRange"]
                }
            },
            "guide": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "phase": { "type": "STRING" },
                        "title": { "type": "STRING" },
                        "actions": { "type": "ARRAY", "items": { "type": "STRING" } }
                    },
                    "required": ["phase", "title", "actions"]
                }
            },
            "maintenanceChecklist": {
                "type": "ARRAY",
                "items": { "type": "STRING" }
            }
        },
        "required": ["inventory", "guide", "maintenanceChecklist"]
    })
}

/// Request body for plan generation.
pub fn plan_request(style: &StylePreset) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": plan_prompt(style) }] }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": plan_schema(),
        }
    })
}

/// Request body for grounded supplier search.
pub fn supplier_request(items: &[String], location: Coordinates) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": supplier_prompt(items) }] }],
        "tools": [{ "googleMaps": {} }],
        "toolConfig": {
            "retrievalConfig": {
                "latLng": {
                    "latitude": location.latitude,
                    "longitude": location.longitude,
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Response readers
// ---------------------------------------------------------------------------

fn first_candidate_parts(response: &Value) -> &[Value] {
    response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// The first inline image of the first candidate, as a PNG data URL.
pub fn extract_image(response: &Value) -> Result<EncodedImage, RemoteError> {
    first_candidate_parts(response)
        .iter()
        .find_map(|part| part.pointer("/inlineData/data").and_then(Value::as_str))
        .filter(|data| !data.is_empty())
        .map(|data| EncodedImage::new(format!("data:image/png;base64,{data}")))
        .ok_or(RemoteError::NoImage)
}

/// All text parts of the first candidate, concatenated.
pub fn extract_text(response: &Value) -> String {
    first_candidate_parts(response)
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .concat()
}

/// Map grounding chunks of the first candidate, in response order.
pub fn extract_suppliers(response: &Value) -> Vec<SupplierResult> {
    response
        .pointer("/candidates/0/groundingMetadata/groundingChunks")
        .and_then(Value::as_array)
        .map(|chunks| {
            chunks
                .iter()
                .filter_map(|chunk| chunk.get("maps"))
                .filter_map(|maps| {
                    let uri = maps.get("uri").and_then(Value::as_str)?;
                    let title = maps
                        .get("title")
                        .and_then(Value::as_str)
                        .filter(|t| !t.is_empty())
                        .unwrap_or(FALLBACK_SUPPLIER_TITLE);
                    Some(SupplierResult {
                        title: title.to_string(),
                        uri: uri.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Build an [`RemoteError::Api`] from an error response body.
///
/// Uses `error.message` when the body is the usual JSON error envelope.
fn api_error(status: u16, body: &str) -> RemoteError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect());
    RemoteError::Api { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::default_preset;

    #[test]
    fn empty_api_key_is_rejected() {
        let err = GeminiClient::new(GeminiConfig::new("  ")).unwrap_err();
        assert_eq!(err, RemoteError::MissingApiKey);
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let rendered = format!("{:?}", GeminiConfig::new("secret-key-123"));
        assert!(!rendered.contains("secret-key-123"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn endpoint_joins_base_and_model() {
        let mut config = GeminiConfig::new("key");
        config.base_url = "http://localhost:8080/v1beta/".to_string();
        assert_eq!(
            config.endpoint("gemini-2.5-flash"),
            "http://localhost:8080/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn image_request_strips_data_url_header() {
        let image = EncodedImage::new("data:image/webp;base64,QUJD");
        let body = image_request(&image, &default_preset());

        let inline = &body["contents"][0]["parts"][0]["inlineData"];
        assert_eq!(inline["mimeType"], "image/webp");
        assert_eq!(inline["data"], "QUJD");
        let prompt = body["contents"][0]["parts"][1]["text"].as_str().unwrap();
        assert!(prompt.contains("Outdoor Glow"));
    }

    #[test]
    fn plan_request_uses_json_mode() {
        let body = plan_request(&default_preset());
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        let required = body["generationConfig"]["responseSchema"]["required"]
            .as_array()
            .unwrap();
        assert_eq!(required.len(), 3);
    }

    #[test]
    fn supplier_request_carries_coordinates() {
        let items = vec!["mulch".to_string(), "shears".to_string()];
        let body = supplier_request(&items, Coordinates::new(45.52, -122.68));

        let lat_lng = &body["toolConfig"]["retrievalConfig"]["latLng"];
        assert_eq!(lat_lng["latitude"], 45.52);
        assert_eq!(lat_lng["longitude"], -122.68);
        assert!(body["tools"][0].get("googleMaps").is_some());
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("mulch, shears"));
    }

    #[test]
    fn extract_image_takes_first_inline_part() {
        let response = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "Here is your garden" },
                    { "inlineData": { "mimeType": "image/png", "data": "SU1H" } },
                    { "inlineData": { "mimeType": "image/png", "data": "U0VDT05E" } }
                ]}
            }]
        });
        let image = extract_image(&response).unwrap();
        assert_eq!(image.as_str(), "data:image/png;base64,SU1H");
    }

    #[test]
    fn extract_image_without_image_part_fails() {
        let response = json!({
            "candidates": [{ "content": { "parts": [{ "text": "I cannot do that" }] } }]
        });
        assert_eq!(extract_image(&response).unwrap_err(), RemoteError::NoImage);
        assert_eq!(extract_image(&json!({})).unwrap_err(), RemoteError::NoImage);
    }

    #[test]
    fn extract_text_concatenates_parts() {
        let response = json!({
            "candidates": [{ "content": { "parts": [
                { "text": "{\"maintenanceChecklist\":" },
                { "text": "[\"Mow\"]}" }
            ]}}]
        });
        let plan = parse_plan(&extract_text(&response));
        assert_eq!(plan.maintenance_checklist, vec!["Mow"]);
    }

    #[test]
    fn malformed_plan_response_degrades_to_empty() {
        let response = json!({
            "candidates": [{ "content": { "parts": [{ "text": "not json at all" }] } }]
        });
        let plan = parse_plan(&extract_text(&response));
        assert_eq!(plan, MaintenancePlan::default());
    }

    #[test]
    fn extract_suppliers_reads_map_chunks() {
        let response = json!({
            "candidates": [{
                "groundingMetadata": { "groundingChunks": [
                    { "maps": { "title": "Green Thumb Nursery", "uri": "https://maps.example/1" } },
                    { "web": { "title": "Blog", "uri": "https://blog.example" } },
                    { "maps": { "uri": "https://maps.example/2" } },
                    { "maps": { "title": "No link" } }
                ]}
            }]
        });
        let suppliers = extract_suppliers(&response);
        assert_eq!(
            suppliers,
            vec![
                SupplierResult {
                    title: "Green Thumb Nursery".to_string(),
                    uri: "https://maps.example/1".to_string(),
                },
                SupplierResult {
                    title: FALLBACK_SUPPLIER_TITLE.to_string(),
                    uri: "https://maps.example/2".to_string(),
                },
            ]
        );
    }

    #[test]
    fn extract_suppliers_without_grounding_is_empty() {
        assert!(extract_suppliers(&json!({ "candidates": [] })).is_empty());
    }

    #[test]
    fn api_error_prefers_envelope_message() {
        let err = api_error(
            403,
            r#"{"error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}}"#,
        );
        assert_eq!(
            err,
            RemoteError::Api {
                status: 403,
                message: "API key not valid".to_string()
            }
        );

        let err = api_error(502, "Bad Gateway");
        assert_eq!(
            err,
            RemoteError::Api {
                status: 502,
                message: "Bad Gateway".to_string()
            }
        );
    }
}
