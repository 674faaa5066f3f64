use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::prompt::AspectRatio;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_request_timing;

#[derive(Debug, thiserror::Error)]
#[error("Image generation failed: {0}")]
pub struct ImageGenerationError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersonGeneration {
    DontAllow,
    #[default]
    AllowAdult,
    AllowAll,
}

impl PersonGeneration {
    pub fn as_str(self) -> &'static str {
        match self {
            PersonGeneration::DontAllow => "dont_allow",
            PersonGeneration::AllowAdult => "allow_adult",
            PersonGeneration::AllowAll => "allow_all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "dont_allow" | "dont-allow" | "none" => Some(PersonGeneration::DontAllow),
            "allow_adult" | "allow-adult" | "adult" => Some(PersonGeneration::AllowAdult),
            "allow_all" | "allow-all" | "all" => Some(PersonGeneration::AllowAll),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImagenRequest {
    pub model: String,
    pub prompt: String,
    pub sample_count: usize,
    pub aspect_ratio: AspectRatio,
    pub person_generation: PersonGeneration,
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    predictions: Option<Vec<Prediction>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
}

/// Ultra-tier models only produce a single image per request.
pub fn max_images_for_model(model: &str) -> usize {
    if model.contains("ultra-generate") {
        1
    } else {
        4
    }
}

fn redact_api_key(text: &str) -> String {
    let key = CONFIG.gemini_api_key.trim();
    if key.is_empty() {
        return text.to_string();
    }
    text.replace(key, "[redacted]")
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// `max_attempts` counts total tries; the last attempt never retries.
fn should_attempt_retry(status: StatusCode, attempt: usize, max_attempts: usize) -> bool {
    should_retry_status(status) && attempt < max_attempts
}

fn retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(CONFIG.request_retry_base_delay_ms.saturating_mul(attempt))
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let summary = truncate_for_log(body, 600);
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|message| message.as_str())
                .map(|message| message.to_string())
        });
    (message, summary)
}

fn is_rate_limit_message(text: &str) -> bool {
    text.contains("429") || text.to_lowercase().contains("quota") || text.contains("Rate")
}

/// Hint shown to the user alongside a failure that looks like free-tier
/// throttling.
pub fn rate_limit_hint(error: &ImageGenerationError) -> Option<&'static str> {
    if is_rate_limit_message(&error.0) {
        Some("You may be hitting the free-tier rate limit or quota. Reduce the request size or wait a while.")
    } else {
        None
    }
}

fn build_predict_payload(request: &ImagenRequest) -> serde_json::Value {
    json!({
        "instances": [{ "prompt": request.prompt }],
        "parameters": {
            "sampleCount": request.sample_count,
            "aspectRatio": request.aspect_ratio.code(),
            "personGeneration": request.person_generation.as_str(),
        }
    })
}

fn decode_predictions(response: PredictResponse) -> Vec<GeneratedImage> {
    let mut images = Vec::new();
    for prediction in response.predictions.unwrap_or_default() {
        let Some(encoded) = prediction.bytes_base64_encoded else {
            continue;
        };
        match general_purpose::STANDARD.decode(encoded.as_bytes()) {
            Ok(bytes) => images.push(GeneratedImage {
                bytes,
                mime_type: prediction
                    .mime_type
                    .unwrap_or_else(|| "image/png".to_string()),
            }),
            Err(err) => {
                warn!("Dropping prediction with undecodable image payload: {err}");
            }
        }
    }
    images
}

async fn call_predict_api(request: &ImagenRequest) -> Result<PredictResponse> {
    let client = get_http_client();
    let url = format!(
        "{}/v1beta/models/{}:predict",
        CONFIG.imagen_base_url.trim_end_matches('/'),
        request.model
    );
    let payload = build_predict_payload(request);

    let max_attempts = CONFIG.request_max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let response = match client
            .post(&url)
            .header("x-goog-api-key", &CONFIG.gemini_api_key)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let err_text = redact_api_key(&err.to_string());
                warn!(
                    "Imagen request error: {} (timeout={}, connect={}, attempt={}/{})",
                    err_text,
                    err.is_timeout(),
                    err.is_connect(),
                    attempt,
                    max_attempts
                );
                if should_retry_error(&err) && attempt < max_attempts {
                    tokio::time::sleep(retry_delay(attempt)).await;
                    continue;
                }
                return Err(anyhow!("Imagen request failed: {}", err_text));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            let should_retry = should_attempt_retry(status, attempt, max_attempts);
            warn!(
                "Imagen API error: status={}, body={}, retrying={}",
                status,
                redact_api_key(&body_summary),
                should_retry
            );
            if should_retry {
                tokio::time::sleep(retry_delay(attempt)).await;
                continue;
            }
            let detail = message.unwrap_or(body_summary);
            return Err(anyhow!(
                "Imagen request failed with status {}: {}",
                status,
                redact_api_key(&detail)
            ));
        }

        let value = response.json::<PredictResponse>().await?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let count = value
                .predictions
                .as_ref()
                .map(|predictions| predictions.len())
                .unwrap_or(0);
            debug!(target: "llm.imagen", model = %request.model, predictions = count);
        }
        return Ok(value);
    }

    Err(anyhow!("Imagen request retries exhausted"))
}

/// Submits a generation request and returns the decoded images. An empty
/// result is a normal outcome (safety block or exhausted quota on the
/// service side) and is NOT an error; only transport and API failures are.
pub async fn generate_images(
    request: &ImagenRequest,
) -> Result<Vec<GeneratedImage>, ImageGenerationError> {
    let max_images = max_images_for_model(&request.model);
    let mut request = request.clone();
    request.sample_count = request.sample_count.clamp(1, max_images);

    log_request_timing("imagen", &request.model, "generate_images", || async {
        let response = call_predict_api(&request)
            .await
            .map_err(|err| ImageGenerationError(err.to_string()))?;
        Ok(decode_predictions(response))
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ultra_models_are_limited_to_one_image() {
        assert_eq!(
            max_images_for_model("imagen-4.0-ultra-generate-preview-06-06"),
            1
        );
        assert_eq!(max_images_for_model("imagen-4.0-generate-preview-06-06"), 4);
    }

    #[test]
    fn predict_payload_carries_all_parameters() {
        let request = ImagenRequest {
            model: "imagen-4.0-generate-preview-06-06".to_string(),
            prompt: "a red fox in snow".to_string(),
            sample_count: 2,
            aspect_ratio: AspectRatio::Wide16x9,
            person_generation: PersonGeneration::AllowAdult,
        };
        let payload = build_predict_payload(&request);
        assert_eq!(payload["instances"][0]["prompt"], "a red fox in snow");
        assert_eq!(payload["parameters"]["sampleCount"], 2);
        assert_eq!(payload["parameters"]["aspectRatio"], "16:9");
        assert_eq!(payload["parameters"]["personGeneration"], "allow_adult");
    }

    #[test]
    fn decodes_predictions_from_canned_response() {
        let encoded = general_purpose::STANDARD.encode(b"not-really-a-png");
        let raw = format!(
            r#"{{"predictions":[{{"bytesBase64Encoded":"{encoded}","mimeType":"image/png"}}]}}"#
        );
        let response: PredictResponse = serde_json::from_str(&raw).unwrap();
        let images = decode_predictions(response);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].bytes, b"not-really-a-png");
        assert_eq!(images[0].mime_type, "image/png");
    }

    #[test]
    fn empty_predictions_decode_to_no_images() {
        let response: PredictResponse = serde_json::from_str(r#"{"predictions":[]}"#).unwrap();
        assert!(decode_predictions(response).is_empty());
        let response: PredictResponse = serde_json::from_str("{}").unwrap();
        assert!(decode_predictions(response).is_empty());
    }

    #[test]
    fn max_attempts_counts_total_tries() {
        // Three configured attempts mean two retries at most: the third
        // try never sleeps and retries again.
        let status = StatusCode::TOO_MANY_REQUESTS;
        assert!(should_attempt_retry(status, 1, 3));
        assert!(should_attempt_retry(status, 2, 3));
        assert!(!should_attempt_retry(status, 3, 3));
        assert!(!should_attempt_retry(StatusCode::NOT_FOUND, 1, 3));
    }

    #[test]
    fn rate_limit_hint_matches_quota_errors() {
        let err = ImageGenerationError("status 429: quota exceeded".to_string());
        assert!(rate_limit_hint(&err).is_some());
        let err = ImageGenerationError("connection reset".to_string());
        assert!(rate_limit_hint(&err).is_none());
    }

    #[test]
    fn person_generation_round_trips_through_parse() {
        for policy in [
            PersonGeneration::DontAllow,
            PersonGeneration::AllowAdult,
            PersonGeneration::AllowAll,
        ] {
            assert_eq!(PersonGeneration::parse(policy.as_str()), Some(policy));
        }
        assert_eq!(PersonGeneration::parse("allow_teen"), None);
    }
}
