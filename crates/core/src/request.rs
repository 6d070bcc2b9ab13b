//! Wire model for the interpolation endpoint.
//!
//! Requests are wrapped as `{"worklet_input": {...}}`. Responses nest the generated
//! audio two levels deep: `data.worklet_output.model_output` is itself a JSON document
//! whose `audio` field holds a `data:audio/mpeg;base64,...` URI.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::Serialize;
use serde_json::Value;

use crate::error::{GenerationError, RetryReason};
use crate::params::{ResolvedParams, SeedImage};

pub const AUDIO_DATA_URI_PREFIX: &str = "data:audio/mpeg;base64,";
pub const SUCCESS_STATUS: u16 = 200;
pub const UNKNOWN_LATENCY: &str = "unknown";

const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptEndpoint {
    pub denoising: f64,
    pub guidance: f64,
    pub seed: u64,
    pub prompt: String,
}

/// One generation request at a fixed interpolation position.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolationRequest {
    pub alpha: f64,
    pub seed_image: SeedImage,
    pub num_inference_steps: u32,
    pub start: PromptEndpoint,
    pub end: PromptEndpoint,
}

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    worklet_input: WorkletInput<'a>,
}

#[derive(Serialize)]
struct WorkletInput<'a> {
    alpha: f64,
    mask_image_id: Option<&'a str>,
    num_inference_steps: u32,
    seed_image_id: &'a str,
    start: &'a PromptEndpoint,
    end: &'a PromptEndpoint,
}

impl InterpolationRequest {
    pub fn for_alpha(params: &ResolvedParams, alpha: f64) -> Self {
        let (start_seed, end_seed) = params.request_seeds();
        Self {
            alpha,
            seed_image: params.seed_image,
            num_inference_steps: params.inference_steps,
            start: PromptEndpoint {
                denoising: params.denoise.start,
                guidance: params.guidance.start,
                seed: start_seed,
                prompt: params.prompts.start.clone(),
            },
            end: PromptEndpoint {
                denoising: params.denoise.end,
                guidance: params.guidance.end,
                seed: end_seed,
                prompt: params.prompts.end.clone(),
            },
        }
    }

    pub fn to_json_body(&self) -> serde_json::Result<String> {
        serde_json::to_string(&RequestEnvelope {
            worklet_input: WorkletInput {
                alpha: self.alpha,
                mask_image_id: None,
                num_inference_steps: self.num_inference_steps,
                seed_image_id: self.seed_image.backend_id(),
                start: &self.start,
                end: &self.end,
            },
        })
    }
}

/// Decoded MP3 bytes plus the latency the service reported for them.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedClip {
    pub audio: Vec<u8>,
    pub latency_ms: Option<f64>,
}

impl GeneratedClip {
    pub fn latency_label(&self) -> String {
        match self.latency_ms {
            Some(latency) if latency != 0.0 => latency.to_string(),
            _ => UNKNOWN_LATENCY.to_string(),
        }
    }
}

/// Classifies one HTTP round trip.
///
/// Only an explicit `success: false` is fatal; every other defect is retryable.
/// The success flag is read before any optional field, so a malformed optional
/// field never hides an explicit failure.
pub fn interpret_response(status: u16, body: &str) -> Result<GeneratedClip, GenerationError> {
    if status != SUCCESS_STATUS {
        return Err(RetryReason::HttpStatus(status).into());
    }

    let envelope: Value = serde_json::from_str(body)
        .map_err(|err| RetryReason::UnparsableBody(err.to_string()))?;
    let data = envelope
        .get("data")
        .filter(|data| data.is_object())
        .ok_or(RetryReason::MissingData)?;

    match data.get("success").and_then(Value::as_bool) {
        Some(true) => {}
        Some(false) => {
            return Err(GenerationError::Fatal {
                detail: body.to_string(),
            })
        }
        None => return Err(RetryReason::MissingSuccessFlag.into()),
    }

    let model_output = data
        .pointer("/worklet_output/model_output")
        .and_then(Value::as_str)
        .filter(|raw| !raw.is_empty())
        .ok_or(RetryReason::MissingModelOutput)?;

    let model: Value = serde_json::from_str(model_output)
        .map_err(|err| RetryReason::UnparsableModelOutput(err.to_string()))?;
    let audio = model
        .get("audio")
        .and_then(Value::as_str)
        .filter(|raw| !raw.is_empty())
        .ok_or(RetryReason::MissingAudio)?;

    Ok(GeneratedClip {
        audio: decode_audio_data_uri(audio)?,
        latency_ms: data.get("latency_ms").and_then(latency_from_value),
    })
}

// Numbers and numeric strings count; anything else is treated as unreported.
fn latency_from_value(value: &Value) -> Option<f64> {
    let latency = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    latency.is_finite().then_some(latency)
}

/// Extracts the MP3 bytes from a `data:audio/mpeg;base64,` URI. The prefix is matched
/// case-insensitively and whitespace inside the payload is ignored.
pub fn decode_audio_data_uri(uri: &str) -> Result<Vec<u8>, RetryReason> {
    let prefix_len = AUDIO_DATA_URI_PREFIX.len();
    let has_prefix = uri
        .get(..prefix_len)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(AUDIO_DATA_URI_PREFIX));
    if !has_prefix {
        return Err(RetryReason::MalformedAudio);
    }

    let payload: String = uri[prefix_len..]
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect();
    if payload.is_empty() {
        return Err(RetryReason::MalformedAudio);
    }

    LENIENT_BASE64
        .decode(payload.as_bytes())
        .map_err(|err| RetryReason::InvalidBase64(err.to_string()))
}
