use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::client::InterpolationClient;
use crate::error::{GenerationError, RetryReason, SampleLoopError};
use crate::params::ResolvedParams;
use crate::request::{interpret_response, GeneratedClip, InterpolationRequest};
use crate::retry::RetryPolicy;

/// One successfully generated clip.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleResult {
    pub alpha: f64,
    pub path: PathBuf,
    pub latency_ms: Option<f64>,
    pub attempts: u32,
}

/// Interpolation positions for `steps` samples.
///
/// Positions are computed from the index so the last one is exactly 1.0.
/// A single step yields only the start position.
/// The sequence is lazy; `steps` may be as large as `u32::MAX`.
pub fn alpha_positions(steps: u32) -> impl DoubleEndedIterator<Item = f64> + ExactSizeIterator {
    let steps = steps.max(1);
    let last = f64::from(steps - 1).max(1.0);
    (0..steps).map(move |index| f64::from(index) / last)
}

pub fn clip_file_name(alpha: f64, latency_label: &str) -> String {
    format!("{alpha:.10}-l{latency_label}.mp3")
}

/// Generates one clip per alpha position into `run_dir`, in order.
///
/// Returns on the first fatal model failure; clips written before that point stay
/// on disk.
pub fn run_sample_loop<C: InterpolationClient>(
    params: &ResolvedParams,
    run_dir: &Path,
    client: &mut C,
    policy: &RetryPolicy,
) -> Result<Vec<SampleResult>, SampleLoopError> {
    let mut samples = Vec::new();

    for alpha in alpha_positions(params.steps) {
        info!(progress = %format!("{:.2}%", alpha * 100.0), alpha, "Generating sample");

        let request = InterpolationRequest::for_alpha(params, alpha);
        let (clip, attempts) = generate_with_retry(client, &request, policy)?;
        let path = run_dir.join(clip_file_name(alpha, &clip.latency_label()));

        fs::write(&path, &clip.audio).map_err(|source| SampleLoopError::WriteSample {
            alpha,
            path: path.clone(),
            source,
        })?;

        info!(
            alpha,
            attempts,
            bytes = clip.audio.len(),
            path = %path.display(),
            "Sample written"
        );

        samples.push(SampleResult {
            alpha,
            path,
            latency_ms: clip.latency_ms,
            attempts,
        });
    }

    Ok(samples)
}

fn generate_with_retry<C: InterpolationClient>(
    client: &mut C,
    request: &InterpolationRequest,
    policy: &RetryPolicy,
) -> Result<(GeneratedClip, u32), SampleLoopError> {
    let alpha = request.alpha;
    let mut attempt = 1u32;

    loop {
        let reason = match attempt_once(client, request) {
            Ok(clip) => return Ok((clip, attempt)),
            Err(GenerationError::Fatal { detail }) => {
                error!(alpha, attempt, response = %detail, "Model returned failure; giving up");
                return Err(SampleLoopError::Fatal { alpha, detail });
            }
            Err(GenerationError::Retryable(reason)) => reason,
        };

        if !policy.allows_retry_after(attempt) {
            return Err(SampleLoopError::RetriesExhausted {
                alpha,
                attempts: attempt,
                last: reason,
            });
        }

        warn!(
            alpha,
            attempt,
            delay_ms = policy.delay().as_millis() as u64,
            reason = %reason,
            "Generation attempt failed; retrying"
        );
        policy.wait();
        attempt = attempt.saturating_add(1);
    }
}

fn attempt_once<C: InterpolationClient>(
    client: &mut C,
    request: &InterpolationRequest,
) -> Result<GeneratedClip, GenerationError> {
    let raw = client
        .send(request)
        .map_err(|err| RetryReason::Transport(format!("{err:#}")))?;
    interpret_response(raw.status, &raw.body)
}
