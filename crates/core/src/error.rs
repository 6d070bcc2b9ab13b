use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Failures raised while turning raw CLI input into [`crate::params::ResolvedParams`].
///
/// All of these happen before any network activity.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("invalid {flag} range: {raw}")]
    InvalidRange { flag: &'static str, raw: String },

    #[error("invalid {label} range: {low} <= {value} <= {high}")]
    OutOfRange {
        label: &'static str,
        value: f64,
        low: f64,
        high: f64,
    },

    #[error("{flag} must be >=1 (got {value})")]
    InvalidParameter { flag: &'static str, value: f64 },

    #[error("invalid seed image: {token} (expected one of: {expected})")]
    UnknownSeedImage { token: String, expected: String },

    #[error("{0}")]
    EmptyPrompt(PromptSide),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptSide {
    Missing,
    Start,
    End,
}

impl fmt::Display for PromptSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("missing prompt"),
            Self::Start => f.write_str("start prompt (before `--`) cannot be empty"),
            Self::End => f.write_str("end prompt (after `--`) cannot be empty"),
        }
    }
}

/// Why a single generation attempt should be retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryReason {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("received non-200 response; got {0}")]
    HttpStatus(u16),
    #[error("response body could not be parsed: {0}")]
    UnparsableBody(String),
    #[error("response body has no data object")]
    MissingData,
    #[error("response carries no success flag")]
    MissingSuccessFlag,
    #[error("model_output unavailable")]
    MissingModelOutput,
    #[error("model_output could not be parsed: {0}")]
    UnparsableModelOutput(String),
    #[error("audio data unavailable")]
    MissingAudio,
    #[error("audio data in unexpected format")]
    MalformedAudio,
    #[error("audio payload is not valid base64: {0}")]
    InvalidBase64(String),
}

/// Outcome classification for one request/response round trip.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Retryable(#[from] RetryReason),
    #[error("model returned failure: {detail}")]
    Fatal { detail: String },
}

#[derive(Debug, Error)]
pub enum SampleLoopError {
    #[error("model returned failure at alpha {alpha}; giving up")]
    Fatal { alpha: f64, detail: String },

    #[error("giving up at alpha {alpha} after {attempts} attempts: {last}")]
    RetriesExhausted {
        alpha: f64,
        attempts: u32,
        last: RetryReason,
    },

    #[error("failed to write sample for alpha {alpha} to {}", path.display())]
    WriteSample {
        alpha: f64,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("failed to launch {program} (is it installed?)")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}: {stderr_tail}")]
    Exit {
        program: String,
        status: ExitStatus,
        stderr_tail: String,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to create directory {}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Sampling(#[from] SampleLoopError),

    #[error("failed to write sample manifest {}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to combine audio into {}", path.display())]
    Assemble {
        path: PathBuf,
        #[source]
        source: AssembleError,
    },
}

impl PipelineError {
    /// True when the remote service explicitly reported a model failure.
    pub fn is_fatal_generation(&self) -> bool {
        matches!(self, Self::Sampling(SampleLoopError::Fatal { .. }))
    }
}
