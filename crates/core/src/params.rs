use std::fmt;
use std::str::FromStr;

use rand::Rng;
use tracing::info;

use crate::error::{PromptSide, ResolveError};

pub const DEFAULT_GUIDANCE: f64 = 7.0;
pub const DEFAULT_DENOISE: f64 = 0.75;
pub const DEFAULT_INFERENCE_STEPS: f64 = 50.0;
pub const DEFAULT_STEPS: f64 = 10.0;
/// Random default seeds are drawn from `0..SEED_UPPER_BOUND`.
pub const SEED_UPPER_BOUND: u64 = 1_000_000;
pub const PLACEHOLDER: &str = "?";
pub const PROMPT_SEPARATOR: &str = "--";

const PROGRAM_NAME: &str = "riffusion";

/// Seed audio templates offered by the service, keyed by CLI token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeedImage {
    OgBeat,
    Agile,
    Marim,
    Motorway,
    Vibes,
}

impl SeedImage {
    pub const ALL: [SeedImage; 5] = [
        SeedImage::OgBeat,
        SeedImage::Agile,
        SeedImage::Marim,
        SeedImage::Motorway,
        SeedImage::Vibes,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Self::OgBeat => "og-beat",
            Self::Agile => "agile",
            Self::Marim => "marim",
            Self::Motorway => "motorway",
            Self::Vibes => "vibes",
        }
    }

    /// Identifier the remote service expects in `seed_image_id`.
    pub fn backend_id(self) -> &'static str {
        match self {
            Self::OgBeat => "og_beat",
            Self::Agile => "agile",
            Self::Marim => "marim",
            Self::Motorway => "motorway",
            Self::Vibes => "vibes",
        }
    }
}

impl fmt::Display for SeedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for SeedImage {
    type Err = ResolveError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|image| image.token() == token)
            .ok_or_else(|| ResolveError::UnknownSeedImage {
                token: token.to_string(),
                expected: Self::ALL
                    .iter()
                    .map(|image| image.token())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

/// Numeric types a range flag can carry.
pub trait RangeNumber: Copy + PartialEq + fmt::Display {
    /// Parses one non-negative number token; signs and exponents are rejected.
    fn parse_token(token: &str) -> Option<Self>;
    fn offset(self, by: Self) -> Self;
}

impl RangeNumber for u64 {
    fn parse_token(token: &str) -> Option<Self> {
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        token.parse().ok()
    }

    fn offset(self, by: Self) -> Self {
        self.saturating_add(by)
    }
}

impl RangeNumber for f64 {
    fn parse_token(token: &str) -> Option<Self> {
        let (whole, fraction) = token.split_once('.').unwrap_or((token, ""));
        let digits_only = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }
        if !digits_only(whole) || !digits_only(fraction) {
            return None;
        }
        token.parse().ok()
    }

    fn offset(self, by: Self) -> Self {
        self + by
    }
}

/// One side of an explicit `A-B` range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeValue<T> {
    Value(T),
    Default,
}

impl<T: RangeNumber> RangeValue<T> {
    fn parse(token: &str) -> Option<Self> {
        if token == PLACEHOLDER {
            Some(Self::Default)
        } else {
            T::parse_token(token).map(Self::Value)
        }
    }

    fn or_default(self, default: T) -> T {
        match self {
            Self::Value(value) => value,
            Self::Default => default,
        }
    }
}

/// Parsed form of a `--seed`/`--guidance`/`--denoise` argument.
///
/// | input | variant | resolves to |
/// |---|---|---|
/// | `?` | `Default` | `(d, d)` |
/// | `A` | `Single(A)` | `(A, A)` |
/// | `A-B` | `Explicit(A, B)` | `(A, B)`, either side may be `?` |
/// | `+N` | `PlusOffset(N)` | `(d, d + N)` |
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeSpec<T> {
    Default,
    Single(T),
    Explicit(RangeValue<T>, RangeValue<T>),
    PlusOffset(T),
}

impl<T: RangeNumber> RangeSpec<T> {
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(offset) = raw.strip_prefix('+') {
            return T::parse_token(offset).map(Self::PlusOffset);
        }

        match raw.split_once('-') {
            Some((start, end)) => Some(Self::Explicit(
                RangeValue::parse(start)?,
                RangeValue::parse(end)?,
            )),
            None => match RangeValue::parse(raw)? {
                RangeValue::Default => Some(Self::Default),
                RangeValue::Value(value) => Some(Self::Single(value)),
            },
        }
    }

    pub fn resolve(self, default: T) -> Range<T> {
        let (start, end) = match self {
            Self::Default => (default, default),
            Self::Single(value) => (value, value),
            Self::Explicit(start, end) => (start.or_default(default), end.or_default(default)),
            Self::PlusOffset(offset) => (default, default.offset(offset)),
        };
        Range { start, end }
    }
}

/// Resolved `(start, end)` pair for one interpolated parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range<T> {
    pub start: T,
    pub end: T,
}

impl<T: RangeNumber> Range<T> {
    /// `{prefix}{start}` when both ends agree, otherwise `{prefix}{start}-{end}`.
    pub fn label(&self, prefix: &str) -> String {
        if self.start == self.end {
            format!("{prefix}{}", self.start)
        } else {
            format!("{prefix}{}-{}", self.start, self.end)
        }
    }
}

fn parse_range<T: RangeNumber>(
    flag: &'static str,
    raw: &str,
    default: T,
) -> Result<Range<T>, ResolveError> {
    RangeSpec::parse(raw)
        .map(|spec| spec.resolve(default))
        .ok_or_else(|| ResolveError::InvalidRange {
            flag,
            raw: raw.to_string(),
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub start: String,
    pub end: String,
}

impl PromptPair {
    /// Splits positional words on the first `--`. Without a separator both ends share
    /// the same prompt.
    pub fn from_words(words: &[String]) -> Result<Self, ResolveError> {
        if words.is_empty() {
            return Err(ResolveError::EmptyPrompt(PromptSide::Missing));
        }

        let (start_words, end_words) = match words.iter().position(|w| w == PROMPT_SEPARATOR) {
            Some(index) => (&words[..index], &words[index + 1..]),
            None => (words, words),
        };

        let start = start_words.join(" ").trim().to_string();
        let end = end_words.join(" ").trim().to_string();

        if start.is_empty() {
            return Err(ResolveError::EmptyPrompt(PromptSide::Start));
        }
        if end.is_empty() {
            return Err(ResolveError::EmptyPrompt(PromptSide::End));
        }

        Ok(Self { start, end })
    }

    pub fn is_shared(&self) -> bool {
        self.start == self.end
    }
}

/// Raw, unvalidated run parameters as they arrive from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamInputs {
    pub seed: String,
    pub seed_image: String,
    pub guidance: String,
    pub denoise: String,
    pub inference_steps: f64,
    pub steps: f64,
    pub prompt_words: Vec<String>,
}

impl Default for ParamInputs {
    fn default() -> Self {
        Self {
            seed: PLACEHOLDER.to_string(),
            seed_image: SeedImage::OgBeat.token().to_string(),
            guidance: PLACEHOLDER.to_string(),
            denoise: PLACEHOLDER.to_string(),
            inference_steps: DEFAULT_INFERENCE_STEPS,
            steps: DEFAULT_STEPS,
            prompt_words: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedParams {
    pub seed: Range<u64>,
    pub seed_image: SeedImage,
    pub guidance: Range<f64>,
    pub denoise: Range<f64>,
    pub inference_steps: u32,
    pub steps: u32,
    pub prompts: PromptPair,
}

impl ResolvedParams {
    /// Seeds actually sent to the service. Equal seeds are pulled apart so the two
    /// endpoints of the interpolation differ.
    pub fn request_seeds(&self) -> (u64, u64) {
        if self.seed.start == self.seed.end {
            (self.seed.start, self.seed.end.saturating_add(1))
        } else {
            (self.seed.start, self.seed.end)
        }
    }

    pub fn reproduction_command(&self) -> String {
        let prompts = if self.prompts.is_shared() {
            self.prompts.start.clone()
        } else {
            format!(
                "{} {PROMPT_SEPARATOR} {}",
                self.prompts.start, self.prompts.end
            )
        };

        format!(
            "{PROGRAM_NAME} -s {} -S {} -g {} -d {} -i {} -n {} {}",
            self.seed.label(""),
            self.seed_image,
            self.guidance.label(""),
            self.denoise.label(""),
            self.inference_steps,
            self.steps,
            prompts
        )
    }

    /// Deterministic run directory name derived from every resolved parameter.
    pub fn run_dir_name(&self) -> String {
        let start = sanitize_prompt(&self.prompts.start);
        let end = sanitize_prompt(&self.prompts.end);
        let prompts = if start == end {
            start
        } else {
            format!("{start}__{end}")
        };

        format!(
            "{}_{}_{}_{}_i{}_n{}__{}",
            self.seed.label("s"),
            self.seed_image,
            self.guidance.label("g"),
            self.denoise.label("d"),
            self.inference_steps,
            self.steps,
            prompts
        )
    }
}

fn sanitize_prompt(prompt: &str) -> String {
    prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .replace(['/', '\\'], "-")
}

fn check_unit_interval(label: &'static str, value: f64) -> Result<(), ResolveError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ResolveError::OutOfRange {
            label,
            value,
            low: 0.0,
            high: 1.0,
        })
    }
}

fn floor_positive(flag: &'static str, value: f64) -> Result<u32, ResolveError> {
    let floored = value.floor();
    if floored >= 1.0 && floored.is_finite() {
        Ok(floored.min(u32::MAX as f64) as u32)
    } else {
        Err(ResolveError::InvalidParameter { flag, value })
    }
}

/// Draws a fresh default seed in `0..SEED_UPPER_BOUND`.
pub fn random_seed() -> u64 {
    rand::thread_rng().gen_range(0..SEED_UPPER_BOUND)
}

/// Validates `inputs` and resolves every range against its default.
///
/// `seed_provider` is called exactly once and supplies the default seed.
pub fn resolve_params(
    inputs: &ParamInputs,
    seed_provider: impl FnOnce() -> u64,
) -> Result<ResolvedParams, ResolveError> {
    let prompts = PromptPair::from_words(&inputs.prompt_words)?;
    let seed_image: SeedImage = inputs.seed_image.parse()?;
    let steps = floor_positive("--steps", inputs.steps)?;
    let inference_steps = floor_positive("--inference-steps", inputs.inference_steps)?;

    let seed = parse_range("--seed", &inputs.seed, seed_provider())?;
    let guidance = parse_range("--guidance", &inputs.guidance, DEFAULT_GUIDANCE)?;
    let denoise = parse_range("--denoise", &inputs.denoise, DEFAULT_DENOISE)?;

    check_unit_interval("(start) denoise", denoise.start)?;
    check_unit_interval("end denoise", denoise.end)?;

    let resolved = ResolvedParams {
        seed,
        seed_image,
        guidance,
        denoise,
        inference_steps,
        steps,
        prompts,
    };

    info!(
        command = %resolved.reproduction_command(),
        "To reproduce this result"
    );

    Ok(resolved)
}
