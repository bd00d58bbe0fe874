use thiserror::Error;

use crate::source::StreamFormat;

/// Invalid configuration. Surfaced synchronously and never silently clamped;
/// channel selection is the one documented fallback and lives elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ConfigError {
    #[error("block size {0} must be a power of two greater than 8")]
    BlockSize(usize),
    #[error("overlap ratio {0} must lie in [0, 1)")]
    Overlap(f32),
    #[error("block size {block} with overlap {overlap} yields a non-positive step")]
    Step { block: usize, overlap: f32 },
    #[error("axis span [{min_hz}, {max_hz}] Hz is empty or negative")]
    Span { min_hz: f32, max_hz: f32 },
    #[error("axis table needs at least two columns, got {0}")]
    Columns(usize),
    #[error("sample rate must be positive")]
    SampleRate,
}

/// Unified error surface of the engine.
///
/// `DataUnavailable` and `FormatMismatch` are recoverable steady-state
/// conditions the caller retries or reconfigures around; `Format` is terminal
/// for the offending load attempt and leaves prior engine state untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The requested sample range is not (yet) available.
    #[error("samples [{start}, {end}) are outside the available range")]
    DataUnavailable { start: usize, end: usize },
    /// A chunk declared a format other than the one the buffer expects.
    /// Carries the offending tuple so the caller can decide to reconfigure.
    #[error("chunk format {declared:?} does not match the configured stream format")]
    FormatMismatch { declared: StreamFormat },
    /// Input could not be decoded.
    #[error("{0}")]
    Format(String),
}
