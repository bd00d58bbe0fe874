//! Streaming spectrum analysis engine.
//!
//! The crate turns audio sample streams into frequency-domain spectra for
//! real-time visualization. A windowed, overlapped Fourier transform walks a
//! moving analysis window over a pluggable sample source, folding each result
//! into running peak and average statistics, while an interpolation engine
//! maps the fixed bin grid onto a variable number of linearly- or
//! logarithmically-scaled display columns.
//!
//! Components:
//! - [`dsp::fft`] — radix-2 transform core with precomputed window,
//!   bit-reversal, and twiddle tables.
//! - [`source::stream`] — chunk-chain buffer assembling asynchronously
//!   delivered PCM into an addressable timeline.
//! - [`dsp::analyzer`] — configuration, step cursor, and max/avg accumulation
//!   over static clips or streaming buffers.
//! - [`dsp::axis`] — per-column bin-range tables for display mapping.
//!
//! The engine is single-threaded and externally paced: nothing blocks, and
//! underruns surface as retryable results rather than errors. Rendering,
//! playback timing, and socket management are the caller's business.

pub mod dsp;
pub mod error;
pub mod source;
pub mod util;

pub use dsp::analyzer::{
    Advance, ChangeSet, FftConfig, ResetPolicy, SpectrumAnalyzer, SubscriptionId,
    OVERLAP_PRESETS,
};
pub use dsp::axis::{AxisColumn, AxisMapper, AxisParams, AxisScale};
pub use dsp::fft::{Fft, WindowKind};
pub use error::{ConfigError, EngineError};
pub use source::clip::AudioClip;
pub use source::stream::StreamBuffer;
pub use source::wire::{Record, RecordReader};
pub use source::{SampleSource, StreamFormat, MERGE_CHANNEL};
