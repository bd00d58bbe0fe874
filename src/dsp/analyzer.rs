//! Accumulating spectrum analyzer.
//!
//! Owns the sample source, the FFT configuration, and the step cursor, and
//! folds transform results into running max/average statistics in strictly
//! increasing offset order. Configuration changes go through explicit
//! mutation methods that report whether anything changed and publish a typed
//! change-set to subscribers; statistics reset whenever bin semantics change.

use crate::dsp::fft::{Fft, WindowKind, MIN_BLOCK_SIZE};
use crate::error::{ConfigError, EngineError};
use crate::source::stream::StreamBuffer;
use crate::source::{SampleSource, MERGE_CHANNEL};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// FFT analysis configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FftConfig {
    /// Power of two greater than 8.
    pub block_size: usize,
    pub window: WindowKind,
    /// Fraction of a block retained when the analysis window advances, in
    /// `[0, 1)`.
    pub overlap: f32,
}

impl Default for FftConfig {
    fn default() -> Self {
        Self {
            block_size: 1024,
            window: WindowKind::Hann,
            overlap: 0.0,
        }
    }
}

impl FftConfig {
    /// Samples the cursor advances per transform. A configuration whose step
    /// would truncate to zero is rejected rather than looping forever.
    pub fn step(&self) -> Result<usize, ConfigError> {
        if !self.block_size.is_power_of_two() || self.block_size < MIN_BLOCK_SIZE {
            return Err(ConfigError::BlockSize(self.block_size));
        }
        if !self.overlap.is_finite() || !(0.0..1.0).contains(&self.overlap) {
            return Err(ConfigError::Overlap(self.overlap));
        }
        let step = (self.block_size as f64 * (1.0 - f64::from(self.overlap))) as usize;
        if step == 0 {
            return Err(ConfigError::Step {
                block: self.block_size,
                overlap: self.overlap,
            });
        }
        Ok(step)
    }
}

/// Preset overlap ratios in coarse steps: 0%, 25%, 50%, 75%, 88%, 94%, 97%.
pub const OVERLAP_PRESETS: [f32; 7] = [0.0, 0.25, 0.5, 0.75, 0.875, 0.937_5, 0.968_75];

/// When the running statistics are cleared implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetPolicy {
    pub on_rewind: bool,
    pub on_overlap_change: bool,
}

impl Default for ResetPolicy {
    fn default() -> Self {
        Self {
            on_rewind: true,
            on_overlap_change: false,
        }
    }
}

/// Which aspects of the analyzer one mutation touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub source: bool,
    pub block_size: bool,
    pub window: bool,
    pub overlap: bool,
    pub channel: bool,
    /// Running statistics were reset.
    pub statistics: bool,
}

impl ChangeSet {
    pub fn any(&self) -> bool {
        self.source
            || self.block_size
            || self.window
            || self.overlap
            || self.channel
            || self.statistics
    }
}

/// Handle identifying a registered change listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&ChangeSet)>;

/// Outcome of [`SpectrumAnalyzer::advance_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Every transform up to the target was folded.
    Complete { folds: usize },
    /// The source could not supply the required span; the cursor is unmoved
    /// and the caller retries once more data exists.
    Pending,
}

pub struct SpectrumAnalyzer {
    source: Option<Box<dyn SampleSource>>,
    config: FftConfig,
    policy: ResetPolicy,
    /// 0 selects the merge channel.
    channel: usize,
    fft: Fft,
    step: usize,
    cursor: usize,
    /// Latest transform, copied out of the engine buffer at each fold.
    current: Vec<f32>,
    max_accum: Vec<f32>,
    avg_sum: Vec<f32>,
    fold_count: u64,
    max_cache: Vec<f32>,
    avg_cache: Vec<f32>,
    max_dirty: bool,
    avg_dirty: bool,
    /// Bumped by every fold and reset; lets consumers detect staleness.
    revision: u64,
    span_scratch: Vec<f32>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_listener: u64,
}

impl SpectrumAnalyzer {
    pub fn new(config: FftConfig) -> Result<Self, ConfigError> {
        let step = config.step()?;
        let fft = Fft::new(config.block_size, config.window)?;
        let half = config.block_size / 2;
        Ok(Self {
            source: None,
            config,
            policy: ResetPolicy::default(),
            channel: MERGE_CHANNEL,
            fft,
            step,
            cursor: 0,
            current: vec![0.0; half],
            max_accum: vec![0.0; half],
            avg_sum: vec![0.0; half],
            fold_count: 0,
            max_cache: vec![0.0; half],
            avg_cache: vec![0.0; half],
            max_dirty: true,
            avg_dirty: true,
            revision: 0,
            span_scratch: Vec::new(),
            listeners: Vec::new(),
            next_listener: 0,
        })
    }

    pub fn config(&self) -> FftConfig {
        self.config
    }

    pub fn reset_policy(&self) -> ResetPolicy {
        self.policy
    }

    pub fn set_reset_policy(&mut self, policy: ResetPolicy) {
        self.policy = policy;
    }

    /// Samples between successive folds.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Next offset a fold will read from.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Selected channel; `0` is the merge channel.
    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn half_size(&self) -> usize {
        self.config.block_size / 2
    }

    // source management ----------------------------------------------------

    /// Install a new source, rewinding the cursor and resetting statistics.
    /// A configured channel the new source cannot serve falls back to the
    /// merge channel.
    pub fn set_source(&mut self, mut source: Box<dyn SampleSource>) {
        self.cursor = 0;
        if self.channel > source.channel_count() {
            debug!(
                channel = self.channel,
                available = source.channel_count(),
                "selected channel out of range, falling back to merge"
            );
            self.channel = MERGE_CHANNEL;
        }
        source.prepare_merge();
        debug!(
            channels = source.channel_count(),
            sample_rate = source.sample_rate(),
            length = ?source.len(),
            "source installed"
        );
        self.source = Some(source);

        let mut changes = ChangeSet {
            source: true,
            ..ChangeSet::default()
        };
        self.reset_statistics_with(&mut changes);
        self.publish(changes);
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// The installed streaming buffer, for transports to append into.
    pub fn stream_mut(&mut self) -> Option<&mut StreamBuffer> {
        self.source.as_mut()?.as_stream_mut()
    }

    pub fn channel_count(&self) -> usize {
        self.source.as_ref().map_or(0, |s| s.channel_count())
    }

    pub fn sample_rate(&self) -> u32 {
        self.source.as_ref().map_or(0, |s| s.sample_rate())
    }

    pub fn bits(&self) -> u16 {
        self.source.as_ref().map_or(0, |s| s.bits())
    }

    pub fn source_len(&self) -> Option<usize> {
        self.source.as_ref().and_then(|s| s.len())
    }

    pub fn duration(&self) -> f64 {
        self.source.as_ref().map_or(0.0, |s| s.duration())
    }

    pub fn in_range(&self, index: usize) -> bool {
        self.source.as_ref().is_some_and(|s| s.in_range(index))
    }

    /// Forward history disposal to a streaming source; no-op otherwise.
    pub fn waste(&mut self, upto: Option<usize>) {
        if let Some(source) = self.source.as_mut() {
            source.waste(upto);
        }
    }

    // configuration --------------------------------------------------------

    /// Change the block size, rebuilding the transform and resetting
    /// statistics. Returns whether anything changed.
    pub fn set_block_size(&mut self, block_size: usize) -> Result<bool, ConfigError> {
        if block_size == self.config.block_size {
            return Ok(false);
        }
        let next = FftConfig {
            block_size,
            ..self.config
        };
        let step = next.step()?;
        self.fft = Fft::new(block_size, next.window)?;
        self.config = next;
        self.step = step;

        let half = block_size / 2;
        self.current = vec![0.0; half];
        self.max_accum = vec![0.0; half];
        self.avg_sum = vec![0.0; half];
        self.max_cache = vec![0.0; half];
        self.avg_cache = vec![0.0; half];

        let mut changes = ChangeSet {
            block_size: true,
            ..ChangeSet::default()
        };
        self.reset_statistics_with(&mut changes);
        self.publish(changes);
        Ok(true)
    }

    /// Swap the window function, resetting statistics. Returns whether
    /// anything changed.
    pub fn set_window(&mut self, window: WindowKind) -> bool {
        if !self.fft.set_window(window) {
            return false;
        }
        self.config.window = window;

        let mut changes = ChangeSet {
            window: true,
            ..ChangeSet::default()
        };
        self.reset_statistics_with(&mut changes);
        self.publish(changes);
        true
    }

    /// Change the overlap ratio. The cursor realigns to the new step; the
    /// statistics survive unless the reset policy says otherwise.
    pub fn set_overlap(&mut self, overlap: f32) -> Result<bool, ConfigError> {
        if overlap == self.config.overlap {
            return Ok(false);
        }
        let next = FftConfig {
            overlap,
            ..self.config
        };
        let step = next.step()?;
        self.config = next;
        self.step = step;
        self.cursor -= self.cursor % step;

        let mut changes = ChangeSet {
            overlap: true,
            ..ChangeSet::default()
        };
        if self.policy.on_overlap_change {
            self.reset_statistics_with(&mut changes);
        }
        self.publish(changes);
        Ok(true)
    }

    /// Apply one of [`OVERLAP_PRESETS`] by index, clamped to the table.
    pub fn set_overlap_preset(&mut self, index: usize) -> Result<bool, ConfigError> {
        let index = index.min(OVERLAP_PRESETS.len() - 1);
        self.set_overlap(OVERLAP_PRESETS[index])
    }

    /// Select the analyzed channel (`0` = merge). An out-of-range selection
    /// falls back to the merge channel; this is the one documented clamp.
    pub fn set_channel(&mut self, channel: usize) -> bool {
        let resolved = if channel > self.channel_count() {
            debug!(
                channel,
                available = self.channel_count(),
                "selected channel out of range, falling back to merge"
            );
            MERGE_CHANNEL
        } else {
            channel
        };
        if resolved == self.channel {
            return false;
        }
        self.channel = resolved;

        let mut changes = ChangeSet {
            channel: true,
            ..ChangeSet::default()
        };
        self.reset_statistics_with(&mut changes);
        self.publish(changes);
        true
    }

    /// Move the cursor back to the start of the timeline.
    pub fn rewind(&mut self) {
        self.cursor = 0;
        let mut changes = ChangeSet::default();
        if self.policy.on_rewind {
            self.reset_statistics_with(&mut changes);
        }
        self.publish(changes);
    }

    // analysis -------------------------------------------------------------

    /// One ad-hoc transform at an arbitrary offset, bypassing the cursor and
    /// the statistics. The returned view is valid until the next transform.
    pub fn transform_at(&mut self, offset: usize) -> Result<&[f32], EngineError> {
        let end = offset + self.config.block_size;
        let unavailable = EngineError::DataUnavailable { start: offset, end };
        let source = self.source.as_mut().ok_or(unavailable.clone())?;
        let view = source
            .read(offset, end, self.channel)
            .ok_or(unavailable)?;
        self.fft.transform(view, 0)
    }

    /// Replay transforms at the configured step from the cursor up to
    /// (exclusive) `target`, folding each into the running statistics.
    ///
    /// Never blocks: when the source cannot supply the whole required span
    /// this returns [`Advance::Pending`] with the cursor unmoved, and the
    /// caller polls again on the next tick.
    pub fn advance_to(&mut self, target: usize) -> Advance {
        if self.cursor >= target {
            return Advance::Complete { folds: 0 };
        }
        let Some(source) = self.source.as_mut() else {
            return Advance::Pending;
        };

        let block = self.config.block_size;
        let first = self.cursor;
        let folds = (target - first).div_ceil(self.step);
        let span_end = first + (folds - 1) * self.step + block;

        let Some(view) = source.read(first, span_end, self.channel) else {
            trace!(first, span_end, "advance pending, span not yet available");
            return Advance::Pending;
        };
        self.span_scratch.clear();
        self.span_scratch.extend_from_slice(view);

        for fold in 0..folds {
            let spectrum = self
                .fft
                .transform(&self.span_scratch, fold * self.step)
                .expect("span length was verified against the source");
            if self.fold_count == 0 {
                self.max_accum.copy_from_slice(spectrum);
                self.avg_sum.copy_from_slice(spectrum);
            } else {
                for (i, &value) in spectrum.iter().enumerate() {
                    self.avg_sum[i] += value;
                    if self.max_accum[i] < value {
                        self.max_accum[i] = value;
                    }
                }
            }
            self.current.copy_from_slice(spectrum);
            self.fold_count += 1;
            self.revision += 1;
            self.max_dirty = true;
            self.avg_dirty = true;
        }

        self.cursor = first + folds * self.step;
        Advance::Complete { folds }
    }

    /// Zero the running statistics and refresh the current spectrum with one
    /// catch-up transform at the cursor, so "current" is never stale. The
    /// cursor does not move and nothing is folded, which makes the operation
    /// idempotent.
    pub fn reset_statistics(&mut self) {
        let mut changes = ChangeSet::default();
        self.reset_statistics_with(&mut changes);
        self.publish(changes);
    }

    fn reset_statistics_with(&mut self, changes: &mut ChangeSet) {
        self.fold_count = 0;
        self.max_dirty = true;
        self.avg_dirty = true;
        self.revision += 1;
        changes.statistics = true;
        self.refresh_current();
    }

    fn refresh_current(&mut self) {
        let Some(source) = self.source.as_mut() else {
            return;
        };
        let end = self.cursor + self.config.block_size;
        if let Some(view) = source.read(self.cursor, end, self.channel) {
            let spectrum = self
                .fft
                .transform(view, 0)
                .expect("view length matches the block size");
            self.current.copy_from_slice(spectrum);
        }
    }

    // derived spectra ------------------------------------------------------

    /// Latest transform result.
    pub fn current(&self) -> &[f32] {
        &self.current
    }

    /// Monotonically increasing version of the accumulated state.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Folds accumulated since the last reset.
    pub fn fold_count(&self) -> u64 {
        self.fold_count
    }

    /// Elementwise running maximum since the last reset; zeros before the
    /// first fold.
    pub fn max_spectrum(&mut self) -> &[f32] {
        if self.max_dirty {
            if self.fold_count == 0 {
                self.max_cache.fill(0.0);
            } else {
                self.max_cache.copy_from_slice(&self.max_accum);
            }
            self.max_dirty = false;
        }
        &self.max_cache
    }

    /// Running arithmetic mean since the last reset; zeros before the first
    /// fold.
    pub fn avg_spectrum(&mut self) -> &[f32] {
        if self.avg_dirty {
            if self.fold_count == 0 {
                self.avg_cache.fill(0.0);
            } else {
                let inv = 1.0 / self.fold_count as f32;
                for (dst, &sum) in self.avg_cache.iter_mut().zip(&self.avg_sum) {
                    *dst = sum * inv;
                }
            }
            self.avg_dirty = false;
        }
        &self.avg_cache
    }

    // change notification --------------------------------------------------

    /// Register a listener invoked with the change-set after each effective
    /// mutation.
    pub fn subscribe(&mut self, listener: impl FnMut(&ChangeSet) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    fn publish(&mut self, changes: ChangeSet) {
        if !changes.any() {
            return;
        }
        for (_, listener) in &mut self.listeners {
            listener(&changes);
        }
    }
}

impl fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("config", &self.config)
            .field("channel", &self.channel)
            .field("cursor", &self.cursor)
            .field("fold_count", &self.fold_count)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::clip::AudioClip;
    use crate::source::stream::StreamBuffer;
    use crate::source::wire::{encode_data, Record, RecordReader};
    use crate::source::StreamFormat;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn sine_clip(freq_hz: f32, sample_rate: u32, len: usize) -> AudioClip {
        let samples = (0..len)
            .map(|n| (core::f32::consts::TAU * freq_hz * n as f32 / sample_rate as f32).sin())
            .collect();
        AudioClip::new(sample_rate, 16, vec![samples])
    }

    fn peak_bin(spectrum: &[f32]) -> usize {
        spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(idx, _)| idx)
            .unwrap()
    }

    fn rectangular(block_size: usize) -> FftConfig {
        FftConfig {
            block_size,
            window: WindowKind::Rectangular,
            overlap: 0.0,
        }
    }

    #[test]
    fn one_khz_sine_peaks_at_bin_21() {
        // 1 kHz at 48 kHz with block 1024: round(1000 * 1024 / 48000) = 21.
        let mut analyzer = SpectrumAnalyzer::new(rectangular(1024)).unwrap();
        analyzer.set_source(Box::new(sine_clip(1_000.0, 48_000, 48_000)));

        let advance = analyzer.advance_to(40_960);
        assert_eq!(advance, Advance::Complete { folds: 40 });
        assert_eq!(analyzer.cursor(), 40_960);

        assert_eq!(analyzer.current().len(), 512);
        assert_eq!(peak_bin(analyzer.current()), 21);
        assert_eq!(peak_bin(analyzer.max_spectrum()), 21);
        assert_eq!(peak_bin(analyzer.avg_spectrum()), 21);
    }

    #[test]
    fn statistics_match_fold_algebra() {
        // A tone plus drifting phase makes folds differ, exercising both
        // accumulators; recompute every fold independently for reference.
        let sample_rate = 16_000;
        let clip = {
            let samples: Vec<f32> = (0..8_192)
                .map(|n| {
                    let t = n as f32 / sample_rate as f32;
                    (core::f32::consts::TAU * 440.0 * t).sin() * 0.7
                        + (core::f32::consts::TAU * 3_000.0 * t * t).sin() * 0.3
                })
                .collect();
            AudioClip::new(sample_rate, 16, vec![samples.clone()])
        };

        let block = 512;
        let mut analyzer = SpectrumAnalyzer::new(rectangular(block)).unwrap();
        analyzer.set_source(Box::new(clip.clone()));

        let target = 4 * block;
        assert_eq!(analyzer.advance_to(target), Advance::Complete { folds: 4 });

        // Reference folds via a bare transform over the same offsets.
        let mut reference = Fft::new(block, WindowKind::Rectangular).unwrap();
        let mut clip = clip;
        let mut expected_max = vec![0.0f32; block / 2];
        let mut expected_sum = vec![0.0f32; block / 2];
        for fold in 0..4 {
            let offset = fold * block;
            let view = clip.read(offset, offset + block, MERGE_CHANNEL).unwrap();
            let spectrum = reference.transform(view, 0).unwrap();
            for (i, &value) in spectrum.iter().enumerate() {
                expected_sum[i] += value;
                if fold == 0 || expected_max[i] < value {
                    expected_max[i] = value;
                }
            }
        }

        let max = analyzer.max_spectrum().to_vec();
        for (i, (&actual, &expected)) in max.iter().zip(&expected_max).enumerate() {
            assert!((actual - expected).abs() < 1.0e-6, "max bin {i}");
        }
        let avg = analyzer.avg_spectrum();
        for (i, (&actual, &sum)) in avg.iter().zip(&expected_sum).enumerate() {
            assert!((actual - sum / 4.0).abs() < 1.0e-6, "avg bin {i}");
        }
    }

    #[test]
    fn max_dominates_every_fold_and_avg_stays_below_max() {
        let mut analyzer = SpectrumAnalyzer::new(rectangular(256)).unwrap();
        analyzer.set_source(Box::new(sine_clip(700.0, 8_000, 4_096)));
        analyzer.advance_to(2_048);

        let avg = analyzer.avg_spectrum().to_vec();
        let max = analyzer.max_spectrum();
        for (a, m) in avg.iter().zip(max) {
            assert!(a <= &(m + 1.0e-6));
        }
    }

    #[test]
    fn reset_statistics_is_idempotent() {
        let mut analyzer = SpectrumAnalyzer::new(rectangular(1024)).unwrap();
        analyzer.set_source(Box::new(sine_clip(2_500.0, 48_000, 48_000)));
        analyzer.advance_to(10_240);

        analyzer.reset_statistics();
        let once = analyzer.current().to_vec();
        let cursor = analyzer.cursor();
        analyzer.reset_statistics();

        assert_eq!(analyzer.current(), once.as_slice());
        assert_eq!(analyzer.cursor(), cursor);
        assert_eq!(analyzer.fold_count(), 0);
        assert!(analyzer.max_spectrum().iter().all(|v| *v == 0.0));
        assert!(analyzer.avg_spectrum().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn advance_through_stream_waits_for_data() {
        let format = StreamFormat {
            sample_rate: 16_000,
            channels: 1,
            bits: 16,
        };
        let tone: Vec<f32> = (0..2_048)
            .map(|n| (core::f32::consts::TAU * 1_000.0 * n as f32 / 16_000.0).sin())
            .collect();
        let pcm: Vec<u8> = tone
            .iter()
            .flat_map(|&v| (((v * 32_767.0) as i32) as i16).to_le_bytes())
            .collect();

        let mut analyzer = SpectrumAnalyzer::new(rectangular(1024)).unwrap();
        let mut buffer = StreamBuffer::new(format);
        buffer.append(format, &pcm[..800 * 2]).unwrap();
        analyzer.set_source(Box::new(buffer));

        // 800 samples cannot cover cursor 0 + block 1024.
        assert_eq!(analyzer.advance_to(1_024), Advance::Pending);
        assert_eq!(analyzer.cursor(), 0);

        let stream = analyzer.stream_mut().expect("streaming source installed");
        stream.append(format, &pcm[800 * 2..]).unwrap();
        assert_eq!(analyzer.advance_to(1_024), Advance::Complete { folds: 1 });
        assert_eq!(analyzer.cursor(), 1_024);
        // 1 kHz at 16 kHz with block 1024 peaks at bin 64.
        assert_eq!(peak_bin(analyzer.current()), 64);
    }

    #[test]
    fn streamed_records_reach_the_analyzer_end_to_end() {
        let format = StreamFormat {
            sample_rate: 16_000,
            channels: 1,
            bits: 16,
        };
        let pcm: Vec<u8> = (0..1_600)
            .map(|n| (core::f32::consts::TAU * 2_000.0 * n as f32 / 16_000.0).sin())
            .flat_map(|v| (((v * 32_767.0) as i32) as i16).to_le_bytes())
            .collect();

        // Two records, delivered through the framing layer in one burst.
        let mut bytes = encode_data(format, &pcm[..1_600]);
        bytes.extend_from_slice(&encode_data(format, &pcm[1_600..]));

        let mut analyzer = SpectrumAnalyzer::new(rectangular(1024)).unwrap();
        analyzer.set_source(Box::new(StreamBuffer::new(format)));

        let mut reader = RecordReader::new();
        reader.push(&bytes);
        while let Some(record) = reader.next_record() {
            match record {
                Record::Data { format, pcm } => {
                    analyzer
                        .stream_mut()
                        .expect("streaming source installed")
                        .append(format, pcm)
                        .unwrap();
                }
                Record::Info { .. } => {}
            }
        }

        assert!(analyzer.in_range(1_500));
        assert!(!analyzer.in_range(1_600));
        assert_eq!(analyzer.advance_to(512), Advance::Complete { folds: 1 });
        // 2 kHz at 16 kHz with block 1024 peaks at bin 128.
        assert_eq!(peak_bin(analyzer.current()), 128);

        analyzer.waste(Some(800));
        assert!(!analyzer.in_range(400));
        assert!(analyzer.in_range(900));
    }

    #[test]
    fn overlap_shrinks_the_step_and_realigns_the_cursor() {
        let mut analyzer = SpectrumAnalyzer::new(rectangular(1024)).unwrap();
        analyzer.set_source(Box::new(sine_clip(1_000.0, 48_000, 48_000)));
        assert_eq!(analyzer.step(), 1024);

        analyzer.advance_to(3 * 1024);
        let folds_before = analyzer.fold_count();

        assert!(analyzer.set_overlap(0.75).unwrap());
        assert_eq!(analyzer.step(), 256);
        assert_eq!(analyzer.cursor() % 256, 0);
        // Default policy keeps statistics across overlap changes.
        assert_eq!(analyzer.fold_count(), folds_before);

        assert_eq!(analyzer.set_overlap(0.75), Ok(false));

        // Preset indices map through the table and clamp at the top.
        assert!(analyzer.set_overlap_preset(4).unwrap());
        assert_eq!(analyzer.config().overlap, OVERLAP_PRESETS[4]);
        assert!(analyzer.set_overlap_preset(99).unwrap());
        assert_eq!(analyzer.config().overlap, OVERLAP_PRESETS[6]);
    }

    #[test]
    fn invalid_configurations_fail_fast() {
        assert!(matches!(
            SpectrumAnalyzer::new(FftConfig {
                block_size: 1000,
                ..FftConfig::default()
            }),
            Err(ConfigError::BlockSize(1000))
        ));
        assert!(matches!(
            SpectrumAnalyzer::new(FftConfig {
                overlap: 1.0,
                ..FftConfig::default()
            }),
            Err(ConfigError::Overlap(_))
        ));
        // Step truncates to zero: 16 * (1 - 0.97) < 1.
        assert!(matches!(
            SpectrumAnalyzer::new(FftConfig {
                block_size: 16,
                overlap: 0.97,
                ..FftConfig::default()
            }),
            Err(ConfigError::Step { .. })
        ));

        let mut analyzer = SpectrumAnalyzer::new(rectangular(1024)).unwrap();
        assert!(analyzer.set_overlap(-0.1).is_err());
        assert!(analyzer.set_block_size(999).is_err());
        // Failed mutations leave the configuration untouched.
        assert_eq!(analyzer.config(), rectangular(1024));
    }

    #[test]
    fn out_of_range_channel_falls_back_to_merge() {
        let stereo = AudioClip::new(
            8_000,
            16,
            vec![vec![0.5; 4_096], vec![-0.5; 4_096]],
        );
        let mut analyzer = SpectrumAnalyzer::new(rectangular(256)).unwrap();
        analyzer.set_source(Box::new(stereo));

        assert!(analyzer.set_channel(1));
        assert_eq!(analyzer.channel(), 1);

        // Channel 7 does not exist; the documented fallback is the merge.
        assert!(analyzer.set_channel(7));
        assert_eq!(analyzer.channel(), MERGE_CHANNEL);

        // Opposed channels cancel in the merge: the spectrum is silent.
        analyzer.advance_to(1_024);
        assert!(analyzer.current().iter().all(|v| *v < 1.0e-4));
    }

    #[test]
    fn mutations_publish_typed_change_sets() {
        let seen: Rc<RefCell<Vec<ChangeSet>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);

        let mut analyzer = SpectrumAnalyzer::new(rectangular(1024)).unwrap();
        let id = analyzer.subscribe(move |changes| sink.borrow_mut().push(*changes));

        analyzer.set_source(Box::new(sine_clip(1_000.0, 48_000, 8_192)));
        assert!(analyzer.set_block_size(2_048).unwrap());
        assert!(analyzer.set_window(WindowKind::Blackman));
        assert!(!analyzer.set_window(WindowKind::Blackman));

        let events = seen.borrow().clone();
        assert_eq!(events.len(), 3);
        assert!(events[0].source && events[0].statistics);
        assert!(events[1].block_size && events[1].statistics);
        assert!(events[2].window && !events[2].block_size);

        assert!(analyzer.unsubscribe(id));
        assert!(!analyzer.unsubscribe(id));
        analyzer.reset_statistics();
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn revision_tracks_folds_and_resets() {
        let mut analyzer = SpectrumAnalyzer::new(rectangular(512)).unwrap();
        analyzer.set_source(Box::new(sine_clip(500.0, 16_000, 8_192)));
        let installed = analyzer.revision();

        analyzer.advance_to(2 * 512);
        assert_eq!(analyzer.revision(), installed + 2);

        analyzer.reset_statistics();
        assert_eq!(analyzer.revision(), installed + 3);
    }

    #[test]
    fn transform_at_bypasses_cursor_and_statistics() {
        let mut analyzer = SpectrumAnalyzer::new(rectangular(1024)).unwrap();
        analyzer.set_source(Box::new(sine_clip(1_000.0, 48_000, 8_192)));

        let spectrum = analyzer.transform_at(4_096).unwrap().to_vec();
        assert_eq!(peak_bin(&spectrum), 21);
        assert_eq!(analyzer.cursor(), 0);
        assert_eq!(analyzer.fold_count(), 0);

        assert!(matches!(
            analyzer.transform_at(8_000),
            Err(EngineError::DataUnavailable { .. })
        ));
    }
}
