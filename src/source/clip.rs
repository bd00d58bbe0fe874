//! Fixed-length PCM clip decoded into per-channel normalized samples.

use super::{SampleSource, MERGE_CHANNEL};

/// A fully decoded piece of audio with a lazily computed merge channel.
///
/// The merge channel is the arithmetic mean of all channels; it is computed
/// once on first use and cached on the clip, so repeated channel switches in
/// the analyzer stay cheap.
#[derive(Debug, Clone)]
pub struct AudioClip {
    sample_rate: u32,
    bits: u16,
    channels: Vec<Vec<f32>>,
    merge: Option<Vec<f32>>,
}

impl AudioClip {
    /// Build a clip from per-channel sample data. All channels must share one
    /// length and there must be at least one.
    pub fn new(sample_rate: u32, bits: u16, channels: Vec<Vec<f32>>) -> Self {
        assert!(!channels.is_empty(), "clip needs at least one channel");
        debug_assert!(channels.iter().all(|c| c.len() == channels[0].len()));
        Self {
            sample_rate,
            bits,
            channels,
            merge: None,
        }
    }

    fn len_samples(&self) -> usize {
        self.channels[0].len()
    }

    fn ensure_merge(&mut self) {
        if self.merge.is_some() || self.channels.len() < 2 {
            return;
        }

        let mut merge = self.channels[0].clone();
        for channel in &self.channels[1..] {
            for (acc, &sample) in merge.iter_mut().zip(channel) {
                *acc += sample;
            }
        }
        let inv = 1.0 / self.channels.len() as f32;
        for value in &mut merge {
            *value *= inv;
        }
        self.merge = Some(merge);
    }

    /// Full data of one channel; `0` (or anything out of range) resolves to
    /// the merge channel, which for mono is the single channel itself.
    fn channel_data(&mut self, channel: usize) -> &[f32] {
        if channel != MERGE_CHANNEL && channel <= self.channels.len() {
            return &self.channels[channel - 1];
        }
        if self.channels.len() < 2 {
            return &self.channels[0];
        }
        self.ensure_merge();
        self.merge.as_deref().expect("merge computed above")
    }
}

impl SampleSource for AudioClip {
    fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn bits(&self) -> u16 {
        self.bits
    }

    fn len(&self) -> Option<usize> {
        Some(self.len_samples())
    }

    fn read(&mut self, start: usize, end: usize, channel: usize) -> Option<&[f32]> {
        if end < start || end > self.len_samples() {
            return None;
        }
        Some(&self.channel_data(channel)[start..end])
    }

    fn in_range(&self, index: usize) -> bool {
        index < self.len_samples()
    }

    fn prepare_merge(&mut self) {
        self.ensure_merge();
    }
}
