//! Chunk-chain sample buffer for asynchronously delivered PCM.
//!
//! Chunks arrive in arbitrary sizes (typically straight off a socket) and are
//! decoded into a logically continuous timeline addressed by sample index.
//! Consumed history is disposed of explicitly via [`StreamBuffer::dispose`];
//! retired chunk storage is recycled through a free list so steady-state
//! streaming settles into zero allocation.

use super::{normalize_sample, SampleSource, StreamFormat, MERGE_CHANNEL};
use crate::error::EngineError;
use std::collections::VecDeque;
use tracing::{debug, trace};

/// One decoded chunk covering `[start, end)` of the timeline.
#[derive(Debug, Default)]
struct Chunk {
    start: usize,
    end: usize,
    channels: Vec<Vec<f32>>,
    /// Mean of all channels, present only when multichannel.
    merge: Option<Vec<f32>>,
}

impl Chunk {
    fn channel_data(&self, channel: usize) -> &[f32] {
        if channel != MERGE_CHANNEL && channel <= self.channels.len() {
            return &self.channels[channel - 1];
        }
        match &self.merge {
            Some(merge) => merge,
            None => &self.channels[0],
        }
    }
}

/// Assembles PCM chunks into a range-queryable timeline bounded by explicit
/// disposal.
///
/// Invariant: chunk ranges are contiguous, non-overlapping, and increasing;
/// `low_water <= served range < high_water` at all times.
#[derive(Debug)]
pub struct StreamBuffer {
    format: Option<StreamFormat>,
    chunks: VecDeque<Chunk>,
    free: Vec<Chunk>,
    low: usize,
    high: usize,
    scratch: Vec<f32>,
}

impl StreamBuffer {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            format: Some(format),
            chunks: VecDeque::new(),
            free: Vec::new(),
            low: 0,
            high: 0,
            scratch: Vec::new(),
        }
    }

    /// Expected chunk format; `None` after [`StreamBuffer::waste`]`(None)`
    /// until the next append adopts one.
    pub fn format(&self) -> Option<StreamFormat> {
        self.format
    }

    /// Oldest retained sample index.
    pub fn low_water(&self) -> usize {
        self.low
    }

    /// One past the newest appended sample index.
    pub fn high_water(&self) -> usize {
        self.high
    }

    /// Decode and append one chunk of interleaved PCM.
    ///
    /// A `format` differing from the configured one fails with the offending
    /// tuple and leaves the buffer untouched; the caller decides whether to
    /// reconfigure. A payload not aligned to whole frames is a format error.
    pub fn append(&mut self, format: StreamFormat, pcm: &[u8]) -> Result<(), EngineError> {
        if let Some(expected) = self.format {
            if format != expected {
                debug!(?format, ?expected, "stream chunk format mismatch");
                return Err(EngineError::FormatMismatch { declared: format });
            }
        }
        if !format.is_supported() {
            return Err(EngineError::Format(format!(
                "unsupported stream format {format:?}"
            )));
        }
        self.format = Some(format);

        let frame = format.frame_bytes();
        if pcm.len() % frame != 0 {
            return Err(EngineError::Format(format!(
                "chunk payload of {} bytes is not aligned to {frame}-byte frames",
                pcm.len()
            )));
        }
        let frames = pcm.len() / frame;
        if frames == 0 {
            return Ok(());
        }

        let channel_count = format.channels as usize;
        let bytes_per = format.bits as usize / 8;

        let mut chunk = self.free.pop().unwrap_or_default();
        chunk.channels.resize_with(channel_count, Vec::new);
        for channel in &mut chunk.channels {
            channel.clear();
            channel.reserve(frames);
        }

        let mut pos = 0;
        for _ in 0..frames {
            for channel in &mut chunk.channels {
                channel.push(normalize_sample(pcm, pos, format.bits));
                pos += bytes_per;
            }
        }

        if channel_count > 1 {
            let merge = chunk.merge.get_or_insert_with(Vec::new);
            merge.clear();
            merge.reserve(frames);
            let inv = 1.0 / channel_count as f32;
            for i in 0..frames {
                let sum: f32 = chunk.channels.iter().map(|c| c[i]).sum();
                merge.push(sum * inv);
            }
        } else {
            chunk.merge = None;
        }

        chunk.start = self.high;
        self.high += frames;
        chunk.end = self.high;
        trace!(start = chunk.start, end = chunk.end, "stream chunk appended");
        self.chunks.push_back(chunk);
        Ok(())
    }

    /// Recycle chunks lying entirely before `upto` and advance the low-water
    /// mark. `None` clears everything and resets the format expectation so
    /// the next append adopts a fresh one.
    pub fn dispose(&mut self, upto: Option<usize>) {
        match upto {
            None => {
                debug!("stream buffer cleared");
                self.free.extend(self.chunks.drain(..));
                self.low = 0;
                self.high = 0;
                self.format = None;
            }
            Some(upto) => {
                let mut recycled = 0usize;
                while self.chunks.front().is_some_and(|chunk| chunk.end <= upto) {
                    let chunk = self.chunks.pop_front().expect("front checked above");
                    self.free.push(chunk);
                    recycled += 1;
                }
                if recycled > 0 {
                    self.low = self.chunks.front().map_or(self.high, |chunk| chunk.start);
                    trace!(recycled, low = self.low, "stream history disposed");
                }
            }
        }
    }

    /// Contiguous view of `[start, end)` for `channel`, assembled across
    /// chunk boundaries. Fails when the range is not fully covered.
    pub fn read(&mut self, start: usize, end: usize, channel: usize) -> Option<&[f32]> {
        if end < start || start < self.low || end > self.high {
            return None;
        }
        let len = end - start;
        self.scratch.clear();
        self.scratch.reserve(len);

        let mut cursor = start;
        for chunk in &self.chunks {
            if chunk.end <= cursor {
                continue;
            }
            if self.scratch.len() == len {
                break;
            }
            let data = chunk.channel_data(channel);
            let begin = cursor - chunk.start;
            let take = (chunk.end - cursor).min(len - self.scratch.len());
            self.scratch.extend_from_slice(&data[begin..begin + take]);
            cursor += take;
        }

        debug_assert_eq!(self.scratch.len(), len, "chunk chain must be contiguous");
        Some(&self.scratch)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.low <= index && index < self.high
    }
}

impl SampleSource for StreamBuffer {
    fn channel_count(&self) -> usize {
        self.format.map_or(0, |f| f.channels as usize)
    }

    fn sample_rate(&self) -> u32 {
        self.format.map_or(0, |f| f.sample_rate)
    }

    fn bits(&self) -> u16 {
        self.format.map_or(0, |f| u16::from(f.bits))
    }

    fn len(&self) -> Option<usize> {
        None
    }

    fn read(&mut self, start: usize, end: usize, channel: usize) -> Option<&[f32]> {
        StreamBuffer::read(self, start, end, channel)
    }

    fn in_range(&self, index: usize) -> bool {
        self.contains(index)
    }

    fn waste(&mut self, upto: Option<usize>) {
        self.dispose(upto);
    }

    fn as_stream_mut(&mut self) -> Option<&mut StreamBuffer> {
        Some(self)
    }
}
