//! Radix-2 transform core with precomputed window, bit-reversal, and twiddle
//! tables.
//!
//! The forward transform is an in-place decimation-in-time butterfly over
//! complex storage. Twiddle factors inside a stage are produced by repeated
//! complex multiplication of a running phasor against the stage's precomputed
//! base rotation, so the hot loop never calls into trigonometry.

use crate::error::{ConfigError, EngineError};
use crate::util::{db_to_magnitude, LN_TO_DB20};
use num_complex::Complex32;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock, RwLock};

/// Smallest accepted block size. Block sizes must be powers of two above 8.
pub const MIN_BLOCK_SIZE: usize = 16;

/// Window selection controlling spectral leakage characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Rectangular,
    Hann,
    Hamming,
    Blackman,
    Bartlett,
    Sine,
}

/// Every predefined window, in menu order.
pub const ALL_WINDOWS: [WindowKind; 6] = [
    WindowKind::Rectangular,
    WindowKind::Hann,
    WindowKind::Hamming,
    WindowKind::Blackman,
    WindowKind::Bartlett,
    WindowKind::Sine,
];

impl WindowKind {
    /// Coefficient at normalized position `x = i / (len - 1)`.
    fn value(self, x: f32) -> f32 {
        use core::f32::consts::{PI, TAU};
        match self {
            WindowKind::Rectangular => 1.0,
            WindowKind::Hann => 0.5 - 0.5 * (TAU * x).cos(),
            WindowKind::Hamming => 0.54 - 0.46 * (TAU * x).cos(),
            WindowKind::Blackman => 0.42 - 0.5 * (TAU * x).cos() + 0.08 * (2.0 * TAU * x).cos(),
            WindowKind::Bartlett => 1.0 - (2.0 * x - 1.0).abs(),
            WindowKind::Sine => (PI * x).sin(),
        }
    }

    pub(crate) fn coefficients(self, len: usize) -> Vec<f32> {
        if len < 2 {
            return vec![1.0; len];
        }
        let inv = 1.0 / (len - 1) as f32;
        (0..len).map(|i| self.value(i as f32 * inv)).collect()
    }
}

/// Process-wide cache of window coefficient tables, shared between engines
/// that agree on kind and length.
struct WindowCache {
    entries: RwLock<FxHashMap<(WindowKind, usize), Arc<[f32]>>>,
}

impl WindowCache {
    fn global() -> &'static WindowCache {
        static INSTANCE: OnceLock<WindowCache> = OnceLock::new();
        INSTANCE.get_or_init(|| WindowCache {
            entries: RwLock::new(FxHashMap::default()),
        })
    }

    fn get(&self, kind: WindowKind, len: usize) -> Arc<[f32]> {
        let key = (kind, len);
        if let Some(existing) = self.entries.read().unwrap().get(&key) {
            return Arc::clone(existing);
        }

        let mut write = self.entries.write().unwrap();
        Arc::clone(
            write
                .entry(key)
                .or_insert_with(|| Arc::from(kind.coefficients(len))),
        )
    }
}

/// Forward FFT engine for a fixed block size.
///
/// The magnitude buffer returned by [`Fft::transform`] is owned by the engine
/// and reused in place; it is valid only until the next transform call, which
/// the returned borrow enforces.
pub struct Fft {
    block_size: usize,
    half_size: usize,
    window_kind: WindowKind,
    window: Arc<[f32]>,
    reversal: Vec<u32>,
    /// Base rotation `exp(-2πi / m)` for each butterfly stage `m = 2, 4, …`.
    stage_phasors: Vec<Complex32>,
    work: Vec<Complex32>,
    result: Vec<f32>,
}

impl Fft {
    pub fn new(block_size: usize, window: WindowKind) -> Result<Self, ConfigError> {
        if !block_size.is_power_of_two() || block_size < MIN_BLOCK_SIZE {
            return Err(ConfigError::BlockSize(block_size));
        }
        let half_size = block_size / 2;

        // Bit-reversal permutation, built by doubling.
        let mut reversal = vec![0u32; block_size];
        let mut up = 1usize;
        let mut down = block_size as u32;
        while up < block_size {
            down >>= 1;
            for i in 0..up {
                reversal[up + i] = reversal[i] + down;
            }
            up <<= 1;
        }

        let stages = block_size.trailing_zeros() as usize;
        let stage_phasors = (0..stages)
            .map(|stage| {
                let m = 2u64 << stage;
                let angle = -core::f64::consts::TAU / m as f64;
                Complex32::new(angle.cos() as f32, angle.sin() as f32)
            })
            .collect();

        Ok(Self {
            block_size,
            half_size,
            window_kind: window,
            window: WindowCache::global().get(window, block_size),
            reversal,
            stage_phasors,
            work: vec![Complex32::new(0.0, 0.0); block_size],
            result: vec![0.0; half_size],
        })
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn half_size(&self) -> usize {
        self.half_size
    }

    pub fn window_kind(&self) -> WindowKind {
        self.window_kind
    }

    /// Swap the window coefficient table. Returns whether it changed.
    pub fn set_window(&mut self, window: WindowKind) -> bool {
        if window == self.window_kind {
            return false;
        }
        self.window_kind = window;
        self.window = WindowCache::global().get(window, self.block_size);
        true
    }

    /// Magnitudes from the previous transform call.
    pub fn result(&self) -> &[f32] {
        &self.result
    }

    /// Forward transform of `block_size` samples starting at `offset`.
    ///
    /// Returns the `block_size / 2` positive-frequency magnitudes, normalized
    /// by `block_size / 2`. Insufficient input fails, it never reads out of
    /// bounds.
    pub fn transform(&mut self, samples: &[f32], offset: usize) -> Result<&[f32], EngineError> {
        let end = offset + self.block_size;
        if samples.len() < end {
            return Err(EngineError::DataUnavailable { start: offset, end });
        }

        // Window and load in bit-reversed order.
        for i in 0..self.block_size {
            let slot = self.reversal[i] as usize;
            self.work[slot] = Complex32::new(samples[offset + i] * self.window[i], 0.0);
        }

        // In-place butterflies, one stage per power of two.
        for (stage, &base) in self.stage_phasors.iter().enumerate() {
            let half_m = 1usize << stage;
            let m = half_m << 1;
            let mut twiddle = Complex32::new(1.0, 0.0);
            for k in 0..half_m {
                let mut j = k;
                while j < self.block_size {
                    let t = twiddle * self.work[j + half_m];
                    let u = self.work[j];
                    self.work[j] = u + t;
                    self.work[j + half_m] = u - t;
                    j += m;
                }
                twiddle *= base;
            }
        }

        let inv_half = 1.0 / self.half_size as f32;
        for i in 0..self.half_size {
            self.result[i] = self.work[i].norm() * inv_half;
        }
        Ok(&self.result)
    }

    /// Like [`Fft::transform`] but converts magnitudes to decibels, clamping
    /// to `floor_db` first so the output is always finite.
    pub fn transform_db(
        &mut self,
        samples: &[f32],
        offset: usize,
        floor_db: f32,
    ) -> Result<&[f32], EngineError> {
        self.transform(samples, offset)?;
        let floor = db_to_magnitude(floor_db);
        for value in &mut self.result {
            *value = value.max(floor).ln() * LN_TO_DB20;
        }
        Ok(&self.result)
    }
}

impl std::fmt::Debug for Fft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fft")
            .field("block_size", &self.block_size)
            .field("window", &self.window_kind)
            .finish()
    }
}
