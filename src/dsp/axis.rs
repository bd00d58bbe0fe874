//! Frequency-axis interpolation tables.
//!
//! A spectrum has `block/2` linearly spaced bins; a display has some number
//! of columns over a visible span under a linear or logarithmic scale. Each
//! column maps to a bin interval with fractional coverage at the boundary
//! bins. The table depends on several interacting inputs and is rebuilt only
//! when one of them changes.

use crate::dsp::fft::MIN_BLOCK_SIZE;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Minimum-frequency floor (Hz) anchoring the logarithmic scale away from
/// zero, matching the finest step of the frequency grid.
const LOG_FLOOR_HZ: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisScale {
    Linear,
    Logarithmic,
}

/// Everything the table depends on; any change invalidates the cache.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisParams {
    pub scale: AxisScale,
    pub min_hz: f32,
    pub max_hz: f32,
    pub columns: usize,
    pub sample_rate: u32,
    pub block_size: usize,
    /// Weighted multi-bin averaging when set; nearest-bin sampling otherwise.
    pub interpolate: bool,
}

/// Bin coverage of one display column.
///
/// The column value is `start_weight · spectrum[start_bin] + spectrum[start_bin
/// + 1..end_bin] + end_weight · spectrum[end_bin]`, scaled by `norm`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisColumn {
    pub start_bin: usize,
    pub end_bin: usize,
    pub start_weight: f32,
    pub end_weight: f32,
    pub norm: f32,
}

/// Caches one bin-range table per parameter set.
#[derive(Debug, Default)]
pub struct AxisMapper {
    params: Option<AxisParams>,
    table: Vec<AxisColumn>,
}

impl AxisMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bin-range table for `params`, rebuilt only when they differ from the
    /// cached set.
    pub fn table(&mut self, params: AxisParams) -> Result<&[AxisColumn], ConfigError> {
        if self.params != Some(params) {
            self.table = build_table(&params)?;
            self.params = Some(params);
            trace!(?params, "axis table rebuilt");
        }
        Ok(&self.table)
    }

    /// Map `spectrum` onto `params.columns` values appended to `out`.
    pub fn project_into(
        &mut self,
        params: AxisParams,
        spectrum: &[f32],
        out: &mut Vec<f32>,
    ) -> Result<(), ConfigError> {
        self.table(params)?;
        out.clear();
        out.reserve(self.table.len());
        for column in &self.table {
            let bin = |i: usize| spectrum.get(i).copied().unwrap_or(0.0);
            let mut value = column.start_weight * bin(column.start_bin);
            if column.end_bin > column.start_bin {
                value += column.end_weight * bin(column.end_bin);
                for i in column.start_bin + 1..column.end_bin {
                    value += bin(i);
                }
            }
            out.push(value * column.norm);
        }
        Ok(())
    }
}

/// Frequency (Hz) of column edge `x` out of `columns`. Edge 0 is the span
/// minimum and edge `columns` the span maximum; logarithmic edges follow a
/// geometric progression anchored at the minimum-frequency floor.
fn edge_hz(params: &AxisParams, x: usize) -> f64 {
    let min = f64::from(params.min_hz);
    let span = f64::from(params.max_hz) - min;
    let t = x as f64 / params.columns as f64;
    match params.scale {
        AxisScale::Linear => min + span * t,
        AxisScale::Logarithmic => {
            let ratio = ((span + LOG_FLOOR_HZ) / LOG_FLOOR_HZ).powf(t);
            min - LOG_FLOOR_HZ + LOG_FLOOR_HZ * ratio
        }
    }
}

fn build_table(params: &AxisParams) -> Result<Vec<AxisColumn>, ConfigError> {
    if params.columns < 2 {
        return Err(ConfigError::Columns(params.columns));
    }
    if params.sample_rate == 0 {
        return Err(ConfigError::SampleRate);
    }
    if !params.block_size.is_power_of_two() || params.block_size < MIN_BLOCK_SIZE {
        return Err(ConfigError::BlockSize(params.block_size));
    }
    let span_valid = params.min_hz.is_finite()
        && params.max_hz.is_finite()
        && params.min_hz >= 0.0
        && params.max_hz > params.min_hz;
    if !span_valid {
        return Err(ConfigError::Span {
            min_hz: params.min_hz,
            max_hz: params.max_hz,
        });
    }

    let half = params.block_size / 2;
    let max_bin = (half - 1) as f64;
    let bins_per_hz = params.block_size as f64 / f64::from(params.sample_rate);

    let mut table = Vec::with_capacity(params.columns);
    let mut f1 = (edge_hz(params, 0) * bins_per_hz).clamp(0.0, max_bin);
    for x in 0..params.columns {
        let f0 = f1;
        f1 = (edge_hz(params, x + 1) * bins_per_hz).clamp(0.0, max_bin);

        let column = if params.interpolate {
            let start_bin = f0.floor() as usize;
            let end_bin = (f1.ceil() as usize).max(start_bin);
            AxisColumn {
                start_bin,
                end_bin,
                start_weight: (1.0 - (f0 - start_bin as f64)) as f32,
                end_weight: (1.0 - (end_bin as f64 - f1)) as f32,
                norm: (1.0 / (f1 - f0 + 1.0)) as f32,
            }
        } else {
            let center = (((f0 + f1) * 0.5 + 0.5) as usize).min(half - 1);
            AxisColumn {
                start_bin: center,
                end_bin: center,
                start_weight: 1.0,
                end_weight: 0.0,
                norm: 1.0,
            }
        };
        table.push(column);
    }
    Ok(table)
}
