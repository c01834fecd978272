use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Larger sweeps are almost certainly a typo in the step.
pub const MAX_SETPOINTS: usize = 1_000_000;

/// Setpoints `start, start + step, ...` up to but excluding `stop`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl Sweep {
    pub fn new(start: f64, stop: f64, step: f64) -> Self {
        Sweep { start, stop, step }
    }

    pub fn setpoints(&self) -> Result<Vec<f64>> {
        let Sweep { start, stop, step } = *self;
        if !(start.is_finite() && stop.is_finite() && step.is_finite()) {
            return Err(Error::InvalidSweep(format!(
                "bounds must be finite: {start}..{stop} by {step}"
            )));
        }
        if step <= 0.0 {
            return Err(Error::InvalidSweep(format!("step must be positive, got {step}")));
        }
        if stop <= start {
            return Ok(Vec::new());
        }

        // Accumulated rounding must not let the stop bound slip in
        let tolerance = step * 1e-9;
        let span = ((stop - start) / step).ceil();
        if span > MAX_SETPOINTS as f64 {
            return Err(Error::InvalidSweep(format!(
                "{start}..{stop} by {step} gives {span:e} setpoints, limit is {MAX_SETPOINTS}"
            )));
        }
        let count = span as usize;
        Ok((0..count)
            .map(|k| start + k as f64 * step)
            .take_while(|v| *v < stop - tolerance)
            .collect())
    }
}
