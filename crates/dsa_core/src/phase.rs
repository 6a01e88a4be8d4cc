//! Phase-plane sampling of a vector field over two state axes.

use crate::traits::DynamicalSystem;
use anyhow::{bail, Result};
use log::debug;
use serde::{Deserialize, Serialize};

/// One sampled axis of the phase plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseAxis {
    pub var_index: usize,
    pub min: f64,
    pub max: f64,
    pub samples: usize,
}

impl PhaseAxis {
    pub fn new(var_index: usize, min: f64, max: f64, samples: usize) -> Self {
        Self {
            var_index,
            min,
            max,
            samples,
        }
    }

    fn value_at(&self, i: usize) -> f64 {
        let last = self.samples - 1;
        if i == last {
            self.max
        } else {
            self.min + (self.max - self.min) * i as f64 / last as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseGrid {
    pub x: PhaseAxis,
    pub y: PhaseAxis,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldSample {
    pub x: f64,
    pub y: f64,
    pub u: f64,
    pub v: f64,
}

impl FieldSample {
    pub fn magnitude(&self) -> f64 {
        self.u.hypot(self.v)
    }
}

/// Samples in row-major order: `y` selects the row, `x` the column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorField {
    pub samples_x: usize,
    pub samples_y: usize,
    pub points: Vec<FieldSample>,
    /// Nodes whose derivative was not finite; their `u`/`v` are NaN.
    pub non_finite: usize,
}

impl VectorField {
    pub fn at(&self, column: usize, row: usize) -> Option<&FieldSample> {
        if column >= self.samples_x {
            return None;
        }
        self.points.get(row * self.samples_x + column)
    }

    /// Largest finite arrow length, useful for scaling a quiver plot.
    pub fn max_magnitude(&self) -> f64 {
        self.points
            .iter()
            .map(FieldSample::magnitude)
            .filter(|m| m.is_finite())
            .fold(0.0, f64::max)
    }
}

/// Evaluates `system` at every node of `grid`, holding the other coordinates at
/// `frozen_state`.
pub fn vector_field(
    system: &impl DynamicalSystem<f64>,
    grid: &PhaseGrid,
    frozen_state: &[f64],
) -> Result<VectorField> {
    let dim = system.dimension();
    if dim < 2 {
        bail!("Phase plane needs a system of dimension at least 2 (got {}).", dim);
    }
    if frozen_state.len() != dim {
        bail!(
            "Frozen state length ({}) does not match system dimension ({}).",
            frozen_state.len(),
            dim
        );
    }
    if frozen_state.iter().any(|v| !v.is_finite()) {
        bail!("Frozen state must be finite.");
    }
    for axis in [&grid.x, &grid.y] {
        if axis.var_index >= dim {
            bail!("Axis variable index {} out of range.", axis.var_index);
        }
        if !axis.min.is_finite() || !axis.max.is_finite() || axis.max <= axis.min {
            bail!("Each axis range must be finite with max > min.");
        }
        if axis.samples < 2 {
            bail!("Each axis needs at least 2 samples.");
        }
    }
    if grid.x.var_index == grid.y.var_index {
        bail!("Axis variable indices must be unique.");
    }

    let mut state = frozen_state.to_vec();
    let mut out = vec![0.0; dim];
    let mut points = Vec::with_capacity(grid.x.samples * grid.y.samples);
    let mut non_finite = 0;
    for row in 0..grid.y.samples {
        let y = grid.y.value_at(row);
        for column in 0..grid.x.samples {
            let x = grid.x.value_at(column);
            state[grid.x.var_index] = x;
            state[grid.y.var_index] = y;
            system.apply(0.0, &state, &mut out);
            let (mut u, mut v) = (out[grid.x.var_index], out[grid.y.var_index]);
            if !u.is_finite() || !v.is_finite() {
                non_finite += 1;
                u = f64::NAN;
                v = f64::NAN;
            }
            points.push(FieldSample { x, y, u, v });
        }
    }

    debug!(
        "vector field on {}x{} grid, {} non-finite node(s)",
        grid.x.samples, grid.y.samples, non_finite
    );
    Ok(VectorField {
        samples_x: grid.x.samples,
        samples_y: grid.y.samples,
        points,
        non_finite,
    })
}
