use crate::equilibrium::EquilibriumSolution;
use crate::error::{ComplexResultError, MissingParameterError, SweepError};
use crate::expr::Expr;
use crate::model::ParameterAssignment;
use log::debug;
use serde::{Deserialize, Serialize};

/// Imaginary parts below this (relative to the real part) are round-off.
const REAL_TOLERANCE: f64 = 1e-12;

/// Closed interval `[lo, hi]` sampled at `count` evenly spaced points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepRange {
    pub lo: f64,
    pub hi: f64,
    pub count: usize,
}

impl SweepRange {
    pub fn new(lo: f64, hi: f64, count: usize) -> Self {
        Self { lo, hi, count }
    }

    pub fn validate(&self) -> Result<(), SweepError> {
        if !self.lo.is_finite() || !self.hi.is_finite() {
            return Err(SweepError::InvalidRange(format!(
                "bounds must be finite (got {} to {})",
                self.lo, self.hi
            )));
        }
        if self.lo >= self.hi {
            return Err(SweepError::InvalidRange(format!(
                "lower bound {} must be below upper bound {}",
                self.lo, self.hi
            )));
        }
        if self.count < 2 {
            return Err(SweepError::InvalidRange(format!(
                "need at least 2 samples (got {})",
                self.count
            )));
        }
        Ok(())
    }

    /// Sample `i`; the endpoints are exact.
    pub fn value_at(&self, i: usize) -> f64 {
        let last = self.count.saturating_sub(1);
        if i == 0 {
            self.lo
        } else if i >= last {
            self.hi
        } else {
            self.lo + (self.hi - self.lo) * i as f64 / last as f64
        }
    }

    pub fn values(&self) -> Vec<f64> {
        (0..self.count).map(|i| self.value_at(i)).collect()
    }
}

/// Evaluates `expression` along `range` for the `varying` parameter.
///
/// Every other symbol must be in `fixed`. The sweep stops at the first sample whose
/// value is non-finite or has a non-negligible imaginary part.
pub fn sweep(
    expression: &Expr,
    varying: &str,
    range: SweepRange,
    fixed: &ParameterAssignment,
) -> Result<Vec<(f64, f64)>, SweepError> {
    range.validate()?;

    let missing: Vec<String> = expression
        .free_symbols()
        .into_iter()
        .filter(|name| name != varying && !fixed.contains_key(name))
        .collect();
    if !missing.is_empty() {
        return Err(MissingParameterError { missing }.into());
    }

    let mut values = fixed.clone();
    let mut points = Vec::with_capacity(range.count);
    for index in 0..range.count {
        let x = range.value_at(index);
        values.insert(varying.to_string(), x);
        let value = expression.eval_unchecked(&values);
        let real = value.is_finite() && value.im.abs() <= REAL_TOLERANCE * value.re.abs().max(1.0);
        if !real {
            return Err(ComplexResultError {
                index,
                parameter: varying.to_string(),
                value_of_parameter: x,
                value,
            }
            .into());
        }
        points.push((x, value.re));
    }
    Ok(points)
}

/// One curve of a bifurcation diagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchCurve {
    /// Index into the branch list the diagram was built from.
    pub branch: usize,
    pub variable: String,
    pub points: Vec<(f64, f64)>,
}

/// Sweeps every variable of every branch; fails on the first curve that fails.
pub fn bifurcation_diagram(
    branches: &[EquilibriumSolution],
    varying: &str,
    range: SweepRange,
    fixed: &ParameterAssignment,
) -> Result<Vec<BranchCurve>, SweepError> {
    range.validate()?;
    let mut curves = Vec::new();
    for (index, branch) in branches.iter().enumerate() {
        for (variable, expression) in &branch.assignments {
            let points = sweep(expression, varying, range, fixed)?;
            curves.push(BranchCurve {
                branch: index,
                variable: variable.clone(),
                points,
            });
        }
    }
    debug!(
        "bifurcation diagram over {varying}: {} curve(s) of {} samples",
        curves.len(),
        range.count
    );
    Ok(curves)
}
