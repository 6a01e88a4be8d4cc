//! Serde payloads and argument helpers shared by the bridge types.

use anyhow::{bail, Result};
use dsa_core::phase::{PhaseAxis, PhaseGrid, VectorField};
use dsa_core::ParameterAssignment;
use num_complex::Complex;
use serde::Serialize;
use serde_wasm_bindgen::to_value;
use wasm_bindgen::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub(crate) struct ComplexNumber {
    pub re: f64,
    pub im: f64,
}

impl From<Complex<f64>> for ComplexNumber {
    fn from(value: Complex<f64>) -> Self {
        Self {
            re: value.re,
            im: value.im,
        }
    }
}

/// Column-wise vector field, ready for a quiver plot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct VectorFieldPayload {
    pub samples_x: usize,
    pub samples_y: usize,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub max_magnitude: f64,
    pub non_finite: usize,
}

impl From<VectorField> for VectorFieldPayload {
    fn from(field: VectorField) -> Self {
        let max_magnitude = field.max_magnitude();
        let n = field.points.len();
        let mut payload = Self {
            samples_x: field.samples_x,
            samples_y: field.samples_y,
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            u: Vec::with_capacity(n),
            v: Vec::with_capacity(n),
            max_magnitude,
            non_finite: field.non_finite,
        };
        for point in field.points {
            payload.x.push(point.x);
            payload.y.push(point.y);
            payload.u.push(point.u);
            payload.v.push(point.v);
        }
        payload
    }
}

/// Pairs up parallel name/value arrays coming from JS.
pub(crate) fn parameter_assignment(
    names: &[String],
    values: &[f64],
) -> Result<ParameterAssignment> {
    if names.len() != values.len() {
        bail!(
            "Parameter names ({}) and values ({}) must have the same length.",
            names.len(),
            values.len()
        );
    }
    Ok(names.iter().cloned().zip(values.iter().copied()).collect())
}

/// Two axes given as `[index, min, max, samples]`-style parallel arrays.
pub(crate) fn phase_grid(
    axis_indices: &[usize],
    axis_mins: &[f64],
    axis_maxs: &[f64],
    axis_samples: &[usize],
) -> Result<PhaseGrid> {
    let count = axis_indices.len();
    if count != 2 || axis_mins.len() != 2 || axis_maxs.len() != 2 || axis_samples.len() != 2 {
        bail!("Phase plane needs exactly two axes in every axis array.");
    }
    let axis =
        |i: usize| PhaseAxis::new(axis_indices[i], axis_mins[i], axis_maxs[i], axis_samples[i]);
    Ok(PhaseGrid {
        x: axis(0),
        y: axis(1),
    })
}

pub(crate) fn to_js<T: Serialize>(value: &T) -> std::result::Result<JsValue, JsValue> {
    to_value(value).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

pub(crate) fn js_error(message: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsa_core::phase::FieldSample;

    #[test]
    fn assignment_requires_matching_lengths() {
        let names = vec!["a".to_string(), "b".to_string()];
        let values = parameter_assignment(&names, &[1.0, 2.0]).expect("same length");
        assert_eq!(values.get("b"), Some(&2.0));
        let err = parameter_assignment(&names, &[1.0]).expect_err("length mismatch");
        assert!(err.to_string().contains("same length"), "{err}");
    }

    #[test]
    fn grid_requires_two_axes() {
        let grid = phase_grid(&[0, 2], &[-1.0, 0.0], &[1.0, 5.0], &[3, 4]).expect("two axes");
        assert_eq!(grid.y, PhaseAxis::new(2, 0.0, 5.0, 4));
        assert!(phase_grid(&[0], &[-1.0], &[1.0], &[3]).is_err());
    }

    #[test]
    fn vector_field_is_split_into_columns() {
        let field = VectorField {
            samples_x: 2,
            samples_y: 1,
            points: vec![
                FieldSample { x: 0.0, y: 1.0, u: 3.0, v: 4.0 },
                FieldSample { x: 1.0, y: 1.0, u: f64::NAN, v: f64::NAN },
            ],
            non_finite: 1,
        };
        let payload = VectorFieldPayload::from(field);
        assert_eq!(payload.x, vec![0.0, 1.0]);
        assert_eq!(payload.u[0], 3.0);
        assert_eq!(payload.max_magnitude, 5.0);
        assert_eq!(payload.non_finite, 1);
    }
}
