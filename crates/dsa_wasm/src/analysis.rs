//! Symbolic model bridge: equilibria, Jacobian, stability, sweeps and phase planes.

use crate::payload::{
    js_error, parameter_assignment, phase_grid, to_js, ComplexNumber, VectorFieldPayload,
};
use anyhow::{anyhow, Result};
use dsa_core::equation_engine::CompiledSystem;
use dsa_core::phase::vector_field;
use dsa_core::{
    build_jacobian, classify, evaluate_stability, parse, solve_equilibria, sweep,
    DifferentiationError, EquilibriumSolution, JacobianMatrix, Spectrum, SweepRange,
    SymbolicModel, UnsolvableSystemError,
};
use serde::Serialize;
use wasm_bindgen::prelude::*;

/// A parsed model with its Jacobian and equilibrium branches computed once up front.
///
/// Either derived result may have failed; the failure is kept and reported by the
/// methods that need it, so a model without closed-form equilibria can still be
/// explored in the phase plane.
#[wasm_bindgen]
pub struct WasmModel {
    model: SymbolicModel,
    jacobian: Result<JacobianMatrix, DifferentiationError>,
    equilibria: Result<Vec<EquilibriumSolution>, UnsolvableSystemError>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AssignmentPayload {
    variable: String,
    expression: String,
    latex: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct BranchPayload {
    index: usize,
    text: String,
    latex: String,
    assignments: Vec<AssignmentPayload>,
    free_variables: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct EquilibriaPayload {
    branches: Vec<BranchPayload>,
    /// Why no branch was found, when none was.
    message: Option<String>,
    infeasible: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct EigenSpacePayload {
    value: ComplexNumber,
    multiplicity: usize,
    geometric_multiplicity: usize,
    vectors: Vec<Vec<ComplexNumber>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StabilityPayload {
    matrix: Vec<Vec<ComplexNumber>>,
    eigenspaces: Vec<EigenSpacePayload>,
    classification: String,
    max_real_part: Option<f64>,
}

impl From<&Spectrum> for StabilityPayload {
    fn from(spectrum: &Spectrum) -> Self {
        let convert = |row: &Vec<num_complex::Complex<f64>>| {
            row.iter().copied().map(ComplexNumber::from).collect::<Vec<_>>()
        };
        Self {
            matrix: spectrum.matrix.iter().map(convert).collect(),
            eigenspaces: spectrum
                .eigenspaces
                .iter()
                .map(|space| EigenSpacePayload {
                    value: space.value.into(),
                    multiplicity: space.multiplicity,
                    geometric_multiplicity: space.geometric_multiplicity(),
                    vectors: space.vectors.iter().map(convert).collect(),
                })
                .collect(),
            classification: classify(spectrum).to_string(),
            max_real_part: spectrum.max_real_part(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SweepPayload {
    branch: usize,
    variable: String,
    parameter: String,
    parameter_values: Vec<f64>,
    values: Vec<f64>,
}

impl WasmModel {
    pub(crate) fn build(equations: &[String]) -> Result<WasmModel> {
        let model = parse(equations)?;
        let jacobian = build_jacobian(&model);
        let equilibria = solve_equilibria(&model);
        Ok(WasmModel {
            model,
            jacobian,
            equilibria,
        })
    }

    fn branch(&self, index: usize) -> Result<&EquilibriumSolution> {
        let branches = self.equilibria.as_ref().map_err(|e| e.clone())?;
        branches.get(index).ok_or_else(|| {
            anyhow!(
                "Equilibrium branch {} does not exist ({} found).",
                index,
                branches.len()
            )
        })
    }

    pub(crate) fn equilibria_payload(&self) -> EquilibriaPayload {
        match &self.equilibria {
            Ok(branches) => EquilibriaPayload {
                branches: branches
                    .iter()
                    .enumerate()
                    .map(|(index, branch)| BranchPayload {
                        index,
                        text: branch.to_string(),
                        latex: branch.to_latex(),
                        assignments: branch
                            .assignments
                            .iter()
                            .map(|(variable, value)| AssignmentPayload {
                                variable: variable.clone(),
                                expression: value.to_string(),
                                latex: value.to_latex(),
                            })
                            .collect(),
                        free_variables: branch.free_variables.clone(),
                    })
                    .collect(),
                message: None,
                infeasible: false,
            },
            Err(err) => EquilibriaPayload {
                branches: Vec::new(),
                message: Some(err.to_string()),
                infeasible: err.is_infeasible(),
            },
        }
    }

    pub(crate) fn stability_payload(
        &self,
        branch: usize,
        param_names: &[String],
        param_values: &[f64],
    ) -> Result<StabilityPayload> {
        let jacobian = self.jacobian.as_ref().map_err(|e| e.clone())?;
        let solution = self.branch(branch)?;
        let params = parameter_assignment(param_names, param_values)?;
        let spectrum = evaluate_stability(jacobian, solution, &params)?;
        Ok(StabilityPayload::from(&spectrum))
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn sweep_payload(
        &self,
        branch: usize,
        variable: &str,
        parameter: &str,
        lo: f64,
        hi: f64,
        count: usize,
        param_names: &[String],
        param_values: &[f64],
    ) -> Result<SweepPayload> {
        let solution = self.branch(branch)?;
        let expression = solution
            .get(variable)
            .ok_or_else(|| anyhow!("Unknown state variable '{}'.", variable))?;
        let mut fixed = parameter_assignment(param_names, param_values)?;
        fixed.remove(parameter);
        let points = sweep(expression, parameter, SweepRange::new(lo, hi, count), &fixed)?;
        let (parameter_values, values) = points.into_iter().unzip();
        Ok(SweepPayload {
            branch,
            variable: variable.to_string(),
            parameter: parameter.to_string(),
            parameter_values,
            values,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn vector_field_payload(
        &self,
        param_names: &[String],
        param_values: &[f64],
        axis_indices: &[usize],
        axis_mins: &[f64],
        axis_maxs: &[f64],
        axis_samples: &[usize],
        frozen_state: &[f64],
    ) -> Result<VectorFieldPayload> {
        let params = parameter_assignment(param_names, param_values)?;
        let system: CompiledSystem<f64> = CompiledSystem::from_model(&self.model, &params)?;
        let grid = phase_grid(axis_indices, axis_mins, axis_maxs, axis_samples)?;
        let field = vector_field(&system, &grid, frozen_state)?;
        Ok(field.into())
    }
}

#[wasm_bindgen]
impl WasmModel {
    #[wasm_bindgen(constructor)]
    pub fn new(equations: Vec<String>) -> std::result::Result<WasmModel, JsValue> {
        console_error_panic_hook::set_once();
        WasmModel::build(&equations).map_err(js_error)
    }

    pub fn variables(&self) -> Vec<String> {
        self.model.variables().to_vec()
    }

    pub fn parameters(&self) -> Vec<String> {
        self.model.parameters().to_vec()
    }

    /// Plain-text right-hand sides in variable order.
    pub fn equations(&self) -> Vec<String> {
        self.model
            .equations()
            .map(|(name, rhs)| format!("d{}/dt = {}", name, rhs))
            .collect()
    }

    pub fn branch_count(&self) -> usize {
        self.equilibria.as_ref().map(Vec::len).unwrap_or(0)
    }

    pub fn equilibria(&self) -> std::result::Result<JsValue, JsValue> {
        to_js(&self.equilibria_payload())
    }

    pub fn jacobian_latex(&self) -> std::result::Result<String, JsValue> {
        self.jacobian
            .as_ref()
            .map(JacobianMatrix::to_latex)
            .map_err(js_error)
    }

    pub fn stability(
        &self,
        branch: usize,
        param_names: Vec<String>,
        param_values: Vec<f64>,
    ) -> std::result::Result<JsValue, JsValue> {
        let payload = self
            .stability_payload(branch, &param_names, &param_values)
            .map_err(js_error)?;
        to_js(&payload)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sweep(
        &self,
        branch: usize,
        variable: &str,
        parameter: &str,
        lo: f64,
        hi: f64,
        count: usize,
        param_names: Vec<String>,
        param_values: Vec<f64>,
    ) -> std::result::Result<JsValue, JsValue> {
        let payload = self
            .sweep_payload(
                branch,
                variable,
                parameter,
                lo,
                hi,
                count,
                &param_names,
                &param_values,
            )
            .map_err(js_error)?;
        to_js(&payload)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn vector_field(
        &self,
        param_names: Vec<String>,
        param_values: Vec<f64>,
        axis_indices: Vec<usize>,
        axis_mins: Vec<f64>,
        axis_maxs: Vec<f64>,
        axis_samples: Vec<usize>,
        frozen_state: Vec<f64>,
    ) -> std::result::Result<JsValue, JsValue> {
        let payload = self
            .vector_field_payload(
                &param_names,
                &param_values,
                &axis_indices,
                &axis_mins,
                &axis_maxs,
                &axis_samples,
                &frozen_state,
            )
            .map_err(js_error)?;
        to_js(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(equations: &[&str]) -> Vec<String> {
        equations.iter().map(|s| s.to_string()).collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        lines(list)
    }

    #[test]
    fn two_compartment_model_round_trip() {
        let model = WasmModel::build(&lines(&["dB/dt = A - a12*B", "dP/dt = a12*B - k*P"]))
            .expect("valid model");
        assert_eq!(model.variables(), vec!["B", "P"]);
        assert_eq!(model.parameters(), vec!["A", "a12", "k"]);
        assert_eq!(model.branch_count(), 1);

        let equilibria = model.equilibria_payload();
        assert!(equilibria.message.is_none());
        assert_eq!(equilibria.branches[0].text, "B = A/a12, P = A/k");

        let stability = model
            .stability_payload(0, &names(&["A", "a12", "k"]), &[10.0, 0.5, 0.2])
            .expect("all parameters given");
        assert_eq!(stability.classification, "stable node");
        assert_eq!(stability.eigenspaces.len(), 2);
        assert!(stability.max_real_part.expect("non-empty") < 0.0);

        let swept = model
            .sweep_payload(0, "B", "A", 1.0, 10.0, 10, &names(&["a12"]), &[0.5])
            .expect("valid sweep");
        assert_eq!(swept.parameter_values.len(), 10);
        assert!((swept.values[9] - 20.0).abs() < 1e-12);
    }

    #[test]
    fn missing_equilibria_are_reported_not_fatal() {
        let model = WasmModel::build(&lines(&["dx/dt = x - cos(x)"])).expect("parses");
        assert_eq!(model.branch_count(), 0);
        let payload = model.equilibria_payload();
        assert!(payload.branches.is_empty());
        assert!(payload.message.is_some());
        assert!(!payload.infeasible);

        let err = model
            .stability_payload(0, &[], &[])
            .expect_err("no branches to analyse");
        assert!(err.to_string().contains("no equilibrium"), "{err}");

        let field = model
            .vector_field_payload(&[], &[], &[0, 0], &[-1.0, -1.0], &[1.0, 1.0], &[3, 3], &[0.0])
            .expect_err("one-dimensional system");
        assert!(field.to_string().contains("dimension"), "{field}");
    }

    #[test]
    fn bad_requests_are_rejected_with_messages() {
        let model = WasmModel::build(&lines(&["dB/dt = A - a12*B", "dP/dt = a12*B - k*P"]))
            .expect("valid model");
        let err = model
            .stability_payload(3, &[], &[])
            .expect_err("branch out of range");
        assert!(err.to_string().contains("does not exist"), "{err}");

        let err = model
            .sweep_payload(0, "Q", "A", 0.0, 1.0, 3, &[], &[])
            .expect_err("unknown variable");
        assert!(err.to_string().contains("Unknown state variable"), "{err}");

        let err = model
            .stability_payload(0, &names(&["A"]), &[1.0])
            .expect_err("a12 and k missing");
        assert!(err.to_string().contains("a12, k"), "{err}");

        assert!(WasmModel::build(&lines(&["dA/dt B"])).is_err());
    }

    #[test]
    fn vector_field_uses_given_parameters() {
        let model = WasmModel::build(&lines(&["dB/dt = A - a12*B", "dP/dt = a12*B - k*P"]))
            .expect("valid model");
        let payload = model
            .vector_field_payload(
                &names(&["A", "a12", "k"]),
                &[1.0, 1.0, 1.0],
                &[0, 1],
                &[0.0, 0.0],
                &[2.0, 2.0],
                &[3, 3],
                &[0.0, 0.0],
            )
            .expect("valid grid");
        assert_eq!(payload.u.len(), 9);
        // Node (B, P) = (2, 0): dB = 1 - 2, dP = 2.
        assert_eq!(payload.u[2], -1.0);
        assert_eq!(payload.v[2], 2.0);
    }
}
