//! Symbolic Jacobian and the numeric spectrum at an equilibrium branch.

use crate::derivative::differentiate;
use crate::equilibrium::EquilibriumSolution;
use crate::error::{DifferentiationError, MissingParameterError, SingularSystemError, StabilityError};
use crate::expr::Expr;
use crate::model::{ParameterAssignment, SymbolicModel};
use log::debug;
use nalgebra::linalg::SVD;
use nalgebra::{Complex, DMatrix};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// `(i, j)` entry is `d rhs_i / d variables_j`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JacobianMatrix {
    variables: Vec<String>,
    /// Row-major.
    entries: Vec<Expr>,
}

impl JacobianMatrix {
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn dimension(&self) -> usize {
        self.variables.len()
    }

    pub fn entry(&self, row: usize, column: usize) -> &Expr {
        &self.entries[row * self.dimension() + column]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Expr]> {
        self.entries.chunks(self.dimension().max(1))
    }

    /// Symbols other than the state variables, sorted.
    pub fn parameters(&self) -> Vec<String> {
        let mut symbols = BTreeSet::new();
        for entry in &self.entries {
            entry.collect_symbols(&mut symbols);
        }
        symbols
            .into_iter()
            .filter(|s| !self.variables.contains(s))
            .collect()
    }

    pub fn substitute(&self, bindings: &BTreeMap<String, Expr>) -> JacobianMatrix {
        JacobianMatrix {
            variables: self.variables.clone(),
            entries: self.entries.iter().map(|e| e.substitute(bindings)).collect(),
        }
    }

    pub fn to_latex(&self) -> String {
        let rows: Vec<String> = self
            .rows()
            .map(|row| {
                row.iter()
                    .map(Expr::to_latex)
                    .collect::<Vec<_>>()
                    .join(" & ")
            })
            .collect();
        format!("\\begin{{pmatrix}} {} \\end{{pmatrix}}", rows.join(" \\\\ "))
    }
}

impl fmt::Display for JacobianMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.rows().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            let cells: Vec<String> = row.iter().map(|e| e.to_string()).collect();
            write!(f, "[{}]", cells.join(", "))?;
        }
        Ok(())
    }
}

pub fn build_jacobian(model: &SymbolicModel) -> Result<JacobianMatrix, DifferentiationError> {
    let variables = model.variables().to_vec();
    let mut entries = Vec::with_capacity(variables.len() * variables.len());
    for (row, rhs) in model.equations() {
        for column in &variables {
            let entry = differentiate(rhs, column).map_err(|func| DifferentiationError {
                equation: row.to_string(),
                variable: column.clone(),
                construct: func.name().to_string(),
            })?;
            entries.push(entry);
        }
    }
    debug!("built {n}x{n} Jacobian", n = variables.len());
    Ok(JacobianMatrix { variables, entries })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StabilitySettings {
    /// Relative distance under which computed eigenvalues may be one eigenvalue. Groups
    /// of `m` get at least the `(eps * |A|)^(1/m)` spread of a defective eigenvalue.
    pub cluster_tolerance: f64,
    /// Singular values below this (relative to the largest) span the eigenspace.
    pub null_space_tolerance: f64,
    /// Iteration cap for the Schur and SVD decompositions; 0 means unlimited.
    pub max_schur_iterations: usize,
}

impl Default for StabilitySettings {
    fn default() -> Self {
        Self {
            cluster_tolerance: 1e-6,
            null_space_tolerance: 1e-8,
            max_schur_iterations: 10_000,
        }
    }
}

/// A distinct eigenvalue with its algebraic multiplicity and an orthonormal basis of
/// (an approximation to) its eigenspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EigenSpace {
    pub value: Complex<f64>,
    pub multiplicity: usize,
    pub vectors: Vec<Vec<Complex<f64>>>,
}

impl EigenSpace {
    pub fn geometric_multiplicity(&self) -> usize {
        self.vectors.len()
    }
}

/// Evaluated Jacobian and its eigen-decomposition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Row-major evaluated Jacobian.
    pub matrix: Vec<Vec<Complex<f64>>>,
    /// Sorted by real part, then imaginary part.
    pub eigenspaces: Vec<EigenSpace>,
}

impl Spectrum {
    /// Eigenvalues repeated by algebraic multiplicity.
    pub fn eigenvalues(&self) -> Vec<Complex<f64>> {
        self.eigenspaces
            .iter()
            .flat_map(|space| std::iter::repeat(space.value).take(space.multiplicity))
            .collect()
    }

    pub fn max_real_part(&self) -> Option<f64> {
        self.eigenspaces
            .iter()
            .map(|space| space.value.re)
            .reduce(f64::max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilityClass {
    StableNode,
    StableFocus,
    UnstableNode,
    UnstableFocus,
    Saddle,
    Center,
    NonHyperbolic,
}

impl fmt::Display for StabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StabilityClass::StableNode => "stable node",
            StabilityClass::StableFocus => "stable focus",
            StabilityClass::UnstableNode => "unstable node",
            StabilityClass::UnstableFocus => "unstable focus",
            StabilityClass::Saddle => "saddle",
            StabilityClass::Center => "center",
            StabilityClass::NonHyperbolic => "non-hyperbolic",
        };
        f.write_str(label)
    }
}

/// Linear stability verdict read off the eigenvalue signs.
pub fn classify(spectrum: &Spectrum) -> StabilityClass {
    let scale = spectrum
        .eigenspaces
        .iter()
        .map(|s| s.value.norm())
        .fold(1.0, f64::max);
    let tol = 1e-9 * scale;
    let values: Vec<Complex<f64>> = spectrum.eigenspaces.iter().map(|s| s.value).collect();

    let on_axis = values.iter().filter(|v| v.re.abs() <= tol).count();
    if on_axis > 0 {
        let all_imaginary = on_axis == values.len() && values.iter().all(|v| v.im.abs() > tol);
        return if all_imaginary {
            StabilityClass::Center
        } else {
            StabilityClass::NonHyperbolic
        };
    }

    let unstable = values.iter().any(|v| v.re > 0.0);
    let stable = values.iter().any(|v| v.re < 0.0);
    let rotating = values.iter().any(|v| v.im.abs() > tol);
    match (stable, unstable, rotating) {
        (true, true, _) => StabilityClass::Saddle,
        (true, false, false) => StabilityClass::StableNode,
        (true, false, true) => StabilityClass::StableFocus,
        (false, _, false) => StabilityClass::UnstableNode,
        (false, _, true) => StabilityClass::UnstableFocus,
    }
}

pub fn evaluate_stability(
    jacobian: &JacobianMatrix,
    branch: &EquilibriumSolution,
    params: &ParameterAssignment,
) -> Result<Spectrum, StabilityError> {
    evaluate_stability_with(jacobian, branch, params, &StabilitySettings::default())
}

pub fn evaluate_stability_with(
    jacobian: &JacobianMatrix,
    branch: &EquilibriumSolution,
    params: &ParameterAssignment,
    settings: &StabilitySettings,
) -> Result<Spectrum, StabilityError> {
    let dim = jacobian.dimension();
    let at_branch = jacobian.substitute(&branch.bindings());

    let mut symbols = BTreeSet::new();
    for entry in &at_branch.entries {
        entry.collect_symbols(&mut symbols);
    }
    let missing: Vec<String> = symbols
        .into_iter()
        .filter(|s| !params.contains_key(s))
        .collect();
    if !missing.is_empty() {
        return Err(MissingParameterError { missing }.into());
    }

    let mut values = Vec::with_capacity(dim * dim);
    for (index, entry) in at_branch.entries.iter().enumerate() {
        let value = entry.eval_unchecked(params);
        if !value.is_finite() {
            return Err(SingularSystemError::NonFinite {
                row: index / dim,
                column: index % dim,
                value: value.to_string(),
            }
            .into());
        }
        values.push(value);
    }

    let eigenvalues = compute_eigenvalues(dim, &values, settings)?;
    let complex_matrix = DMatrix::from_row_slice(dim, dim, &values);
    let clusters = cluster(&complex_matrix, &eigenvalues, settings)?;

    let mut eigenspaces = Vec::with_capacity(clusters.len());
    for (value, multiplicity) in clusters {
        let vectors = null_space(&complex_matrix, value, multiplicity, settings)?;
        eigenspaces.push(EigenSpace {
            value,
            multiplicity,
            vectors,
        });
    }
    eigenspaces.sort_by(|a, b| {
        a.value
            .re
            .total_cmp(&b.value.re)
            .then(a.value.im.total_cmp(&b.value.im))
    });

    debug!(
        "spectrum at {branch}: {:?}",
        eigenspaces.iter().map(|s| s.value).collect::<Vec<_>>()
    );
    Ok(Spectrum {
        matrix: values.chunks(dim.max(1)).map(|row| row.to_vec()).collect(),
        eigenspaces,
    })
}

/// Real Schur form when the matrix is real, so conjugate pairs come out exact;
/// complex Schur form otherwise.
fn compute_eigenvalues(
    dim: usize,
    values: &[Complex<f64>],
    settings: &StabilitySettings,
) -> Result<Vec<Complex<f64>>, SingularSystemError> {
    let no_convergence = || SingularSystemError::NoConvergence {
        stage: "Schur decomposition".to_string(),
    };
    if values.iter().all(|v| v.im == 0.0) {
        let real: Vec<f64> = values.iter().map(|v| v.re).collect();
        let matrix = DMatrix::from_row_slice(dim, dim, &real);
        let schur = matrix
            .try_schur(f64::EPSILON, settings.max_schur_iterations)
            .ok_or_else(no_convergence)?;
        Ok(schur.complex_eigenvalues().iter().copied().collect())
    } else {
        let matrix = DMatrix::from_row_slice(dim, dim, values);
        let schur = matrix
            .try_schur(f64::EPSILON, settings.max_schur_iterations)
            .ok_or_else(no_convergence)?;
        let (_, triangular) = schur.unpack();
        Ok(triangular.diagonal().iter().copied().collect())
    }
}

/// Multiple of `(eps * |A|)^(1/m)` allowed between the computed copies of an
/// eigenvalue of multiplicity `m`.
const DEFECT_SPREAD: f64 = 100.0;

/// Groups computed eigenvalues into distinct eigenvalues; returns (mean value, count).
///
/// Schur spreads a defective eigenvalue of multiplicity `m` over a radius of order
/// `(eps * |A|)^(1/m)`, so larger groups are tried first with that radius and kept only
/// when `(A - mean*I)^m` has an `m`-dimensional numerical null space.
fn cluster(
    matrix: &DMatrix<Complex<f64>>,
    eigenvalues: &[Complex<f64>],
    settings: &StabilitySettings,
) -> Result<Vec<(Complex<f64>, usize)>, SingularSystemError> {
    let mut remaining = eigenvalues.to_vec();
    remaining.sort_by(|a, b| a.re.total_cmp(&b.re).then(a.im.total_cmp(&b.im)));
    let perturbation = f64::EPSILON * matrix.norm().max(1.0);

    let mut groups = Vec::new();
    for size in (2..=remaining.len()).rev() {
        let mut seed = 0;
        while seed < remaining.len() && remaining.len() >= size {
            let anchor = remaining[seed];
            let mut members: Vec<usize> = (0..remaining.len()).collect();
            members.sort_by(|&a, &b| {
                (remaining[a] - anchor)
                    .norm()
                    .total_cmp(&(remaining[b] - anchor).norm())
            });
            members.truncate(size);

            let mean = members.iter().map(|&i| remaining[i]).sum::<Complex<f64>>() / size as f64;
            let radius = (settings.cluster_tolerance * mean.norm().max(1.0))
                .max(DEFECT_SPREAD * perturbation.powf(1.0 / size as f64));
            let tight = members
                .iter()
                .all(|&i| (remaining[i] - mean).norm() <= radius);
            if tight && null_dimension(matrix, mean, size, settings)? >= size {
                members.sort_unstable_by(|a, b| b.cmp(a));
                for i in members {
                    remaining.remove(i);
                }
                groups.push((mean, size));
            } else {
                seed += 1;
            }
        }
    }
    groups.extend(remaining.into_iter().map(|value| (value, 1)));
    Ok(groups)
}

fn svd_failure() -> SingularSystemError {
    SingularSystemError::NoConvergence {
        stage: "singular value decomposition".to_string(),
    }
}

fn shifted(matrix: &DMatrix<Complex<f64>>, lambda: Complex<f64>) -> DMatrix<Complex<f64>> {
    let mut shifted = matrix.clone();
    for i in 0..matrix.nrows() {
        shifted[(i, i)] -= lambda;
    }
    shifted
}

/// Numerical dimension of the null space of `(A - lambda*I)^power`.
fn null_dimension(
    matrix: &DMatrix<Complex<f64>>,
    lambda: Complex<f64>,
    power: usize,
    settings: &StabilitySettings,
) -> Result<usize, SingularSystemError> {
    let shift = shifted(matrix, lambda);
    let threshold = settings.null_space_tolerance * shift.norm().max(1.0).powi(power as i32);
    let mut product = shift.clone();
    for _ in 1..power {
        product = &product * &shift;
    }
    let svd = SVD::try_new(
        product,
        false,
        false,
        f64::EPSILON,
        settings.max_schur_iterations,
    )
    .ok_or_else(svd_failure)?;
    Ok(svd
        .singular_values
        .iter()
        .filter(|&&sigma| sigma <= threshold)
        .count())
}

/// Orthonormal null-space vectors of `A - lambda*I`: at most `multiplicity`, at least
/// the one belonging to the smallest singular value.
fn null_space(
    matrix: &DMatrix<Complex<f64>>,
    lambda: Complex<f64>,
    multiplicity: usize,
    settings: &StabilitySettings,
) -> Result<Vec<Vec<Complex<f64>>>, SingularSystemError> {
    let svd = SVD::try_new(
        shifted(matrix, lambda),
        false,
        true,
        f64::EPSILON,
        settings.max_schur_iterations,
    )
    .ok_or_else(svd_failure)?;
    let v_t = svd.v_t.ok_or_else(svd_failure)?;

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| svd.singular_values[a].total_cmp(&svd.singular_values[b]));
    let largest = svd.singular_values.iter().copied().fold(0.0, f64::max);
    let threshold = settings.null_space_tolerance * largest.max(1.0);

    let mut chosen: Vec<usize> = order
        .iter()
        .copied()
        .filter(|&i| svd.singular_values[i] <= threshold)
        .take(multiplicity.max(1))
        .collect();
    if chosen.is_empty() {
        chosen.extend(order.first().copied());
    }

    Ok(chosen
        .into_iter()
        .map(|i| {
            // Rows of V^H are conjugated right singular vectors.
            let mut vector: Vec<Complex<f64>> = v_t.row(i).iter().map(|c| c.conj()).collect();
            normalize_complex_vector(&mut vector);
            vector
        })
        .collect())
}

/// Unit norm, with the largest component rotated onto the positive real axis.
fn normalize_complex_vector(vec: &mut [Complex<f64>]) {
    let norm = vec.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt();
    if norm > 0.0 {
        for entry in vec.iter_mut() {
            *entry /= norm;
        }
    }
    let pivot = vec
        .iter()
        .copied()
        .max_by(|a, b| a.norm().total_cmp(&b.norm()));
    if let Some(pivot) = pivot {
        if pivot.norm() > 0.0 {
            let phase = pivot.conj() / pivot.norm();
            for entry in vec.iter_mut() {
                *entry *= phase;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equilibrium::solve_equilibria;
    use crate::model::parse;

    fn origin(variables: &[&str]) -> EquilibriumSolution {
        EquilibriumSolution {
            assignments: variables
                .iter()
                .map(|v| (v.to_string(), Expr::zero()))
                .collect(),
            free_variables: Vec::new(),
        }
    }

    fn spectrum_of(lines: &[&str]) -> Spectrum {
        let model = parse(lines.iter().copied()).expect("valid");
        let jacobian = build_jacobian(&model).expect("smooth");
        let names: Vec<&str> = model.variables().iter().map(String::as_str).collect();
        evaluate_stability(&jacobian, &origin(&names), &ParameterAssignment::new())
            .expect("finite matrix")
    }

    fn assert_close(a: Complex<f64>, b: Complex<f64>) {
        assert!((a - b).norm() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn linear_system_is_a_stable_node() {
        let model = parse(["dx/dt = -x", "dy/dt = -2*y"]).expect("valid");
        let jacobian = build_jacobian(&model).expect("smooth");
        assert_eq!(jacobian.entry(0, 0), &Expr::constant(-1.0));
        assert_eq!(jacobian.entry(0, 1), &Expr::zero());
        assert_eq!(jacobian.entry(1, 0), &Expr::zero());
        assert_eq!(jacobian.entry(1, 1), &Expr::constant(-2.0));

        let branches = solve_equilibria(&model).expect("origin");
        let spectrum =
            evaluate_stability(&jacobian, &branches[0], &ParameterAssignment::new()).expect("ok");
        assert_eq!(spectrum.eigenspaces.len(), 2);
        assert_close(spectrum.eigenspaces[0].value, Complex::new(-2.0, 0.0));
        assert_close(spectrum.eigenspaces[1].value, Complex::new(-1.0, 0.0));
        assert!(spectrum.eigenspaces.iter().all(|s| s.multiplicity == 1));
        assert!(spectrum.eigenspaces.iter().all(|s| s.value.im == 0.0));
        assert_eq!(classify(&spectrum), StabilityClass::StableNode);

        let v = &spectrum.eigenspaces[0].vectors[0];
        assert_close(v[0], Complex::new(0.0, 0.0));
        assert_close(v[1], Complex::new(1.0, 0.0));
    }

    #[test]
    fn repeated_eigenvalue_keeps_single_eigenvector() {
        let spectrum = spectrum_of(&["dx/dt = -x + y", "dy/dt = -y"]);
        assert_eq!(spectrum.eigenspaces.len(), 1);
        let space = &spectrum.eigenspaces[0];
        assert_close(space.value, Complex::new(-1.0, 0.0));
        assert_eq!(space.multiplicity, 2);
        assert_eq!(space.geometric_multiplicity(), 1);
        assert_close(space.vectors[0][0], Complex::new(1.0, 0.0));
        assert_close(space.vectors[0][1], Complex::new(0.0, 0.0));
        assert_eq!(spectrum.eigenvalues().len(), 2);
    }

    #[test]
    fn triple_jordan_block_is_one_eigenvalue() {
        // Companion matrix of (lambda + 1)^3.
        let model = parse(["dx/dt = y", "dy/dt = z", "dz/dt = -x - 3*y - 3*z"]).expect("valid");
        let jacobian = build_jacobian(&model).expect("smooth");
        let branches = solve_equilibria(&model).expect("origin");
        assert_eq!(branches.len(), 1);
        let spectrum =
            evaluate_stability(&jacobian, &branches[0], &ParameterAssignment::new()).expect("ok");
        assert_eq!(spectrum.eigenspaces.len(), 1);
        let space = &spectrum.eigenspaces[0];
        assert_close(space.value, Complex::new(-1.0, 0.0));
        assert_eq!(space.multiplicity, 3);
        assert_eq!(space.geometric_multiplicity(), 1);
        assert_eq!(classify(&spectrum), StabilityClass::StableNode);
    }

    #[test]
    fn nearby_distinct_eigenvalues_stay_apart() {
        let spectrum = spectrum_of(&["dx/dt = -x", "dy/dt = -1.001*y", "dz/dt = -1.002*z"]);
        assert_eq!(spectrum.eigenspaces.len(), 3);
        assert!(spectrum.eigenspaces.iter().all(|s| s.multiplicity == 1));
        assert_close(spectrum.eigenspaces[0].value, Complex::new(-1.002, 0.0));
        assert_eq!(classify(&spectrum), StabilityClass::StableNode);
    }

    #[test]
    fn rotation_keeps_complex_pair() {
        let spectrum = spectrum_of(&["dx/dt = -y", "dy/dt = x"]);
        assert_eq!(spectrum.eigenspaces.len(), 2);
        assert_close(spectrum.eigenspaces[0].value, Complex::new(0.0, -1.0));
        assert_close(spectrum.eigenspaces[1].value, Complex::new(0.0, 1.0));
        assert_eq!(classify(&spectrum), StabilityClass::Center);

        // (J - i I) v = 0 for the +i eigenvector.
        let v = &spectrum.eigenspaces[1].vectors[0];
        let lambda = Complex::new(0.0, 1.0);
        assert_close(-v[1] - lambda * v[0], Complex::new(0.0, 0.0));
        assert_close(v[0] - lambda * v[1], Complex::new(0.0, 0.0));
    }

    #[test]
    fn identity_has_full_eigenspace() {
        let spectrum = spectrum_of(&["dx/dt = x", "dy/dt = y"]);
        assert_eq!(spectrum.eigenspaces.len(), 1);
        assert_eq!(spectrum.eigenspaces[0].multiplicity, 2);
        assert_eq!(spectrum.eigenspaces[0].geometric_multiplicity(), 2);
        assert_eq!(classify(&spectrum), StabilityClass::UnstableNode);
    }

    #[test]
    fn saddle_and_focus_classes() {
        let saddle = spectrum_of(&["dx/dt = x", "dy/dt = -y"]);
        assert_eq!(classify(&saddle), StabilityClass::Saddle);
        let focus = spectrum_of(&["dx/dt = -x - y", "dy/dt = x - y"]);
        assert_eq!(classify(&focus), StabilityClass::StableFocus);
        assert_eq!(focus.max_real_part().map(|r| (r + 1.0).abs() < 1e-9), Some(true));
    }

    #[test]
    fn missing_parameters_are_listed() {
        let model = parse(["dB/dt = A - a12*B", "dP/dt = a12*B - k*P"]).expect("valid");
        let jacobian = build_jacobian(&model).expect("smooth");
        assert_eq!(jacobian.parameters(), vec!["a12".to_string(), "k".to_string()]);
        let branches = solve_equilibria(&model).expect("solvable");
        let mut params = ParameterAssignment::new();
        params.insert("A".to_string(), 10.0);
        let err = evaluate_stability(&jacobian, &branches[0], &params).expect_err("a12, k missing");
        assert_eq!(
            err,
            StabilityError::MissingParameter(MissingParameterError {
                missing: vec!["a12".to_string(), "k".to_string()],
            })
        );
    }

    #[test]
    fn division_by_zero_is_singular() {
        let model = parse(["dx/dt = 1/x - 1"]).expect("valid");
        let jacobian = build_jacobian(&model).expect("smooth");
        let err = evaluate_stability(&jacobian, &origin(&["x"]), &ParameterAssignment::new())
            .expect_err("1/x^2 at 0");
        assert!(matches!(
            err,
            StabilityError::Singular(SingularSystemError::NonFinite { row: 0, column: 0, .. })
        ));
    }

    #[test]
    fn piecewise_right_side_is_not_differentiable() {
        let model = parse(["dx/dt = abs(x) - 1", "dy/dt = x"]).expect("valid");
        let err = build_jacobian(&model).expect_err("abs(x)");
        assert_eq!(err.equation, "x");
        assert_eq!(err.variable, "x");
        assert_eq!(err.construct, "abs");
    }

    #[test]
    fn latex_matrix_layout() {
        let model = parse(["dx/dt = -x", "dy/dt = x - y"]).expect("valid");
        let jacobian = build_jacobian(&model).expect("smooth");
        assert_eq!(
            jacobian.to_latex(),
            "\\begin{pmatrix} -1 & 0 \\\\ 1 & -1 \\end{pmatrix}"
        );
    }
}
