//! Parametric equilibrium solving: every right-hand side set to zero and solved for
//! the state variables with the parameters left symbolic.
//!
//! The search works on expanded numerators. Each step splits one equation into the
//! factors that can vanish, isolates a state variable in each factor (polynomials of
//! degree one or two and binomials first, then inversion of a single occurrence),
//! substitutes the result everywhere and recurses. Finished branches are checked
//! against the unreduced system before they are returned.

use crate::algebra::{
    expand, is_identically_zero, numer_denom, polynomial_coefficients, zero_factors,
    zero_numerator,
};
use crate::error::{MissingParameterError, UnsolvableCause, UnsolvableSystemError};
use crate::expr::{Expr, Func};
use crate::model::{ParameterAssignment, SymbolicModel};
use log::{debug, warn};
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Nesting depth of function/power inversions tried on a single factor.
const MAX_INVERSION_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Upper bound on candidate branches explored before giving up.
    pub max_branches: usize,
    /// Relative tolerance of the numeric fallback in branch verification.
    pub verify_tolerance: f64,
    /// Parameter samples used by the numeric fallback.
    pub verification_samples: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_branches: 64,
            verify_tolerance: 1e-9,
            verification_samples: 3,
        }
    }
}

/// One equilibrium branch: an expression for every state variable.
///
/// A variable the system leaves undetermined maps to itself and is listed in
/// `free_variables`; it then needs a value like any parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumSolution {
    /// Values in variable declaration order.
    pub assignments: Vec<(String, Expr)>,
    pub free_variables: Vec<String>,
}

impl EquilibriumSolution {
    pub fn get(&self, variable: &str) -> Option<&Expr> {
        self.assignments
            .iter()
            .find(|(name, _)| name == variable)
            .map(|(_, value)| value)
    }

    /// Substitution map for the determined variables.
    pub fn bindings(&self) -> BTreeMap<String, Expr> {
        self.assignments
            .iter()
            .filter(|(name, _)| !self.free_variables.contains(name))
            .cloned()
            .collect()
    }

    /// Parameters and free variables the branch depends on.
    pub fn symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for (_, value) in &self.assignments {
            value.collect_symbols(&mut out);
        }
        out
    }

    /// Numeric equilibrium point for concrete parameter values.
    pub fn evaluate(
        &self,
        values: &ParameterAssignment,
    ) -> Result<Vec<Complex<f64>>, MissingParameterError> {
        let missing: Vec<String> = self
            .symbols()
            .into_iter()
            .filter(|name| !values.contains_key(name))
            .collect();
        if !missing.is_empty() {
            return Err(MissingParameterError { missing });
        }
        Ok(self
            .assignments
            .iter()
            .map(|(_, value)| value.eval_unchecked(values))
            .collect())
    }

    pub fn to_latex(&self) -> String {
        self.assignments
            .iter()
            .map(|(name, value)| {
                format!("{} = {}", crate::format::latex_symbol(name), value.to_latex())
            })
            .collect::<Vec<_>>()
            .join(", \\quad ")
    }
}

impl fmt::Display for EquilibriumSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name} = {value}")?;
        }
        Ok(())
    }
}

pub fn solve_equilibria(
    model: &SymbolicModel,
) -> Result<Vec<EquilibriumSolution>, UnsolvableSystemError> {
    solve_equilibria_with(model, &SolverSettings::default())
}

pub fn solve_equilibria_with(
    model: &SymbolicModel,
    settings: &SolverSettings,
) -> Result<Vec<EquilibriumSolution>, UnsolvableSystemError> {
    let mut equations = Vec::with_capacity(model.dimension());
    let mut denominators = Vec::new();
    for rhs in model.rhs_all() {
        let (num, den) = numer_denom(rhs);
        equations.push(expand(&num));
        if !matches!(den, Expr::Const(_)) {
            denominators.push(den);
        }
    }
    debug!(
        "solving {} equation(s) for {:?}",
        equations.len(),
        model.variables()
    );

    let mut search = Search {
        settings,
        leaves: Vec::new(),
        causes: Vec::new(),
    };
    search.run(Branch {
        equations,
        solved: Vec::new(),
        open: model.variables().to_vec(),
    });

    let Search {
        leaves, mut causes, ..
    } = search;
    let mut solutions = Vec::new();
    for leaf in leaves {
        match verify(model, leaf, &denominators, settings) {
            Ok(solution) => solutions.push(solution),
            Err(cause) => causes.push(cause),
        }
    }

    let mut keyed: Vec<(String, EquilibriumSolution)> =
        solutions.into_iter().map(|s| (s.to_string(), s)).collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.dedup_by(|a, b| a.1 == b.1);
    let solutions: Vec<EquilibriumSolution> = keyed.into_iter().map(|(_, s)| s).collect();

    let mut unique_causes: Vec<UnsolvableCause> = Vec::new();
    for cause in causes {
        if !unique_causes.contains(&cause) {
            unique_causes.push(cause);
        }
    }

    if solutions.is_empty() {
        let err = UnsolvableSystemError {
            causes: unique_causes,
        };
        warn!("{err}");
        return Err(err);
    }
    for cause in &unique_causes {
        warn!("equilibrium branch dropped: {cause}");
    }
    debug!("found {} equilibrium branch(es)", solutions.len());
    Ok(solutions)
}

/// Partially solved system.
#[derive(Debug, Clone)]
struct Branch {
    /// Expanded numerators that must still vanish.
    equations: Vec<Expr>,
    /// Solved variables, in solving order, expressed in parameters and open variables.
    solved: Vec<(String, Expr)>,
    /// Unsolved variables in declaration order.
    open: Vec<String>,
}

impl Branch {
    fn assign(&self, skip: usize, variable: &str, value: &Expr) -> Branch {
        let equations = self
            .equations
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != skip)
            .map(|(_, eq)| eq.substitute_one(variable, value))
            .collect();
        let mut solved: Vec<(String, Expr)> = self
            .solved
            .iter()
            .map(|(name, expr)| (name.clone(), simplify(&expr.substitute_one(variable, value))))
            .collect();
        solved.push((variable.to_string(), value.clone()));
        let open = self.open.iter().filter(|v| *v != variable).cloned().collect();
        Branch {
            equations,
            solved,
            open,
        }
    }
}

struct Search<'a> {
    settings: &'a SolverSettings,
    leaves: Vec<Branch>,
    causes: Vec<UnsolvableCause>,
}

impl Search<'_> {
    fn run(&mut self, branch: Branch) {
        if self.leaves.len() >= self.settings.max_branches {
            let cause = UnsolvableCause::BranchLimit {
                limit: self.settings.max_branches,
            };
            if !self.causes.contains(&cause) {
                self.causes.push(cause);
            }
            return;
        }

        let mut equations = Vec::with_capacity(branch.equations.len());
        for eq in &branch.equations {
            let eq = zero_numerator(eq);
            if eq.is_zero() {
                continue;
            }
            if !eq.depends_on_any(&branch.open) {
                self.causes.push(UnsolvableCause::Infeasible {
                    equation: eq.to_string(),
                });
                return;
            }
            equations.push(eq);
        }
        if equations.is_empty() {
            self.leaves.push(branch);
            return;
        }
        let branch = Branch {
            equations,
            ..branch
        };

        let plans: Vec<EquationPlan> = branch
            .equations
            .iter()
            .enumerate()
            .map(|(index, eq)| plan_equation(index, eq, &branch.open))
            .collect();
        // exp(x) = 0 and friends: nothing in the equation can vanish.
        if let Some(never) = plans.iter().find(|p| p.factors.is_empty()) {
            self.causes.push(UnsolvableCause::Infeasible {
                equation: branch.equations[never.index].to_string(),
            });
            return;
        }
        let Some(plan) = plans.into_iter().min_by_key(EquationPlan::score) else {
            return;
        };

        for factor in plan.factors {
            match factor {
                Ok(isolated) => {
                    for root in &isolated.roots {
                        let next = branch.assign(plan.index, &isolated.variable, root);
                        self.run(next);
                    }
                }
                Err(cause) => self.causes.push(cause),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Method {
    Linear,
    Inversion,
    Quadratic,
}

#[derive(Debug, Clone)]
struct Isolated {
    variable: String,
    method: Method,
    roots: Vec<Expr>,
}

struct EquationPlan {
    index: usize,
    factors: Vec<Result<Isolated, UnsolvableCause>>,
}

impl EquationPlan {
    /// Lower is better: fully solvable, cheapest worst method, fewest branches, earliest.
    fn score(&self) -> (usize, Option<Method>, usize, usize) {
        let unsolved = self.factors.iter().filter(|f| f.is_err()).count();
        let worst = self
            .factors
            .iter()
            .filter_map(|f| f.as_ref().ok().map(|i| i.method))
            .max();
        (unsolved, worst, self.factors.len(), self.index)
    }
}

fn plan_equation(index: usize, equation: &Expr, open: &[String]) -> EquationPlan {
    let factors = zero_factors(equation)
        .into_iter()
        .filter(|factor| factor.depends_on_any(open))
        .map(|factor| isolate_any(&factor, open))
        .collect();
    EquationPlan { index, factors }
}

/// Best isolation of any open variable in `factor = 0`.
fn isolate_any(factor: &Expr, open: &[String]) -> Result<Isolated, UnsolvableCause> {
    let mut best: Option<Isolated> = None;
    let mut failure: Option<UnsolvableCause> = None;
    for variable in open.iter().filter(|v| factor.depends_on(v)) {
        match isolate(factor, variable, 0) {
            Ok((method, roots)) => {
                if best.as_ref().map_or(true, |b| method < b.method) {
                    best = Some(Isolated {
                        variable: variable.clone(),
                        method,
                        roots,
                    });
                }
            }
            Err(cause @ UnsolvableCause::UnsupportedDegree { .. }) => {
                if !matches!(failure, Some(UnsolvableCause::UnsupportedDegree { .. })) {
                    failure = Some(cause);
                }
            }
            Err(cause) => {
                failure.get_or_insert(cause);
            }
        }
    }
    best.ok_or_else(|| {
        failure.unwrap_or_else(|| UnsolvableCause::NoAlgebraicPath {
            equation: factor.to_string(),
        })
    })
}

/// Solves `factor = 0` for `var`.
fn isolate(factor: &Expr, var: &str, depth: usize) -> Result<(Method, Vec<Expr>), UnsolvableCause> {
    let no_path = || UnsolvableCause::NoAlgebraicPath {
        equation: factor.to_string(),
    };
    if depth > MAX_INVERSION_DEPTH {
        return Err(no_path());
    }

    if let Some(coeffs) = polynomial_coefficients(factor, var) {
        let degree = coeffs.len() - 1;
        return match degree {
            0 => Err(no_path()),
            1 => Ok((
                Method::Linear,
                vec![simplify(&Expr::div(Expr::neg(coeffs[0].clone()), coeffs[1].clone()))],
            )),
            2 => Ok((
                Method::Quadratic,
                quadratic_roots(&coeffs[0], &coeffs[1], &coeffs[2]),
            )),
            n if coeffs[1..n].iter().all(Expr::is_zero) => {
                // a*x^n + c = 0
                let target = Expr::div(Expr::neg(coeffs[0].clone()), coeffs[n].clone());
                Ok((Method::Inversion, real_roots(simplify(&target), n as f64)))
            }
            n => Err(UnsolvableCause::UnsupportedDegree {
                variable: var.to_string(),
                degree: n,
                equation: factor.to_string(),
            }),
        };
    }

    // A single occurrence: rest + outer * g(var) = 0.
    let (dependent, rest): (Vec<&Expr>, Vec<&Expr>) =
        factor.terms().iter().partition(|t| t.depends_on(var));
    let [term] = dependent.as_slice() else {
        return Err(no_path());
    };
    let (inner, outer): (Vec<&Expr>, Vec<&Expr>) =
        term.factors().iter().partition(|f| f.depends_on(var));
    let [g] = inner.as_slice() else {
        return Err(no_path());
    };
    let target = simplify(&Expr::div(
        Expr::neg(Expr::sum(rest.into_iter().cloned().collect())),
        Expr::product(outer.into_iter().cloned().collect()),
    ));

    match *g {
        Expr::Pow(base, exp) if !exp.depends_on(var) => {
            let roots = match exp.as_const() {
                Some(n) => real_roots(target, n),
                None => vec![Expr::power(target, Expr::div(Expr::one(), (**exp).clone()))],
            };
            chain(base, roots, var, depth)
        }
        Expr::Pow(base, exp) if !base.depends_on(var) => {
            let solved = Expr::div(
                Expr::apply(Func::Ln, target),
                Expr::apply(Func::Ln, (**base).clone()),
            );
            chain(exp, vec![solved], var, depth)
        }
        Expr::Func(func, arg) => {
            let targets = match func {
                // sin(pi - u) = sin(u)
                Func::Sin => {
                    let principal = Expr::apply(Func::Asin, target);
                    vec![principal.clone(), Expr::sub(Expr::Pi, principal)]
                }
                // cos(-u) = cos(u)
                Func::Cos => {
                    let principal = Expr::apply(Func::Acos, target);
                    vec![principal.clone(), Expr::neg(principal)]
                }
                Func::Exp => vec![Expr::apply(Func::Ln, target)],
                Func::Ln => vec![Expr::apply(Func::Exp, target)],
                Func::Tan => vec![Expr::apply(Func::Atan, target)],
                Func::Asin => vec![Expr::apply(Func::Sin, target)],
                Func::Acos => vec![Expr::apply(Func::Cos, target)],
                Func::Atan => vec![Expr::apply(Func::Tan, target)],
                _ => return Err(no_path()),
            };
            chain(arg, targets, var, depth)
        }
        _ => Err(no_path()),
    }
}

/// Solves `inner = t` for every target `t`.
fn chain(
    inner: &Expr,
    targets: Vec<Expr>,
    var: &str,
    depth: usize,
) -> Result<(Method, Vec<Expr>), UnsolvableCause> {
    let mut roots = Vec::new();
    for target in targets {
        let equation = expand(&Expr::sub(inner.clone(), target));
        let (_, found) = isolate(&equation, var, depth + 1)?;
        roots.extend(found);
    }
    Ok((Method::Inversion, roots))
}

/// Roots of `u^n = target`. Even integer `n` gives both signs of the principal root.
/// Odd integer `n` gives only the real root, `sign(t)*|t|^(1/n)`; its complex
/// companions are not equilibria of a real system and are dropped.
fn real_roots(target: Expr, n: f64) -> Vec<Expr> {
    let integer = n.fract() == 0.0;
    let exponent = Expr::constant(1.0 / n);
    if integer && (n as i64) % 2 != 0 && n.abs() > 1.0 {
        let root = match target.as_const() {
            Some(c) if c < 0.0 => Expr::neg(Expr::power(Expr::constant(-c), exponent)),
            Some(_) => Expr::power(target, exponent),
            None => Expr::product(vec![
                Expr::apply(Func::Sign, target.clone()),
                Expr::power(Expr::apply(Func::Abs, target), exponent),
            ]),
        };
        return vec![simplify(&root)];
    }
    let root = simplify(&Expr::power(target, exponent));
    if integer && !root.is_zero() {
        vec![root.clone(), Expr::neg(root)]
    } else {
        vec![root]
    }
}

/// Roots of `a*x^2 + b*x + c`, radicals kept symbolic.
fn quadratic_roots(c: &Expr, b: &Expr, a: &Expr) -> Vec<Expr> {
    if b.is_zero() {
        let target = simplify(&Expr::div(Expr::neg(c.clone()), a.clone()));
        return real_roots(target, 2.0);
    }
    let two_a = Expr::product(vec![Expr::constant(2.0), a.clone()]);
    let discriminant = expand(&Expr::sub(
        Expr::power(b.clone(), Expr::constant(2.0)),
        Expr::product(vec![Expr::constant(4.0), a.clone(), c.clone()]),
    ));
    if discriminant.is_zero() {
        return vec![simplify(&Expr::div(Expr::neg(b.clone()), two_a))];
    }
    let root = Expr::sqrt(discriminant);
    [root.clone(), Expr::neg(root)]
        .into_iter()
        .map(|r| simplify(&Expr::div(Expr::sub(r, b.clone()), two_a.clone())))
        .collect()
}

/// Smallest of the plain, expanded and single-fraction forms.
fn simplify(expr: &Expr) -> Expr {
    let (num, den) = numer_denom(expr);
    let fraction = Expr::div(expand(&num), expand(&den));
    [expand(expr), fraction]
        .into_iter()
        .fold(expr.clone(), |best, candidate| {
            if candidate.complexity() < best.complexity() {
                candidate
            } else {
                best
            }
        })
}

fn verify(
    model: &SymbolicModel,
    leaf: Branch,
    denominators: &[Expr],
    settings: &SolverSettings,
) -> Result<EquilibriumSolution, UnsolvableCause> {
    let bindings: BTreeMap<String, Expr> = leaf.solved.into_iter().collect();
    let assignments: Vec<(String, Expr)> = model
        .variables()
        .iter()
        .map(|v| {
            let value = bindings.get(v).cloned().unwrap_or_else(|| Expr::symbol(v.as_str()));
            (v.clone(), value)
        })
        .collect();

    let describe = || {
        assignments
            .iter()
            .map(|(name, value)| format!("{name} = {value}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let degenerate = |reason: String| UnsolvableCause::DegenerateBranch {
        detail: format!("{} ({reason})", describe()),
    };

    if let Some((name, value)) = assignments.iter().find(|(_, value)| value.is_undefined()) {
        return Err(degenerate(format!("{name} = {value} is undefined")));
    }
    for den in denominators {
        if is_identically_zero(&den.substitute(&bindings)) {
            return Err(degenerate(format!("denominator {den} vanishes")));
        }
    }
    for (variable, rhs) in model.equations() {
        let residual = rhs.substitute(&bindings);
        if residual.is_undefined() {
            return Err(degenerate(format!("d{variable}/dt is undefined")));
        }
        if is_identically_zero(&residual) || vanishes_numerically(&residual, settings) {
            continue;
        }
        return Err(degenerate(format!("d{variable}/dt = {residual} does not vanish")));
    }

    Ok(EquilibriumSolution {
        assignments,
        free_variables: leaf.open,
    })
}

/// Deterministic, generic-looking sample value for symbol `i` in sample `k`.
fn sample_value(i: usize, k: usize) -> f64 {
    0.7 + 0.37 * i as f64 + 0.53 * k as f64
}

/// Numeric check at sample parameter values. Samples that hit a singularity are
/// inconclusive; at least one must be conclusive and none may fail.
fn vanishes_numerically(expr: &Expr, settings: &SolverSettings) -> bool {
    let symbols: Vec<String> = expr.free_symbols().into_iter().collect();
    let mut conclusive = 0;
    for k in 0..settings.verification_samples {
        let values: ParameterAssignment = symbols
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), sample_value(i, k)))
            .collect();
        let residual = expr.eval_unchecked(&values);
        let scale: f64 = expr
            .terms()
            .iter()
            .map(|t| t.eval_unchecked(&values).norm())
            .sum();
        if !residual.is_finite() || !scale.is_finite() {
            continue;
        }
        if residual.norm() > settings.verify_tolerance * scale.max(1.0) {
            return false;
        }
        conclusive += 1;
    }
    conclusive > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn sym(name: &str) -> Expr {
        Expr::symbol(name)
    }

    fn assert_round_trip(model: &SymbolicModel, solutions: &[EquilibriumSolution]) {
        for solution in solutions {
            let bindings = solution.bindings();
            for rhs in model.rhs_all() {
                let residual = rhs.substitute(&bindings);
                assert!(
                    is_identically_zero(&residual)
                        || vanishes_numerically(&residual, &SolverSettings::default()),
                    "{solution} leaves residual {residual}"
                );
            }
        }
    }

    #[test]
    fn two_compartment_equilibrium() {
        let model = parse(["dB/dt = A - a12*B", "dP/dt = a12*B - k*P"]).expect("valid");
        let solutions = solve_equilibria(&model).expect("solvable");
        assert_eq!(solutions.len(), 1);
        let solution = &solutions[0];
        assert_eq!(solution.get("B"), Some(&(sym("A") / sym("a12"))));
        assert_eq!(solution.get("P"), Some(&(sym("A") / sym("k"))));
        assert!(solution.free_variables.is_empty());

        let mut values = ParameterAssignment::new();
        values.insert("A".to_string(), 10.0);
        values.insert("a12".to_string(), 0.5);
        values.insert("k".to_string(), 0.2);
        let point = solution.evaluate(&values).expect("all bound");
        assert!((point[0].re - 20.0).abs() < 1e-9);
        assert!((point[1].re - 50.0).abs() < 1e-9);
        assert_round_trip(&model, &solutions);
    }

    #[test]
    fn lotka_volterra_has_two_branches() {
        let model = parse(["dx/dt = a*x - b*x*y", "dy/dt = c*x*y - d*y"]).expect("valid");
        let solutions = solve_equilibria(&model).expect("solvable");
        assert_eq!(solutions.len(), 2);
        let origin = solutions
            .iter()
            .find(|s| s.get("x") == Some(&Expr::zero()))
            .expect("origin branch");
        assert_eq!(origin.get("y"), Some(&Expr::zero()));
        let interior = solutions
            .iter()
            .find(|s| s.get("x") == Some(&(sym("d") / sym("c"))))
            .expect("interior branch");
        assert_eq!(interior.get("y"), Some(&(sym("a") / sym("b"))));
        assert_round_trip(&model, &solutions);
    }

    #[test]
    fn quadratic_yields_both_roots() {
        let model = parse(["dx/dt = x^2 - a"]).expect("valid");
        let solutions = solve_equilibria(&model).expect("solvable");
        let values: Vec<&Expr> = solutions.iter().filter_map(|s| s.get("x")).collect();
        assert_eq!(values.len(), 2);
        assert!(values.contains(&&Expr::sqrt(sym("a"))));
        assert!(values.contains(&&(-Expr::sqrt(sym("a")))));
        assert_round_trip(&model, &solutions);
    }

    #[test]
    fn full_quadratic_round_trips() {
        let model = parse(["dx/dt = x^2 + b*x + c", "dy/dt = x - y"]).expect("valid");
        let solutions = solve_equilibria(&model).expect("solvable");
        assert_eq!(solutions.len(), 2);
        assert_round_trip(&model, &solutions);
    }

    #[test]
    fn exponential_is_inverted() {
        let model = parse(["dx/dt = exp(x) - a"]).expect("valid");
        let solutions = solve_equilibria(&model).expect("solvable");
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].get("x"), Some(&Expr::apply(Func::Ln, sym("a"))));
    }

    #[test]
    fn odd_root_of_negative_constant_is_real() {
        let model = parse(["dx/dt = x^3 + 8"]).expect("valid");
        let solutions = solve_equilibria(&model).expect("solvable");
        assert_eq!(solutions.len(), 1);
        let point = solutions[0]
            .evaluate(&ParameterAssignment::new())
            .expect("no parameters");
        assert!((point[0].re + 2.0).abs() < 1e-12, "x = {}", point[0]);
        assert_eq!(point[0].im, 0.0);
        assert_round_trip(&model, &solutions);
    }

    #[test]
    fn odd_root_follows_sign_of_parameter() {
        let model = parse(["dx/dt = a - x^3"]).expect("valid");
        let solutions = solve_equilibria(&model).expect("solvable");
        assert_eq!(solutions.len(), 1);
        for (a, expected) in [(-27.0, -3.0), (8.0, 2.0)] {
            let values: ParameterAssignment = [("a".to_string(), a)].into_iter().collect();
            let point = solutions[0].evaluate(&values).expect("a bound");
            assert!((point[0].re - expected).abs() < 1e-9, "a = {a}: x = {}", point[0]);
            assert_eq!(point[0].im, 0.0);
        }
    }

    #[test]
    fn sine_and_cosine_keep_both_branches() {
        let sorted_roots = |solutions: &[EquilibriumSolution], values: &ParameterAssignment| {
            let mut roots: Vec<f64> = solutions
                .iter()
                .map(|s| s.evaluate(values).expect("all bound")[0].re)
                .collect();
            roots.sort_by(f64::total_cmp);
            roots
        };

        let model = parse(["dx/dt = sin(x) - a"]).expect("valid");
        let solutions = solve_equilibria(&model).expect("solvable");
        assert_eq!(solutions.len(), 2);
        assert_round_trip(&model, &solutions);
        let values: ParameterAssignment = [("a".to_string(), 0.3)].into_iter().collect();
        let roots = sorted_roots(&solutions, &values);
        assert!((roots[0] - 0.3f64.asin()).abs() < 1e-12);
        assert!((roots[1] - (PI - 0.3f64.asin())).abs() < 1e-12);
        for root in roots {
            assert!((root.sin() - 0.3).abs() < 1e-12);
        }

        let model = parse(["dx/dt = cos(x)"]).expect("valid");
        let solutions = solve_equilibria(&model).expect("solvable");
        assert_eq!(solutions.len(), 2);
        assert_round_trip(&model, &solutions);
        let roots = sorted_roots(&solutions, &ParameterAssignment::new());
        assert!((roots[0] + FRAC_PI_2).abs() < 1e-12);
        assert!((roots[1] - FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn branches_that_zero_a_denominator_are_rejected() {
        let model = parse(["dx/dt = (x^2 - 1)/(x - 1)"]).expect("valid");
        let solutions = solve_equilibria(&model).expect("solvable");
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].get("x"), Some(&Expr::constant(-1.0)));
    }

    #[test]
    fn underdetermined_system_keeps_free_variable() {
        let model = parse(["dx/dt = y - x", "dy/dt = x - y"]).expect("valid");
        let solutions = solve_equilibria(&model).expect("solvable");
        assert_eq!(solutions.len(), 1);
        assert_eq!(solutions[0].free_variables, vec!["y".to_string()]);
        assert_eq!(solutions[0].get("x"), Some(&sym("y")));
        assert_eq!(solutions[0].get("y"), Some(&sym("y")));
    }

    #[test]
    fn constant_rate_is_infeasible() {
        let model = parse(["dx/dt = A"]).expect("valid");
        let err = solve_equilibria(&model).expect_err("A never vanishes generically");
        assert!(err.is_infeasible());
        assert!(err.to_string().contains("no equilibrium points found"));
    }

    #[test]
    fn cubic_reports_unsupported_degree() {
        let model = parse(["dx/dt = x^3 + x + a"]).expect("valid");
        let err = solve_equilibria(&model).expect_err("cubic");
        assert!(!err.is_infeasible());
        assert!(err.causes.iter().any(|c| matches!(
            c,
            UnsolvableCause::UnsupportedDegree { degree: 3, .. }
        )));
    }

    #[test]
    fn transcendental_mix_has_no_algebraic_path() {
        let model = parse(["dx/dt = x - cos(x)"]).expect("valid");
        let err = solve_equilibria(&model).expect_err("Dottie number is not closed form");
        assert!(matches!(
            err.causes.as_slice(),
            [UnsolvableCause::NoAlgebraicPath { .. }]
        ));
    }
}
