//! Error taxonomy shared by the analysis operations.
//!
//! Every operation reports failures through one of these structured types; numeric
//! faults (division by zero, NaN, domain errors) are caught at the operation boundary
//! and re-signalled here instead of escaping as raw floating-point garbage.

use num_complex::Complex;
use serde::Serialize;
use thiserror::Error;

/// A right-hand side that could not be parsed as an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message} (at column {column})")]
pub struct ExpressionError {
    /// 1-based character column inside the expression text.
    pub column: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
pub enum ParseError {
    #[error("no equations were given")]
    EmptySystem,
    #[error("line {line}: expected '=' in \"{text}\"")]
    MissingEquals { line: usize, text: String },
    #[error("line {line}: more than one '=' in \"{text}\"")]
    MultipleEquals { line: usize, text: String },
    #[error("line {line}: left side \"{lhs}\" must have the form d<Name>/dt")]
    InvalidLeftSide { line: usize, lhs: String },
    #[error("line {line}: {source}")]
    InvalidExpression {
        line: usize,
        #[source]
        source: ExpressionError,
    },
    #[error("line {line}: variable '{name}' is declared more than once")]
    DuplicateVariable { line: usize, name: String },
}

impl ParseError {
    /// Line (1-based) the error points at, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::EmptySystem => None,
            ParseError::MissingEquals { line, .. }
            | ParseError::MultipleEquals { line, .. }
            | ParseError::InvalidLeftSide { line, .. }
            | ParseError::InvalidExpression { line, .. }
            | ParseError::DuplicateVariable { line, .. } => Some(*line),
        }
    }
}

/// Why a single solve path produced no equilibrium branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnsolvableCause {
    /// The system reduced to a non-zero expression free of state variables.
    Infeasible { equation: String },
    /// No algebraic rearrangement isolates any state variable.
    NoAlgebraicPath { equation: String },
    /// Polynomial in a state variable beyond the supported closed-form degree.
    UnsupportedDegree {
        variable: String,
        degree: usize,
        equation: String,
    },
    /// A candidate branch was rejected after substitution back into the system.
    DegenerateBranch { detail: String },
    /// Branch enumeration stopped at the configured limit.
    BranchLimit { limit: usize },
}

impl std::fmt::Display for UnsolvableCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnsolvableCause::Infeasible { equation } => {
                write!(f, "equation reduces to {equation} = 0, which has no solution")
            }
            UnsolvableCause::NoAlgebraicPath { equation } => {
                write!(f, "no algebraic solver path for {equation} = 0")
            }
            UnsolvableCause::UnsupportedDegree {
                variable,
                degree,
                equation,
            } => write!(
                f,
                "{equation} = 0 is a degree {degree} polynomial in {variable}"
            ),
            UnsolvableCause::DegenerateBranch { detail } => write!(f, "{detail}"),
            UnsolvableCause::BranchLimit { limit } => {
                write!(f, "stopped after {limit} candidate branches")
            }
        }
    }
}

/// No closed-form equilibrium was found. Non-fatal: the caller reports it and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("no equilibrium points found: {}", join_causes(.causes))]
pub struct UnsolvableSystemError {
    pub causes: Vec<UnsolvableCause>,
}

impl UnsolvableSystemError {
    /// True only when the solve itself proved that no equilibrium exists.
    pub fn is_infeasible(&self) -> bool {
        !self.causes.is_empty()
            && self
                .causes
                .iter()
                .all(|cause| matches!(cause, UnsolvableCause::Infeasible { .. }))
    }
}

fn join_causes(causes: &[UnsolvableCause]) -> String {
    if causes.is_empty() {
        return "solver returned no branches".to_string();
    }
    causes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("cannot differentiate d({equation})/d{variable}: {construct} is not differentiable")]
pub struct DifferentiationError {
    /// Variable whose right-hand side failed (Jacobian row).
    pub equation: String,
    /// Variable differentiated against (Jacobian column).
    pub variable: String,
    pub construct: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("missing value for {}: {}", plural(.missing.len()), .missing.join(", "))]
pub struct MissingParameterError {
    /// Sorted, deduplicated symbol names without a numeric value.
    pub missing: Vec<String>,
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        "parameter"
    } else {
        "parameters"
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum SingularSystemError {
    #[error("Jacobian entry ({row}, {column}) evaluates to {value}")]
    NonFinite {
        row: usize,
        column: usize,
        value: String,
    },
    #[error("{stage} did not converge")]
    NoConvergence { stage: String },
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("sample {index} ({parameter} = {value_of_parameter}) evaluates to the non-real value {value}")]
pub struct ComplexResultError {
    pub index: usize,
    pub parameter: String,
    pub value_of_parameter: f64,
    pub value: Complex<f64>,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum StabilityError {
    #[error(transparent)]
    MissingParameter(#[from] MissingParameterError),
    #[error(transparent)]
    Singular(#[from] SingularSystemError),
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum SweepError {
    #[error("invalid sweep range: {0}")]
    InvalidRange(String),
    #[error(transparent)]
    MissingParameter(#[from] MissingParameterError),
    #[error(transparent)]
    ComplexResult(#[from] ComplexResultError),
}
