//! The symbolic model: state variables, parameters and one right-hand side per variable.

use crate::equation_engine::{is_reserved, parse_expression};
use crate::error::ParseError;
use crate::expr::Expr;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Numeric values for parameters (and, where relevant, free variables).
pub type ParameterAssignment = BTreeMap<String, f64>;

/// A parsed system of first-order ODEs.
///
/// Variables keep declaration order; parameters are sorted. Every free symbol of
/// every right-hand side is one or the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolicModel {
    variables: Vec<String>,
    parameters: Vec<String>,
    rhs: Vec<Expr>,
}

impl SymbolicModel {
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    pub fn dimension(&self) -> usize {
        self.variables.len()
    }

    pub fn index_of(&self, variable: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == variable)
    }

    /// Right-hand side of `d<variable>/dt`.
    pub fn rhs(&self, variable: &str) -> Option<&Expr> {
        self.index_of(variable).map(|i| &self.rhs[i])
    }

    /// Right-hand sides in variable order.
    pub fn rhs_all(&self) -> &[Expr] {
        &self.rhs
    }

    pub fn equations(&self) -> impl Iterator<Item = (&str, &Expr)> {
        self.variables.iter().map(String::as_str).zip(self.rhs.iter())
    }
}

/// Parses `dX/dt = <expression>` lines into a model.
///
/// Blank lines are skipped; line numbers in errors count them.
pub fn parse<I, S>(lines: I) -> Result<SymbolicModel, ParseError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut variables: Vec<String> = Vec::new();
    let mut rhs = Vec::new();

    for (index, line) in lines.into_iter().enumerate() {
        let line_no = index + 1;
        let text = line.as_ref().trim();
        if text.is_empty() {
            continue;
        }

        let mut parts = text.split('=');
        let (lhs, body) = match (parts.next(), parts.next(), parts.next()) {
            (Some(lhs), Some(body), None) => (lhs, body),
            (_, None, _) => {
                return Err(ParseError::MissingEquals {
                    line: line_no,
                    text: text.to_string(),
                })
            }
            _ => {
                return Err(ParseError::MultipleEquals {
                    line: line_no,
                    text: text.to_string(),
                })
            }
        };

        let name = variable_name(lhs).ok_or_else(|| ParseError::InvalidLeftSide {
            line: line_no,
            lhs: lhs.trim().to_string(),
        })?;
        if variables.iter().any(|v| v == name) {
            return Err(ParseError::DuplicateVariable {
                line: line_no,
                name: name.to_string(),
            });
        }

        let expr = parse_expression(body).map_err(|source| ParseError::InvalidExpression {
            line: line_no,
            source,
        })?;
        variables.push(name.to_string());
        rhs.push(expr);
    }

    if variables.is_empty() {
        return Err(ParseError::EmptySystem);
    }

    let declared: BTreeSet<&str> = variables.iter().map(String::as_str).collect();
    let parameters: Vec<String> = rhs
        .iter()
        .flat_map(Expr::free_symbols)
        .filter(|name| !declared.contains(name.as_str()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    debug!(
        "parsed {} equation(s); variables {:?}, parameters {:?}",
        variables.len(),
        variables,
        parameters
    );
    Ok(SymbolicModel {
        variables,
        parameters,
        rhs,
    })
}

/// Extracts `Name` from `dName/dt`.
fn variable_name(lhs: &str) -> Option<&str> {
    let name = lhs.trim().strip_prefix('d')?.strip_suffix("/dt")?.trim();
    let mut chars = name.chars();
    let first = chars.next()?;
    let valid = (first.is_alphabetic() || first == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
        && !is_reserved(name);
    valid.then_some(name)
}
