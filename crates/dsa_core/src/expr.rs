//! Immutable symbolic expressions kept in a canonical form.
//!
//! Every constructor (`sum`, `product`, `power`, `apply`) normalises its result:
//! nested sums/products are flattened, numeric parts are folded, like terms and
//! like powers are merged, and operands are sorted by a total order. Two
//! expressions that differ only by those rewrites compare equal, which is what the
//! solver relies on to detect cancellation.

use crate::error::MissingParameterError;
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::PI;

/// Relative size below which a folded coefficient is treated as cancelled.
const CANCEL_EPS: f64 = 1e-12;

/// Elementary functions of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Ln,
    Abs,
    Sign,
    Floor,
    Ceil,
    Heaviside,
}

impl Func {
    pub const ALL: [Func; 16] = [
        Func::Sin,
        Func::Cos,
        Func::Tan,
        Func::Asin,
        Func::Acos,
        Func::Atan,
        Func::Sinh,
        Func::Cosh,
        Func::Tanh,
        Func::Exp,
        Func::Ln,
        Func::Abs,
        Func::Sign,
        Func::Floor,
        Func::Ceil,
        Func::Heaviside,
    ];

    /// Resolves a function name as written in an equation. `log` is the natural log.
    pub fn from_name(name: &str) -> Option<Func> {
        if name == "log" {
            return Some(Func::Ln);
        }
        Func::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Asin => "asin",
            Func::Acos => "acos",
            Func::Atan => "atan",
            Func::Sinh => "sinh",
            Func::Cosh => "cosh",
            Func::Tanh => "tanh",
            Func::Exp => "exp",
            Func::Ln => "log",
            Func::Abs => "abs",
            Func::Sign => "sign",
            Func::Floor => "floor",
            Func::Ceil => "ceil",
            Func::Heaviside => "heaviside",
        }
    }

    /// False for the piecewise constructs that have no derivative at their kinks.
    pub fn is_smooth(self) -> bool {
        !matches!(
            self,
            Func::Abs | Func::Sign | Func::Floor | Func::Ceil | Func::Heaviside
        )
    }

    pub fn eval_complex(self, z: Complex<f64>) -> Complex<f64> {
        let real_only = |f: fn(f64) -> f64| {
            if z.im == 0.0 {
                Complex::new(f(z.re), 0.0)
            } else {
                Complex::new(f64::NAN, f64::NAN)
            }
        };
        match self {
            Func::Sin => z.sin(),
            Func::Cos => z.cos(),
            Func::Tan => z.tan(),
            Func::Asin => z.asin(),
            Func::Acos => z.acos(),
            Func::Atan => z.atan(),
            Func::Sinh => z.sinh(),
            Func::Cosh => z.cosh(),
            Func::Tanh => z.tanh(),
            Func::Exp => z.exp(),
            Func::Ln => {
                if z.re == 0.0 && z.im == 0.0 {
                    Complex::new(f64::NEG_INFINITY, 0.0)
                } else {
                    z.ln()
                }
            }
            Func::Abs => Complex::new(z.norm(), 0.0),
            Func::Sign => real_only(sign),
            Func::Floor => real_only(f64::floor),
            Func::Ceil => real_only(f64::ceil),
            Func::Heaviside => real_only(heaviside),
        }
    }

    /// Exact values at special arguments; anything else stays symbolic.
    fn fold(self, c: f64) -> Option<f64> {
        match self {
            Func::Sin | Func::Tan | Func::Asin | Func::Atan | Func::Sinh | Func::Tanh
                if c == 0.0 =>
            {
                Some(0.0)
            }
            Func::Cos | Func::Cosh | Func::Exp if c == 0.0 => Some(1.0),
            Func::Ln if c == 1.0 => Some(0.0),
            Func::Abs => Some(c.abs()),
            Func::Sign => Some(sign(c)),
            Func::Floor => Some(c.floor()),
            Func::Ceil => Some(c.ceil()),
            Func::Heaviside => Some(heaviside(c)),
            _ => None,
        }
    }
}

pub(crate) fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

pub(crate) fn heaviside(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        0.0
    } else {
        0.5
    }
}

/// Symbolic expression tree.
///
/// Build values through the canonicalising constructors rather than the variants;
/// the variants are public for pattern matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Const(f64),
    Pi,
    Symbol(String),
    Func(Func, Box<Expr>),
    Pow(Box<Expr>, Box<Expr>),
    Mul(Vec<Expr>),
    Add(Vec<Expr>),
}

impl Expr {
    pub fn constant(value: f64) -> Expr {
        // -0.0 and 0.0 must compare equal under the total order.
        Expr::Const(if value == 0.0 { 0.0 } else { value })
    }

    pub fn zero() -> Expr {
        Expr::Const(0.0)
    }

    pub fn one() -> Expr {
        Expr::Const(1.0)
    }

    pub fn symbol(name: impl Into<String>) -> Expr {
        Expr::Symbol(name.into())
    }

    pub fn neg(expr: Expr) -> Expr {
        Expr::product(vec![Expr::Const(-1.0), expr])
    }

    pub fn sub(lhs: Expr, rhs: Expr) -> Expr {
        Expr::sum(vec![lhs, Expr::neg(rhs)])
    }

    pub fn div(lhs: Expr, rhs: Expr) -> Expr {
        Expr::product(vec![lhs, Expr::power(rhs, Expr::Const(-1.0))])
    }

    pub fn sqrt(expr: Expr) -> Expr {
        Expr::power(expr, Expr::Const(0.5))
    }

    /// Canonical sum: flattened, constants folded, like terms merged.
    pub fn sum(terms: Vec<Expr>) -> Expr {
        let mut constant = 0.0;
        let mut constant_scale = 0.0_f64;
        let mut collected: BTreeMap<Expr, (f64, f64)> = BTreeMap::new();

        let mut stack = terms;
        while let Some(term) = stack.pop() {
            match term {
                Expr::Add(inner) => stack.extend(inner),
                Expr::Const(c) => {
                    constant += c;
                    constant_scale = constant_scale.max(c.abs());
                }
                other => {
                    let (coeff, rest) = other.split_coefficient();
                    let entry = collected.entry(rest).or_insert((0.0, 0.0));
                    entry.0 += coeff;
                    entry.1 = entry.1.max(coeff.abs());
                }
            }
        }

        let mut out = Vec::with_capacity(collected.len() + 1);
        let constant = settle(constant, constant_scale);
        if constant != 0.0 {
            out.push(Expr::Const(constant));
        }
        for (rest, (coeff, scale)) in collected {
            let coeff = settle(coeff, scale);
            if coeff != 0.0 {
                out.push(scale_term(coeff, rest));
            }
        }

        match out.len() {
            0 => Expr::zero(),
            1 => out.pop().unwrap_or_else(Expr::zero),
            _ => Expr::Add(out),
        }
    }

    /// Canonical product: flattened, numeric factors folded, equal bases merged.
    pub fn product(factors: Vec<Expr>) -> Expr {
        let mut coeff = 1.0;
        let mut powers: BTreeMap<Expr, Vec<Expr>> = BTreeMap::new();

        let mut stack = factors;
        while let Some(factor) = stack.pop() {
            match factor {
                Expr::Mul(inner) => stack.extend(inner),
                Expr::Const(c) => coeff *= c,
                Expr::Pow(base, exp) => powers.entry(*base).or_default().push(*exp),
                other => powers.entry(other).or_default().push(Expr::one()),
            }
        }

        let mut out = Vec::with_capacity(powers.len() + 1);
        for (base, exponents) in powers {
            match Expr::power(base, Expr::sum(exponents)) {
                Expr::Const(c) => coeff *= c,
                Expr::Mul(inner) => {
                    // (a*b)^n distributed by `power`; re-fold its coefficient.
                    for f in inner {
                        match f {
                            Expr::Const(c) => coeff *= c,
                            other => out.push(other),
                        }
                    }
                }
                other => out.push(other),
            }
        }

        if coeff == 0.0 {
            return match out.into_iter().find(Expr::is_undefined) {
                Some(undefined) => undefined,
                None => Expr::zero(),
            };
        }
        if out.len() != out.iter().map(Expr::base_key).collect::<BTreeSet<_>>().len() {
            // Distributed powers can collide with existing bases; merge once more.
            let mut again = out;
            again.push(Expr::Const(tidy(coeff)));
            return Expr::product(again);
        }
        out.sort_by(|a, b| a.base_key().cmp(b.base_key()));

        let coeff = tidy(coeff);
        if out.is_empty() {
            return Expr::constant(coeff);
        }
        if coeff == 1.0 && out.len() == 1 {
            return out.pop().unwrap_or_else(Expr::one);
        }
        if coeff != 1.0 {
            out.insert(0, Expr::Const(coeff));
        }
        Expr::Mul(out)
    }

    /// Canonical power.
    pub fn power(base: Expr, exp: Expr) -> Expr {
        match (&base, &exp) {
            (_, Expr::Const(e)) if *e == 0.0 => Expr::one(),
            (_, Expr::Const(e)) if *e == 1.0 => base,
            (Expr::Const(b), _) if *b == 1.0 => Expr::one(),
            (Expr::Const(b), Expr::Const(e)) => match fold_power(*b, *e) {
                Some(v) => Expr::constant(v),
                None => Expr::Pow(Box::new(base), Box::new(exp)),
            },
            (Expr::Pow(inner_base, inner_exp), Expr::Const(e)) if e.fract() == 0.0 => {
                let combined = Expr::product(vec![(**inner_exp).clone(), exp.clone()]);
                Expr::power((**inner_base).clone(), combined)
            }
            (Expr::Mul(factors), Expr::Const(e)) if e.fract() == 0.0 => {
                let distributed = factors
                    .iter()
                    .map(|f| Expr::power(f.clone(), exp.clone()))
                    .collect();
                Expr::product(distributed)
            }
            _ => Expr::Pow(Box::new(base), Box::new(exp)),
        }
    }

    /// Canonical function application.
    pub fn apply(func: Func, arg: Expr) -> Expr {
        if let Expr::Const(c) = arg {
            if let Some(v) = func.fold(c) {
                return Expr::constant(v);
            }
        }
        match (func, &arg) {
            (Func::Exp, Expr::Func(Func::Ln, inner)) => (**inner).clone(),
            (Func::Ln, Expr::Func(Func::Exp, inner)) => (**inner).clone(),
            (Func::Abs, Expr::Func(Func::Abs, _)) => arg,
            _ => Expr::Func(func, Box::new(arg)),
        }
    }

    /// Euler's number, kept exact as `exp(1)`.
    pub fn euler() -> Expr {
        Expr::Func(Func::Exp, Box::new(Expr::one()))
    }

    pub fn as_const(&self) -> Option<f64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(c) if *c == 0.0)
    }

    /// Contains a literal singularity such as `0^-1` or `log(0)`.
    pub fn is_undefined(&self) -> bool {
        match self {
            Expr::Pow(base, exp) => {
                let singular = base.is_zero() && matches!(**exp, Expr::Const(e) if e < 0.0);
                singular || base.is_undefined() || exp.is_undefined()
            }
            Expr::Func(Func::Ln, arg) => arg.is_zero() || arg.is_undefined(),
            Expr::Func(_, arg) => arg.is_undefined(),
            Expr::Mul(items) | Expr::Add(items) => items.iter().any(Expr::is_undefined),
            Expr::Const(c) => !c.is_finite(),
            Expr::Pi | Expr::Symbol(_) => false,
        }
    }

    pub fn free_symbols(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_symbols(&mut out);
        out
    }

    pub(crate) fn collect_symbols(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Symbol(name) => {
                out.insert(name.clone());
            }
            Expr::Const(_) | Expr::Pi => {}
            Expr::Func(_, arg) => arg.collect_symbols(out),
            Expr::Pow(base, exp) => {
                base.collect_symbols(out);
                exp.collect_symbols(out);
            }
            Expr::Mul(items) | Expr::Add(items) => {
                for item in items {
                    item.collect_symbols(out);
                }
            }
        }
    }

    pub fn depends_on(&self, name: &str) -> bool {
        match self {
            Expr::Symbol(s) => s == name,
            Expr::Const(_) | Expr::Pi => false,
            Expr::Func(_, arg) => arg.depends_on(name),
            Expr::Pow(base, exp) => base.depends_on(name) || exp.depends_on(name),
            Expr::Mul(items) | Expr::Add(items) => items.iter().any(|i| i.depends_on(name)),
        }
    }

    pub fn depends_on_any(&self, names: &[String]) -> bool {
        names.iter().any(|n| self.depends_on(n))
    }

    /// Replaces symbols by expressions and re-canonicalises.
    pub fn substitute(&self, bindings: &BTreeMap<String, Expr>) -> Expr {
        if bindings.is_empty() {
            return self.clone();
        }
        match self {
            Expr::Symbol(name) => bindings.get(name).cloned().unwrap_or_else(|| self.clone()),
            Expr::Const(_) | Expr::Pi => self.clone(),
            Expr::Func(f, arg) => Expr::apply(*f, arg.substitute(bindings)),
            Expr::Pow(base, exp) => Expr::power(base.substitute(bindings), exp.substitute(bindings)),
            Expr::Mul(items) => Expr::product(items.iter().map(|i| i.substitute(bindings)).collect()),
            Expr::Add(items) => Expr::sum(items.iter().map(|i| i.substitute(bindings)).collect()),
        }
    }

    pub fn substitute_one(&self, name: &str, value: &Expr) -> Expr {
        if !self.depends_on(name) {
            return self.clone();
        }
        let mut bindings = BTreeMap::new();
        bindings.insert(name.to_string(), value.clone());
        self.substitute(&bindings)
    }

    /// Number of nodes; used to prefer simpler rearrangements.
    pub fn complexity(&self) -> usize {
        match self {
            Expr::Const(_) | Expr::Pi | Expr::Symbol(_) => 1,
            Expr::Func(_, arg) => 1 + arg.complexity(),
            Expr::Pow(base, exp) => 1 + base.complexity() + exp.complexity(),
            Expr::Mul(items) | Expr::Add(items) => {
                1 + items.iter().map(Expr::complexity).sum::<usize>()
            }
        }
    }

    /// Evaluates in complex arithmetic so radicals of negative quantities survive.
    ///
    /// Every free symbol must have a value; the error lists all that do not.
    /// Division by zero and domain faults show up as non-finite components of the
    /// result, which callers must check.
    pub fn evaluate(
        &self,
        values: &BTreeMap<String, f64>,
    ) -> Result<Complex<f64>, MissingParameterError> {
        let missing: Vec<String> = self
            .free_symbols()
            .into_iter()
            .filter(|name| !values.contains_key(name))
            .collect();
        if !missing.is_empty() {
            return Err(MissingParameterError { missing });
        }
        Ok(self.eval_unchecked(values))
    }

    pub(crate) fn eval_unchecked(&self, values: &BTreeMap<String, f64>) -> Complex<f64> {
        match self {
            Expr::Const(c) => Complex::new(*c, 0.0),
            Expr::Pi => Complex::new(PI, 0.0),
            Expr::Symbol(name) => Complex::new(values.get(name).copied().unwrap_or(f64::NAN), 0.0),
            Expr::Func(f, arg) => f.eval_complex(arg.eval_unchecked(values)),
            Expr::Pow(base, exp) => {
                complex_pow(base.eval_unchecked(values), exp.eval_unchecked(values))
            }
            Expr::Mul(items) => items
                .iter()
                .fold(Complex::new(1.0, 0.0), |acc, i| acc * i.eval_unchecked(values)),
            Expr::Add(items) => items
                .iter()
                .fold(Complex::new(0.0, 0.0), |acc, i| acc + i.eval_unchecked(values)),
        }
    }

    /// Terms of a sum (or the expression itself).
    pub fn terms(&self) -> &[Expr] {
        match self {
            Expr::Add(items) => items,
            other => std::slice::from_ref(other),
        }
    }

    /// Factors of a product (or the expression itself).
    pub fn factors(&self) -> &[Expr] {
        match self {
            Expr::Mul(items) => items,
            other => std::slice::from_ref(other),
        }
    }

    /// Splits `c * rest` into its numeric coefficient and the remainder.
    pub fn split_coefficient(self) -> (f64, Expr) {
        match self {
            Expr::Const(c) => (c, Expr::one()),
            Expr::Mul(mut items) => match items.first() {
                Some(Expr::Const(c)) => {
                    let c = *c;
                    items.remove(0);
                    if items.len() == 1 {
                        (c, items.pop().unwrap_or_else(Expr::one))
                    } else {
                        (c, Expr::Mul(items))
                    }
                }
                _ => (1.0, Expr::Mul(items)),
            },
            other => (1.0, other),
        }
    }

    /// Base and exponent of a factor (`x` is `x^1`).
    pub fn as_base_exp(&self) -> (&Expr, Expr) {
        match self {
            Expr::Pow(base, exp) => (base, (**exp).clone()),
            other => (other, Expr::one()),
        }
    }

    fn base_key(&self) -> &Expr {
        match self {
            Expr::Pow(base, _) => base,
            other => other,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Expr::Const(_) => 0,
            Expr::Pi => 1,
            Expr::Symbol(_) => 2,
            Expr::Func(..) => 3,
            Expr::Pow(..) => 4,
            Expr::Mul(_) => 5,
            Expr::Add(_) => 6,
        }
    }
}

fn scale_term(coeff: f64, rest: Expr) -> Expr {
    if coeff == 1.0 {
        return rest;
    }
    match rest {
        Expr::Const(c) => Expr::constant(coeff * c),
        Expr::Mul(mut items) => {
            items.insert(0, Expr::Const(coeff));
            Expr::Mul(items)
        }
        other => Expr::Mul(vec![Expr::Const(coeff), other]),
    }
}

/// Snaps a folded sum to zero when it is pure round-off relative to its inputs.
fn settle(value: f64, scale: f64) -> f64 {
    if value.abs() <= CANCEL_EPS * scale {
        0.0
    } else {
        tidy(value)
    }
}

/// Rounds values within round-off of an integer.
pub(crate) fn tidy(value: f64) -> f64 {
    let rounded = value.round();
    if value != rounded && (value - rounded).abs() <= CANCEL_EPS * value.abs().max(1.0) {
        rounded
    } else if value == 0.0 {
        0.0
    } else {
        value
    }
}

/// Folds `b^e` for numeric operands when the result stays exact; irrational radicals
/// and singular powers stay symbolic.
fn fold_power(b: f64, e: f64) -> Option<f64> {
    if b == 0.0 {
        return (e > 0.0).then_some(0.0);
    }
    if e.fract() == 0.0 && e.abs() <= 1024.0 {
        let v = b.powi(e as i32);
        return v.is_finite().then(|| tidy(v));
    }
    if b > 0.0 {
        let v = b.powf(e);
        let exact_integer = v.fract() == 0.0;
        let exact_root = e == 0.5 && v * v == b;
        if v.is_finite() && (exact_integer || exact_root) {
            return Some(v);
        }
    }
    None
}

fn complex_pow(base: Complex<f64>, exp: Complex<f64>) -> Complex<f64> {
    if exp.im == 0.0 {
        if base.re == 0.0 && base.im == 0.0 {
            return if exp.re > 0.0 {
                Complex::new(0.0, 0.0)
            } else {
                Complex::new(f64::INFINITY, f64::NAN)
            };
        }
        if exp.re.fract() == 0.0 && exp.re.abs() <= i32::MAX as f64 {
            return base.powi(exp.re as i32);
        }
        if base.im == 0.0 && base.re > 0.0 {
            return Complex::new(base.re.powf(exp.re), 0.0);
        }
        return base.powf(exp.re);
    }
    base.powc(exp)
}

impl Ord for Expr {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Expr::Const(a), Expr::Const(b)) => a.total_cmp(b),
            (Expr::Pi, Expr::Pi) => Ordering::Equal,
            (Expr::Symbol(a), Expr::Symbol(b)) => a.cmp(b),
            (Expr::Func(fa, a), Expr::Func(fb, b)) => fa.cmp(fb).then_with(|| a.cmp(b)),
            (Expr::Pow(ba, ea), Expr::Pow(bb, eb)) => ba.cmp(bb).then_with(|| ea.cmp(eb)),
            (Expr::Mul(a), Expr::Mul(b)) | (Expr::Add(a), Expr::Add(b)) => a.iter().cmp(b.iter()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Expr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Expr {}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::constant(value)
    }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        Expr::symbol(name)
    }
}

impl std::ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::sum(vec![self, rhs])
    }
}

impl std::ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::sub(self, rhs)
    }
}

impl std::ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::product(vec![self, rhs])
    }
}

impl std::ops::Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::div(self, rhs)
    }
}

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::neg(self)
    }
}
