//! Rewrites used by the equilibrium solver: expansion, common denominators,
//! polynomial coefficients and zero-factor splitting.

use crate::expr::{Expr, Func};
use std::collections::BTreeMap;

/// Largest integer power of a sum that `expand` multiplies out.
const MAX_EXPANDED_POWER: f64 = 8.0;

/// Distributes products over sums and multiplies out small integer powers of sums.
pub fn expand(expr: &Expr) -> Expr {
    match expr {
        Expr::Const(_) | Expr::Pi | Expr::Symbol(_) => expr.clone(),
        Expr::Func(f, arg) => Expr::apply(*f, expand(arg)),
        Expr::Add(terms) => Expr::sum(terms.iter().map(expand).collect()),
        Expr::Mul(factors) => {
            let mut acc = Expr::one();
            for factor in factors {
                acc = multiply_out(&acc, &expand(factor));
            }
            acc
        }
        Expr::Pow(base, exp) => {
            let base = expand(base);
            let exp = expand(exp);
            match (&base, exp.as_const()) {
                (Expr::Add(_), Some(n)) if n > 1.0 && n.fract() == 0.0 && n <= MAX_EXPANDED_POWER => {
                    let mut acc = base.clone();
                    for _ in 1..(n as usize) {
                        acc = multiply_out(&acc, &base);
                    }
                    acc
                }
                _ => Expr::power(base, exp),
            }
        }
    }
}

/// Product of two expanded expressions, distributed term by term.
fn multiply_out(lhs: &Expr, rhs: &Expr) -> Expr {
    let mut out = Vec::with_capacity(lhs.terms().len() * rhs.terms().len());
    for a in lhs.terms() {
        for b in rhs.terms() {
            let term = Expr::product(vec![a.clone(), b.clone()]);
            // Merged powers can surface a new sum (sqrt(d)*sqrt(d) = d).
            if needs_expansion(&term) {
                out.push(expand(&term));
            } else {
                out.push(term);
            }
        }
    }
    Expr::sum(out)
}

fn needs_expansion(term: &Expr) -> bool {
    match term {
        Expr::Add(_) => false,
        Expr::Mul(factors) => factors.iter().any(|f| match f {
            Expr::Add(_) => true,
            Expr::Pow(base, exp) => {
                matches!(**base, Expr::Add(_))
                    && matches!(exp.as_const(), Some(n) if n > 1.0 && n.fract() == 0.0 && n <= MAX_EXPANDED_POWER)
            }
            _ => false,
        }),
        _ => false,
    }
}

/// Splits an expression into numerator and denominator over a common denominator.
pub fn numer_denom(expr: &Expr) -> (Expr, Expr) {
    match expr {
        Expr::Const(_) | Expr::Pi | Expr::Symbol(_) | Expr::Func(..) => (expr.clone(), Expr::one()),
        Expr::Pow(base, exp) => match exp.as_const() {
            Some(n) if n < 0.0 && n.fract() == 0.0 => {
                let (num, den) = numer_denom(base);
                let k = Expr::constant(-n);
                (Expr::power(den, k.clone()), Expr::power(num, k))
            }
            Some(n) if n < 0.0 => (Expr::one(), Expr::power((**base).clone(), Expr::constant(-n))),
            Some(n) if n > 0.0 && n.fract() == 0.0 => {
                let (num, den) = numer_denom(base);
                (Expr::power(num, (**exp).clone()), Expr::power(den, (**exp).clone()))
            }
            _ => (expr.clone(), Expr::one()),
        },
        Expr::Mul(factors) => {
            let mut nums = Vec::with_capacity(factors.len());
            let mut dens = Vec::new();
            for factor in factors {
                let (n, d) = numer_denom(factor);
                nums.push(n);
                dens.push(d);
            }
            (Expr::product(nums), Expr::product(dens))
        }
        Expr::Add(terms) => {
            // Group numerators that already share a denominator.
            let mut groups: BTreeMap<Expr, Vec<Expr>> = BTreeMap::new();
            for term in terms {
                let (n, d) = numer_denom(term);
                groups.entry(d).or_default().push(n);
            }
            let groups: Vec<(Expr, Expr)> = groups
                .into_iter()
                .map(|(den, nums)| (den, Expr::sum(nums)))
                .collect();
            if groups.len() == 1 {
                let (den, num) = groups.into_iter().next().unwrap_or((Expr::one(), Expr::zero()));
                return (num, den);
            }
            let denominator = Expr::product(groups.iter().map(|(d, _)| d.clone()).collect());
            let numerator = Expr::sum(
                groups
                    .iter()
                    .enumerate()
                    .map(|(i, (_, num))| {
                        let mut factors = vec![num.clone()];
                        factors.extend(
                            groups
                                .iter()
                                .enumerate()
                                .filter(|(j, _)| *j != i)
                                .map(|(_, (d, _))| d.clone()),
                        );
                        Expr::product(factors)
                    })
                    .collect(),
            );
            (numerator, denominator)
        }
    }
}

/// Expanded numerator of `expr`; `expr = 0` wherever it is defined iff this is zero.
pub fn zero_numerator(expr: &Expr) -> Expr {
    let (num, _) = numer_denom(expr);
    expand(&num)
}

/// True when `expr` simplifies to zero after bringing it over a common denominator.
pub fn is_identically_zero(expr: &Expr) -> bool {
    zero_numerator(expr).is_zero()
}

/// Coefficients `c_0..c_n` of an expanded expression seen as a polynomial in `var`,
/// or `None` when `var` appears other than through non-negative integer powers.
pub fn polynomial_coefficients(expr: &Expr, var: &str) -> Option<Vec<Expr>> {
    let mut buckets: Vec<Vec<Expr>> = Vec::new();
    for term in expr.terms() {
        let (degree, coeff) = monomial_degree(term, var)?;
        if buckets.len() <= degree {
            buckets.resize_with(degree + 1, Vec::new);
        }
        buckets[degree].push(coeff);
    }
    let mut coeffs: Vec<Expr> = buckets.into_iter().map(Expr::sum).collect();
    while coeffs.len() > 1 && coeffs.last().is_some_and(Expr::is_zero) {
        coeffs.pop();
    }
    Some(coeffs)
}

fn monomial_degree(term: &Expr, var: &str) -> Option<(usize, Expr)> {
    if !term.depends_on(var) {
        return Some((0, term.clone()));
    }
    let mut degree = None;
    let mut rest = Vec::new();
    for factor in term.factors() {
        if !factor.depends_on(var) {
            rest.push(factor.clone());
            continue;
        }
        if degree.is_some() {
            return None;
        }
        degree = Some(match factor {
            Expr::Symbol(name) if name == var => 1,
            Expr::Pow(base, exp) if matches!(&**base, Expr::Symbol(name) if name == var) => {
                match exp.as_const() {
                    Some(n) if n > 0.0 && n.fract() == 0.0 => n as usize,
                    _ => return None,
                }
            }
            _ => return None,
        });
    }
    degree.map(|d| (d, Expr::product(rest)))
}

/// Factors whose vanishing makes `expr` (an expanded numerator) vanish.
///
/// Pulls out factors common to every term of a sum, splits products, and drops
/// factors that can never be zero (non-zero constants, `exp(..)`, negative powers).
pub fn zero_factors(expr: &Expr) -> Vec<Expr> {
    let mut out = Vec::new();
    collect_zero_factors(expr, &mut out);
    out.sort();
    out.dedup();
    out
}

fn collect_zero_factors(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Const(_) | Expr::Pi => {}
        Expr::Func(Func::Exp, _) => {}
        Expr::Mul(factors) => {
            for factor in factors {
                collect_zero_factors(factor, out);
            }
        }
        Expr::Pow(base, exp) => match exp.as_const() {
            Some(n) if n > 0.0 => collect_zero_factors(base, out),
            Some(_) => {}
            None => out.push(expr.clone()),
        },
        Expr::Add(terms) => {
            let common = common_factors(terms);
            if common.is_empty() {
                out.push(expr.clone());
                return;
            }
            let divisor: Vec<Expr> = common
                .iter()
                .map(|(base, exp)| Expr::power(base.clone(), Expr::constant(-exp)))
                .collect();
            let remainder = Expr::sum(
                terms
                    .iter()
                    .map(|t| {
                        let mut factors = vec![t.clone()];
                        factors.extend(divisor.iter().cloned());
                        Expr::product(factors)
                    })
                    .collect(),
            );
            for (base, _) in &common {
                collect_zero_factors(base, out);
            }
            collect_zero_factors(&expand(&remainder), out);
        }
        Expr::Symbol(_) | Expr::Func(..) => out.push(expr.clone()),
    }
}

/// Non-constant bases present with a positive numeric exponent in every term,
/// paired with the smallest such exponent.
fn common_factors(terms: &[Expr]) -> Vec<(Expr, f64)> {
    let mut common: Option<BTreeMap<Expr, f64>> = None;
    for term in terms {
        let mut present: BTreeMap<Expr, f64> = BTreeMap::new();
        for factor in term.factors() {
            if matches!(factor, Expr::Const(_)) {
                continue;
            }
            let (base, exp) = factor.as_base_exp();
            if let Some(n) = exp.as_const() {
                if n > 0.0 && !matches!(base, Expr::Const(_)) {
                    present.insert(base.clone(), n);
                }
            }
        }
        common = Some(match common {
            None => present,
            Some(previous) => previous
                .into_iter()
                .filter_map(|(base, n)| present.get(&base).map(|m| (base, n.min(*m))))
                .collect(),
        });
    }
    common.unwrap_or_default().into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> Expr {
        Expr::symbol(name)
    }

    #[test]
    fn expand_distributes_and_squares() {
        let x = sym("x");
        let y = sym("y");
        let squared = Expr::power(x.clone() + y.clone(), Expr::constant(2.0));
        let expected = Expr::power(x.clone(), Expr::constant(2.0))
            + Expr::constant(2.0) * x.clone() * y.clone()
            + Expr::power(y, Expr::constant(2.0));
        assert_eq!(expand(&squared), expected);
    }

    #[test]
    fn expand_collapses_squared_radicals() {
        let d = sym("a") + sym("b");
        let root = Expr::sqrt(d);
        let expr = (Expr::one() + root.clone()) * (Expr::one() - root);
        assert_eq!(expand(&expr), Expr::one() - sym("a") - sym("b"));
    }

    #[test]
    fn numer_denom_combines_fractions() {
        let expr = sym("V") * sym("S") / (sym("K") + sym("S")) - sym("k") * sym("S");
        let (num, den) = numer_denom(&expr);
        assert_eq!(den, sym("K") + sym("S"));
        let expected = sym("S") * sym("V") - sym("k") * sym("S") * (sym("K") + sym("S"));
        assert_eq!(expand(&num), expand(&expected));
    }

    #[test]
    fn polynomial_coefficients_of_quadratic() {
        let x = sym("x");
        let expr = expand(&(sym("a") * Expr::power(x.clone(), Expr::constant(2.0)) + sym("b") * x - Expr::one()));
        let coeffs = polynomial_coefficients(&expr, "x").expect("polynomial in x");
        assert_eq!(coeffs, vec![Expr::constant(-1.0), sym("b"), sym("a")]);
        assert!(polynomial_coefficients(&Expr::apply(Func::Sin, sym("x")), "x").is_none());
    }

    #[test]
    fn zero_factors_pull_out_common_terms() {
        // a*x - b*x*y = x*(a - b*y)
        let expr = sym("a") * sym("x") - sym("b") * sym("x") * sym("y");
        let factors = zero_factors(&expr);
        assert_eq!(factors.len(), 2);
        assert!(factors.contains(&sym("x")));
        assert!(factors.contains(&(sym("a") - sym("b") * sym("y"))));
    }

    #[test]
    fn zero_factors_skip_nonvanishing_parts() {
        let expr = Expr::constant(3.0) * Expr::apply(Func::Exp, sym("x")) * sym("y");
        assert_eq!(zero_factors(&expr), vec![sym("y")]);
    }
}
