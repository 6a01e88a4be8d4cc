use crate::expr::{Expr, Func};

/// Symbolic partial derivative of `expr` with respect to `var`.
///
/// Returns the offending function when a piecewise construct (`abs`, `sign`,
/// `floor`, `ceil`, `heaviside`) has an argument that depends on `var`.
pub fn differentiate(expr: &Expr, var: &str) -> Result<Expr, Func> {
    if !expr.depends_on(var) {
        return Ok(Expr::zero());
    }
    match expr {
        Expr::Const(_) | Expr::Pi => Ok(Expr::zero()),
        Expr::Symbol(name) => Ok(if name == var { Expr::one() } else { Expr::zero() }),
        Expr::Add(terms) => {
            let parts = terms
                .iter()
                .map(|t| differentiate(t, var))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::sum(parts))
        }
        Expr::Mul(factors) => {
            // Product rule over n factors.
            let mut terms = Vec::new();
            for (i, factor) in factors.iter().enumerate() {
                let d = differentiate(factor, var)?;
                if d.is_zero() {
                    continue;
                }
                let mut parts = Vec::with_capacity(factors.len());
                parts.push(d);
                parts.extend(
                    factors
                        .iter()
                        .enumerate()
                        .filter(|(j, _)| *j != i)
                        .map(|(_, f)| f.clone()),
                );
                terms.push(Expr::product(parts));
            }
            Ok(Expr::sum(terms))
        }
        Expr::Pow(base, exp) => {
            let base_varies = base.depends_on(var);
            let exp_varies = exp.depends_on(var);
            let b = (**base).clone();
            let e = (**exp).clone();
            if base_varies && !exp_varies {
                let db = differentiate(base, var)?;
                let lowered = Expr::power(b, Expr::sub(e.clone(), Expr::one()));
                return Ok(Expr::product(vec![e, lowered, db]));
            }
            let de = differentiate(exp, var)?;
            if !base_varies {
                let ln_b = Expr::apply(Func::Ln, b);
                return Ok(Expr::product(vec![expr.clone(), ln_b, de]));
            }
            // d(b^e) = b^e * (e' ln b + e b'/b)
            let db = differentiate(base, var)?;
            let inner = Expr::sum(vec![
                Expr::product(vec![de, Expr::apply(Func::Ln, b.clone())]),
                Expr::product(vec![e, db, Expr::power(b, Expr::constant(-1.0))]),
            ]);
            Ok(Expr::product(vec![expr.clone(), inner]))
        }
        Expr::Func(func, arg) => {
            if !func.is_smooth() {
                return Err(*func);
            }
            let inner = differentiate(arg, var)?;
            let a = (**arg).clone();
            let outer = match func {
                Func::Sin => Expr::apply(Func::Cos, a),
                Func::Cos => Expr::neg(Expr::apply(Func::Sin, a)),
                Func::Tan => Expr::power(Expr::apply(Func::Cos, a), Expr::constant(-2.0)),
                Func::Asin => Expr::power(one_minus_square(a), Expr::constant(-0.5)),
                Func::Acos => Expr::neg(Expr::power(one_minus_square(a), Expr::constant(-0.5))),
                Func::Atan => Expr::power(
                    Expr::sum(vec![Expr::one(), Expr::power(a, Expr::constant(2.0))]),
                    Expr::constant(-1.0),
                ),
                Func::Sinh => Expr::apply(Func::Cosh, a),
                Func::Cosh => Expr::apply(Func::Sinh, a),
                Func::Tanh => Expr::sub(
                    Expr::one(),
                    Expr::power(Expr::apply(Func::Tanh, a), Expr::constant(2.0)),
                ),
                Func::Exp => expr.clone(),
                Func::Ln => Expr::power(a, Expr::constant(-1.0)),
                Func::Abs | Func::Sign | Func::Floor | Func::Ceil | Func::Heaviside => {
                    return Err(*func)
                }
            };
            Ok(Expr::product(vec![outer, inner]))
        }
    }
}

fn one_minus_square(a: Expr) -> Expr {
    Expr::sub(Expr::one(), Expr::power(a, Expr::constant(2.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> Expr {
        Expr::symbol(name)
    }

    #[test]
    fn product_and_power_rules() {
        // d/dx (a*x^3) = 3*a*x^2
        let expr = sym("a") * Expr::power(sym("x"), Expr::constant(3.0));
        let d = differentiate(&expr, "x").expect("smooth");
        assert_eq!(
            d,
            Expr::constant(3.0) * sym("a") * Expr::power(sym("x"), Expr::constant(2.0))
        );
    }

    #[test]
    fn chain_rule_through_functions() {
        // d/dx sin(k*x) = k*cos(k*x)
        let arg = sym("k") * sym("x");
        let expr = Expr::apply(Func::Sin, arg.clone());
        let d = differentiate(&expr, "x").expect("smooth");
        assert_eq!(d, sym("k") * Expr::apply(Func::Cos, arg));
    }

    #[test]
    fn quotient_via_negative_power() {
        // d/dS (V*S/(K+S)) = V/(K+S) - V*S/(K+S)^2
        let denom = sym("K") + sym("S");
        let expr = sym("V") * sym("S") / denom.clone();
        let d = differentiate(&expr, "S").expect("smooth");
        let expected = sym("V") / denom.clone()
            - sym("V") * sym("S") * Expr::power(denom, Expr::constant(-2.0));
        assert_eq!(d, expected);
    }

    #[test]
    fn piecewise_constructs_are_rejected_only_when_they_vary() {
        let expr = Expr::apply(Func::Abs, sym("x")) + sym("y");
        assert_eq!(differentiate(&expr, "x"), Err(Func::Abs));
        assert_eq!(differentiate(&expr, "y"), Ok(Expr::one()));
    }
}
