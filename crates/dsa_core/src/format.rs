//! Plain-text and LaTeX rendering of expressions.

use crate::expr::{Expr, Func};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notation {
    Plain,
    Latex,
}

const ADD: u8 = 1;
const MUL: u8 = 2;
const POW: u8 = 3;
const ATOM: u8 = 4;

const GREEK: [&str; 33] = [
    "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "iota", "kappa",
    "lambda", "mu", "nu", "xi", "rho", "sigma", "tau", "upsilon", "phi", "chi", "psi", "omega",
    "Gamma", "Delta", "Theta", "Lambda", "Xi", "Sigma", "Upsilon", "Phi", "Psi", "Omega", "varphi",
];

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(self, Notation::Plain))
    }
}

impl Expr {
    pub fn to_latex(&self) -> String {
        render(self, Notation::Latex)
    }
}

/// LaTeX for a symbol name: greek letters become commands, `A_wake` and `a12`
/// become subscripted.
pub fn latex_symbol(name: &str) -> String {
    let (stem, sub) = match name.split_once('_') {
        Some((stem, sub)) if !stem.is_empty() && !sub.is_empty() => (stem, Some(sub)),
        _ => {
            let digits = name.len() - name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
            if digits > 0 && digits < name.len() {
                let (stem, sub) = name.split_at(name.len() - digits);
                (stem, Some(sub))
            } else {
                (name, None)
            }
        }
    };
    let stem = if GREEK.contains(&stem) {
        format!("\\{stem}")
    } else {
        stem.to_string()
    };
    match sub {
        Some(sub) => format!("{stem}_{{{}}}", sub.replace('_', "\\_")),
        None => stem,
    }
}

/// Formats a number, preferring small-denominator fractions over long decimals.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    match as_fraction(value) {
        Some((p, q)) => format!("{p}/{q}"),
        None => format!("{value}"),
    }
}

fn as_fraction(value: f64) -> Option<(i64, i64)> {
    if !value.is_finite() || value.abs() >= 1e9 {
        return None;
    }
    (2..=1000_i64).find_map(|q| {
        let p = (value * q as f64).round();
        let close = (value - p / q as f64).abs() <= 1e-12 * value.abs().max(1.0);
        close.then_some((p as i64, q))
    })
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Const(c) if *c < 0.0 => ADD,
        Expr::Const(c) if c.fract() != 0.0 && as_fraction(*c).is_some() => MUL,
        Expr::Const(_) | Expr::Pi | Expr::Symbol(_) | Expr::Func(..) => ATOM,
        Expr::Pow(_, exp) => match exp.as_const() {
            Some(e) if e < 0.0 => MUL,
            Some(e) if e == 0.5 => ATOM,
            _ => POW,
        },
        Expr::Mul(factors) => match factors.first() {
            Some(Expr::Const(c)) if *c < 0.0 => ADD,
            _ => MUL,
        },
        Expr::Add(_) => ADD,
    }
}

fn render(expr: &Expr, notation: Notation) -> String {
    match expr {
        Expr::Const(c) => render_const(*c, notation),
        Expr::Pi => match notation {
            Notation::Plain => "pi".to_string(),
            Notation::Latex => "\\pi".to_string(),
        },
        Expr::Symbol(name) => match notation {
            Notation::Plain => name.clone(),
            Notation::Latex => latex_symbol(name),
        },
        Expr::Func(func, arg) => render_func(*func, arg, notation),
        Expr::Pow(base, exp) => match exp.as_const() {
            Some(e) if e < 0.0 => render_mul(std::slice::from_ref(expr), notation),
            Some(e) if e == 0.5 => match notation {
                Notation::Plain => format!("sqrt({})", render(base, notation)),
                Notation::Latex => format!("\\sqrt{{{}}}", render(base, notation)),
            },
            _ => match notation {
                Notation::Plain => format!(
                    "{}^{}",
                    wrap(base, ATOM, notation),
                    wrap(exp, ATOM, notation)
                ),
                Notation::Latex => format!(
                    "{}^{{{}}}",
                    wrap(base, ATOM, notation),
                    render(exp, notation)
                ),
            },
        },
        Expr::Mul(factors) => render_mul(factors, notation),
        Expr::Add(terms) => render_add(terms, notation),
    }
}

fn render_const(value: f64, notation: Notation) -> String {
    if notation == Notation::Latex && value.fract() != 0.0 {
        if let Some((p, q)) = as_fraction(value) {
            let sign = if p < 0 { "-" } else { "" };
            return format!("{sign}\\frac{{{}}}{{{q}}}", p.abs());
        }
    }
    format_number(value)
}

fn wrap(expr: &Expr, min: u8, notation: Notation) -> String {
    let inner = render(expr, notation);
    if precedence(expr) >= min {
        return inner;
    }
    match notation {
        Notation::Plain => format!("({inner})"),
        Notation::Latex => format!("\\left({inner}\\right)"),
    }
}

fn render_func(func: Func, arg: &Expr, notation: Notation) -> String {
    if func == Func::Exp && *arg == Expr::one() {
        return match notation {
            Notation::Plain => "E".to_string(),
            Notation::Latex => "e".to_string(),
        };
    }
    let inner = render(arg, notation);
    match notation {
        Notation::Plain => format!("{}({inner})", func.name()),
        Notation::Latex => match func {
            Func::Exp => format!("e^{{{inner}}}"),
            Func::Abs => format!("\\left|{inner}\\right|"),
            Func::Floor => format!("\\left\\lfloor{{{inner}}}\\right\\rfloor"),
            Func::Ceil => format!("\\left\\lceil{{{inner}}}\\right\\rceil"),
            Func::Heaviside => format!("\\theta\\left({inner}\\right)"),
            Func::Sign => format!("\\operatorname{{sign}}\\left({inner}\\right)"),
            Func::Asin => format!("\\arcsin\\left({inner}\\right)"),
            Func::Acos => format!("\\arccos\\left({inner}\\right)"),
            Func::Atan => format!("\\arctan\\left({inner}\\right)"),
            _ => format!("\\{}\\left({inner}\\right)", func.name()),
        },
    }
}

fn render_mul(factors: &[Expr], notation: Notation) -> String {
    let mut coeff = 1.0;
    let mut numerator: Vec<String> = Vec::new();
    let mut denominator: Vec<(String, bool)> = Vec::new();

    for factor in factors {
        match factor {
            Expr::Const(c) => coeff *= c,
            Expr::Pow(base, exp) if exp.as_const().is_some_and(|e| e < 0.0) => {
                let flipped = Expr::power((**base).clone(), Expr::neg((**exp).clone()));
                let atomic = precedence(&flipped) >= POW;
                denominator.push((wrap(&flipped, MUL + 1, notation), atomic));
            }
            other => numerator.push(wrap(other, MUL + 1, notation)),
        }
    }

    let negative = coeff < 0.0;
    let magnitude = coeff.abs();
    if magnitude.fract() == 0.0 {
        if magnitude != 1.0 {
            numerator.insert(0, format_number(magnitude));
        }
    } else if let Some((p, q)) = as_fraction(magnitude) {
        if p != 1 {
            numerator.insert(0, p.to_string());
        }
        denominator.insert(0, (q.to_string(), true));
    } else {
        numerator.insert(0, format_number(magnitude));
    }

    let sep = match notation {
        Notation::Plain => "*",
        Notation::Latex => " ",
    };
    let num = if numerator.is_empty() {
        "1".to_string()
    } else {
        numerator.join(sep)
    };
    let sign = if negative { "-" } else { "" };
    if denominator.is_empty() {
        return format!("{sign}{num}");
    }
    let den = denominator
        .iter()
        .map(|(s, _)| s.as_str())
        .collect::<Vec<_>>()
        .join(sep);
    match notation {
        Notation::Latex => format!("{sign}\\frac{{{num}}}{{{den}}}"),
        Notation::Plain => {
            let num = if numerator.len() > 1 { format!("({num})") } else { num };
            let den = if denominator.len() == 1 && denominator[0].1 {
                den
            } else {
                format!("({den})")
            };
            format!("{sign}{num}/{den}")
        }
    }
}

fn is_negative_term(term: &Expr) -> bool {
    match term {
        Expr::Const(c) => *c < 0.0,
        Expr::Mul(factors) => matches!(factors.first(), Some(Expr::Const(c)) if *c < 0.0),
        _ => false,
    }
}

fn render_add(terms: &[Expr], notation: Notation) -> String {
    // Constants print last: "x + 1" rather than "1 + x".
    let ordered = terms
        .iter()
        .filter(|t| !matches!(t, Expr::Const(_)))
        .chain(terms.iter().filter(|t| matches!(t, Expr::Const(_))));
    let mut out = String::new();
    for (i, term) in ordered.enumerate() {
        if i == 0 {
            out.push_str(&render(term, notation));
        } else if is_negative_term(term) {
            out.push_str(" - ");
            out.push_str(&wrap(&Expr::neg(term.clone()), ADD + 1, notation));
        } else {
            out.push_str(" + ");
            out.push_str(&render(term, notation));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str) -> Expr {
        Expr::symbol(name)
    }

    #[test]
    fn plain_text_reads_naturally() {
        assert_eq!((sym("A") / sym("a12")).to_string(), "A/a12");
        assert_eq!((sym("A") - sym("k") * sym("P")).to_string(), "A - P*k");
        assert_eq!((-sym("x")).to_string(), "-x");
        assert_eq!(
            (sym("A") / (Expr::constant(2.0) * sym("a"))).to_string(),
            "A/(2*a)"
        );
        assert_eq!(
            (Expr::sqrt(sym("d")) / sym("a")).to_string(),
            "sqrt(d)/a"
        );
        assert_eq!(
            Expr::power(sym("x") + Expr::one(), Expr::constant(2.0)).to_string(),
            "(x + 1)^2"
        );
    }

    #[test]
    fn latex_uses_fractions_and_subscripts() {
        assert_eq!((sym("A") / sym("a12")).to_latex(), "\\frac{A}{a_{12}}");
        assert_eq!(sym("sigma_bc").to_latex(), "\\sigma_{bc}");
        assert_eq!(Expr::sqrt(sym("x")).to_latex(), "\\sqrt{x}");
    }

    #[test]
    fn numbers_prefer_short_fractions() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(1.0 / 3.0), "1/3");
        assert_eq!(format_number(-0.25), "-1/4");
    }
}
