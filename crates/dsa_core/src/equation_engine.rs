use crate::error::{ExpressionError, MissingParameterError};
use crate::expr::{self, Expr, Func};
use crate::model::{ParameterAssignment, SymbolicModel};
use crate::traits::{DynamicalSystem, Scalar};
use std::collections::HashMap;
use std::f64::consts::PI;

/// Names that cannot be used as state variables or parameters.
pub fn is_reserved(name: &str) -> bool {
    matches!(name, "pi" | "E" | "ln" | "sqrt") || Func::from_name(name).is_some()
}

/// OpCodes for the stack-based virtual machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant onto the stack.
    LoadConst(f64),
    /// Pushes the value of a state variable (by declaration index).
    LoadVar(usize),
    /// Pushes the value of a parameter (by sorted index).
    LoadParam(usize),
    /// Pops (b, a), pushes a + b.
    Add,
    /// Pops (b, a), pushes a * b.
    Mul,
    /// Pops (b, a), pushes a ^ b.
    Pow,
    /// Pops a, pushes a ^ n for an integer n.
    PowI(i32),
    /// Pops a, pushes f(a).
    Call(Func),
}

/// A compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack-based virtual machine.
///
/// The VM is stateless; `execute` takes all context, including the scratch stack, so
/// a compiled system can be shared across threads.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(bytecode: &Bytecode, vars: &[T], params: &[T], stack: &mut Vec<T>) -> T {
        stack.clear();
        let nan = T::nan();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(T::lit(val)),
                OpCode::LoadVar(idx) => stack.push(vars.get(idx).copied().unwrap_or(nan)),
                OpCode::LoadParam(idx) => stack.push(params.get(idx).copied().unwrap_or(nan)),
                OpCode::Add => {
                    let b = stack.pop().unwrap_or(nan);
                    let a = stack.pop().unwrap_or(nan);
                    stack.push(a + b);
                }
                OpCode::Mul => {
                    let b = stack.pop().unwrap_or(nan);
                    let a = stack.pop().unwrap_or(nan);
                    stack.push(a * b);
                }
                OpCode::Pow => {
                    let b = stack.pop().unwrap_or(nan);
                    let a = stack.pop().unwrap_or(nan);
                    stack.push(a.powf(b));
                }
                OpCode::PowI(n) => {
                    let a = stack.pop().unwrap_or(nan);
                    stack.push(a.powi(n));
                }
                OpCode::Call(func) => {
                    let a = stack.pop().unwrap_or(nan);
                    stack.push(call(func, a));
                }
            }
        }

        stack.pop().unwrap_or(nan)
    }
}

fn call<T: Scalar>(func: Func, a: T) -> T {
    match func {
        Func::Sin => a.sin(),
        Func::Cos => a.cos(),
        Func::Tan => a.tan(),
        Func::Asin => a.asin(),
        Func::Acos => a.acos(),
        Func::Atan => a.atan(),
        Func::Sinh => a.sinh(),
        Func::Cosh => a.cosh(),
        Func::Tanh => a.tanh(),
        Func::Exp => a.exp(),
        Func::Ln => a.ln(),
        Func::Abs => a.abs(),
        Func::Floor => a.floor(),
        Func::Ceil => a.ceil(),
        Func::Sign => a
            .to_f64()
            .map(|v| T::lit(expr::sign(v)))
            .unwrap_or_else(T::nan),
        Func::Heaviside => a
            .to_f64()
            .map(|v| T::lit(expr::heaviside(v)))
            .unwrap_or_else(T::nan),
    }
}

/// Compiles symbolic expressions into `Bytecode`, resolving names to indices.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let param_map = param_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { var_map, param_map }
    }

    /// Fails with the names of any symbols that are neither variables nor parameters.
    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, MissingParameterError> {
        let mut missing: Vec<String> = expr
            .free_symbols()
            .into_iter()
            .filter(|name| !self.var_map.contains_key(name) && !self.param_map.contains_key(name))
            .collect();
        if !missing.is_empty() {
            missing.sort();
            return Err(MissingParameterError { missing });
        }
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops);
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) {
        match expr {
            Expr::Const(c) => ops.push(OpCode::LoadConst(*c)),
            Expr::Pi => ops.push(OpCode::LoadConst(PI)),
            Expr::Symbol(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                }
            }
            Expr::Func(func, arg) => {
                self.compile_recursive(arg, ops);
                ops.push(OpCode::Call(*func));
            }
            Expr::Pow(base, exp) => {
                self.compile_recursive(base, ops);
                match exp.as_const() {
                    Some(n) if n.fract() == 0.0 && n.abs() <= i32::MAX as f64 => {
                        ops.push(OpCode::PowI(n as i32))
                    }
                    _ => {
                        self.compile_recursive(exp, ops);
                        ops.push(OpCode::Pow);
                    }
                }
            }
            Expr::Add(items) | Expr::Mul(items) => {
                let op = if matches!(expr, Expr::Add(_)) {
                    OpCode::Add
                } else {
                    OpCode::Mul
                };
                for (i, item) in items.iter().enumerate() {
                    self.compile_recursive(item, ops);
                    if i > 0 {
                        ops.push(op);
                    }
                }
            }
        }
    }
}

// --- Parser ---

/// Parses the right-hand side of an equation into a canonical expression.
pub fn parse_expression(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    let end = input.chars().count() + 1;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end,
    };
    let expr = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(error_at(
            token.column,
            format!("unexpected {}", token.kind.describe()),
        )),
    }
}

fn error_at(column: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError {
        column,
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::Identifier(name) => format!("name '{name}'"),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Slash => "'/'".to_string(),
            TokenKind::Caret => "'^'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    /// 1-based character column of the token's first character.
    column: usize,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let column = i + 1;
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            // Scientific notation: 1e-3, 2.5E+4
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].is_ascii_digit() {
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                    i = j;
                }
            }
            let text: String = chars[start..i].iter().collect();
            let value: f64 = text
                .parse()
                .map_err(|_| error_at(column, format!("invalid number '{text}'")))?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                column,
            });
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Identifier(chars[start..i].iter().collect()),
                column,
            });
            continue;
        }
        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' if chars.get(i + 1) == Some(&'*') => {
                i += 1;
                TokenKind::Caret
            }
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '^' => TokenKind::Caret,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            other => return Err(error_at(column, format!("unexpected character '{other}'"))),
        };
        tokens.push(Token { kind, column });
        i += 1;
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Column just past the input, for "unexpected end" errors.
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_rparen(&mut self, open_column: usize) -> Result<(), ExpressionError> {
        match self.consume() {
            Some(Token {
                kind: TokenKind::RParen,
                ..
            }) => Ok(()),
            Some(token) => Err(error_at(
                token.column,
                format!("expected ')' but found {}", token.kind.describe()),
            )),
            None => Err(error_at(
                self.end,
                format!("unclosed '(' opened at column {open_column}"),
            )),
        }
    }

    // expr := term (('+'|'-') term)*
    fn parse_expression(&mut self) -> Result<Expr, ExpressionError> {
        let mut terms = vec![self.parse_term()?];
        loop {
            match self.peek_kind() {
                Some(TokenKind::Plus) => {
                    self.consume();
                    terms.push(self.parse_term()?);
                }
                Some(TokenKind::Minus) => {
                    self.consume();
                    terms.push(Expr::neg(self.parse_term()?));
                }
                _ => break,
            }
        }
        Ok(Expr::sum(terms))
    }

    // term := unary (('*'|'/') unary)*
    fn parse_term(&mut self) -> Result<Expr, ExpressionError> {
        let mut factors = vec![self.parse_unary()?];
        loop {
            match self.peek_kind() {
                Some(TokenKind::Star) => {
                    self.consume();
                    factors.push(self.parse_unary()?);
                }
                Some(TokenKind::Slash) => {
                    self.consume();
                    let divisor = self.parse_unary()?;
                    factors.push(Expr::power(divisor, Expr::constant(-1.0)));
                }
                _ => break,
            }
        }
        Ok(Expr::product(factors))
    }

    // unary := ('-'|'+') unary | power
    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek_kind() {
            Some(TokenKind::Minus) => {
                self.consume();
                Ok(Expr::neg(self.parse_unary()?))
            }
            Some(TokenKind::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    // power := primary ('^' unary)?   (right-associative, tighter than unary minus)
    fn parse_power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.parse_primary()?;
        if let Some(TokenKind::Caret) = self.peek_kind() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::power(base, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let Some(token) = self.consume() else {
            return Err(error_at(self.end, "unexpected end of expression"));
        };
        match token.kind {
            TokenKind::Number(n) => Ok(Expr::constant(n)),
            TokenKind::Identifier(name) => {
                if let Some(TokenKind::LParen) = self.peek_kind() {
                    let open = self.consume().map_or(token.column, |t| t.column);
                    let arg = self.parse_expression()?;
                    self.expect_rparen(open)?;
                    return apply_function(&name, arg)
                        .ok_or_else(|| error_at(token.column, format!("unknown function '{name}'")));
                }
                match name.as_str() {
                    "pi" => Ok(Expr::Pi),
                    "E" => Ok(Expr::euler()),
                    _ if is_reserved(&name) => Err(error_at(
                        token.column,
                        format!("function '{name}' needs an argument in parentheses"),
                    )),
                    _ => Ok(Expr::Symbol(name)),
                }
            }
            TokenKind::LParen => {
                let expr = self.parse_expression()?;
                self.expect_rparen(token.column)?;
                Ok(expr)
            }
            other => Err(error_at(token.column, format!("unexpected {}", other.describe()))),
        }
    }
}

fn apply_function(name: &str, arg: Expr) -> Option<Expr> {
    match name {
        "sqrt" => Some(Expr::sqrt(arg)),
        "ln" => Some(Expr::apply(Func::Ln, arg)),
        _ => Func::from_name(name).map(|func| Expr::apply(func, arg)),
    }
}

// --- CompiledSystem ---

/// A `DynamicalSystem` backed by one compiled bytecode program per state variable.
///
/// Holds no interior mutability: each `apply` uses its own scratch stack, so the
/// system is `Send + Sync`.
#[derive(Debug, Clone)]
pub struct CompiledSystem<T: Scalar> {
    pub equations: Vec<Bytecode>,
    pub params: Vec<T>,
}

impl<T: Scalar> CompiledSystem<T> {
    pub fn new(equations: Vec<Bytecode>, params: Vec<T>) -> Self {
        Self { equations, params }
    }

    /// Compiles every right-hand side of `model` with the given parameter values.
    pub fn from_model(
        model: &SymbolicModel,
        values: &ParameterAssignment,
    ) -> Result<Self, MissingParameterError> {
        let missing: Vec<String> = model
            .parameters()
            .iter()
            .filter(|name| !values.contains_key(*name))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(MissingParameterError { missing });
        }
        let compiler = Compiler::new(model.variables(), model.parameters());
        let equations = model
            .rhs_all()
            .iter()
            .map(|rhs| compiler.compile(rhs))
            .collect::<Result<Vec<_>, _>>()?;
        let params = model
            .parameters()
            .iter()
            .map(|name| T::lit(values.get(name).copied().unwrap_or(f64::NAN)))
            .collect();
        Ok(Self::new(equations, params))
    }
}

impl<T: Scalar> DynamicalSystem<T> for CompiledSystem<T> {
    fn dimension(&self) -> usize {
        self.equations.len()
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        let mut stack = Vec::with_capacity(16);
        for (i, eq) in self.equations.iter().enumerate() {
            out[i] = VM::execute(eq, x, &self.params, &mut stack);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse;

    fn sym(name: &str) -> Expr {
        Expr::symbol(name)
    }

    fn assert_err_contains(result: Result<Expr, ExpressionError>, needle: &str) {
        match result {
            Ok(expr) => panic!("expected error containing '{needle}', got {expr}"),
            Err(err) => assert!(
                err.to_string().contains(needle),
                "expected '{needle}' in '{err}'"
            ),
        }
    }

    #[test]
    fn precedence_and_associativity() {
        let expr = parse_expression("A - (a13 + a12)*B").expect("valid");
        assert_eq!(expr, sym("A") - (sym("a13") + sym("a12")) * sym("B"));

        // Unary minus binds looser than the power.
        let expr = parse_expression("-x^2").expect("valid");
        assert_eq!(expr, -Expr::power(sym("x"), 2.0.into()));

        // Power is right-associative: 2^3^2 = 2^9.
        assert_eq!(parse_expression("2^3^2").expect("valid"), Expr::constant(512.0));
        assert_eq!(parse_expression("2**-1").expect("valid"), Expr::constant(0.5));
    }

    #[test]
    fn numbers_constants_and_functions() {
        assert_eq!(parse_expression("1.5e-3").expect("valid"), Expr::constant(1.5e-3));
        assert_eq!(parse_expression("2E2").expect("valid"), Expr::constant(200.0));
        assert_eq!(parse_expression("pi").expect("valid"), Expr::Pi);
        assert_eq!(parse_expression("E").expect("valid"), Expr::euler());
        assert_eq!(
            parse_expression("ln(x) + log(y)").expect("valid"),
            Expr::apply(Func::Ln, sym("x")) + Expr::apply(Func::Ln, sym("y"))
        );
        assert_eq!(parse_expression("sqrt(d)").expect("valid"), Expr::sqrt(sym("d")));
    }

    #[test]
    fn malformed_expressions_report_columns() {
        let err = parse_expression("B + ").expect_err("dangling operator");
        assert_eq!(err.column, 5);
        assert_err_contains(parse_expression("B + "), "unexpected end");
        assert_err_contains(parse_expression("(a + b"), "unclosed '('");
        assert_err_contains(parse_expression("a $ b"), "unexpected character '$'");
        assert_err_contains(parse_expression("1.2.3"), "invalid number");
        assert_err_contains(parse_expression("foo(x)"), "unknown function 'foo'");
        assert_err_contains(parse_expression("sin + 1"), "needs an argument");
        assert_err_contains(parse_expression("a b"), "unexpected name 'b'");
    }

    #[test]
    fn compiled_system_matches_symbolic_evaluation() {
        let model = parse(&["dB/dt = A - a12*B", "dP/dt = a12*B - k*P^2 + sin(B)"]).expect("valid");
        let mut values = ParameterAssignment::new();
        values.insert("A".to_string(), 10.0);
        values.insert("a12".to_string(), 0.5);
        values.insert("k".to_string(), 0.2);

        let system: CompiledSystem<f64> = CompiledSystem::from_model(&model, &values).expect("bound");
        let state = [3.0, 4.0];
        let mut out = [0.0; 2];
        system.apply(0.0, &state, &mut out);

        let mut point = values.clone();
        point.insert("B".to_string(), 3.0);
        point.insert("P".to_string(), 4.0);
        for (i, rhs) in model.rhs_all().iter().enumerate() {
            let expected = rhs.evaluate(&point).expect("bound").re;
            assert!((out[i] - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn compiled_system_requires_every_parameter() {
        let model = parse(&["dx/dt = a*x - b"]).expect("valid");
        let mut values = ParameterAssignment::new();
        values.insert("a".to_string(), 1.0);
        let err = CompiledSystem::<f64>::from_model(&model, &values).expect_err("b missing");
        assert_eq!(err.missing, vec!["b".to_string()]);
    }

    #[test]
    fn compiled_system_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CompiledSystem<f64>>();
    }
}
