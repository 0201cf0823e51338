use crate::traits::Scalar;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

/// Single-argument functions executed by the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Sec,
    Csc,
    Cot,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Sech,
    Csch,
    Coth,
    Exp,
    Ln,
    Log10,
    Sqrt,
    Cbrt,
    Abs,
    Floor,
    Ceil,
    Round,
    Sign,
    Erf,
    Factorial,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Func> {
        let func = match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "sec" => Func::Sec,
            "csc" => Func::Csc,
            "cot" => Func::Cot,
            "asin" | "arcsin" => Func::Asin,
            "acos" | "arccos" => Func::Acos,
            "atan" | "arctan" => Func::Atan,
            "sinh" => Func::Sinh,
            "cosh" => Func::Cosh,
            "tanh" => Func::Tanh,
            "sech" => Func::Sech,
            "csch" => Func::Csch,
            "coth" => Func::Coth,
            "exp" => Func::Exp,
            "ln" => Func::Ln,
            "log" | "log10" => Func::Log10,
            "sqrt" => Func::Sqrt,
            "cbrt" => Func::Cbrt,
            "abs" => Func::Abs,
            "floor" => Func::Floor,
            "ceil" => Func::Ceil,
            "round" => Func::Round,
            "sign" | "sgn" => Func::Sign,
            "erf" => Func::Erf,
            "factorial" => Func::Factorial,
            _ => return None,
        };
        Some(func)
    }

    pub fn apply<T: Scalar>(self, a: T) -> T {
        let one = T::one();
        match self {
            Func::Sin => a.sin(),
            Func::Cos => a.cos(),
            Func::Tan => a.tan(),
            Func::Sec => one / a.cos(),
            Func::Csc => one / a.sin(),
            Func::Cot => one / a.tan(),
            Func::Asin => a.asin(),
            Func::Acos => a.acos(),
            Func::Atan => a.atan(),
            Func::Sinh => a.sinh(),
            Func::Cosh => a.cosh(),
            Func::Tanh => a.tanh(),
            Func::Sech => one / a.cosh(),
            Func::Csch => one / a.sinh(),
            Func::Coth => one / a.tanh(),
            Func::Exp => a.exp(),
            Func::Ln => a.ln(),
            Func::Log10 => a.log10(),
            Func::Sqrt => a.sqrt(),
            Func::Cbrt => a.cbrt(),
            Func::Abs => a.abs(),
            Func::Floor => a.floor(),
            Func::Ceil => a.ceil(),
            Func::Round => a.round(),
            Func::Sign => {
                if a.is_nan() {
                    a
                } else if a > T::zero() {
                    one
                } else if a < T::zero() {
                    -one
                } else {
                    T::zero()
                }
            }
            Func::Erf => through_f64(a, erf),
            Func::Factorial => through_f64(a, factorial),
        }
    }
}

/// Two-argument functions executed by the VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func2 {
    Atan2,
    /// `log(base, x)`.
    LogBase,
    Min,
    Max,
    Mod,
}

impl Func2 {
    pub fn from_name(name: &str) -> Option<Func2> {
        match name {
            "atan2" => Some(Func2::Atan2),
            "log" => Some(Func2::LogBase),
            "min" => Some(Func2::Min),
            "max" => Some(Func2::Max),
            "mod" => Some(Func2::Mod),
            _ => None,
        }
    }

    pub fn apply<T: Scalar>(self, a: T, b: T) -> T {
        match self {
            Func2::Atan2 => a.atan2(b),
            Func2::LogBase => b.ln() / a.ln(),
            Func2::Min => a.min(b),
            Func2::Max => a.max(b),
            Func2::Mod => {
                let r = a % b;
                if r != T::zero() && ((r < T::zero()) != (b < T::zero())) {
                    r + b
                } else {
                    r
                }
            }
        }
    }
}

fn through_f64<T: Scalar>(a: T, f: fn(f64) -> f64) -> T {
    a.to_f64()
        .map(f)
        .and_then(T::from_f64)
        .unwrap_or_else(T::nan)
}

/// Error function (Abramowitz & Stegun 7.1.26, |error| < 1.5e-7).
pub fn erf(x: f64) -> f64 {
    if x.is_nan() {
        return x;
    }
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = ((((1.061_405_429 * t - 1.453_152_027) * t + 1.421_413_741) * t - 0.284_496_736)
        * t
        + 0.254_829_592)
        * t;
    sign * (1.0 - poly * (-x * x).exp())
}

const LANCZOS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// Gamma function via the Lanczos approximation (g = 7).
pub fn gamma(x: f64) -> f64 {
    if x.is_nan() {
        return x;
    }
    if x < 0.5 {
        let s = (std::f64::consts::PI * x).sin();
        if s == 0.0 {
            return f64::NAN;
        }
        return std::f64::consts::PI / (s * gamma(1.0 - x));
    }
    let x = x - 1.0;
    let t = x + 7.5;
    let mut a = LANCZOS[0];
    for (i, c) in LANCZOS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    (2.0 * std::f64::consts::PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * a
}

/// `n!` for non-negative integers (exact up to 170), `Gamma(n + 1)` otherwise.
pub fn factorial(n: f64) -> f64 {
    if n.fract() == 0.0 {
        if n < 0.0 {
            return f64::NAN;
        }
        if n <= 170.0 {
            return (1..=n as u32).fold(1.0, |acc, k| acc * k as f64);
        }
        return f64::INFINITY;
    }
    gamma(n + 1.0)
}

/// OpCodes for the stack-based virtual machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant.
    LoadConst(f64),
    /// Pushes the input at the given index.
    LoadVar(usize),
    /// Pops (b, a), pushes a + b.
    Add,
    /// Pops (b, a), pushes a - b.
    Sub,
    /// Pops (b, a), pushes a * b.
    Mul,
    /// Pops (b, a), pushes a / b.
    Div,
    /// Pops (b, a), pushes a ^ b.
    Pow,
    /// Pops a, pushes -a.
    Neg,
    /// Pops a, pushes f(a).
    Call(Func),
    /// Pops (b, a), pushes f(a, b).
    Call2(Func2),
    /// Relations push 1 when true, 0 otherwise.
    Less,
    Greater,
    LessEq,
    GreaterEq,
    /// Pops (else, then, condition); pushes `then` when the condition is
    /// non-zero and not NaN, `else` otherwise.
    Select,
}

/// A compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

impl Bytecode {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }
}

/// Stateless stack machine. Malformed bytecode yields NaN instead of
/// panicking: every pop on an empty stack produces NaN.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(bytecode: &Bytecode, vars: &[T], stack: &mut Vec<T>) -> T {
        stack.clear();
        let nan = T::nan();
        let pop = |stack: &mut Vec<T>| stack.pop().unwrap_or(nan);
        let truth = |flag: bool| if flag { T::one() } else { T::zero() };

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => stack.push(T::from_f64(val).unwrap_or(nan)),
                OpCode::LoadVar(idx) => stack.push(vars.get(idx).copied().unwrap_or(nan)),
                OpCode::Neg => {
                    let a = pop(stack);
                    stack.push(-a);
                }
                OpCode::Call(func) => {
                    let a = pop(stack);
                    stack.push(func.apply(a));
                }
                OpCode::Select => {
                    let otherwise = pop(stack);
                    let then = pop(stack);
                    let cond = pop(stack);
                    stack.push(if !cond.is_nan() && cond != T::zero() {
                        then
                    } else {
                        otherwise
                    });
                }
                binary => {
                    let b = pop(stack);
                    let a = pop(stack);
                    let value = match binary {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        OpCode::Pow => a.powf(b),
                        OpCode::Call2(func) => func.apply(a, b),
                        OpCode::Less => truth(a < b),
                        OpCode::Greater => truth(a > b),
                        OpCode::LessEq => truth(a <= b),
                        OpCode::GreaterEq => truth(a >= b),
                        _ => nan,
                    };
                    stack.push(value);
                }
            }
        }

        if stack.len() == 1 {
            pop(stack)
        } else {
            nan
        }
    }
}

// --- AST ---

/// Expression tree shared by the parser, the symbolic engine and the
/// bytecode compiler.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    /// A variable or one of the named constants `pi` and `e`.
    Variable(String),
    /// `+ - * / ^` and the relations `< > ≤ ≥`.
    Binary(Box<Expr>, char, Box<Expr>),
    /// `-` (negation) or `!` (factorial).
    Unary(char, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    pub fn num(value: f64) -> Expr {
        Expr::Number(value)
    }

    pub fn var(name: &str) -> Expr {
        Expr::Variable(name.to_string())
    }

    pub fn binary(left: Expr, op: char, right: Expr) -> Expr {
        Expr::Binary(Box::new(left), op, Box::new(right))
    }

    pub fn neg(operand: Expr) -> Expr {
        Expr::Unary('-', Box::new(operand))
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call(name.to_string(), args)
    }

    pub fn call1(name: &str, arg: Expr) -> Expr {
        Expr::Call(name.to_string(), vec![arg])
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Expr::Number(n) => Some(*n),
            Expr::Unary('-', inner) => inner.as_number().map(|n| -n),
            _ => None,
        }
    }

    /// Numeric value of a named constant.
    pub fn constant_value(name: &str) -> Option<f64> {
        match name {
            "pi" => Some(std::f64::consts::PI),
            "e" => Some(std::f64::consts::E),
            _ => None,
        }
    }

    pub fn contains_var(&self, name: &str) -> bool {
        match self {
            Expr::Number(_) => false,
            Expr::Variable(v) => v == name,
            Expr::Binary(l, _, r) => l.contains_var(name) || r.contains_var(name),
            Expr::Unary(_, operand) => operand.contains_var(name),
            Expr::Call(_, args) => args.iter().any(|a| a.contains_var(name)),
        }
    }

    /// Variables referenced by the expression, excluding named constants.
    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable(name) => {
                if Expr::constant_value(name).is_none() {
                    out.insert(name.clone());
                }
            }
            Expr::Binary(l, _, r) => {
                l.collect_variables(out);
                r.collect_variables(out);
            }
            Expr::Unary(_, operand) => operand.collect_variables(out),
            Expr::Call(_, args) => args.iter().for_each(|a| a.collect_variables(out)),
        }
    }

    /// Replaces every occurrence of variable `name` with `replacement`.
    pub fn substitute(&self, name: &str, replacement: &Expr) -> Expr {
        match self {
            Expr::Variable(v) if v == name => replacement.clone(),
            Expr::Number(_) | Expr::Variable(_) => self.clone(),
            Expr::Binary(l, op, r) => Expr::binary(
                l.substitute(name, replacement),
                *op,
                r.substitute(name, replacement),
            ),
            Expr::Unary(op, operand) => {
                Expr::Unary(*op, Box::new(operand.substitute(name, replacement)))
            }
            Expr::Call(func, args) => Expr::Call(
                func.clone(),
                args.iter().map(|a| a.substitute(name, replacement)).collect(),
            ),
        }
    }
}

/// Whether `name` is a function the bytecode compiler understands.
pub fn is_known_function(name: &str) -> bool {
    Func::from_name(name).is_some() || Func2::from_name(name).is_some() || name == "piecewise"
}

/// Compiles an AST (`Expr`) into `Bytecode`, resolving variable names to
/// input indices.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { var_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, String> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), String> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(value) = Expr::constant_value(name) {
                    ops.push(OpCode::LoadConst(value));
                } else {
                    return Err(format!("Unknown variable: {name}"));
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                let code = match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    '<' => OpCode::Less,
                    '>' => OpCode::Greater,
                    '≤' => OpCode::LessEq,
                    '≥' => OpCode::GreaterEq,
                    _ => return Err(format!("Unknown binary operator: {op}")),
                };
                ops.push(code);
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    '!' => ops.push(OpCode::Call(Func::Factorial)),
                    _ => return Err(format!("Unknown unary operator: {op}")),
                }
            }
            Expr::Call(func, args) => {
                if func == "piecewise" {
                    if args.is_empty() {
                        return Err("piecewise needs at least one branch".to_string());
                    }
                    return self.compile_piecewise(args, ops);
                }
                match args.as_slice() {
                    [arg] => {
                        let code = Func::from_name(func)
                            .ok_or_else(|| format!("Unknown function: {func}"))?;
                        self.compile_recursive(arg, ops)?;
                        ops.push(OpCode::Call(code));
                    }
                    [a, b] => {
                        let code = Func2::from_name(func)
                            .ok_or_else(|| format!("Unknown function: {func}/2"))?;
                        self.compile_recursive(a, ops)?;
                        self.compile_recursive(b, ops)?;
                        ops.push(OpCode::Call2(code));
                    }
                    _ => {
                        return Err(format!(
                            "Function {func} called with {} arguments",
                            args.len()
                        ))
                    }
                }
            }
        }
        Ok(())
    }

    /// `piecewise(v1, c1, v2, c2, ..., [default])` becomes nested selects; a
    /// missing default evaluates to NaN.
    fn compile_piecewise(&self, args: &[Expr], ops: &mut Vec<OpCode>) -> Result<(), String> {
        match args {
            [] => ops.push(OpCode::LoadConst(f64::NAN)),
            [default] => self.compile_recursive(default, ops)?,
            [value, cond, rest @ ..] => {
                self.compile_recursive(cond, ops)?;
                self.compile_recursive(value, ops)?;
                self.compile_piecewise(rest, ops)?;
                ops.push(OpCode::Select);
            }
        }
        Ok(())
    }
}

// --- Parser ---

/// Parses a plain infix expression into an AST.
pub fn parse(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("Empty expression".to_string());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if parser.pos < parser.tokens.len() {
        return Err(format!(
            "Unexpected token {:?} after end of expression",
            parser.tokens[parser.pos]
        ));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
    Bar,
    Bang,
    Less,
    Greater,
    LessEq,
    GreaterEq,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            // Decimal exponent only when a digit (optionally signed) follows.
            if let Some(&e) = chars.peek() {
                if e == 'e' || e == 'E' {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let mut exponent = String::new();
                    if let Some(&sign) = lookahead.peek() {
                        if sign == '+' || sign == '-' {
                            exponent.push(sign);
                            lookahead.next();
                        }
                    }
                    if lookahead.peek().map_or(false, |d| d.is_ascii_digit()) {
                        while let Some(&d) = lookahead.peek() {
                            if d.is_ascii_digit() {
                                exponent.push(d);
                                lookahead.next();
                            } else {
                                break;
                            }
                        }
                        num_str.push('e');
                        num_str.push_str(&exponent);
                        chars = lookahead;
                    }
                }
            }
            let value = num_str
                .parse::<f64>()
                .map_err(|_| format!("Malformed number: {num_str}"))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            if ident == "π" {
                ident = "pi".to_string();
            }
            tokens.push(Token::Identifier(ident));
        } else {
            chars.next();
            let token = match c {
                '+' => Token::Plus,
                '-' | '−' => Token::Minus,
                '*' | '×' | '·' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        Token::Caret
                    } else {
                        Token::Star
                    }
                }
                '/' | '÷' => Token::Slash,
                '^' => Token::Caret,
                '(' | '[' => Token::LParen,
                ')' | ']' => Token::RParen,
                ',' => Token::Comma,
                '|' => Token::Bar,
                '!' => Token::Bang,
                '√' => Token::Identifier("sqrt".to_string()),
                '≤' => Token::LessEq,
                '≥' => Token::GreaterEq,
                '<' | '>' => {
                    let or_equal = chars.peek() == Some(&'=');
                    if or_equal {
                        chars.next();
                    }
                    match (c, or_equal) {
                        ('<', false) => Token::Less,
                        ('<', true) => Token::LessEq,
                        ('>', false) => Token::Greater,
                        _ => Token::GreaterEq,
                    }
                }
                other => return Err(format!("Unexpected character '{other}'")),
            };
            tokens.push(token);
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), String> {
        match self.consume() {
            Some(token) if token == expected => Ok(()),
            _ => Err(format!("Expected {what}")),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, String> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Less) => '<',
            Some(Token::Greater) => '>',
            Some(Token::LessEq) => '≤',
            Some(Token::GreaterEq) => '≥',
            _ => return Ok(left),
        };
        self.consume();
        let right = self.parse_additive()?;
        Ok(Expr::binary(left, op, right))
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_term()?;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => '+',
                Token::Minus => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_term()?;
            left = Expr::binary(left, op, right);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary()?;

        while let Some(token) = self.peek() {
            match token {
                Token::Star | Token::Slash => {
                    let op = if *token == Token::Star { '*' } else { '/' };
                    self.consume();
                    let right = self.parse_unary()?;
                    left = Expr::binary(left, op, right);
                }
                // Implicit multiplication: 2x, 3(x+1), (x+1)(x-1), 2sin(x).
                Token::Number(_) | Token::Identifier(_) | Token::LParen => {
                    let right = self.parse_power()?;
                    left = Expr::binary(left, '*', right);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    /// Unary minus binds looser than `^`, so `-x^2` is `-(x^2)`.
    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                let operand = self.parse_unary()?;
                Ok(match operand {
                    Expr::Number(n) => Expr::Number(-n),
                    other => Expr::neg(other),
                })
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    /// Right-associative: `2^3^2` is `2^(3^2)`.
    fn parse_power(&mut self) -> Result<Expr, String> {
        let base = self.parse_postfix()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::binary(base, '^', exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        while let Some(Token::Bang) = self.peek() {
            self.consume();
            expr = Expr::Unary('!', Box::new(expr));
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, String> {
        self.expect(Token::LParen, "'('")?;
        let mut args = vec![self.parse_expression()?];
        loop {
            match self.consume() {
                Some(Token::Comma) => args.push(self.parse_expression()?),
                Some(Token::RParen) => return Ok(args),
                _ => return Err("Expected ',' or ')'".to_string()),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                // sin^2(x) means (sin(x))^2.
                if self.peek() == Some(&Token::Caret) && is_known_function(&name) {
                    let checkpoint = self.pos;
                    self.consume();
                    if let Ok(exponent) = self.parse_postfix() {
                        if self.peek() == Some(&Token::LParen) {
                            let args = self.parse_arguments()?;
                            return Ok(Expr::binary(Expr::Call(name, args), '^', exponent));
                        }
                    }
                    self.pos = checkpoint;
                }
                if self.peek() == Some(&Token::LParen) && Expr::constant_value(&name).is_none()
                {
                    let args = self.parse_arguments()?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Some(Token::Bar) => {
                let expr = self.parse_expression()?;
                self.expect(Token::Bar, "closing '|'")?;
                Ok(Expr::call1("abs", expr))
            }
            Some(token) => Err(format!("Unexpected token {token:?}")),
            None => Err("Unexpected end of expression".to_string()),
        }
    }
}

// --- Evaluation ---

/// Variable bindings supplied per evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    values: HashMap<String, f64>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Scope {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Maps an evaluator's variables onto positions of a caller-chosen input
/// slice, for hot loops that would otherwise rebuild a [`Scope`].
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    slots: Vec<Option<usize>>,
}

/// A compiled, pure `Scope -> f64` function.
///
/// Evaluation never panics: missing variables, domain violations and
/// division by zero all come back as NaN (or an infinity, which numeric
/// callers treat the same way).
#[derive(Debug)]
pub struct Evaluator {
    bytecode: Bytecode,
    variables: Vec<String>,
    // Scratch buffers; the evaluator itself stays logically immutable.
    stack: RefCell<Vec<f64>>,
    inputs: RefCell<Vec<f64>>,
}

impl Evaluator {
    pub fn new(expr: &Expr) -> Result<Self, String> {
        let variables: Vec<String> = expr.free_variables().into_iter().collect();
        let compiler = Compiler::new(&variables);
        let bytecode = compiler.compile(expr)?;
        let inputs = vec![f64::NAN; variables.len()];
        Ok(Self {
            bytecode,
            variables,
            stack: RefCell::new(Vec::with_capacity(32)),
            inputs: RefCell::new(inputs),
        })
    }

    /// Free variables in sorted order; positional inputs follow this order.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }

    pub fn evaluate(&self, scope: &Scope) -> f64 {
        let values: Vec<f64> = self
            .variables
            .iter()
            .map(|name| scope.get(name).unwrap_or(f64::NAN))
            .collect();
        self.eval_positional(&values)
    }

    pub fn eval_positional(&self, values: &[f64]) -> f64 {
        match self.stack.try_borrow_mut() {
            Ok(mut stack) => VM::execute(&self.bytecode, values, &mut stack),
            Err(_) => VM::execute(&self.bytecode, values, &mut Vec::new()),
        }
    }

    pub fn bind(&self, order: &[&str]) -> Binding {
        Binding {
            slots: self
                .variables
                .iter()
                .map(|name| order.iter().position(|o| *o == name.as_str()))
                .collect(),
        }
    }

    /// Evaluates with inputs laid out as in the `order` given to [`bind`](Self::bind).
    pub fn eval_bound(&self, binding: &Binding, inputs: &[f64]) -> f64 {
        let fill = |values: &mut Vec<f64>| {
            values.clear();
            values.extend(
                binding
                    .slots
                    .iter()
                    .map(|slot| slot.and_then(|i| inputs.get(i).copied()).unwrap_or(f64::NAN)),
            );
        };
        match self.inputs.try_borrow_mut() {
            Ok(mut values) => {
                fill(&mut values);
                self.eval_positional(&values)
            }
            Err(_) => {
                let mut values = Vec::new();
                fill(&mut values);
                self.eval_positional(&values)
            }
        }
    }

    /// Evaluates a single-variable function; any other variable reads as NaN.
    pub fn eval_at(&self, variable: &str, value: f64) -> f64 {
        let values: Vec<f64> = self
            .variables
            .iter()
            .map(|name| if name == variable { value } else { f64::NAN })
            .collect();
        self.eval_positional(&values)
    }
}

#[cfg(test)]
mod tests {
    use super::{erf, factorial, parse, Evaluator, Expr, Scope};

    fn eval(text: &str, scope: &Scope) -> f64 {
        let expr = parse(text).expect("expression should parse");
        Evaluator::new(&expr)
            .expect("expression should compile")
            .evaluate(scope)
    }

    #[test]
    fn respects_precedence_and_associativity() {
        let scope = Scope::new().with("x", 3.0);
        assert_eq!(eval("-x^2", &scope), -9.0);
        assert_eq!(eval("2^3^2", &scope), 512.0);
        assert_eq!(eval("10 - 4 - 3", &scope), 3.0);
        assert_eq!(eval("x^-1", &scope), 1.0 / 3.0);
    }

    #[test]
    fn supports_implicit_multiplication() {
        let scope = Scope::new().with("x", 2.0);
        assert_eq!(eval("2x", &scope), 4.0);
        assert_eq!(eval("3(x+1)", &scope), 9.0);
        assert_eq!(eval("(x+1)(x-1)", &scope), 3.0);
        assert!((eval("2sin(x)", &scope) - 2.0 * 2f64.sin()).abs() < 1e-12);
    }

    #[test]
    fn parses_function_powers_bars_and_constants() {
        let scope = Scope::new().with("x", 0.5);
        assert!((eval("sin^2(x) + cos^2(x)", &scope) - 1.0).abs() < 1e-12);
        assert_eq!(eval("|x - 2|", &scope), 1.5);
        assert!((eval("pi", &scope) - std::f64::consts::PI).abs() < 1e-15);
        assert!((eval("e^1", &scope) - std::f64::consts::E).abs() < 1e-15);
        assert_eq!(eval("3!", &scope), 6.0);
        assert_eq!(eval("1.5e2", &scope), 150.0);
        assert!((eval("log(2, 8)", &scope) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn piecewise_selects_first_true_branch() {
        let text = "piecewise(-x, x < 0, x^2, x <= 2, 10)";
        assert_eq!(eval(text, &Scope::new().with("x", -3.0)), 3.0);
        assert_eq!(eval(text, &Scope::new().with("x", 1.5)), 2.25);
        assert_eq!(eval(text, &Scope::new().with("x", 5.0)), 10.0);
    }

    #[test]
    fn undefined_evaluations_return_nan() {
        assert!(eval("1/0 - 1/0", &Scope::new()).is_nan());
        assert!(eval("ln(-1)", &Scope::new()).is_nan());
        assert!(eval("x + 1", &Scope::new()).is_nan(), "missing variable");
    }

    #[test]
    fn rejects_malformed_text() {
        assert!(parse("").is_err());
        assert!(parse("(x + 1").is_err());
        assert!(parse("x + * 2").is_err());
        assert!(parse("x $ 2").is_err());
        assert!(parse("1.2.3").is_err());
    }

    #[test]
    fn unknown_functions_fail_to_compile() {
        let expr = parse("frob(x)").expect("parses as a call");
        assert!(Evaluator::new(&expr).is_err());
    }

    #[test]
    fn binding_maps_positional_inputs() {
        let expr = parse("y - 2*x").expect("parse");
        let evaluator = Evaluator::new(&expr).expect("compile");
        let binding = evaluator.bind(&["x", "y"]);
        assert_eq!(evaluator.eval_bound(&binding, &[1.0, 5.0]), 3.0);
        assert_eq!(evaluator.variables(), &["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn substitution_replaces_variables() {
        let expr = parse("x^2 + x").expect("parse");
        let replaced = expr.substitute("x", &Expr::num(3.0));
        let value = Evaluator::new(&replaced)
            .expect("compile")
            .evaluate(&Scope::new());
        assert_eq!(value, 12.0);
    }

    #[test]
    fn special_functions_are_accurate_enough() {
        assert!((erf(1.0) - 0.842_700_79).abs() < 1e-6);
        assert_eq!(factorial(5.0), 120.0);
        assert!((factorial(0.5) - 0.886_226_93).abs() < 1e-6);
        assert!(factorial(-2.0).is_nan());
    }
}
