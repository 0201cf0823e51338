//! Algebraic clean-up: constant folding, identity elements, sign
//! normalization and like-term collection.

use crate::equation_engine::{Expr, Func, Func2};

const MAX_PASSES: usize = 8;

/// Simplifies bottom-up until a fixpoint (or the pass limit) is reached.
pub fn simplify(expr: &Expr) -> Expr {
    let mut current = expr.clone();
    for _ in 0..MAX_PASSES {
        let next = simplify_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn is_integer(value: f64) -> bool {
    value.is_finite() && value.fract() == 0.0
}

fn is_zero(expr: &Expr) -> bool {
    expr.as_number() == Some(0.0)
}

fn is_one(expr: &Expr) -> bool {
    expr.as_number() == Some(1.0)
}

fn simplify_once(expr: &Expr) -> Expr {
    match expr {
        Expr::Number(n) if *n == 0.0 => Expr::Number(0.0),
        Expr::Number(_) | Expr::Variable(_) => expr.clone(),
        Expr::Unary(op, operand) => simplify_unary(*op, simplify_once(operand)),
        Expr::Binary(left, op, right) => {
            simplify_binary(simplify_once(left), *op, simplify_once(right))
        }
        Expr::Call(name, args) => {
            simplify_call(name, args.iter().map(simplify_once).collect())
        }
    }
}

fn simplify_unary(op: char, operand: Expr) -> Expr {
    if op != '-' {
        return Expr::Unary(op, Box::new(operand));
    }
    match operand {
        Expr::Number(n) => Expr::Number(-n),
        Expr::Unary('-', inner) => *inner,
        // -(a - b) -> b - a
        Expr::Binary(a, '-', b) => Expr::Binary(b, '-', a),
        other => Expr::neg(other),
    }
}

/// Splits `c*u` into `(c, u)`; anything else has coefficient 1.
fn split_coefficient(expr: &Expr) -> (f64, Expr) {
    match expr {
        Expr::Binary(left, '*', right) => match left.as_number() {
            Some(c) => (c, (**right).clone()),
            None => (1.0, expr.clone()),
        },
        Expr::Unary('-', inner) => {
            let (c, body) = split_coefficient(inner);
            (-c, body)
        }
        _ => (1.0, expr.clone()),
    }
}

fn with_coefficient(c: f64, body: Expr) -> Expr {
    if c == 0.0 {
        Expr::num(0.0)
    } else if c == 1.0 {
        body
    } else if c == -1.0 {
        Expr::neg(body)
    } else {
        Expr::binary(Expr::num(c), '*', body)
    }
}

fn simplify_binary(left: Expr, op: char, right: Expr) -> Expr {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        if let Some(folded) = fold_numbers(a, op, b) {
            return Expr::Number(folded);
        }
    }

    match op {
        '+' => simplify_sum(left, right),
        '-' => simplify_difference(left, right),
        '*' => simplify_product(left, right),
        '/' => simplify_quotient(left, right),
        '^' => simplify_power(left, right),
        _ => Expr::binary(left, op, right),
    }
}

/// Folds numeric operands when the result stays exact enough to print.
fn fold_numbers(a: f64, op: char, b: f64) -> Option<f64> {
    let value = match op {
        '+' => a + b,
        '-' => a - b,
        '*' => a * b,
        '/' => {
            let q = a / b;
            if !is_integer(q) {
                return None;
            }
            q
        }
        '^' => {
            let p = a.powf(b);
            if !is_integer(p) || p.abs() > 1e12 {
                return None;
            }
            p
        }
        '<' => f64::from(u8::from(a < b)),
        '>' => f64::from(u8::from(a > b)),
        '≤' => f64::from(u8::from(a <= b)),
        '≥' => f64::from(u8::from(a >= b)),
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn simplify_sum(left: Expr, right: Expr) -> Expr {
    if is_zero(&left) {
        return right;
    }
    if is_zero(&right) {
        return left;
    }
    match right {
        Expr::Unary('-', inner) => return simplify_difference(left, *inner),
        Expr::Number(n) if n < 0.0 => return Expr::binary(left, '-', Expr::Number(-n)),
        _ => {}
    }
    if let Expr::Unary('-', inner) = &left {
        return simplify_difference(right, (**inner).clone());
    }

    let (ca, a) = split_coefficient(&left);
    let (cb, b) = split_coefficient(&right);
    if a == b && left.as_number().is_none() {
        return with_coefficient(ca + cb, a);
    }
    // Constants trail: 2 + x -> x + 2
    if left.as_number().is_some() && right.as_number().is_none() {
        return Expr::binary(right, '+', left);
    }
    Expr::binary(left, '+', right)
}

fn simplify_difference(left: Expr, right: Expr) -> Expr {
    if is_zero(&right) {
        return left;
    }
    if is_zero(&left) {
        return simplify_unary('-', right);
    }
    if left == right {
        return Expr::num(0.0);
    }
    match right {
        Expr::Unary('-', inner) => return simplify_sum(left, *inner),
        Expr::Number(n) if n < 0.0 => return Expr::binary(left, '+', Expr::Number(-n)),
        _ => {}
    }

    let (ca, a) = split_coefficient(&left);
    let (cb, b) = split_coefficient(&right);
    if a == b && left.as_number().is_none() {
        return with_coefficient(ca - cb, a);
    }
    Expr::binary(left, '-', right)
}

/// `u^k` as `(u, k)`; plain factors have exponent 1.
fn split_power(expr: &Expr) -> (Expr, Expr) {
    match expr {
        Expr::Binary(base, '^', exponent) => ((**base).clone(), (**exponent).clone()),
        _ => (expr.clone(), Expr::num(1.0)),
    }
}

fn simplify_product(left: Expr, right: Expr) -> Expr {
    if is_zero(&left) || is_zero(&right) {
        return Expr::num(0.0);
    }
    if is_one(&left) {
        return right;
    }
    if is_one(&right) {
        return left;
    }
    if left.as_number() == Some(-1.0) {
        return simplify_unary('-', right);
    }
    if right.as_number() == Some(-1.0) {
        return simplify_unary('-', left);
    }
    // Pull signs out: (-a)*b -> -(a*b)
    if let Expr::Unary('-', inner) = &left {
        if left.as_number().is_none() {
            return Expr::neg(simplify_product((**inner).clone(), right));
        }
    }
    if let Expr::Unary('-', inner) = &right {
        return Expr::neg(simplify_product(left, (**inner).clone()));
    }
    // Numbers lead: x*3 -> 3*x
    if right.as_number().is_some() && left.as_number().is_none() {
        return simplify_product(right, left);
    }
    // 2*(3*x) -> 6*x
    if let (Some(a), Expr::Binary(inner_left, '*', inner_right)) = (left.as_number(), &right) {
        if let Some(b) = inner_left.as_number() {
            return with_coefficient(a * b, (**inner_right).clone());
        }
    }
    // x^a * x^b -> x^(a+b) for numeric exponents
    let (base_a, exp_a) = split_power(&left);
    let (base_b, exp_b) = split_power(&right);
    if base_a == base_b && left.as_number().is_none() {
        if let (Some(a), Some(b)) = (exp_a.as_number(), exp_b.as_number()) {
            return simplify_power(base_a, Expr::num(a + b));
        }
    }
    Expr::binary(left, '*', right)
}

fn simplify_quotient(left: Expr, right: Expr) -> Expr {
    if is_one(&right) {
        return left;
    }
    if is_zero(&left) && !is_zero(&right) {
        return Expr::num(0.0);
    }
    if left == right && !is_zero(&left) {
        return Expr::num(1.0);
    }
    if right.as_number() == Some(-1.0) {
        return simplify_unary('-', left);
    }
    if let Expr::Unary('-', inner) = &left {
        if left.as_number().is_none() {
            return Expr::neg(simplify_quotient((**inner).clone(), right));
        }
    }
    // (c*u)/d -> (c/d)*u when c/d is an integer
    if let (Expr::Binary(num_left, '*', num_right), Some(d)) = (&left, right.as_number()) {
        if let Some(c) = num_left.as_number() {
            let q = c / d;
            if is_integer(q) {
                return with_coefficient(q, (**num_right).clone());
            }
        }
    }
    Expr::binary(left, '/', right)
}

fn simplify_power(base: Expr, exponent: Expr) -> Expr {
    if is_zero(&exponent) {
        return Expr::num(1.0);
    }
    if is_one(&exponent) {
        return base;
    }
    if is_one(&base) {
        return Expr::num(1.0);
    }
    // (u^a)^b -> u^(a*b) for numeric exponents, except where a root hides a sign.
    if let Expr::Binary(inner_base, '^', inner_exp) = &base {
        if let (Some(a), Some(b)) = (inner_exp.as_number(), exponent.as_number()) {
            if is_integer(a) && is_integer(b) {
                return simplify_power((**inner_base).clone(), Expr::num(a * b));
            }
        }
    }
    Expr::binary(base, '^', exponent)
}

fn simplify_call(name: &str, args: Vec<Expr>) -> Expr {
    let numbers: Option<Vec<f64>> = args.iter().map(Expr::as_number).collect();
    if let Some(values) = numbers {
        let folded = match values.as_slice() {
            [a] => Func::from_name(name).map(|f| f.apply(*a)),
            [a, b] => Func2::from_name(name).map(|f| f.apply(*a, *b)),
            _ => None,
        };
        if let Some(value) = folded {
            if is_integer(value) {
                return Expr::Number(if value == 0.0 { 0.0 } else { value });
            }
        }
    }

    match (name, args.as_slice()) {
        ("ln", [Expr::Call(inner, inner_args)]) if inner == "exp" && inner_args.len() == 1 => {
            inner_args[0].clone()
        }
        ("exp", [Expr::Call(inner, inner_args)]) if inner == "ln" && inner_args.len() == 1 => {
            inner_args[0].clone()
        }
        ("ln", [Expr::Variable(v)]) if v == "e" => Expr::num(1.0),
        ("abs", [Expr::Call(inner, _)]) if inner == "abs" => args[0].clone(),
        ("abs", [Expr::Unary('-', inner)]) => Expr::call1("abs", (**inner).clone()),
        _ => Expr::Call(name.to_string(), args),
    }
}

#[cfg(test)]
mod tests {
    use super::simplify;
    use crate::equation_engine::{parse, Expr};

    fn simplified(text: &str) -> Expr {
        simplify(&parse(text).expect("parse"))
    }

    #[test]
    fn removes_identity_elements() {
        assert_eq!(simplified("0 + x*1"), Expr::var("x"));
        assert_eq!(simplified("x^1 - 0"), Expr::var("x"));
        assert_eq!(simplified("x*0 + 3"), Expr::num(3.0));
        assert_eq!(simplified("(x + 1)^0"), Expr::num(1.0));
    }

    #[test]
    fn folds_only_exact_constants() {
        assert_eq!(simplified("2*3 + 4"), Expr::num(10.0));
        assert_eq!(simplified("6/3"), Expr::num(2.0));
        assert_eq!(simplified("1/3"), parse("1/3").expect("parse"));
        assert_eq!(simplified("cos(0)"), Expr::num(1.0));
        assert_eq!(simplified("sqrt(2)"), parse("sqrt(2)").expect("parse"));
    }

    #[test]
    fn collects_like_terms_and_powers() {
        assert_eq!(simplified("x + x"), parse("2*x").expect("parse"));
        assert_eq!(simplified("3*x - x"), parse("2*x").expect("parse"));
        assert_eq!(simplified("x*x^2"), parse("x^3").expect("parse"));
        assert_eq!(simplified("x - x"), Expr::num(0.0));
    }

    #[test]
    fn normalizes_signs() {
        assert_eq!(simplified("x + -y"), parse("x - y").expect("parse"));
        assert_eq!(simplified("--x"), Expr::var("x"));
        assert_eq!(simplified("x*(-1)"), parse("-x").expect("parse"));
        assert_eq!(simplified("ln(exp(x))"), Expr::var("x"));
    }
}
