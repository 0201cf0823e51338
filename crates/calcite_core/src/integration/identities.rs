//! Trigonometric and logarithmic identity folding applied to antiderivatives.

use crate::equation_engine::Expr;

const MAX_PASSES: usize = 6;

pub fn rewrite(expr: &Expr) -> Expr {
    let mut current = expr.clone();
    for _ in 0..MAX_PASSES {
        let next = rewrite_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn rewrite_once(expr: &Expr) -> Expr {
    let rebuilt = match expr {
        Expr::Number(_) | Expr::Variable(_) => return expr.clone(),
        Expr::Unary(op, operand) => Expr::Unary(*op, Box::new(rewrite_once(operand))),
        Expr::Binary(l, op, r) => Expr::binary(rewrite_once(l), *op, rewrite_once(r)),
        Expr::Call(name, args) => Expr::Call(name.clone(), args.iter().map(rewrite_once).collect()),
    };
    apply_rules(rebuilt)
}

/// Argument of `name(u)^2`.
fn squared_call<'a>(expr: &'a Expr, name: &str) -> Option<&'a Expr> {
    match expr {
        Expr::Binary(base, '^', exponent) if exponent.as_number() == Some(2.0) => match &**base {
            Expr::Call(f, args) if f == name && args.len() == 1 => Some(&args[0]),
            _ => None,
        },
        _ => None,
    }
}

fn square_of(name: &str, u: &Expr) -> Expr {
    Expr::binary(Expr::call1(name, u.clone()), '^', Expr::num(2.0))
}

fn is_one(expr: &Expr) -> bool {
    expr.as_number() == Some(1.0)
}

/// `(f, g)` in either order.
fn either<'a>(l: &'a Expr, r: &'a Expr, f: &str, g: &str) -> Option<&'a Expr> {
    let (a, b) = match (squared_call(l, f), squared_call(r, g)) {
        (Some(a), Some(b)) => (a, b),
        _ => match (squared_call(l, g), squared_call(r, f)) {
            (Some(a), Some(b)) => (a, b),
            _ => return None,
        },
    };
    (a == b).then_some(a)
}

/// `1 + name(u)^2` in either order.
fn one_plus<'a>(l: &'a Expr, r: &'a Expr, name: &str) -> Option<&'a Expr> {
    if is_one(l) {
        squared_call(r, name)
    } else if is_one(r) {
        squared_call(l, name)
    } else {
        None
    }
}

fn apply_rules(expr: Expr) -> Expr {
    match &expr {
        Expr::Binary(l, '+', r) => {
            if either(l, r, "sin", "cos").is_some() {
                return Expr::num(1.0);
            }
            if let Some(u) = one_plus(l, r, "tan") {
                return square_of("sec", u);
            }
            if let Some(u) = one_plus(l, r, "cot") {
                return square_of("csc", u);
            }
            // a + (-b) -> a - b
            if let Expr::Unary('-', inner) = &**r {
                return Expr::binary((**l).clone(), '-', (**inner).clone());
            }
            if let Some(n) = r.as_number().filter(|n| *n < 0.0) {
                return Expr::binary((**l).clone(), '-', Expr::num(-n));
            }
        }
        Expr::Binary(l, '-', r) => {
            if is_one(r) {
                if let Some(u) = squared_call(l, "sec") {
                    return square_of("tan", u);
                }
                if let Some(u) = squared_call(l, "csc") {
                    return square_of("cot", u);
                }
            }
            if is_one(l) {
                if let Some(u) = squared_call(r, "sin") {
                    return square_of("cos", u);
                }
                if let Some(u) = squared_call(r, "cos") {
                    return square_of("sin", u);
                }
            }
            // a - (-b) -> a + b
            if let Expr::Unary('-', inner) = &**r {
                return Expr::binary((**l).clone(), '+', (**inner).clone());
            }
        }
        Expr::Unary('-', inner) => {
            if let Expr::Unary('-', twice) = &**inner {
                return (**twice).clone();
            }
            if let Some(n) = inner.as_number() {
                return Expr::num(-n);
            }
        }
        Expr::Binary(l, '*', r) => {
            // (-a)*b and a*(-b) -> -(a*b)
            match (&**l, &**r) {
                (Expr::Unary('-', a), Expr::Unary('-', b)) => {
                    return Expr::binary((**a).clone(), '*', (**b).clone());
                }
                (Expr::Unary('-', a), b) | (b, Expr::Unary('-', a)) if b.as_number().is_none() => {
                    let product = if matches!(&**l, Expr::Unary(..)) {
                        Expr::binary((**a).clone(), '*', b.clone())
                    } else {
                        Expr::binary(b.clone(), '*', (**a).clone())
                    };
                    return Expr::neg(product);
                }
                _ => {}
            }
        }
        Expr::Call(name, args) if args.len() == 1 => match (name.as_str(), &args[0]) {
            ("ln", Expr::Call(inner, u)) if inner == "exp" && u.len() == 1 => return u[0].clone(),
            ("ln", Expr::Binary(base, '^', u)) if matches!(&**base, Expr::Variable(e) if e == "e") => {
                return (**u).clone();
            }
            ("exp", Expr::Call(inner, u)) if inner == "ln" && u.len() == 1 => return u[0].clone(),
            _ => {}
        },
        Expr::Binary(base, '^', exponent) if matches!(&**base, Expr::Variable(e) if e == "e") => {
            if let Expr::Call(inner, u) = &**exponent {
                if inner == "ln" && u.len() == 1 {
                    return u[0].clone();
                }
            }
        }
        _ => {}
    }
    expr
}
