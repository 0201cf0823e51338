//! Single-variable differentiation rules over [`Expr`].
//!
//! Results are left unsimplified; callers run them through
//! [`simplify`](super::simplify::simplify).

use crate::equation_engine::Expr;

fn num(value: f64) -> Expr {
    Expr::num(value)
}

fn mul(a: Expr, b: Expr) -> Expr {
    Expr::binary(a, '*', b)
}

fn div(a: Expr, b: Expr) -> Expr {
    Expr::binary(a, '/', b)
}

fn pow(a: Expr, b: Expr) -> Expr {
    Expr::binary(a, '^', b)
}

fn call(name: &str, arg: &Expr) -> Expr {
    Expr::call1(name, arg.clone())
}

/// Derivative of `expr` with respect to `var`.
pub fn derivative(expr: &Expr, var: &str) -> Result<Expr, String> {
    if !expr.contains_var(var) {
        return Ok(num(0.0));
    }
    match expr {
        Expr::Number(_) => Ok(num(0.0)),
        Expr::Variable(name) => Ok(num(if name == var { 1.0 } else { 0.0 })),
        Expr::Unary('-', operand) => Ok(Expr::neg(derivative(operand, var)?)),
        Expr::Unary(op, _) => Err(format!("cannot differentiate operator '{op}'")),
        Expr::Binary(left, op, right) => binary_derivative(left, *op, right, var),
        Expr::Call(name, args) => call_derivative(name, args, var),
    }
}

fn binary_derivative(left: &Expr, op: char, right: &Expr, var: &str) -> Result<Expr, String> {
    match op {
        '+' | '-' => Ok(Expr::binary(
            derivative(left, var)?,
            op,
            derivative(right, var)?,
        )),
        // d(f*g) = f'*g + f*g'
        '*' => Ok(Expr::binary(
            mul(derivative(left, var)?, right.clone()),
            '+',
            mul(left.clone(), derivative(right, var)?),
        )),
        // d(f/g) = (f'*g - f*g') / g^2
        '/' => {
            if !right.contains_var(var) {
                return Ok(div(derivative(left, var)?, right.clone()));
            }
            Ok(div(
                Expr::binary(
                    mul(derivative(left, var)?, right.clone()),
                    '-',
                    mul(left.clone(), derivative(right, var)?),
                ),
                pow(right.clone(), num(2.0)),
            ))
        }
        '^' => power_derivative(left, right, var),
        '<' | '>' | '≤' | '≥' => Ok(num(0.0)),
        other => Err(format!("cannot differentiate operator '{other}'")),
    }
}

fn power_derivative(base: &Expr, exponent: &Expr, var: &str) -> Result<Expr, String> {
    let base_varies = base.contains_var(var);
    let exponent_varies = exponent.contains_var(var);

    if !exponent_varies {
        // d(u^n) = n*u^(n-1)*u'
        let reduced = match exponent.as_number() {
            Some(n) => num(n - 1.0),
            None => Expr::binary(exponent.clone(), '-', num(1.0)),
        };
        return Ok(mul(
            mul(exponent.clone(), pow(base.clone(), reduced)),
            derivative(base, var)?,
        ));
    }

    let outer = pow(base.clone(), exponent.clone());
    if !base_varies {
        // d(a^v) = a^v*ln(a)*v'
        let log_base = match base {
            Expr::Variable(name) if name == "e" => num(1.0),
            _ => call("ln", base),
        };
        return Ok(mul(mul(outer, log_base), derivative(exponent, var)?));
    }

    // d(u^v) = u^v*(v'*ln(u) + v*u'/u)
    Ok(mul(
        outer,
        Expr::binary(
            mul(derivative(exponent, var)?, call("ln", base)),
            '+',
            mul(exponent.clone(), div(derivative(base, var)?, base.clone())),
        ),
    ))
}

fn call_derivative(name: &str, args: &[Expr], var: &str) -> Result<Expr, String> {
    match (name, args) {
        ("piecewise", _) => {
            let mut out = Vec::with_capacity(args.len());
            for chunk in args.chunks(2) {
                match chunk {
                    [value, cond] => {
                        out.push(derivative(value, var)?);
                        out.push(cond.clone());
                    }
                    [default] => out.push(derivative(default, var)?),
                    _ => {}
                }
            }
            Ok(Expr::Call(name.to_string(), out))
        }
        ("log", [base, value]) => {
            let quotient = div(call("ln", value), call("ln", base));
            derivative(&quotient, var)
        }
        ("atan2", [y, x]) => Ok(div(
            Expr::binary(
                mul(x.clone(), derivative(y, var)?),
                '-',
                mul(y.clone(), derivative(x, var)?),
            ),
            Expr::binary(pow(x.clone(), num(2.0)), '+', pow(y.clone(), num(2.0))),
        )),
        ("min" | "max", [a, b]) => {
            let relation = if name == "min" { '<' } else { '>' };
            Ok(Expr::call(
                "piecewise",
                vec![
                    derivative(a, var)?,
                    Expr::binary(a.clone(), relation, b.clone()),
                    derivative(b, var)?,
                ],
            ))
        }
        (_, [u]) => {
            let outer = unary_function_derivative(name, u)?;
            Ok(mul(outer, derivative(u, var)?))
        }
        _ => Err(format!("cannot differentiate {name} with {} arguments", args.len())),
    }
}

/// `f'(u)` for the single-argument functions.
fn unary_function_derivative(name: &str, u: &Expr) -> Result<Expr, String> {
    let one_minus_sq = || Expr::binary(num(1.0), '-', pow(u.clone(), num(2.0)));
    let squared = |f: &str| pow(call(f, u), num(2.0));
    let out = match name {
        "sin" => call("cos", u),
        "cos" => Expr::neg(call("sin", u)),
        "tan" => squared("sec"),
        "sec" => mul(call("sec", u), call("tan", u)),
        "csc" => Expr::neg(mul(call("csc", u), call("cot", u))),
        "cot" => Expr::neg(squared("csc")),
        "asin" | "arcsin" => div(num(1.0), call("sqrt", &one_minus_sq())),
        "acos" | "arccos" => Expr::neg(div(num(1.0), call("sqrt", &one_minus_sq()))),
        "atan" | "arctan" => div(
            num(1.0),
            Expr::binary(num(1.0), '+', pow(u.clone(), num(2.0))),
        ),
        "sinh" => call("cosh", u),
        "cosh" => call("sinh", u),
        "tanh" => squared("sech"),
        "sech" => Expr::neg(mul(call("sech", u), call("tanh", u))),
        "csch" => Expr::neg(mul(call("csch", u), call("coth", u))),
        "coth" => Expr::neg(squared("csch")),
        "exp" => call("exp", u),
        "ln" => div(num(1.0), u.clone()),
        "log" | "log10" => div(num(1.0), mul(u.clone(), call("ln", &num(10.0)))),
        "sqrt" => div(num(1.0), mul(num(2.0), call("sqrt", u))),
        "cbrt" => div(num(1.0), mul(num(3.0), squared("cbrt"))),
        "abs" => call("sign", u),
        "floor" | "ceil" | "round" | "sign" | "sgn" => num(0.0),
        "erf" => mul(
            div(num(2.0), call("sqrt", &Expr::var("pi"))),
            call("exp", &Expr::neg(pow(u.clone(), num(2.0)))),
        ),
        other => return Err(format!("no derivative rule for {other}")),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::derivative;
    use crate::equation_engine::{parse, Evaluator, Scope};

    fn derivative_at(text: &str, x: f64) -> f64 {
        let expr = parse(text).expect("parse");
        let d = derivative(&expr, "x").expect("differentiable");
        Evaluator::new(&d)
            .expect("compile")
            .evaluate(&Scope::new().with("x", x))
    }

    fn numeric(text: &str, x: f64) -> f64 {
        let expr = parse(text).expect("parse");
        let f = Evaluator::new(&expr).expect("compile");
        let h = 1e-6;
        (f.eval_at("x", x + h) - f.eval_at("x", x - h)) / (2.0 * h)
    }

    #[test]
    fn matches_central_differences() {
        let cases = [
            "x^3 - 2*x",
            "sin(x)*cos(x)",
            "exp(2*x)/x",
            "ln(x^2 + 1)",
            "sqrt(x)",
            "x^x",
            "2^x",
            "atan(3*x)",
            "tanh(x)",
            "log(2, x)",
            "e^(x^2)",
        ];
        for text in cases {
            let exact = derivative_at(text, 0.7);
            let approx = numeric(text, 0.7);
            assert!(
                (exact - approx).abs() < 1e-5,
                "{text}: {exact} vs {approx}"
            );
        }
    }

    #[test]
    fn constants_have_zero_derivative() {
        assert_eq!(derivative_at("pi*e + 3", 1.0), 0.0);
    }

    #[test]
    fn factorial_is_rejected() {
        let expr = parse("x!").expect("parse");
        assert!(derivative(&expr, "x").is_err());
    }
}
