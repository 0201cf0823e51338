//! Closed-form term integration.
//!
//! Sums are split into terms, each term sheds its constant coefficient and the
//! remaining factor is matched against a fixed rule set. Every rule requires
//! its inner argument to be affine in the variable (`a*x + b`); anything else
//! declines with `None`.

use crate::equation_engine::Expr;
use crate::format::as_fraction;
use crate::symbolic::poly::{constant_value, Polynomial};

/// A term split into `coefficient * constants * factor`, where `constants`
/// are variable-free symbolic factors such as `a` in `a*sin(x)`.
#[derive(Debug, Clone)]
pub(crate) struct Term {
    pub coefficient: f64,
    pub constants: Vec<Expr>,
    pub factor: Expr,
}

/// `(a, b)` such that `expr = a*var + b` with `a != 0`.
pub(crate) fn affine(expr: &Expr, var: &str) -> Option<(f64, f64)> {
    let poly = Polynomial::from_expr(expr, var)?;
    let a = poly.coefficient(1);
    (poly.degree() == 1 && a != 0.0).then(|| (a, poly.coefficient(0)))
}

/// Flattens top-level `+` and `-` into signed terms.
pub(crate) fn split_sum(expr: &Expr) -> Vec<(bool, Expr)> {
    let mut out = Vec::new();
    collect_terms(expr, false, &mut out);
    out
}

fn collect_terms(expr: &Expr, negative: bool, out: &mut Vec<(bool, Expr)>) {
    match expr {
        Expr::Binary(l, '+', r) => {
            collect_terms(l, negative, out);
            collect_terms(r, negative, out);
        }
        Expr::Binary(l, '-', r) => {
            collect_terms(l, negative, out);
            collect_terms(r, !negative, out);
        }
        other => out.push((negative, other.clone())),
    }
}

/// Strips a leading sign, leading `k*`, trailing `*k` and trailing `/k`, plus
/// any variable-free symbolic factor.
pub(crate) fn peel_coefficient(expr: &Expr, var: &str) -> Term {
    let mut term = Term {
        coefficient: 1.0,
        constants: Vec::new(),
        factor: expr.clone(),
    };
    loop {
        let factor = term.factor.clone();
        let next = match &factor {
            Expr::Unary('-', inner) => {
                term.coefficient = -term.coefficient;
                (**inner).clone()
            }
            Expr::Binary(l, '*', r) if !l.contains_var(var) => {
                absorb(&mut term, l);
                (**r).clone()
            }
            Expr::Binary(l, '*', r) if !r.contains_var(var) => {
                absorb(&mut term, r);
                (**l).clone()
            }
            Expr::Binary(l, '/', r) if !r.contains_var(var) && l.contains_var(var) => {
                match constant_value(r) {
                    Some(k) if k != 0.0 => {
                        term.coefficient /= k;
                        (**l).clone()
                    }
                    _ => break,
                }
            }
            // `k/u` becomes `k * (1/u)`.
            Expr::Binary(l, '/', r) if !l.contains_var(var) && !is_one(l) => {
                absorb(&mut term, l);
                Expr::binary(Expr::num(1.0), '/', (**r).clone())
            }
            _ => break,
        };
        term.factor = next;
    }
    term
}

fn absorb(term: &mut Term, constant: &Expr) {
    if let Some(k) = constant_value(constant) {
        term.coefficient *= k;
        return;
    }
    match constant {
        Expr::Binary(l, '*', r) => {
            absorb(term, l);
            absorb(term, r);
        }
        Expr::Unary('-', inner) => {
            term.coefficient = -term.coefficient;
            absorb(term, inner);
        }
        other => term.constants.push(other.clone()),
    }
}

fn is_one(expr: &Expr) -> bool {
    expr.as_number() == Some(1.0)
}

/// `k * body` written the way a person would: `x^3/3`, `-cos(x)`, `2*x`.
pub(crate) fn apply_coefficient(k: f64, body: Expr) -> Expr {
    if k < 0.0 {
        return Expr::neg(apply_coefficient(-k, body));
    }
    match as_fraction(k, 1000) {
        Some((1, 1)) => body,
        Some((p, 1)) => Expr::binary(Expr::num(p as f64), '*', body),
        Some((1, q)) => Expr::binary(body, '/', Expr::num(q as f64)),
        Some((p, q)) => Expr::binary(
            Expr::binary(Expr::num(p as f64), '*', body),
            '/',
            Expr::num(q as f64),
        ),
        None => Expr::binary(Expr::num(k), '*', body),
    }
}

/// Rule-based antiderivative of `expr` in `var`.
pub fn integrate(expr: &Expr, var: &str) -> Option<Expr> {
    let mut result: Option<Expr> = None;
    for (negative, term) in split_sum(expr) {
        let mut integrated = integrate_term(&term, var)?;
        if negative {
            integrated.coefficient = -integrated.coefficient;
        }
        let negative = integrated.coefficient < 0.0;
        let magnitude = assemble(Term {
            coefficient: integrated.coefficient.abs(),
            ..integrated
        });
        result = Some(match result {
            None if negative => Expr::neg(magnitude),
            None => magnitude,
            Some(acc) => Expr::binary(acc, if negative { '-' } else { '+' }, magnitude),
        });
    }
    result
}

pub(crate) fn assemble(term: Term) -> Expr {
    let body = apply_coefficient(term.coefficient, term.factor);
    term.constants
        .into_iter()
        .rev()
        .fold(body, |acc, c| Expr::binary(c, '*', acc))
}

/// Integrates one term; the returned `factor` is the antiderivative body.
pub(crate) fn integrate_term(expr: &Expr, var: &str) -> Option<Term> {
    let term = peel_coefficient(expr, var);
    if !term.factor.contains_var(var) {
        let body = match constant_value(&term.factor) {
            Some(k) => {
                return Some(Term {
                    coefficient: term.coefficient * k,
                    constants: term.constants,
                    factor: Expr::var(var),
                })
            }
            None => Expr::binary(term.factor, '*', Expr::var(var)),
        };
        return Some(Term { factor: body, ..term });
    }
    let (scale, body) = integrate_factor(&term.factor, var)?;
    Some(Term {
        coefficient: term.coefficient * scale,
        constants: term.constants,
        factor: body,
    })
}

/// `(k, body)` with `∫ factor = k * body`.
fn integrate_factor(factor: &Expr, var: &str) -> Option<(f64, Expr)> {
    match factor {
        Expr::Variable(name) if name == var => Some((0.5, pow(Expr::var(var), 2.0))),
        Expr::Binary(base, '^', exponent) => power_rule(base, exponent, var),
        Expr::Binary(num, '/', den) if is_one(num) => reciprocal_rule(den, var),
        Expr::Binary(l, '*', r) => product_rule(l, r, var),
        Expr::Call(name, args) if args.len() == 1 => call_rule(name, &args[0], var),
        Expr::Call(name, args) if name == "log" && args.len() == 2 => {
            // log(b, u) = ln(u) / ln(b)
            let base = constant_value(&args[0])?;
            let (k, body) = call_rule("ln", &args[1], var)?;
            Some((k / base.ln(), body))
        }
        _ => None,
    }
}

fn pow(base: Expr, exponent: f64) -> Expr {
    Expr::binary(base, '^', Expr::num(exponent))
}

fn abs(expr: Expr) -> Expr {
    Expr::call1("abs", expr)
}

fn power_rule(base: &Expr, exponent: &Expr, var: &str) -> Option<(f64, Expr)> {
    if !exponent.contains_var(var) {
        let n = constant_value(exponent)?;
        if let Some((a, _)) = affine(base, var) {
            if n == -1.0 {
                return Some((1.0 / a, Expr::call1("ln", abs(base.clone()))));
            }
            return Some((1.0 / (a * (n + 1.0)), pow(base.clone(), n + 1.0)));
        }
        if n == 2.0 {
            return squared_rule(base, var);
        }
        return None;
    }
    if base.contains_var(var) {
        return None;
    }
    let (a, _) = affine(exponent, var)?;
    match base {
        Expr::Variable(name) if name == "e" => {
            Some((1.0 / a, Expr::binary(base.clone(), '^', exponent.clone())))
        }
        _ => {
            let b = constant_value(base)?;
            if b <= 0.0 || b == 1.0 {
                return None;
            }
            Some((
                1.0 / (a * b.ln()),
                Expr::binary(base.clone(), '^', exponent.clone()),
            ))
        }
    }
}

/// `sin^2`, `cos^2`, `sec^2`, `csc^2`, `tan^2`, `cot^2` of an affine argument.
fn squared_rule(base: &Expr, var: &str) -> Option<(f64, Expr)> {
    let Expr::Call(name, args) = base else {
        return None;
    };
    let [u] = args.as_slice() else {
        return None;
    };
    let (a, _) = affine(u, var)?;
    let double = || Expr::binary(Expr::num(2.0), '*', u.clone());
    let body = match name.as_str() {
        "sec" => return Some((1.0 / a, Expr::call1("tan", u.clone()))),
        "csc" => return Some((-1.0 / a, Expr::call1("cot", u.clone()))),
        // u/2 - sin(2u)/4
        "sin" => Expr::binary(
            Expr::binary(u.clone(), '/', Expr::num(2.0)),
            '-',
            Expr::binary(Expr::call1("sin", double()), '/', Expr::num(4.0)),
        ),
        "cos" => Expr::binary(
            Expr::binary(u.clone(), '/', Expr::num(2.0)),
            '+',
            Expr::binary(Expr::call1("sin", double()), '/', Expr::num(4.0)),
        ),
        "tan" => Expr::binary(Expr::call1("tan", u.clone()), '-', u.clone()),
        "cot" => Expr::neg(Expr::binary(Expr::call1("cot", u.clone()), '+', u.clone())),
        "sech" => return Some((1.0 / a, Expr::call1("tanh", u.clone()))),
        "csch" => return Some((-1.0 / a, Expr::call1("coth", u.clone()))),
        _ => return None,
    };
    Some((1.0 / a, body))
}

fn reciprocal_rule(den: &Expr, var: &str) -> Option<(f64, Expr)> {
    if let Some((a, _)) = affine(den, var) {
        return Some((1.0 / a, Expr::call1("ln", abs(den.clone()))));
    }
    match den {
        Expr::Binary(base, '^', exponent) if !exponent.contains_var(var) => {
            let n = constant_value(exponent)?;
            if let Some((a, _)) = affine(base, var) {
                if n == 1.0 {
                    return Some((1.0 / a, Expr::call1("ln", abs((**base).clone()))));
                }
                return Some((1.0 / (a * (1.0 - n)), pow((**base).clone(), 1.0 - n)));
            }
            if n == 2.0 {
                // 1/cos^2 = sec^2, 1/sin^2 = csc^2
                if let Expr::Call(name, args) = &**base {
                    let swapped = match name.as_str() {
                        "cos" => "sec",
                        "sin" => "csc",
                        "cosh" => "sech",
                        "sinh" => "csch",
                        _ => return None,
                    };
                    return squared_rule(&Expr::call(swapped, args.clone()), var);
                }
            }
            None
        }
        // 1/sqrt(1 - u^2) -> asin(u)
        Expr::Call(name, args) if name == "sqrt" && args.len() == 1 => {
            let u = one_minus_square(&args[0])?;
            let (a, _) = affine(&u, var)?;
            Some((1.0 / a, Expr::call1("asin", u)))
        }
        Expr::Call(name, args) if args.len() == 1 => {
            let reciprocal = match name.as_str() {
                "cos" => "sec",
                "sin" => "csc",
                "tan" => "cot",
                "cosh" => "sech",
                "sinh" => "csch",
                _ => return None,
            };
            call_rule(reciprocal, &args[0], var)
        }
        _ => {
            // 1/(1 + u^2) -> atan(u)
            let u = one_plus_square(den)?;
            let (a, _) = affine(&u, var)?;
            Some((1.0 / a, Expr::call1("atan", u)))
        }
    }
}

fn squared_operand(expr: &Expr) -> Option<Expr> {
    match expr {
        Expr::Binary(base, '^', exponent) if exponent.as_number() == Some(2.0) => {
            Some((**base).clone())
        }
        _ => None,
    }
}

fn one_minus_square(expr: &Expr) -> Option<Expr> {
    match expr {
        Expr::Binary(one, '-', square) if is_one(one) => squared_operand(square),
        _ => None,
    }
}

fn one_plus_square(expr: &Expr) -> Option<Expr> {
    match expr {
        Expr::Binary(l, '+', r) if is_one(l) => squared_operand(r),
        Expr::Binary(l, '+', r) if is_one(r) => squared_operand(l),
        _ => None,
    }
}

/// Reciprocal and product pairs sharing one affine argument.
fn product_rule(l: &Expr, r: &Expr, var: &str) -> Option<(f64, Expr)> {
    let (Expr::Call(f, fa), Expr::Call(g, ga)) = (l, r) else {
        return None;
    };
    let ([u], [v]) = (fa.as_slice(), ga.as_slice()) else {
        return None;
    };
    if u != v {
        return None;
    }
    let (a, _) = affine(u, var)?;
    let pair = |x: &str, y: &str| (f == x && g == y) || (f == y && g == x);
    if pair("sec", "tan") {
        Some((1.0 / a, Expr::call1("sec", u.clone())))
    } else if pair("csc", "cot") {
        Some((-1.0 / a, Expr::call1("csc", u.clone())))
    } else if pair("sin", "cos") {
        Some((0.5 / a, pow(Expr::call1("sin", u.clone()), 2.0)))
    } else if pair("sinh", "cosh") {
        Some((0.5 / a, pow(Expr::call1("sinh", u.clone()), 2.0)))
    } else if pair("sech", "tanh") {
        Some((-1.0 / a, Expr::call1("sech", u.clone())))
    } else {
        None
    }
}

fn call_rule(name: &str, u: &Expr, var: &str) -> Option<(f64, Expr)> {
    let (a, _) = affine(u, var)?;
    let u = || u.clone();
    let call = |f: &str| Expr::call1(f, u());
    let ln_abs = |inner: Expr| Expr::call1("ln", abs(inner));
    let (k, body) = match name {
        "sin" => (-1.0, call("cos")),
        "cos" => (1.0, call("sin")),
        "tan" => (-1.0, ln_abs(call("cos"))),
        "cot" => (1.0, ln_abs(call("sin"))),
        "sec" => (1.0, ln_abs(Expr::binary(call("sec"), '+', call("tan")))),
        "csc" => (-1.0, ln_abs(Expr::binary(call("csc"), '+', call("cot")))),
        "exp" => (1.0, call("exp")),
        "sinh" => (1.0, call("cosh")),
        "cosh" => (1.0, call("sinh")),
        "tanh" => (1.0, Expr::call1("ln", call("cosh"))),
        "coth" => (1.0, ln_abs(call("sinh"))),
        "sech" => (1.0, Expr::call1("atan", call("sinh"))),
        "csch" => (
            1.0,
            ln_abs(Expr::call1("tanh", Expr::binary(u(), '/', Expr::num(2.0)))),
        ),
        // u*ln(u) - u
        "ln" => (
            1.0,
            Expr::binary(Expr::binary(u(), '*', call("ln")), '-', u()),
        ),
        "log" | "log10" => {
            return Some((
                1.0 / (a * std::f64::consts::LN_10),
                Expr::binary(Expr::binary(u(), '*', Expr::call1("ln", u())), '-', u()),
            ))
        }
        "sqrt" => (2.0 / 3.0, pow(u(), 1.5)),
        // u*atan(u) - ln(1 + u^2)/2
        "atan" => (
            1.0,
            Expr::binary(
                Expr::binary(u(), '*', call("atan")),
                '-',
                Expr::binary(
                    Expr::call1("ln", Expr::binary(Expr::num(1.0), '+', pow(u(), 2.0))),
                    '/',
                    Expr::num(2.0),
                ),
            ),
        ),
        // u*asin(u) + sqrt(1 - u^2)
        "asin" => (
            1.0,
            Expr::binary(
                Expr::binary(u(), '*', call("asin")),
                '+',
                Expr::call1("sqrt", Expr::binary(Expr::num(1.0), '-', pow(u(), 2.0))),
            ),
        ),
        _ => return None,
    };
    Some((k / a, body))
}

#[cfg(test)]
mod tests {
    use super::{affine, integrate, peel_coefficient};
    use crate::equation_engine::parse;
    use crate::symbolic::render::render;

    fn rule(text: &str) -> Option<String> {
        let expr = parse(text).expect("parse");
        integrate(&expr, "x").map(|r| render(&r))
    }

    #[test]
    fn power_rule_and_coefficients() {
        assert_eq!(rule("3*x^2").as_deref(), Some("x^3"));
        assert_eq!(rule("x^2").as_deref(), Some("x^3/3"));
        assert_eq!(rule("x").as_deref(), Some("x^2/2"));
        assert_eq!(rule("1/x").as_deref(), Some("ln(|x|)"));
        assert_eq!(rule("x^-1").as_deref(), Some("ln(|x|)"));
        assert_eq!(rule("5").as_deref(), Some("5*x"));
    }

    #[test]
    fn sums_keep_their_signs() {
        assert_eq!(rule("cos(x) - sin(x)").as_deref(), Some("sin(x) + cos(x)"));
        assert_eq!(rule("-sin(x)").as_deref(), Some("cos(x)"));
    }

    #[test]
    fn affine_arguments_rescale() {
        assert_eq!(rule("cos(2x)").as_deref(), Some("sin(2*x)/2"));
        assert_eq!(rule("exp(3*x + 1)").as_deref(), Some("exp(3*x + 1)/3"));
        assert_eq!(rule("1/(2x + 1)").as_deref(), Some("ln(|2*x + 1|)/2"));
    }

    #[test]
    fn inverse_trig_forms() {
        assert_eq!(rule("1/(1 + x^2)").as_deref(), Some("atan(x)"));
        assert_eq!(rule("1/sqrt(1 - x^2)").as_deref(), Some("asin(x)"));
        assert_eq!(rule("sec(x)*tan(x)").as_deref(), Some("sec(x)"));
        assert_eq!(rule("sec(x)^2").as_deref(), Some("tan(x)"));
    }

    #[test]
    fn symbolic_constants_ride_along() {
        assert_eq!(rule("a*sin(x)").as_deref(), Some("-a*cos(x)"));
        let term = peel_coefficient(&parse("-2*a*x/4").expect("parse"), "x");
        assert_eq!(term.coefficient, -0.5);
        assert_eq!(term.constants.len(), 1);
    }

    #[test]
    fn non_affine_arguments_decline() {
        assert!(rule("sin(x^2)").is_none());
        assert!(rule("x*exp(x)").is_none());
        assert!(affine(&parse("x^2").expect("parse"), "x").is_none());
    }
}
