//! Where an antiderivative is valid: poles of denominators and advisory
//! constraints on logarithm and square-root arguments.

use crate::equation_engine::Expr;
use crate::symbolic::poly::{constant_value, Polynomial};
use crate::symbolic::render::render;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DomainReport {
    /// Sorted, deduplicated points where a denominator vanishes.
    pub discontinuities: Vec<f64>,
    pub issues: Vec<String>,
}

/// Analyzes the integrand and its antiderivative together.
pub fn analyze(integrand: &Expr, antiderivative: &Expr, var: &str) -> DomainReport {
    let mut report = DomainReport::default();
    for expr in [integrand, antiderivative] {
        collect_poles(expr, var, &mut report.discontinuities);
    }
    report.discontinuities.sort_by(|a, b| a.total_cmp(b));
    report.discontinuities.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    collect_constraints(antiderivative, var, &mut report.issues);
    report
}

fn collect_poles(expr: &Expr, var: &str, out: &mut Vec<f64>) {
    match expr {
        Expr::Number(_) | Expr::Variable(_) => {}
        Expr::Binary(l, op, r) => {
            match op {
                '/' if r.contains_var(var) => denominator_roots(r, var, out),
                '^' if l.contains_var(var) => {
                    if constant_value(r).is_some_and(|n| n < 0.0) {
                        denominator_roots(l, var, out);
                    }
                }
                _ => {}
            }
            collect_poles(l, var, out);
            collect_poles(r, var, out);
        }
        Expr::Unary(_, operand) => collect_poles(operand, var, out),
        Expr::Call(_, args) => args.iter().for_each(|a| collect_poles(a, var, out)),
    }
}

/// Real roots of an affine or quadratic denominator, looking through a
/// constant power such as `(x - 1)^2`.
fn denominator_roots(den: &Expr, var: &str, out: &mut Vec<f64>) {
    let den = match den {
        Expr::Binary(base, '^', exponent)
            if constant_value(exponent).is_some_and(|n| n > 0.0) =>
        {
            &**base
        }
        other => other,
    };
    if let Some(roots) = Polynomial::from_expr(den, var).and_then(|p| p.real_roots()) {
        out.extend(roots);
    }
}

fn collect_constraints(expr: &Expr, var: &str, out: &mut Vec<String>) {
    match expr {
        Expr::Number(_) | Expr::Variable(_) => {}
        Expr::Binary(l, _, r) => {
            collect_constraints(l, var, out);
            collect_constraints(r, var, out);
        }
        Expr::Unary(_, operand) => collect_constraints(operand, var, out),
        Expr::Call(name, args) => {
            let argument = match (name.as_str(), args.as_slice()) {
                ("ln" | "log" | "log10", [u]) | ("log", [_, u]) => Some((u, "> 0")),
                ("sqrt", [u]) => Some((u, ">= 0")),
                _ => None,
            };
            if let Some((u, relation)) = argument.filter(|(u, _)| u.contains_var(var)) {
                let issue = match u {
                    // |v| is never negative; only its zeros are excluded.
                    Expr::Call(abs, inner) if abs == "abs" && inner.len() == 1 => {
                        (relation == "> 0").then(|| format!("{} != 0", render(&inner[0])))
                    }
                    _ => Some(format!("{} {relation}", render(u))),
                };
                if let Some(issue) = issue.filter(|i| !out.contains(i)) {
                    out.push(issue);
                }
            }
            args.iter().for_each(|a| collect_constraints(a, var, out));
        }
    }
}
