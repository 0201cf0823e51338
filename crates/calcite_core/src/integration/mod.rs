//! Rule-based symbolic integration.
//!
//! Strategies are tried in order: undoing a derivative wrapper, piecewise
//! decomposition, closed-form term rules, the special-function table and
//! finally the symbolic engine's own `integrate`. Whatever succeeds is passed
//! through identity folding and domain analysis.

pub mod domain;
pub mod identities;
pub mod rules;
pub mod special;

use crate::compiler::{split_derivative_head, Notation};
use crate::context::EngineContext;
use crate::equation_engine::Expr;
use crate::text::split_call;
use serde::Serialize;
use thiserror::Error;

pub use domain::DomainReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IntegrationMethod {
    DerivativeInverse,
    Piecewise,
    RuleBased,
    SpecialFunction,
    EngineAssisted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Antiderivative {
    /// Plain infix, without the constant of integration.
    pub result: String,
    #[serde(skip)]
    pub expr: Expr,
    pub method: IntegrationMethod,
    pub discontinuities: Vec<f64>,
    pub domain_issues: Vec<String>,
    pub render_form: String,
    pub piecewise_render_form: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{message}")]
pub struct IntegrationFailure {
    pub message: String,
    pub hint: String,
}

impl IntegrationFailure {
    fn new(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            hint: hint.into(),
        }
    }
}

/// Antiderivative of `expression` with respect to `variable`.
pub fn integrate_symbolically(
    ctx: &EngineContext,
    expression: &str,
    variable: &str,
) -> Result<Antiderivative, IntegrationFailure> {
    let text = expression.trim();
    if text.is_empty() {
        return Err(IntegrationFailure::new(
            "nothing to integrate",
            "enter an expression such as x^2",
        ));
    }

    if let Some(inner) = derivative_wrapper(text, variable) {
        let result = ctx.prepare(&inner, Notation::Plain).map_err(parse_failure)?;
        let integrand = ctx
            .engine()
            .differentiate(&result, variable)
            .unwrap_or_else(|_| result.clone());
        return Ok(finish(ctx, &integrand, result, variable, IntegrationMethod::DerivativeInverse));
    }

    let integrand = ctx.prepare(text, Notation::Plain).map_err(parse_failure)?;
    if let Expr::Call(name, args) = &integrand {
        if name == "piecewise" {
            let branches = integrate_piecewise(ctx, args, variable).ok_or_else(|| {
                IntegrationFailure::new(
                    format!("could not integrate every branch of '{text}'"),
                    "each branch needs a closed-form antiderivative",
                )
            })?;
            return Ok(finish(ctx, &integrand, branches, variable, IntegrationMethod::Piecewise));
        }
    }

    match integrate_expr(ctx, &integrand, variable) {
        Some((result, method)) => Ok(finish(ctx, &integrand, result, variable, method)),
        None => {
            log::debug!("no antiderivative found for '{text}'");
            Err(IntegrationFailure::new(
                format!("no closed-form antiderivative found for '{text}'"),
                "a definite integral int(f, x, a, b) falls back to numeric quadrature",
            ))
        }
    }
}

fn parse_failure(err: crate::error::EngineError) -> IntegrationFailure {
    IntegrationFailure::new(err.to_string(), "check the expression syntax")
}

/// Body of `diff(f, x)` or `d/dx f` when it differentiates once in `variable`.
fn derivative_wrapper(text: &str, variable: &str) -> Option<String> {
    if let Some((1, var, body)) = split_derivative_head(text) {
        return (var == variable).then(|| body.to_string());
    }
    let (name, args) = split_call(text)?;
    if !matches!(name.as_str(), "diff" | "derivative") {
        return None;
    }
    match args.as_slice() {
        [inner, var] if var.trim() == variable => Some(inner.clone()),
        _ => None,
    }
}

fn integrate_piecewise(ctx: &EngineContext, args: &[Expr], var: &str) -> Option<Expr> {
    let mut out = Vec::with_capacity(args.len());
    for chunk in args.chunks(2) {
        let (value, _) = integrate_expr(ctx, &chunk[0], var)?;
        out.push(value);
        if let Some(condition) = chunk.get(1) {
            out.push(condition.clone());
        }
    }
    Some(Expr::Call("piecewise".to_string(), out))
}

fn integrate_expr(ctx: &EngineContext, expr: &Expr, var: &str) -> Option<(Expr, IntegrationMethod)> {
    if let Some(result) = rules::integrate(expr, var) {
        return Some((result, IntegrationMethod::RuleBased));
    }
    let term = rules::peel_coefficient(expr, var);
    if let Some(body) = special::lookup(&term.factor, var) {
        let result = rules::assemble(rules::Term {
            factor: body,
            ..term
        });
        return Some((result, IntegrationMethod::SpecialFunction));
    }
    ctx.engine()
        .integrate(expr, var)
        .map(|result| (result, IntegrationMethod::EngineAssisted))
}

fn finish(
    ctx: &EngineContext,
    integrand: &Expr,
    result: Expr,
    var: &str,
    method: IntegrationMethod,
) -> Antiderivative {
    let engine = ctx.engine();
    let folded = identities::rewrite(&result);
    let simplified = engine.simplify(&folded);
    let expr = if engine.render(&simplified).len() < engine.render(&folded).len() {
        simplified
    } else {
        folded
    };
    let report = domain::analyze(integrand, &expr, var);
    log::debug!("integrated via {method:?}: {}", engine.render(&expr));
    let piecewise_render_form = matches!(&expr, Expr::Call(name, _) if name == "piecewise")
        .then(|| engine.render_markup(&expr));
    Antiderivative {
        result: engine.render(&expr),
        render_form: engine.render_markup(&expr),
        expr,
        method,
        discontinuities: report.discontinuities,
        domain_issues: report.issues,
        piecewise_render_form,
    }
}

#[cfg(test)]
mod tests {
    use super::{integrate_symbolically, IntegrationMethod};
    use crate::context::EngineContext;

    #[test]
    fn basic_rules() {
        let ctx = EngineContext::default();
        let r = integrate_symbolically(&ctx, "3*x^2", "x").expect("integral");
        assert_eq!(r.result, "x^3");
        assert_eq!(r.method, IntegrationMethod::RuleBased);
        let r = integrate_symbolically(&ctx, "1/x", "x").expect("integral");
        assert_eq!(r.result, "ln(|x|)");
        assert_eq!(r.discontinuities, vec![0.0]);
        assert_eq!(r.render_form, "\\ln\\left(\\left|x\\right|\\right)");
    }

    #[test]
    fn undoes_derivative_wrappers() {
        let ctx = EngineContext::default();
        let r = integrate_symbolically(&ctx, "diff(sin(x)*x, x)", "x").expect("integral");
        assert_eq!(r.method, IntegrationMethod::DerivativeInverse);
        assert_eq!(r.result, "sin(x)*x");
        let r = integrate_symbolically(&ctx, "d/dx (x^5)", "x").expect("integral");
        assert_eq!(r.result, "x^5");
    }

    #[test]
    fn piecewise_branches() {
        let ctx = EngineContext::default();
        let r = integrate_symbolically(&ctx, "piecewise(2x, x < 0, cos(x))", "x").expect("integral");
        assert_eq!(r.method, IntegrationMethod::Piecewise);
        assert_eq!(r.result, "piecewise(x^2, x < 0, sin(x))");
        assert!(r.piecewise_render_form.expect("cases").contains("cases"));
    }

    #[test]
    fn special_functions_and_engine_fallback() {
        let ctx = EngineContext::default();
        let r = integrate_symbolically(&ctx, "2*exp(-x^2)", "x").expect("integral");
        assert_eq!(r.method, IntegrationMethod::SpecialFunction);
        assert!(r.result.contains("erf(x)"));

        let r = integrate_symbolically(&ctx, "(x + 1)*(x - 1)", "x").expect("integral");
        assert_eq!(r.method, IntegrationMethod::EngineAssisted);
        assert_eq!(r.result, "x^3/3 - x");
    }

    #[test]
    fn failures_carry_hints() {
        let ctx = EngineContext::default();
        let err = integrate_symbolically(&ctx, "x*exp(x^2)*sin(x)", "x").unwrap_err();
        assert!(err.message.contains("no closed-form"));
        assert!(!err.hint.is_empty());
        assert!(integrate_symbolically(&ctx, "", "x").is_err());
        assert!(integrate_symbolically(&ctx, "x +* 2", "x").is_err());
    }

    #[test]
    fn domain_constraints_are_reported() {
        let ctx = EngineContext::default();
        let r = integrate_symbolically(&ctx, "ln(x)", "x").expect("integral");
        assert_eq!(r.domain_issues, vec!["x > 0".to_string()]);
    }
}
