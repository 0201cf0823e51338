//! The narrow symbolic surface the rest of the engine depends on.
//!
//! Everything symbolic (parsing, differentiation, simplification, rendering and
//! the optional exact integrate/solve hooks) goes through [`SymbolicEngine`], so
//! a richer implementation can be swapped in via
//! [`EngineContext::with_engine`](crate::context::EngineContext::with_engine).

pub mod diff;
pub mod poly;
pub mod render;
pub mod simplify;

use crate::equation_engine::{self, Evaluator, Expr};
use crate::error::{EngineError, EngineResult};
use poly::Polynomial;

pub trait SymbolicEngine {
    fn parse(&self, text: &str) -> EngineResult<Expr>;

    fn differentiate(&self, expr: &Expr, variable: &str) -> EngineResult<Expr>;

    fn simplify(&self, expr: &Expr) -> Expr;

    /// Plain infix text that parses back to an equivalent expression.
    fn render(&self, expr: &Expr) -> String;

    fn render_markup(&self, expr: &Expr) -> String;

    fn compile(&self, expr: &Expr) -> EngineResult<Evaluator> {
        Evaluator::new(expr).map_err(EngineError::Parse)
    }

    /// Exact antiderivative, when the engine knows one.
    fn integrate(&self, _expr: &Expr, _variable: &str) -> Option<Expr> {
        None
    }

    /// Exact solutions of `expr = 0`, when the engine can find them.
    fn solve(&self, _expr: &Expr, _variable: &str) -> Option<Vec<Expr>> {
        None
    }
}

/// Minimal engine shipped with the crate: polynomial integration and exact
/// solving up to degree two.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinEngine;

impl SymbolicEngine for BuiltinEngine {
    fn parse(&self, text: &str) -> EngineResult<Expr> {
        equation_engine::parse(text).map_err(EngineError::Parse)
    }

    fn differentiate(&self, expr: &Expr, variable: &str) -> EngineResult<Expr> {
        let derivative = diff::derivative(expr, variable).map_err(EngineError::InvalidInput)?;
        Ok(simplify::simplify(&derivative))
    }

    fn simplify(&self, expr: &Expr) -> Expr {
        simplify::simplify(expr)
    }

    fn render(&self, expr: &Expr) -> String {
        render::render(expr)
    }

    fn render_markup(&self, expr: &Expr) -> String {
        render::render_markup(expr)
    }

    fn integrate(&self, expr: &Expr, variable: &str) -> Option<Expr> {
        let antiderivative = Polynomial::from_expr(expr, variable)?.integrate();
        Some(simplify::simplify(&antiderivative.to_expr(variable)))
    }

    fn solve(&self, expr: &Expr, variable: &str) -> Option<Vec<Expr>> {
        let roots = Polynomial::from_expr(expr, variable)?.real_roots()?;
        Some(roots.into_iter().map(Expr::Number).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{BuiltinEngine, SymbolicEngine};
    use crate::equation_engine::Expr;

    #[test]
    fn differentiates_and_renders() {
        let engine = BuiltinEngine;
        let expr = engine.parse("x^3 + 2*x").expect("parse");
        let derivative = engine.differentiate(&expr, "x").expect("derivative");
        assert_eq!(engine.render(&derivative), "3*x^2 + 2");
    }

    #[test]
    fn integrates_polynomials_only() {
        let engine = BuiltinEngine;
        let expr = engine.parse("4*x^3 + 1").expect("parse");
        let result = engine.integrate(&expr, "x").expect("polynomial");
        assert_eq!(engine.render(&result), "x^4 + x");
        let trig = engine.parse("sin(x)").expect("parse");
        assert!(engine.integrate(&trig, "x").is_none());
    }

    #[test]
    fn solves_quadratics() {
        let engine = BuiltinEngine;
        let expr = engine.parse("x^2 - 5*x + 6").expect("parse");
        let roots = engine.solve(&expr, "x").expect("quadratic");
        assert_eq!(roots, vec![Expr::num(2.0), Expr::num(3.0)]);
    }
}
