//! Routes `(category, input)` requests to the toolkit and assembles the
//! human-readable answer with its step trace.
//!
//! This is the one place where internal `None`, `NaN` and empty results turn
//! into user-facing errors. Every failure carries a hint for its category and,
//! when there is one, the underlying detail.

use crate::compiler::Notation;
use crate::context::EngineContext;
use crate::equation_engine::{Evaluator, Expr};
use crate::error::EngineError;
use crate::format::{format_number, format_pi_multiple};
use crate::integration::integrate_symbolically;
use crate::linalg::{self, LinalgValue};
use crate::numerics::{
    arc_length, curvature, find_extrema, find_zeros, simpson_integrate, solve_linear_system,
    ExtremumKind,
};
use crate::ode::{describe_endpoint, OdeEquation, OdeMethod};
use crate::symbolic::poly::{constant_value, Polynomial};
use crate::text::{find_top_level, split_call, split_top_level};
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SIMPSON_INTERVALS: usize = 1000;
const TRIG_SAMPLES: usize = 720;
const TRIG_DEDUP: f64 = 1e-4;
const STATISTICS_OPERATIONS: &[&str] = &[
    "mean", "median", "mode", "variance", "stdev", "min", "max", "sum", "range", "count",
];
const CALCULUS_OPERATIONS: &[&str] = &[
    "int", "diff", "zeros", "extrema", "arclength", "curvature",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverCategory {
    Algebra,
    Trigonometry,
    Calculus,
    Ode,
    Matrices,
    Vectors,
    Statistics,
}

impl SolverCategory {
    pub const ALL: [SolverCategory; 7] = [
        SolverCategory::Algebra,
        SolverCategory::Trigonometry,
        SolverCategory::Calculus,
        SolverCategory::Ode,
        SolverCategory::Matrices,
        SolverCategory::Vectors,
        SolverCategory::Statistics,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SolverCategory::Algebra => "algebra",
            SolverCategory::Trigonometry => "trigonometry",
            SolverCategory::Calculus => "calculus",
            SolverCategory::Ode => "ode",
            SolverCategory::Matrices => "matrices",
            SolverCategory::Vectors => "vectors",
            SolverCategory::Statistics => "statistics",
        }
    }

    pub fn hint(self) -> &'static str {
        match self {
            SolverCategory::Algebra => {
                "try an equation such as x^2 - 4 = 0 or a system such as x + y = 3, x - y = 1"
            }
            SolverCategory::Trigonometry => "try sin(x) = 0.5 or cos(pi/3)",
            SolverCategory::Calculus => {
                "try int(x^2, x, 0, 1), diff(sin(x), x), zeros(f, a, b), extrema(f, a, b), arclength(f, a, b) or curvature(f, x0)"
            }
            SolverCategory::Ode => "try dy/dx = x + y, y(0) = 1, x in [0, 2]",
            SolverCategory::Matrices => "try det([[1,2],[3,4]]) or mul([[1,2]], [[3],[4]])",
            SolverCategory::Vectors => "try dot([1,2,3], [4,5,6]) or normalize([3,4])",
            SolverCategory::Statistics => "try mean(1, 2, 3) or a plain list such as 4, 8, 15, 16",
        }
    }
}

impl fmt::Display for SolverCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SolverCategory {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        SolverCategory::ALL
            .into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = SolverCategory::ALL.iter().map(|c| c.name()).collect();
                EngineError::unsupported(&wanted, &names)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverResult {
    pub input: String,
    pub output: String,
    pub render_form: Option<String>,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{message}{}", detail_suffix(.detail))]
pub struct SolveError {
    pub input: String,
    pub category: SolverCategory,
    pub message: String,
    pub hint: String,
    pub detail: Option<String>,
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail.as_ref().map(|d| format!(" ({d})")).unwrap_or_default()
}

struct Outcome {
    output: String,
    render_form: Option<String>,
    steps: Vec<String>,
}

impl Outcome {
    fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            render_form: None,
            steps: Vec::new(),
        }
    }

    fn step(mut self, step: impl Into<String>) -> Self {
        self.steps.push(step.into());
        self
    }

    fn markup(mut self, render_form: String) -> Self {
        self.render_form = Some(render_form);
        self
    }
}

struct Failure {
    message: String,
    detail: Option<String>,
}

impl Failure {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<EngineError> for Failure {
    fn from(err: EngineError) -> Self {
        let message = match &err {
            EngineError::Parse(_) => "could not read the input",
            EngineError::Domain(_) => "the input is outside the operation's domain",
            EngineError::Convergence(_) => "the computation did not converge",
            EngineError::UnsupportedOperation { .. } => "unsupported operation",
            EngineError::NumericOverflow(_) => "the result is not a finite number",
            EngineError::InvalidInput(_) => "invalid input",
            EngineError::Cancelled => "the computation was cancelled",
        };
        Failure::new(message).detail(err.to_string())
    }
}

type Handled = Result<Outcome, Failure>;

/// Solves one request.
pub fn solve(
    ctx: &EngineContext,
    category: SolverCategory,
    input: &str,
) -> Result<SolverResult, SolveError> {
    let text = input.trim();
    let handled = if text.is_empty() {
        Err(Failure::new("nothing to solve"))
    } else {
        match category {
            SolverCategory::Algebra => algebra(ctx, text),
            SolverCategory::Trigonometry => trigonometry(ctx, text),
            SolverCategory::Calculus => calculus(ctx, text),
            SolverCategory::Ode => ode(ctx, text),
            SolverCategory::Matrices => matrices(text),
            SolverCategory::Vectors => vectors(text),
            SolverCategory::Statistics => statistics(ctx, text),
        }
    };
    match handled {
        Ok(outcome) => Ok(SolverResult {
            input: input.to_string(),
            output: outcome.output,
            render_form: outcome.render_form,
            steps: outcome.steps,
        }),
        Err(failure) => {
            log::debug!("{category} request '{text}' failed: {}", failure.message);
            Err(SolveError {
                input: input.to_string(),
                category,
                message: failure.message,
                hint: category.hint().to_string(),
                detail: failure.detail,
            })
        }
    }
}

// --- Shared helpers ---

fn prepare(ctx: &EngineContext, text: &str) -> Result<Expr, Failure> {
    Ok(ctx.prepare(text, Notation::Plain)?)
}

fn number(ctx: &EngineContext, text: &str) -> Result<f64, Failure> {
    let expr = prepare(ctx, text)?;
    constant_value(&expr)
        .ok_or_else(|| Failure::new(format!("'{}' is not a finite number", text.trim())))
}

/// Splits `lhs = rhs` into the residual `lhs - rhs`.
fn residual(ctx: &EngineContext, text: &str) -> Result<Option<Expr>, Failure> {
    let Some(at) = find_top_level(text, '=') else {
        return Ok(None);
    };
    let (lhs, rhs) = (text[..at].trim(), text[at + 1..].trim());
    if lhs.is_empty() || rhs.is_empty() {
        return Err(Failure::new("both sides of the equation are needed"));
    }
    let expr = prepare(ctx, &format!("({lhs}) - ({rhs})"))?;
    Ok(Some(ctx.engine().simplify(&expr)))
}

/// The one free variable of `expr`, or `fallback` when there is none.
fn single_variable(expr: &Expr, fallback: &str) -> Result<String, Failure> {
    let variables = expr.free_variables();
    match variables.len() {
        0 => Ok(fallback.to_string()),
        1 => Ok(variables.into_iter().next().unwrap_or_default()),
        _ => Err(Failure::new("expected a single unknown").detail(format!(
            "found {}",
            variables.into_iter().collect::<Vec<_>>().join(", ")
        ))),
    }
}

fn compile(ctx: &EngineContext, expr: &Expr) -> Result<Evaluator, Failure> {
    Ok(ctx.engine().compile(expr)?)
}

/// A one-variable function given as text, defaulting to `x`.
fn function_of(ctx: &EngineContext, text: &str) -> Result<(Evaluator, String), Failure> {
    let expr = prepare(ctx, text)?;
    let variable = single_variable(&expr, "x")?;
    Ok((compile(ctx, &expr)?, variable))
}

fn join_values(values: &[f64], render: impl Fn(f64) -> String) -> String {
    values.iter().map(|v| render(*v)).collect::<Vec<_>>().join(", ")
}

fn interval(ctx: &EngineContext, a: &str, b: &str) -> Result<(f64, f64), Failure> {
    let (a, b) = (number(ctx, a)?, number(ctx, b)?);
    if a < b {
        Ok((a, b))
    } else {
        Err(Failure::new(format!(
            "empty interval [{}, {}]",
            format_number(a),
            format_number(b)
        )))
    }
}

// --- Algebra ---

fn algebra(ctx: &EngineContext, text: &str) -> Handled {
    let pieces = split_top_level(text, &[',', ';']);
    if pieces.len() > 1 {
        let solution = solve_linear_system(ctx, text).ok_or_else(|| {
            Failure::new("could not solve the linear system")
                .detail("the system must be linear, square and non-singular")
        })?;
        return Ok(Outcome::new(solution.to_string())
            .step(format!("{} linear equations", pieces.len()))
            .step("Gaussian elimination with partial pivoting"));
    }

    let Some(residual) = residual(ctx, text)? else {
        return simplify_or_evaluate(ctx, text);
    };
    let engine = ctx.engine();
    let variable = single_variable(&residual, "x")?;
    let rearranged = format!("{} = 0", engine.render(&residual));
    if residual.free_variables().is_empty() {
        let holds = constant_value(&residual).is_some_and(|v| v.abs() < 1e-12);
        return Ok(Outcome::new(if holds { "true" } else { "false" }).step(rearranged));
    }

    let degree = Polynomial::from_expr(&residual, &variable).map(|p| p.degree());
    if let Some(degree) = degree.filter(|d| *d <= 2) {
        let mut roots: Vec<f64> = engine
            .solve(&residual, &variable)
            .unwrap_or_default()
            .iter()
            .filter_map(constant_value)
            .collect();
        if roots.is_empty() {
            return Err(Failure::new("no real solutions").detail(rearranged));
        }
        roots.sort_by(|a, b| a.total_cmp(b));
        return Ok(
            Outcome::new(format!("{variable} = {}", join_values(&roots, format_number)))
                .step(rearranged)
                .step(format!("solved exactly as a polynomial of degree {degree}")),
        );
    }

    let f = compile(ctx, &residual)?;
    let radius = ctx.config.algebra_search_radius;
    let roots = find_zeros(
        |x| f.eval_at(&variable, x),
        -radius,
        radius,
        ctx.config.sample_count * 20,
    );
    if roots.is_empty() {
        return Err(Failure::new("no real solutions found").detail(format!(
            "scanned {variable} in [{}, {}]",
            format_number(-radius),
            format_number(radius)
        )));
    }
    Ok(
        Outcome::new(format!("{variable} = {}", join_values(&roots, format_number)))
            .step(rearranged)
            .step(format!(
                "located sign changes on [{}, {}] and refined them by bisection",
                format_number(-radius),
                format_number(radius)
            )),
    )
}

fn simplify_or_evaluate(ctx: &EngineContext, text: &str) -> Handled {
    let expr = prepare(ctx, text)?;
    let engine = ctx.engine();
    if expr.free_variables().is_empty() {
        let value = constant_value(&expr).ok_or_else(|| {
            Failure::from(EngineError::NumericOverflow(format!("'{text}' is undefined")))
        })?;
        return Ok(Outcome::new(format_number(value)).step(format!("evaluated {}", engine.render(&expr))));
    }
    let simplified = engine.simplify(&expr);
    Ok(Outcome::new(engine.render(&simplified))
        .markup(engine.render_markup(&simplified))
        .step("simplified"))
}

// --- Trigonometry ---

fn trigonometry(ctx: &EngineContext, text: &str) -> Handled {
    let Some(residual) = residual(ctx, text)? else {
        return simplify_or_evaluate(ctx, text);
    };
    let engine = ctx.engine();
    let variable = single_variable(&residual, "x")?;
    let rearranged = format!("{} = 0", engine.render(&residual));

    if let Some(exact) = engine.solve(&residual, &variable) {
        let mut roots: Vec<f64> = exact.iter().filter_map(constant_value).collect();
        if !roots.is_empty() {
            roots.sort_by(|a, b| a.total_cmp(b));
            return Ok(Outcome::new(format!(
                "{variable} = {}",
                join_values(&roots, format_pi_multiple)
            ))
            .step(rearranged)
            .step("solved exactly"));
        }
    }

    let f = compile(ctx, &residual)?;
    let mut roots: Vec<f64> = Vec::new();
    for root in find_zeros(|x| f.eval_at(&variable, x), 0.0, TAU, TRIG_SAMPLES) {
        if root < TAU - TRIG_DEDUP && roots.iter().all(|r| (r - root).abs() > TRIG_DEDUP) {
            roots.push(root);
        }
    }
    if roots.is_empty() {
        return Err(Failure::new("no solutions in [0, 2π)").detail(rearranged));
    }
    Ok(Outcome::new(format!(
        "{variable} = {}",
        join_values(&roots, format_pi_multiple)
    ))
    .step(rearranged)
    .step("bisected sign changes on [0, 2π)"))
}

// --- Calculus ---

fn calculus(ctx: &EngineContext, text: &str) -> Handled {
    let (name, args) = split_call(text).ok_or_else(|| {
        Failure::from(EngineError::unsupported(text, CALCULUS_OPERATIONS))
    })?;
    let args: Vec<&str> = args.iter().map(|a| a.trim()).collect();
    match (name.as_str(), args.as_slice()) {
        ("int" | "integrate", [f, var]) => indefinite(ctx, f, var),
        ("int" | "integrate", [f]) => indefinite(ctx, f, "x"),
        ("int" | "integrate", [f, var, a, b]) => definite(ctx, f, var, a, b),
        ("diff" | "derivative", [f, var]) => derivative(ctx, f, var),
        ("diff" | "derivative", [f]) => derivative(ctx, f, "x"),
        ("zeros" | "roots", [f, a, b]) => {
            let (f, variable) = function_of(ctx, f)?;
            let (a, b) = interval(ctx, a, b)?;
            let zeros = find_zeros(|x| f.eval_at(&variable, x), a, b, ctx.config.sample_count);
            if zeros.is_empty() {
                return Err(Failure::new("no zeros found on the interval"));
            }
            Ok(Outcome::new(format!("{variable} = {}", join_values(&zeros, format_number)))
                .step(format!("scanned {} samples", ctx.config.sample_count)))
        }
        ("extrema", [f, a, b]) => {
            let (f, variable) = function_of(ctx, f)?;
            let (a, b) = interval(ctx, a, b)?;
            let extrema = find_extrema(|x| f.eval_at(&variable, x), a, b, ctx.config.sample_count);
            if extrema.is_empty() {
                return Err(Failure::new("no local extrema on the interval"));
            }
            let listed: Vec<String> = extrema
                .iter()
                .map(|e| {
                    let kind = match e.kind {
                        ExtremumKind::Max => "max",
                        ExtremumKind::Min => "min",
                    };
                    format!("{kind} ({}, {})", format_number(e.x), format_number(e.y))
                })
                .collect();
            Ok(Outcome::new(listed.join(", ")).step("sign changes of the central difference"))
        }
        ("arclength", [f, a, b]) => {
            let (f, variable) = function_of(ctx, f)?;
            let (a, b) = interval(ctx, a, b)?;
            let length = arc_length(|x| f.eval_at(&variable, x), a, b, SIMPSON_INTERVALS);
            if !length.is_finite() {
                return Err(EngineError::NumericOverflow("arc length diverges".to_string()).into());
            }
            Ok(Outcome::new(format_number(length))
                .step(format!("Simpson's rule on sqrt(1 + f'^2) with {SIMPSON_INTERVALS} intervals")))
        }
        ("curvature", [f, x0]) => {
            let (f, variable) = function_of(ctx, f)?;
            let x0 = number(ctx, x0)?;
            let k = curvature(|x| f.eval_at(&variable, x), x0).ok_or_else(|| {
                Failure::new("curvature is undefined at that point")
            })?;
            Ok(Outcome::new(format_number(k)).step("f'' / (1 + f'^2)^(3/2)"))
        }
        (other, _) => Err(Failure::from(EngineError::unsupported(other, CALCULUS_OPERATIONS))
            .detail(format!("'{other}' with {} argument(s) is not a calculus form", args.len()))),
    }
}

fn indefinite(ctx: &EngineContext, f: &str, var: &str) -> Handled {
    let result = integrate_symbolically(ctx, f, var)
        .map_err(|failure| Failure::new(failure.message).detail(failure.hint))?;
    let mut outcome = Outcome::new(format!("{} + C", result.result))
        .markup(format!("{} + C", result.render_form))
        .step(format!("method: {:?}", result.method));
    if !result.discontinuities.is_empty() {
        outcome = outcome.step(format!(
            "discontinuous at {var} = {}",
            join_values(&result.discontinuities, format_number)
        ));
    }
    for issue in &result.domain_issues {
        outcome = outcome.step(format!("valid where {issue}"));
    }
    Ok(outcome)
}

fn definite(ctx: &EngineContext, f: &str, var: &str, a: &str, b: &str) -> Handled {
    let (a, b) = (number(ctx, a)?, number(ctx, b)?);
    let (lo, hi) = (a.min(b), a.max(b));

    if let Ok(result) = integrate_symbolically(ctx, f, var) {
        if let Some(pole) = result.discontinuities.iter().find(|d| (lo..=hi).contains(*d)) {
            return Err(Failure::new("the integrand is discontinuous inside the bounds")
                .detail(format!("{var} = {}", format_number(*pole))));
        }
        let antiderivative = compile(ctx, &result.expr)?;
        let (fa, fb) = (antiderivative.eval_at(var, a), antiderivative.eval_at(var, b));
        let value = fb - fa;
        if value.is_finite() {
            return Ok(Outcome::new(format_number(value))
                .step(format!("antiderivative F({var}) = {}", result.result))
                .step(format!(
                    "F({}) - F({}) = {} - {} = {}",
                    format_number(b),
                    format_number(a),
                    format_number(fb),
                    format_number(fa),
                    format_number(value)
                )));
        }
        log::debug!("antiderivative of '{f}' is not finite on the bounds; using quadrature");
    }

    let integrand = prepare(ctx, f)?;
    let integrand = compile(ctx, &integrand)?;
    let value = simpson_integrate(|x| integrand.eval_at(var, x), a, b, SIMPSON_INTERVALS);
    if !value.is_finite() {
        return Err(EngineError::NumericOverflow("the integral diverges".to_string()).into());
    }
    Ok(Outcome::new(format_number(value))
        .step("no closed-form antiderivative")
        .step(format!("Simpson's rule with {SIMPSON_INTERVALS} intervals")))
}

fn derivative(ctx: &EngineContext, f: &str, var: &str) -> Handled {
    let engine = ctx.engine();
    let expr = prepare(ctx, f)?;
    let result = engine.differentiate(&expr, var)?;
    let rendered = engine.render(&result);
    Ok(Outcome::new(rendered.clone())
        .markup(engine.render_markup(&result))
        .step(format!("d/d{var} [{}] = {rendered}", engine.render(&expr))))
}

// --- ODE ---

fn ode(ctx: &EngineContext, text: &str) -> Handled {
    let equation = OdeEquation::parse(ctx, text)?;
    if let Some(closed) = equation.closed_form(ctx) {
        return Ok(Outcome::new(closed).step("linear with constant coefficient; solved in closed form"));
    }
    let trajectory = equation.solve(ctx)?;
    let endpoint = describe_endpoint(&equation, &trajectory)
        .ok_or_else(|| Failure::new("the integrator produced no states"))?;
    let method = match trajectory.method {
        OdeMethod::Adaptive => "adaptive Tsitouras 5(4)",
        OdeMethod::Rk4 => "fixed-step RK4",
    };
    Ok(Outcome::new(endpoint)
        .step(format!("{:?} equation", equation.form))
        .step(format!("{method}, {} states", trajectory.states.len())))
}

// --- Linear algebra ---

fn shape_step(value: &LinalgValue) -> &'static str {
    match value {
        LinalgValue::Scalar(_) => "scalar result",
        LinalgValue::Vector(_) => "vector result",
        LinalgValue::Matrix(_) => "matrix result",
        LinalgValue::Eigenvalues(_) => "eigenvalues in ascending order",
    }
}

fn matrices(text: &str) -> Handled {
    let Some((op, args)) = split_call(text) else {
        let matrix = linalg::parse_matrix(text)?;
        return Ok(Outcome::new(linalg::format_matrix(&matrix)));
    };
    let operands = args
        .iter()
        .map(|a| linalg::parse_matrix(a))
        .collect::<Result<Vec<_>, _>>()?;
    let value = linalg::matrix_operation(&op, &operands)?;
    let dims: Vec<String> = operands
        .iter()
        .map(|m| format!("{}x{}", m.nrows(), m.ncols()))
        .collect();
    Ok(Outcome::new(value.format())
        .step(format!("{op} of {}", dims.join(" and ")))
        .step(shape_step(&value)))
}

fn vectors(text: &str) -> Handled {
    let Some((op, args)) = split_call(text) else {
        let vector = linalg::parse_vector(text)?;
        return Ok(Outcome::new(linalg::format_vector(&vector)));
    };
    let operands = args
        .iter()
        .map(|a| linalg::parse_vector(a))
        .collect::<Result<Vec<_>, _>>()?;
    let value = linalg::vector_operation(&op, &operands)?;
    let mut outcome = Outcome::new(value.format()).step(shape_step(&value));
    if op == "angle" {
        if let LinalgValue::Scalar(radians) = value {
            outcome = outcome.step(format!("{} radians", format_pi_multiple(radians)));
        }
    }
    Ok(outcome)
}

// --- Statistics ---

fn parse_numbers(ctx: &EngineContext, args: &[String]) -> Result<Vec<f64>, Failure> {
    let mut values = Vec::new();
    for arg in args {
        let arg = arg.trim();
        match arg.strip_prefix('[').and_then(|a| a.strip_suffix(']')) {
            Some(inner) => {
                for item in split_top_level(inner, &[',']) {
                    values.push(number(ctx, &item)?);
                }
            }
            None => values.push(number(ctx, arg)?),
        }
    }
    if values.is_empty() {
        return Err(Failure::new("no numbers given"));
    }
    Ok(values)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(sorted: &[f64]) -> f64 {
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}

/// Sample variance (divides by `n - 1`).
fn variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64)
}

fn modes(sorted: &[f64]) -> Vec<f64> {
    let mut runs: Vec<(f64, usize)> = Vec::new();
    for &v in sorted {
        match runs.last_mut() {
            Some((value, count)) if *value == v => *count += 1,
            _ => runs.push((v, 1)),
        }
    }
    let best = runs.iter().map(|(_, c)| *c).max().unwrap_or(0);
    if best < 2 {
        return Vec::new();
    }
    runs.into_iter().filter(|(_, c)| *c == best).map(|(v, _)| v).collect()
}

fn statistic(op: &str, values: &[f64]) -> Result<String, Failure> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let (min, max) = (sorted[0], sorted[sorted.len() - 1]);
    let too_few = || Failure::new(format!("{op} needs at least two values"));
    let value = match op {
        "mean" | "average" => mean(values),
        "median" => median(&sorted),
        "mode" => {
            let modes = modes(&sorted);
            return Ok(if modes.is_empty() {
                "none".to_string()
            } else {
                join_values(&modes, format_number)
            });
        }
        "variance" | "var" => variance(values).ok_or_else(too_few)?,
        "stdev" | "std" => variance(values).ok_or_else(too_few)?.sqrt(),
        "min" => min,
        "max" => max,
        "sum" => values.iter().sum(),
        "range" => max - min,
        "count" => values.len() as f64,
        other => return Err(EngineError::unsupported(other, STATISTICS_OPERATIONS).into()),
    };
    Ok(format_number(value))
}

fn statistics(ctx: &EngineContext, text: &str) -> Handled {
    if let Some((op, args)) = split_call(text) {
        let values = parse_numbers(ctx, &args)?;
        let op = op.to_ascii_lowercase();
        return Ok(Outcome::new(statistic(&op, &values)?).step(format!("{op} of {} values", values.len())));
    }
    let values = parse_numbers(ctx, &split_top_level(text, &[',', ';']))?;
    let mut parts = Vec::new();
    for op in ["count", "mean", "median", "stdev", "min", "max"] {
        if op == "stdev" && values.len() < 2 {
            continue;
        }
        parts.push(format!("{op} = {}", statistic(op, &values)?));
    }
    Ok(Outcome::new(parts.join(", ")).step("summary statistics (sample standard deviation)"))
}

#[cfg(test)]
mod tests {
    use super::{solve, SolverCategory};
    use crate::context::EngineContext;

    fn output(category: SolverCategory, input: &str) -> String {
        let ctx = EngineContext::default();
        match solve(&ctx, category, input) {
            Ok(result) => result.output,
            Err(err) => panic!("{input}: {err}"),
        }
    }

    #[test]
    fn categories_parse_by_name() {
        assert_eq!("Calculus".parse::<SolverCategory>().ok(), Some(SolverCategory::Calculus));
        let err = "geometry".parse::<SolverCategory>().unwrap_err();
        assert!(err.to_string().contains("algebra, trigonometry"));
    }

    #[test]
    fn algebra_equations_and_systems() {
        assert_eq!(output(SolverCategory::Algebra, "x^2 - 4 = 0"), "x = -2, 2");
        assert_eq!(output(SolverCategory::Algebra, "2*x + 3 = 7"), "x = 2");
        assert_eq!(output(SolverCategory::Algebra, "x + 2*y = 5, 3*x - y = 1"), "x = 1, y = 2");
        assert!(output(SolverCategory::Algebra, "x^3 - 2*x - 5 = 0").starts_with("x = 2.09455"));
        assert_eq!(output(SolverCategory::Algebra, "2^10"), "1024");
        assert_eq!(output(SolverCategory::Algebra, "x + x"), "2*x");
    }

    #[test]
    fn algebra_failures_carry_hints() {
        let ctx = EngineContext::default();
        let err = solve(&ctx, SolverCategory::Algebra, "x^2 + 1 = 0").unwrap_err();
        assert_eq!(err.message, "no real solutions");
        assert!(err.hint.contains("x^2 - 4 = 0"));
        assert!(err.detail.is_some());
        assert!(solve(&ctx, SolverCategory::Algebra, "   ").is_err());
        assert!(solve(&ctx, SolverCategory::Algebra, "x + y = 1").is_err());
    }

    #[test]
    fn trigonometric_roots_render_as_pi_fractions() {
        assert_eq!(output(SolverCategory::Trigonometry, "sin(x) = 0.5"), "x = π/6, 5π/6");
        assert_eq!(output(SolverCategory::Trigonometry, "sin(x) = 0"), "x = 0, π");
        assert_eq!(output(SolverCategory::Trigonometry, "cos(pi/3)"), "0.5");
        let ctx = EngineContext::default();
        assert!(solve(&ctx, SolverCategory::Trigonometry, "sin(x) = 2").is_err());
    }

    #[test]
    fn definite_integral_reports_the_antiderivative() {
        let ctx = EngineContext::default();
        let result = solve(&ctx, SolverCategory::Calculus, "int(x^2, x, 0, 1)").expect("integral");
        assert_eq!(result.output, "0.333333");
        assert!(result.steps.iter().any(|s| s.contains("x^3/3")), "{:?}", result.steps);
    }

    #[test]
    fn calculus_forms() {
        assert_eq!(output(SolverCategory::Calculus, "int(3*x^2, x)"), "x^3 + C");
        assert_eq!(output(SolverCategory::Calculus, "diff(x^3, x)"), "3*x^2");
        assert_eq!(output(SolverCategory::Calculus, "zeros(x^2 - 4, -10, 10)"), "x = -2, 2");
        assert_eq!(output(SolverCategory::Calculus, "extrema(x^2, -1, 1)"), "min (0, 0)");
        assert_eq!(output(SolverCategory::Calculus, "arclength(x, 0, 1)"), "1.414214");
        assert_eq!(output(SolverCategory::Calculus, "curvature(x^2, 0)"), "2");
        let quadrature = output(SolverCategory::Calculus, "int(x*exp(x^2)*sin(x), x, 0, 1)");
        assert!(quadrature.parse::<f64>().is_ok());
    }

    #[test]
    fn calculus_rejects_poles_inside_bounds() {
        let ctx = EngineContext::default();
        let err = solve(&ctx, SolverCategory::Calculus, "int(1/x, x, -1, 1)").unwrap_err();
        assert!(err.to_string().contains("x = 0"), "{err}");
        let err = solve(&ctx, SolverCategory::Calculus, "limit(x, 0)").unwrap_err();
        assert!(err.detail.expect("detail").contains("limit"));
    }

    #[test]
    fn ode_closed_form_or_endpoint() {
        let closed = output(SolverCategory::Ode, "dy/dx = y, y(0) = 1");
        assert!(closed.starts_with("y = "), "{closed}");
        let numeric = output(SolverCategory::Ode, "dy/dx = sin(x*y), y(0) = 1, x in [0, 2]");
        assert!(numeric.starts_with("y(2.00) = "), "{numeric}");
    }

    #[test]
    fn matrices_and_vectors() {
        assert_eq!(output(SolverCategory::Matrices, "det([[1,2],[3,4]])"), "-2");
        assert_eq!(output(SolverCategory::Vectors, "dot([1,2,3], [4,5,6])"), "32");
        let ctx = EngineContext::default();
        let err = solve(&ctx, SolverCategory::Matrices, "inv([[1,2],[2,4]])").unwrap_err();
        assert!(err.detail.expect("detail").contains("singular"));
        let err = solve(&ctx, SolverCategory::Vectors, "normalize([0,0])").unwrap_err();
        assert!(err.to_string().contains("zero vector"));
    }

    #[test]
    fn statistics_operations_and_summary() {
        assert_eq!(output(SolverCategory::Statistics, "mean(1, 2, 3, 4)"), "2.5");
        assert_eq!(output(SolverCategory::Statistics, "median([3, 1, 2])"), "2");
        assert_eq!(output(SolverCategory::Statistics, "mode(1, 2, 2, 3)"), "2");
        assert_eq!(output(SolverCategory::Statistics, "variance(2, 4, 4, 4, 5, 5, 7, 9)"), "4.571429");
        assert_eq!(output(SolverCategory::Statistics, "range(4, 8, 15)"), "11");
        assert_eq!(
            output(SolverCategory::Statistics, "1, 2, 3"),
            "count = 3, mean = 2, median = 2, stdev = 1, min = 1, max = 3"
        );
        let ctx = EngineContext::default();
        assert!(solve(&ctx, SolverCategory::Statistics, "kurtosis(1, 2)").is_err());
    }
}
