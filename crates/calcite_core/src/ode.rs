//! Ordinary differential equations: fixed-step RK4, adaptive integration with
//! RK4 fallback, equation parsing, closed forms and phase portraits.

use crate::compiler::Notation;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::equation_engine::{Binding, Evaluator, Expr};
use crate::error::{EngineError, EngineResult};
use crate::format::{format_number, scaled_term};
use crate::numerics::linear::gaussian_solve;
use crate::solvers::{AdaptiveTsit5, RK4};
use crate::symbolic::poly::Polynomial;
use crate::text::{find_top_level, split_top_level, strip_outer_parens};
use crate::traits::{DynamicalSystem, Steppable};
use serde::{Deserialize, Serialize};
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OdeState {
    pub t: f64,
    pub y: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OdeMethod {
    Adaptive,
    Rk4,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub states: Vec<OdeState>,
    pub method: OdeMethod,
}

impl Trajectory {
    pub fn last(&self) -> Option<&OdeState> {
        self.states.last()
    }
}

/// A [`DynamicalSystem`] backed by a closure writing `f(t, y)` into `out`.
pub struct FnSystem<F> {
    dim: usize,
    f: F,
}

impl<F: Fn(f64, &[f64], &mut [f64])> FnSystem<F> {
    pub fn new(dim: usize, f: F) -> Self {
        Self { dim, f }
    }
}

impl<F: Fn(f64, &[f64], &mut [f64])> DynamicalSystem<f64> for FnSystem<F> {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        (self.f)(t, x, out)
    }
}

fn clamp_non_finite(state: &mut [f64]) {
    for value in state.iter_mut() {
        if !value.is_finite() {
            *value = 0.0;
        }
    }
}

/// Classic RK4 over `span` in `steps` equal steps. Any non-finite state
/// component is reset to zero as soon as it appears.
pub fn rk4(
    system: &impl DynamicalSystem<f64>,
    span: (f64, f64),
    y0: &[f64],
    steps: usize,
) -> Vec<OdeState> {
    let steps = steps.max(1);
    let (t0, t1) = span;
    let h = (t1 - t0) / steps as f64;
    let mut stepper = RK4::new(y0.len());
    let mut t = t0;
    let mut state = y0.to_vec();
    clamp_non_finite(&mut state);

    let mut out = Vec::with_capacity(steps + 1);
    out.push(OdeState {
        t,
        y: state.clone(),
    });
    for _ in 0..steps {
        stepper.step(system, &mut t, &mut state, h);
        clamp_non_finite(&mut state);
        out.push(OdeState {
            t,
            y: state.clone(),
        });
    }
    out
}

/// Adaptive Tsit5 first; falls back to [`rk4`] with `config.ode_steps` on
/// any failure.
pub fn integrate(
    system: &impl DynamicalSystem<f64>,
    span: (f64, f64),
    y0: &[f64],
    config: &EngineConfig,
) -> Trajectory {
    let mut adaptive =
        AdaptiveTsit5::new(y0.len(), config.ode_tolerance, config.ode_max_adaptive_steps);
    match adaptive.integrate(system, span.0, span.1, y0) {
        Ok(path) => Trajectory {
            states: path.into_iter().map(|(t, y)| OdeState { t, y }).collect(),
            method: OdeMethod::Adaptive,
        },
        Err(failure) => {
            log::warn!("adaptive integration failed ({failure}); falling back to RK4");
            Trajectory {
                states: rk4(system, span, y0, config.ode_steps),
                method: OdeMethod::Rk4,
            }
        }
    }
}

// --- Equations ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OdeForm {
    /// `y' = f(x, y)`
    Explicit,
    /// `y'' = f(x, y, y')`
    SecondOrder,
    /// `F(x, y, y') = 0`
    Implicit,
}

/// A parsed ODE in `x` and `y`, with `yp`/`ypp` standing for `y'`/`y''`.
#[derive(Debug, Clone, PartialEq)]
pub struct OdeEquation {
    pub form: OdeForm,
    /// Right-hand side for explicit forms, residual `F` for the implicit one.
    pub expression: Expr,
    pub x0: f64,
    pub y0: f64,
    pub yp0: f64,
    pub x_end: f64,
}

fn rewrite_derivative_marks(text: &str) -> String {
    text.replace("d^2y/dx^2", "ypp")
        .replace("dy/dx", "yp")
        .replace("y''", "ypp")
        .replace("y'", "yp")
}

fn parse_number(ctx: &EngineContext, text: &str) -> EngineResult<f64> {
    let expr = ctx.prepare(text, Notation::Plain)?;
    crate::symbolic::poly::constant_value(&expr)
        .ok_or_else(|| EngineError::InvalidInput(format!("'{text}' is not a number")))
}

impl OdeEquation {
    /// Parses `dy/dx = x + y, y(0) = 1, x in [0, 5]` and friends. Defaults:
    /// `y(0) = 1`, `y'(0) = 0`, `x in [0, 10]`.
    pub fn parse(ctx: &EngineContext, text: &str) -> EngineResult<Self> {
        let pieces = split_top_level(text, &[',', ';']);
        let (equation, conditions) = pieces
            .split_first()
            .ok_or_else(|| EngineError::InvalidInput("empty equation".to_string()))?;
        let equation = rewrite_derivative_marks(equation);

        let mut x0 = 0.0;
        let mut y0 = 1.0;
        let mut yp0 = 0.0;
        let mut x_end = 10.0;
        for condition in conditions.iter().filter(|c| !c.is_empty()) {
            if let Some(range) = condition
                .strip_prefix("x in")
                .or_else(|| condition.strip_prefix("x∈"))
            {
                let bounds = split_top_level(strip_outer_brackets(range.trim()), &[',']);
                let [a, b] = bounds.as_slice() else {
                    return Err(EngineError::InvalidInput(format!(
                        "malformed interval '{condition}'"
                    )));
                };
                x0 = parse_number(ctx, a)?;
                x_end = parse_number(ctx, b)?;
                continue;
            }
            let eq = find_top_level(condition, '=').ok_or_else(|| {
                EngineError::InvalidInput(format!("malformed condition '{condition}'"))
            })?;
            let (head, value) = (condition[..eq].trim(), condition[eq + 1..].trim());
            let value = parse_number(ctx, value)?;
            if let Some(at) = head.strip_prefix("y'(").and_then(|r| r.strip_suffix(')')) {
                x0 = parse_number(ctx, at)?;
                yp0 = value;
            } else if let Some(at) = head.strip_prefix("y(").and_then(|r| r.strip_suffix(')')) {
                x0 = parse_number(ctx, at)?;
                y0 = value;
            } else {
                return Err(EngineError::InvalidInput(format!(
                    "unrecognized condition '{condition}'"
                )));
            }
        }

        let (form, expression) = match find_top_level(&equation, '=') {
            Some(eq) => {
                let (lhs, rhs) = (equation[..eq].trim(), equation[eq + 1..].trim());
                let rhs_expr = ctx.prepare(rhs, Notation::Plain)?;
                let mentions_derivative = rhs_expr.contains_var("yp") || rhs_expr.contains_var("ypp");
                match lhs {
                    "yp" if !mentions_derivative => (OdeForm::Explicit, rhs_expr),
                    "ypp" if !rhs_expr.contains_var("ypp") => (OdeForm::SecondOrder, rhs_expr),
                    _ => {
                        let lhs_expr = ctx.prepare(lhs, Notation::Plain)?;
                        (OdeForm::Implicit, Expr::binary(lhs_expr, '-', rhs_expr))
                    }
                }
            }
            None => (
                OdeForm::Implicit,
                ctx.prepare(strip_outer_parens(&equation), Notation::Plain)?,
            ),
        };

        if form == OdeForm::Implicit {
            if expression.contains_var("ypp") {
                return Err(EngineError::InvalidInput(
                    "implicit second-order equations are not supported".to_string(),
                ));
            }
            if !expression.contains_var("yp") {
                return Err(EngineError::InvalidInput(
                    "not a differential equation: no y' found".to_string(),
                ));
            }
        }

        Ok(Self {
            form,
            expression,
            x0,
            y0,
            yp0,
            x_end,
        })
    }

    fn compile(&self, ctx: &EngineContext) -> EngineResult<(Rc<Evaluator>, Binding)> {
        let evaluator = Rc::new(ctx.engine().compile(&self.expression)?);
        let binding = evaluator.bind(&["x", "y", "yp", "ypp"]);
        Ok((evaluator, binding))
    }

    /// Integrates over `[x0, x_end]`. Second-order equations produce states
    /// `[y, y']`.
    pub fn solve(&self, ctx: &EngineContext) -> EngineResult<Trajectory> {
        let (f, binding) = self.compile(ctx)?;
        let span = (self.x0, self.x_end);
        let config = &ctx.config;
        let trajectory = match self.form {
            OdeForm::Explicit => {
                let system = FnSystem::new(1, |x, y: &[f64], out: &mut [f64]| {
                    out[0] = f.eval_bound(&binding, &[x, y[0], 0.0, 0.0]);
                });
                integrate(&system, span, &[self.y0], config)
            }
            OdeForm::SecondOrder => {
                let system = FnSystem::new(2, |x, y: &[f64], out: &mut [f64]| {
                    out[0] = y[1];
                    out[1] = f.eval_bound(&binding, &[x, y[0], y[1], 0.0]);
                });
                integrate(&system, span, &[self.y0, self.yp0], config)
            }
            OdeForm::Implicit => {
                self.check_affine_in_derivative(&f, &binding)?;
                let system = FnSystem::new(1, |x, y: &[f64], out: &mut [f64]| {
                    out[0] = isolate_derivative(&f, &binding, x, y[0]);
                });
                integrate(&system, span, &[self.y0], config)
            }
        };
        Ok(trajectory)
    }

    /// Probes `F(x, y, 1) - F(x, y, 0)` at a few points around the initial
    /// condition; it must be finite and non-zero everywhere.
    fn check_affine_in_derivative(&self, f: &Evaluator, binding: &Binding) -> EngineResult<()> {
        let probes = [(0.0, 0.0), (1.0, 0.5), (-0.5, 1.0), (0.25, -0.75)];
        for (dx, dy) in probes {
            let (x, y) = (self.x0 + dx, self.y0 + dy);
            let f0 = f.eval_bound(binding, &[x, y, 0.0, 0.0]);
            let f1 = f.eval_bound(binding, &[x, y, 1.0, 0.0]);
            let slope = f1 - f0;
            if !slope.is_finite() || slope == 0.0 {
                return Err(EngineError::Domain(
                    "cannot isolate y' in the implicit equation".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// General solution of `y' = a*y + g(x)` with constant `a` and polynomial
    /// `g` of degree at most 3, e.g. `y = C*e^(x) - x - 1`.
    pub fn closed_form(&self, ctx: &EngineContext) -> Option<String> {
        if self.form != OdeForm::Explicit {
            return None;
        }
        let (f, binding) = self.compile(ctx).ok()?;
        let at = |x: f64, y: f64| f.eval_bound(&binding, &[x, y, 0.0, 0.0]);

        let probes = [-2.0, -0.5, 0.0, 0.75, 1.5, 3.0];
        let a = at(0.0, 1.0) - at(0.0, 0.0);
        for &x in &probes {
            let slope = at(x, 1.0) - at(x, 0.0);
            let double = at(x, 2.0) - at(x, 0.0);
            if !slope.is_finite() || (slope - a).abs() > 1e-9 || (double - 2.0 * a).abs() > 1e-9 {
                return None;
            }
        }
        let g = fit_cubic(|x| at(x, 0.0))?;

        let a = snap(a);
        if a == 0.0 {
            let integral = ctx.engine().render(&g.integrate().to_expr("x"));
            return Some(if integral == "0" {
                "y = C".to_string()
            } else {
                format!("y = {integral} + C")
            });
        }

        let n = g.degree();
        let mut p = vec![0.0; n + 1];
        p[n] = -g.coefficient(n) / a;
        for k in (0..n).rev() {
            p[k] = ((k as f64 + 1.0) * p[k + 1] - g.coefficient(k)) / a;
        }
        let particular = Polynomial::from_coefficients(p.into_iter().map(snap).collect());

        let exponent = if a == 1.0 {
            "x".to_string()
        } else {
            scaled_term(a, "x", false)
        };
        let homogeneous = format!("C*e^({exponent})");
        let rendered = ctx.engine().render(&particular.to_expr("x"));
        Some(match rendered.as_str() {
            "0" => format!("y = {homogeneous}"),
            r => match r.strip_prefix('-') {
                Some(rest) => format!("y = {homogeneous} - {rest}"),
                None => format!("y = {homogeneous} + {r}"),
            },
        })
    }
}

/// `y' = -F(x,y,0) / (F(x,y,1) - F(x,y,0))`; only exact for `F` affine in `y'`.
fn isolate_derivative(f: &Evaluator, binding: &Binding, x: f64, y: f64) -> f64 {
    let f0 = f.eval_bound(binding, &[x, y, 0.0, 0.0]);
    let f1 = f.eval_bound(binding, &[x, y, 1.0, 0.0]);
    -f0 / (f1 - f0)
}

fn strip_outer_brackets(text: &str) -> &str {
    text.strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .unwrap_or_else(|| strip_outer_parens(text))
}

/// Rounds values within `1e-9` of a multiple of `1/1000`.
fn snap(value: f64) -> f64 {
    let rounded = (value * 1000.0).round() / 1000.0;
    if (value - rounded).abs() < 1e-9 {
        rounded
    } else {
        value
    }
}

/// Fits a cubic through four samples and verifies it at four more.
fn fit_cubic(g: impl Fn(f64) -> f64) -> Option<Polynomial> {
    let nodes = [0.0, 1.0, 2.0, 3.0];
    let mut matrix = Vec::with_capacity(16);
    let mut rhs = Vec::with_capacity(4);
    for &x in &nodes {
        matrix.extend([1.0, x, x * x, x * x * x]);
        rhs.push(g(x));
    }
    if rhs.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let coefficients = gaussian_solve(matrix, rhs, 4)?;
    let poly = Polynomial::from_coefficients(coefficients.into_iter().map(snap).collect());
    for x in [-1.5, 0.5, 2.5, 4.0] {
        let expected = g(x);
        if !expected.is_finite() || (poly.eval(x) - expected).abs() > 1e-7 * (1.0 + expected.abs())
        {
            return None;
        }
    }
    Some(poly)
}

// --- Phase portraits ---

/// A planar system `x' = dx(x, y)`, `y' = dy(x, y)` seeded on a regular grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhasePortraitRequest {
    pub dx: String,
    pub dy: String,
    pub x_range: (f64, f64),
    pub y_range: (f64, f64),
    pub seeds_per_axis: usize,
    pub duration: f64,
    pub steps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTrajectory {
    pub seed: [f64; 2],
    pub points: Vec<[f64; 2]>,
}

/// Incremental phase-portrait computation; one seed per unit of work so
/// callers can stop between seeds.
pub struct PhasePortrait {
    dx: Rc<Evaluator>,
    dy: Rc<Evaluator>,
    dx_binding: Binding,
    dy_binding: Binding,
    seeds: Vec<[f64; 2]>,
    bounds: [f64; 4],
    duration: f64,
    steps: usize,
    trajectories: Vec<PhaseTrajectory>,
}

impl PhasePortrait {
    pub fn new(ctx: &mut EngineContext, request: &PhasePortraitRequest) -> EngineResult<Self> {
        let (x_min, x_max) = request.x_range;
        let (y_min, y_max) = request.y_range;
        if !(x_min < x_max && y_min < y_max) {
            return Err(EngineError::InvalidInput("empty phase-plane window".to_string()));
        }
        if !request.duration.is_finite() || request.duration == 0.0 {
            return Err(EngineError::InvalidInput("duration must be finite and non-zero".to_string()));
        }
        let compile = |ctx: &mut EngineContext, text: &str| {
            ctx.compile_plain(text)
                .ok_or_else(|| EngineError::Parse(format!("cannot compile '{text}'")))
        };
        let dx = compile(ctx, &request.dx)?;
        let dy = compile(ctx, &request.dy)?;

        let n = request.seeds_per_axis.clamp(1, 64);
        let cell_x = (x_max - x_min) / n as f64;
        let cell_y = (y_max - y_min) / n as f64;
        let seeds = (0..n)
            .flat_map(|i| (0..n).map(move |j| (i, j)))
            .map(|(i, j)| {
                [
                    x_min + (i as f64 + 0.5) * cell_x,
                    y_min + (j as f64 + 0.5) * cell_y,
                ]
            })
            .collect::<Vec<_>>();

        // Trajectories stop once they leave a window three times the view.
        let (span_x, span_y) = (x_max - x_min, y_max - y_min);
        let bounds = [x_min - span_x, x_max + span_x, y_min - span_y, y_max + span_y];

        Ok(Self {
            dx_binding: dx.bind(&["x", "y"]),
            dy_binding: dy.bind(&["x", "y"]),
            dx,
            dy,
            trajectories: Vec::with_capacity(seeds.len()),
            seeds,
            bounds,
            duration: request.duration,
            steps: request.steps.clamp(1, 100_000),
        })
    }

    pub fn total(&self) -> usize {
        self.seeds.len()
    }

    pub fn completed(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_done(&self) -> bool {
        self.completed() >= self.total()
    }

    /// Integrates up to `batch` more seeds; returns how many were processed.
    pub fn advance(&mut self, batch: usize) -> usize {
        let start = self.completed();
        let end = start.saturating_add(batch).min(self.total());
        for index in start..end {
            let seed = self.seeds[index];
            let trajectory = self.trace(seed);
            self.trajectories.push(trajectory);
        }
        end - start
    }

    fn trace(&self, seed: [f64; 2]) -> PhaseTrajectory {
        let system = FnSystem::new(2, |_t, p: &[f64], out: &mut [f64]| {
            out[0] = self.dx.eval_bound(&self.dx_binding, p);
            out[1] = self.dy.eval_bound(&self.dy_binding, p);
        });
        let h = self.duration / self.steps as f64;
        let mut stepper = RK4::new(2);
        let mut t = 0.0;
        let mut state = seed.to_vec();
        let mut points = vec![seed];
        let [x_lo, x_hi, y_lo, y_hi] = self.bounds;
        for _ in 0..self.steps {
            stepper.step(&system, &mut t, &mut state, h);
            let (x, y) = (state[0], state[1]);
            if !x.is_finite() || !y.is_finite() || x < x_lo || x > x_hi || y < y_lo || y > y_hi {
                break;
            }
            points.push([x, y]);
        }
        PhaseTrajectory { seed, points }
    }

    pub fn trajectories(&self) -> &[PhaseTrajectory] {
        &self.trajectories
    }

    pub fn into_trajectories(self) -> Vec<PhaseTrajectory> {
        self.trajectories
    }
}

/// Computes a whole portrait synchronously.
pub fn phase_portrait(
    ctx: &mut EngineContext,
    request: &PhasePortraitRequest,
) -> EngineResult<Vec<PhaseTrajectory>> {
    let mut portrait = PhasePortrait::new(ctx, request)?;
    portrait.advance(usize::MAX);
    Ok(portrait.into_trajectories())
}

/// Value of `y` at the end of the interval, as reported by the solver.
pub fn describe_endpoint(equation: &OdeEquation, trajectory: &Trajectory) -> Option<String> {
    let last = trajectory.last()?;
    let y = *last.y.first()?;
    Some(format!("y({:.2}) = {}", equation.x_end, format_number(y)))
}

#[cfg(test)]
mod tests {
    use super::{
        phase_portrait, rk4, FnSystem, OdeEquation, OdeForm, OdeMethod, PhasePortrait,
        PhasePortraitRequest,
    };
    use crate::context::EngineContext;

    #[test]
    fn rk4_reaches_e() {
        let system = FnSystem::new(1, |_t, y: &[f64], out: &mut [f64]| out[0] = y[0]);
        let states = rk4(&system, (0.0, 1.0), &[1.0], 100);
        let last = states.last().expect("states");
        assert!((last.y[0] - std::f64::consts::E).abs() < 1e-3);
        assert_eq!(states.len(), 101);
    }

    #[test]
    fn rk4_clamps_non_finite_state() {
        let system = FnSystem::new(1, |_t, _y: &[f64], out: &mut [f64]| out[0] = f64::NAN);
        let states = rk4(&system, (0.0, 1.0), &[1.0], 10);
        assert!(states.iter().all(|s| s.y[0].is_finite()));
    }

    #[test]
    fn parses_conditions_and_forms() {
        let ctx = EngineContext::default();
        let eq = OdeEquation::parse(&ctx, "dy/dx = x + y, y(0) = 2, x in [0, 5]").expect("parse");
        assert_eq!(eq.form, OdeForm::Explicit);
        assert_eq!((eq.x0, eq.y0, eq.x_end), (0.0, 2.0, 5.0));

        let eq = OdeEquation::parse(&ctx, "y'' = -y; y(0) = 0; y'(0) = 1").expect("parse");
        assert_eq!(eq.form, OdeForm::SecondOrder);
        assert_eq!(eq.yp0, 1.0);

        let eq = OdeEquation::parse(&ctx, "2*y' - y = 0").expect("parse");
        assert_eq!(eq.form, OdeForm::Implicit);

        assert!(OdeEquation::parse(&ctx, "y = x^2").is_err());
    }

    #[test]
    fn explicit_equation_matches_exponential() {
        let ctx = EngineContext::default();
        let eq = OdeEquation::parse(&ctx, "y' = y, y(0) = 1, x in [0, 1]").expect("parse");
        let trajectory = eq.solve(&ctx).expect("solves");
        assert_eq!(trajectory.method, OdeMethod::Adaptive);
        let y = trajectory.last().expect("states").y[0];
        assert!((y - std::f64::consts::E).abs() < 1e-6);
    }

    #[test]
    fn second_order_equation_oscillates() {
        let ctx = EngineContext::default();
        let eq = OdeEquation::parse(&ctx, "y'' = -y, y(0) = 0, y'(0) = 1, x in [0, 3]")
            .expect("parse");
        let y = eq.solve(&ctx).expect("solves").last().expect("states").y[0];
        assert!((y - 3f64.sin()).abs() < 1e-6);
    }

    #[test]
    fn implicit_affine_equation_is_rearranged() {
        let ctx = EngineContext::default();
        // 2y' - y = 0  =>  y = e^(x/2)
        let eq = OdeEquation::parse(&ctx, "2*y' - y = 0, y(0) = 1, x in [0, 2]").expect("parse");
        let y = eq.solve(&ctx).expect("solves").last().expect("states").y[0];
        assert!((y - 1f64.exp()).abs() < 1e-5);
    }

    #[test]
    fn closed_forms_for_linear_equations() {
        let ctx = EngineContext::default();
        let closed = |text: &str| {
            OdeEquation::parse(&ctx, text)
                .expect("parse")
                .closed_form(&ctx)
        };
        assert_eq!(closed("dy/dx = x + y").as_deref(), Some("y = C*e^(x) - x - 1"));
        assert_eq!(closed("y' = -2*y").as_deref(), Some("y = C*e^(-2*x)"));
        assert_eq!(closed("y' = 3*x^2").as_deref(), Some("y = x^3 + C"));
        assert_eq!(closed("y' = y^2"), None);
        assert_eq!(closed("y' = sin(x)"), None);
    }

    #[test]
    fn phase_portrait_traces_every_seed() {
        let mut ctx = EngineContext::default();
        let request = PhasePortraitRequest {
            dx: "y".to_string(),
            dy: "-x".to_string(),
            x_range: (-2.0, 2.0),
            y_range: (-2.0, 2.0),
            seeds_per_axis: 3,
            duration: 6.0,
            steps: 600,
        };
        let trajectories = phase_portrait(&mut ctx, &request).expect("portrait");
        assert_eq!(trajectories.len(), 9);
        for trajectory in &trajectories {
            let [x0, y0] = trajectory.seed;
            let r0 = (x0 * x0 + y0 * y0).sqrt();
            for [x, y] in &trajectory.points {
                assert!(((x * x + y * y).sqrt() - r0).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn oversized_batches_after_partial_progress_finish_the_portrait() {
        let mut ctx = EngineContext::default();
        let request = PhasePortraitRequest {
            dx: "y".to_string(),
            dy: "-x".to_string(),
            x_range: (-1.0, 1.0),
            y_range: (-1.0, 1.0),
            seeds_per_axis: 2,
            duration: 1.0,
            steps: 20,
        };
        let mut portrait = PhasePortrait::new(&mut ctx, &request).expect("portrait");
        assert_eq!(portrait.advance(1), 1);
        assert_eq!(portrait.advance(usize::MAX), 3);
        assert!(portrait.is_done());
        assert_eq!(portrait.advance(usize::MAX), 0);
    }
}
