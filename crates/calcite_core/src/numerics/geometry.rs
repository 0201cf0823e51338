use super::quadrature::simpson_integrate;
use serde::{Deserialize, Serialize};

const SLOPE_STEP: f64 = 1e-6;
const CURVATURE_STEP: f64 = 1e-5;
const MAX_RADIUS: f64 = 1e4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OsculatingCircle {
    pub center: (f64, f64),
    pub radius: f64,
    /// Signed: positive where the graph bends upwards.
    pub curvature: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TangentLine {
    pub point: (f64, f64),
    pub slope: f64,
    pub intercept: f64,
}

fn central_difference(f: &impl Fn(f64) -> f64, x: f64, h: f64) -> f64 {
    (f(x + h) - f(x - h)) / (2.0 * h)
}

/// Length of the graph of `f` over `[a, b]`.
pub fn arc_length(f: impl Fn(f64) -> f64, a: f64, b: f64, n: usize) -> f64 {
    simpson_integrate(
        |x| {
            let slope = central_difference(&f, x, SLOPE_STEP);
            (1.0 + slope * slope).sqrt()
        },
        a,
        b,
        n,
    )
    .abs()
}

/// Signed curvature `f'' / (1 + f'^2)^1.5` at `x0`.
pub fn curvature(f: impl Fn(f64) -> f64, x0: f64) -> Option<f64> {
    let h = CURVATURE_STEP;
    let (left, mid, right) = (f(x0 - h), f(x0), f(x0 + h));
    let f1 = (right - left) / (2.0 * h);
    let f2 = (right - 2.0 * mid + left) / (h * h);
    let k = f2 / (1.0 + f1 * f1).powf(1.5);
    k.is_finite().then_some(k)
}

/// The circle of curvature at `x0`; `None` where the graph is (nearly)
/// straight.
pub fn osculating_circle(f: impl Fn(f64) -> f64, x0: f64) -> Option<OsculatingCircle> {
    let y0 = f(x0);
    let f1 = central_difference(&f, x0, CURVATURE_STEP);
    let k = curvature(&f, x0)?;
    if !y0.is_finite() || k.abs() < 1e-10 {
        return None;
    }
    let radius = 1.0 / k.abs();
    if radius > MAX_RADIUS {
        return None;
    }
    let norm = (1.0 + f1 * f1).sqrt();
    let (nx, ny) = (-f1 / norm, 1.0 / norm);
    let sign = k.signum();
    Some(OsculatingCircle {
        center: (x0 + radius * nx * sign, y0 + radius * ny * sign),
        radius,
        curvature: k,
    })
}

pub fn tangent_line(f: impl Fn(f64) -> f64, x0: f64) -> Option<TangentLine> {
    let y0 = f(x0);
    let slope = central_difference(&f, x0, CURVATURE_STEP);
    if !y0.is_finite() || !slope.is_finite() {
        return None;
    }
    Some(TangentLine {
        point: (x0, y0),
        slope,
        intercept: y0 - slope * x0,
    })
}

#[cfg(test)]
mod tests {
    use super::{arc_length, curvature, osculating_circle, tangent_line};

    #[test]
    fn straight_line_length() {
        let length = arc_length(|x| 2.0 * x + 1.0, 0.0, 3.0, 100);
        assert!((length - 3.0 * 5f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn circle_has_constant_curvature() {
        // Lower half of a circle of radius 2 centred at (0, 2).
        let f = |x: f64| 2.0 - (4.0 - x * x).sqrt();
        let k = curvature(f, 0.5).expect("curvature");
        assert!((k - 0.5).abs() < 1e-4);
        let circle = osculating_circle(f, 0.5).expect("circle");
        assert!((circle.radius - 2.0).abs() < 1e-3);
        assert!(circle.center.0.abs() < 1e-3);
        assert!((circle.center.1 - 2.0).abs() < 1e-3);
    }

    #[test]
    fn lines_have_no_osculating_circle() {
        assert!(osculating_circle(|x| 3.0 * x, 1.0).is_none());
    }

    #[test]
    fn tangent_of_parabola() {
        let line = tangent_line(|x| x * x, 1.0).expect("tangent");
        assert!((line.slope - 2.0).abs() < 1e-8);
        assert!((line.intercept + 1.0).abs() < 1e-8);
    }
}
