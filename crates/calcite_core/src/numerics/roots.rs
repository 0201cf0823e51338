use serde::{Deserialize, Serialize};

const ZERO_EPS: f64 = 1e-10;
const ZERO_BISECTIONS: usize = 40;
const EXTREMUM_BISECTIONS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtremumKind {
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extremum {
    pub x: f64,
    pub y: f64,
    pub kind: ExtremumKind,
}

fn grid(x_min: f64, x_max: f64, samples: usize) -> Option<(usize, f64)> {
    if !(x_min.is_finite() && x_max.is_finite() && x_min < x_max) {
        return None;
    }
    let samples = samples.max(2);
    Some((samples, (x_max - x_min) / samples as f64))
}

/// Bisects a bracketed sign change of `f` on `[a, b]`.
fn bisect(f: &impl Fn(f64) -> f64, mut a: f64, mut b: f64, iterations: usize) -> f64 {
    let mut fa = f(a);
    for _ in 0..iterations {
        let mut mid = 0.5 * (a + b);
        let mut fm = f(mid);
        if !fm.is_finite() {
            // Step off an undefined midpoint.
            mid = a + 0.25 * (b - a);
            fm = f(mid);
        }
        if fa * fm <= 0.0 {
            b = mid;
        } else {
            a = mid;
            fa = fm;
        }
    }
    0.5 * (a + b)
}

fn push_unique(out: &mut Vec<f64>, x: f64, tolerance: f64) {
    if out.iter().all(|&existing| (existing - x).abs() > tolerance) {
        out.push(x);
    }
}

/// Zeros of `f` on `[x_min, x_max]`, ascending. Samples within `1e-10` of
/// zero count directly; sign changes are refined by bisection. NaN samples
/// are skipped without breaking the bracket, and bracketed poles are rejected.
pub fn find_zeros(f: impl Fn(f64) -> f64, x_min: f64, x_max: f64, samples: usize) -> Vec<f64> {
    let Some((samples, dx)) = grid(x_min, x_max, samples) else {
        return Vec::new();
    };
    let tolerance = dx * 0.5;
    let mut zeros = Vec::new();
    let mut previous: Option<(f64, f64)> = None;

    for i in 0..=samples {
        let x = x_min + i as f64 * dx;
        let y = f(x);
        if !y.is_finite() {
            continue;
        }
        if y.abs() < ZERO_EPS {
            push_unique(&mut zeros, x, tolerance);
        } else if let Some((px, py)) = previous {
            if py.abs() >= ZERO_EPS && py * y < 0.0 {
                let root = bisect(&f, px, x, ZERO_BISECTIONS);
                if f(root).abs() < 1e-6 {
                    push_unique(&mut zeros, root, tolerance);
                }
            }
        }
        previous = Some((x, y));
    }
    zeros.sort_by(|a, b| a.total_cmp(b));
    zeros
}

/// Local extrema from sign changes of the central-difference derivative.
pub fn find_extrema(
    f: impl Fn(f64) -> f64,
    x_min: f64,
    x_max: f64,
    samples: usize,
) -> Vec<Extremum> {
    let Some((samples, dx)) = grid(x_min, x_max, samples) else {
        return Vec::new();
    };
    let h = dx * 0.01;
    let derivative = |x: f64| (f(x + h) - f(x - h)) / (2.0 * h);

    let mut extrema: Vec<Extremum> = Vec::new();
    let mut previous: Option<(f64, f64)> = None;
    for i in 0..=samples {
        let x = x_min + i as f64 * dx;
        let d = derivative(x);
        if !d.is_finite() {
            previous = None;
            continue;
        }
        if let Some((px, pd)) = previous {
            if pd * d < 0.0 {
                let at = bisect(&derivative, px, x, EXTREMUM_BISECTIONS);
                let y = f(at);
                let duplicate = extrema.iter().any(|e| (e.x - at).abs() < dx * 0.5);
                if y.is_finite() && !duplicate {
                    let kind = if pd > 0.0 {
                        ExtremumKind::Max
                    } else {
                        ExtremumKind::Min
                    };
                    extrema.push(Extremum { x: at, y, kind });
                }
            }
        }
        if d != 0.0 {
            previous = Some((x, d));
        }
    }
    extrema
}

/// Points where `f` and `g` meet, at most `limit` of them.
pub fn find_intersections(
    f: impl Fn(f64) -> f64,
    g: impl Fn(f64) -> f64,
    x_min: f64,
    x_max: f64,
    samples: usize,
    limit: usize,
) -> Vec<(f64, f64)> {
    find_zeros(|x| f(x) - g(x), x_min, x_max, samples)
        .into_iter()
        .map(|x| (x, f(x)))
        .filter(|(_, y)| y.is_finite())
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{find_extrema, find_intersections, find_zeros, ExtremumKind};

    #[test]
    fn finds_both_roots_of_a_quadratic() {
        let zeros = find_zeros(|x| x * x - 4.0, -10.0, 10.0, 200);
        assert_eq!(zeros.len(), 2, "{zeros:?}");
        assert!((zeros[0] + 2.0).abs() < 1e-6);
        assert!((zeros[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn refines_roots_between_samples() {
        let zeros = find_zeros(|x: f64| x.cos(), 0.0, 5.0, 37);
        assert_eq!(zeros.len(), 2);
        assert!((zeros[0] - std::f64::consts::FRAC_PI_2).abs() < 1e-9);
    }

    #[test]
    fn ignores_poles_and_nan() {
        assert!(find_zeros(|x| 1.0 / x, -1.0, 1.0, 51).is_empty());
        assert_eq!(find_zeros(|x: f64| x.ln(), -2.0, 2.0, 200).len(), 1);
        assert!(find_zeros(|x| x, 1.0, -1.0, 10).is_empty());
    }

    #[test]
    fn brackets_span_isolated_nan_samples() {
        let f = |x: f64| if (x - 0.5).abs() < 1e-12 { f64::NAN } else { x - 0.55 };
        let zeros = find_zeros(f, 0.0, 1.0, 10);
        assert_eq!(zeros.len(), 1, "{zeros:?}");
        assert!((zeros[0] - 0.55).abs() < 1e-9);
    }

    #[test]
    fn classifies_extrema() {
        let extrema = find_extrema(|x| x * x * x - 3.0 * x, -3.0, 3.0, 200);
        assert_eq!(extrema.len(), 2);
        assert_eq!(extrema[0].kind, ExtremumKind::Max);
        assert!((extrema[0].x + 1.0).abs() < 1e-6);
        assert!((extrema[0].y - 2.0).abs() < 1e-9);
        assert_eq!(extrema[1].kind, ExtremumKind::Min);
        assert!((extrema[1].x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn intersections_are_capped() {
        let points = find_intersections(|x: f64| x.sin(), |_| 0.0, 0.0, 200.0, 4000, 20);
        assert_eq!(points.len(), 20);
        let line = find_intersections(|x| x, |x| 2.0 - x, -5.0, 5.0, 200, 20);
        assert_eq!(line.len(), 1);
        assert!((line[0].0 - 1.0).abs() < 1e-6 && (line[0].1 - 1.0).abs() < 1e-6);
    }
}
