/// Composite Simpson rule with `n` subintervals (rounded up to even).
///
/// Returns `0` for an empty interval and `NaN` when a bound is not finite.
pub fn simpson_integrate(f: impl Fn(f64) -> f64, a: f64, b: f64, n: usize) -> f64 {
    if !a.is_finite() || !b.is_finite() {
        return f64::NAN;
    }
    if a == b {
        return 0.0;
    }
    let n = match n.max(2) {
        even if even % 2 == 0 => even,
        odd => odd + 1,
    };
    let h = (b - a) / n as f64;
    let mut sum = f(a) + f(b);
    for i in 1..n {
        let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * f(a + i as f64 * h);
    }
    sum * h / 3.0
}

/// `n + 1` evenly spaced `(x, f(x))` samples. Undefined points keep a NaN
/// `y` so plotters can break the curve there.
pub fn sample_curve(f: impl Fn(f64) -> f64, x_min: f64, x_max: f64, n: usize) -> Vec<(f64, f64)> {
    if !(x_min.is_finite() && x_max.is_finite()) || x_min > x_max {
        return Vec::new();
    }
    let n = n.max(1);
    let dx = (x_max - x_min) / n as f64;
    (0..=n)
        .map(|i| {
            let x = x_min + i as f64 * dx;
            let y = f(x);
            (x, if y.is_finite() { y } else { f64::NAN })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{sample_curve, simpson_integrate};

    #[test]
    fn integrates_a_parabola() {
        let value = simpson_integrate(|x| x * x, 0.0, 1.0, 100);
        assert!((value - 1.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn handles_degenerate_bounds() {
        assert_eq!(simpson_integrate(|x| x, 2.0, 2.0, 10), 0.0);
        assert!(simpson_integrate(|x| x, 0.0, f64::INFINITY, 10).is_nan());
        // Odd counts are bumped to even.
        let value = simpson_integrate(|x: f64| x.sin(), 0.0, std::f64::consts::PI, 7);
        assert!((value - 2.0).abs() < 1e-2);
    }

    #[test]
    fn reversed_bounds_flip_the_sign() {
        let forward = simpson_integrate(|x| x * x * x, 0.0, 2.0, 20);
        let backward = simpson_integrate(|x| x * x * x, 2.0, 0.0, 20);
        assert!((forward + backward).abs() < 1e-12);
    }

    #[test]
    fn samples_keep_gaps_as_nan() {
        let points = sample_curve(|x| 1.0 / x, -1.0, 1.0, 2);
        assert_eq!(points.len(), 3);
        assert!(points[1].1.is_nan());
        assert_eq!(points[2], (1.0, 1.0));
    }
}
