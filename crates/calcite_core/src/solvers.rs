use crate::traits::{DynamicalSystem, Scalar, Steppable};
use thiserror::Error;

fn lit<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Classic Runge-Kutta 4th Order Solver
pub struct RK4<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> RK4<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for RK4<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let half: T = lit(0.5);
        let sixth: T = lit(1.0 / 6.0);
        let two: T = lit(2.0);

        let t0 = *t;

        // k1 = f(t, y)
        system.apply(t0, state, &mut self.k1);

        // k2 = f(t + dt/2, y + dt*k1/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k1[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k2);

        // k3 = f(t + dt/2, y + dt*k2/2)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k2[i] * half;
        }
        system.apply(t0 + dt * half, &self.tmp, &mut self.k3);

        // k4 = f(t + dt, y + dt*k3)
        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * self.k3[i];
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k4);

        // y_next = y + dt/6 * (k1 + 2k2 + 2k3 + k4)
        for i in 0..state.len() {
            state[i] = state[i]
                + dt * sixth * (self.k1[i] + two * self.k2[i] + two * self.k3[i] + self.k4[i]);
        }

        *t = t0 + dt;
    }
}

/// Tsitouras 5/4 Solver
pub struct Tsit5<T: Scalar> {
    k1: Vec<T>,
    k2: Vec<T>,
    k3: Vec<T>,
    k4: Vec<T>,
    k5: Vec<T>,
    k6: Vec<T>,
    tmp: Vec<T>,
}

impl<T: Scalar> Tsit5<T> {
    pub fn new(dim: usize) -> Self {
        let z = T::zero();
        Self {
            k1: vec![z; dim],
            k2: vec![z; dim],
            k3: vec![z; dim],
            k4: vec![z; dim],
            k5: vec![z; dim],
            k6: vec![z; dim],
            tmp: vec![z; dim],
        }
    }
}

impl<T: Scalar> Steppable<T> for Tsit5<T> {
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T) {
        let t0 = *t;

        // Tsit5 Coefficients
        let c2: T = lit(0.161);
        let c3: T = lit(0.327);
        let c4: T = lit(0.9);
        let c5: T = lit(0.980_025_540_904_509_7);

        let a21: T = lit(0.161);

        let a31: T = lit(-0.008_480_655_492_356_989);
        let a32: T = lit(0.335_480_655_492_357);

        let a41: T = lit(2.897_153_057_105_493);
        let a42: T = lit(-6.359_448_489_975_075);
        let a43: T = lit(4.362_295_432_869_581);

        let a51: T = lit(5.325_864_828_439_257);
        let a52: T = lit(-11.748_883_564_062_83);
        let a53: T = lit(7.495_539_342_889_836);
        let a54: T = lit(-0.092_495_066_361_755_25);

        let a61: T = lit(5.861_455_442_946_42);
        let a62: T = lit(-12.920_969_317_847_11);
        let a63: T = lit(8.159_367_898_576_159);
        let a64: T = lit(-0.071_584_973_281_401);
        let a65: T = lit(-0.028_269_050_394_068_38);

        // b coefficients (5th order)
        let b1: T = lit(0.096_460_766_818_065_23);
        let b2: T = lit(0.01);
        let b3: T = lit(0.479_889_650_414_499_6);
        let b4: T = lit(1.379_008_574_103_742);
        let b5: T = lit(-3.290_069_515_436_099);
        let b6: T = lit(2.324_710_524_099_774);

        system.apply(t0, state, &mut self.k1);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * (a21 * self.k1[i]);
        }
        system.apply(t0 + c2 * dt, &self.tmp, &mut self.k2);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * (a31 * self.k1[i] + a32 * self.k2[i]);
        }
        system.apply(t0 + c3 * dt, &self.tmp, &mut self.k3);

        for i in 0..state.len() {
            self.tmp[i] = state[i] + dt * (a41 * self.k1[i] + a42 * self.k2[i] + a43 * self.k3[i]);
        }
        system.apply(t0 + c4 * dt, &self.tmp, &mut self.k4);

        for i in 0..state.len() {
            self.tmp[i] = state[i]
                + dt * (a51 * self.k1[i] + a52 * self.k2[i] + a53 * self.k3[i] + a54 * self.k4[i]);
        }
        system.apply(t0 + c5 * dt, &self.tmp, &mut self.k5);

        for i in 0..state.len() {
            self.tmp[i] = state[i]
                + dt * (a61 * self.k1[i]
                    + a62 * self.k2[i]
                    + a63 * self.k3[i]
                    + a64 * self.k4[i]
                    + a65 * self.k5[i]);
        }
        system.apply(t0 + dt, &self.tmp, &mut self.k6);

        for i in 0..state.len() {
            state[i] = state[i]
                + dt * (b1 * self.k1[i]
                    + b2 * self.k2[i]
                    + b3 * self.k3[i]
                    + b4 * self.k4[i]
                    + b5 * self.k5[i]
                    + b6 * self.k6[i]);
        }

        *t = t0 + dt;
    }
}

/// Why an adaptive run was abandoned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdaptiveFailure {
    #[error("non-finite state at t = {t}")]
    NonFinite { t: f64 },
    #[error("step size underflow at t = {t}")]
    StepUnderflow { t: f64 },
    #[error("step budget of {steps} exhausted at t = {t}")]
    BudgetExhausted { steps: usize, t: f64 },
}

/// Tsit5 with step-doubling error control: each step is compared against two
/// half steps and the more accurate pair is kept.
pub struct AdaptiveTsit5<T: Scalar> {
    stepper: Tsit5<T>,
    pub tolerance: T,
    pub max_steps: usize,
}

impl<T: Scalar> AdaptiveTsit5<T> {
    pub fn new(dim: usize, tolerance: T, max_steps: usize) -> Self {
        Self {
            stepper: Tsit5::new(dim),
            tolerance,
            max_steps,
        }
    }

    /// Integrates from `t0` to `t1` and returns every accepted `(t, state)`,
    /// starting with the initial condition.
    pub fn integrate(
        &mut self,
        system: &impl DynamicalSystem<T>,
        t0: T,
        t1: T,
        y0: &[T],
    ) -> Result<Vec<(T, Vec<T>)>, AdaptiveFailure> {
        let to_f64 = |v: T| v.to_f64().unwrap_or(f64::NAN);
        let span = t1 - t0;
        let direction = if span < T::zero() { -T::one() } else { T::one() };
        let min_step = span.abs() * lit(1e-12);
        let half: T = lit(0.5);
        let safety: T = lit(0.9);
        let fifth: T = lit(-0.2);

        let mut t = t0;
        let mut y = y0.to_vec();
        let mut dt = span / lit(100.0);
        let mut out = vec![(t, y.clone())];
        if span == T::zero() {
            return Ok(out);
        }

        let mut full = y.clone();
        let mut halves = y.clone();
        for _ in 0..self.max_steps {
            let remaining = t1 - t;
            if remaining * direction <= T::zero() {
                return Ok(out);
            }
            if (dt - remaining) * direction > T::zero() {
                dt = remaining;
            }

            full.copy_from_slice(&y);
            let mut t_full = t;
            self.stepper.step(system, &mut t_full, &mut full, dt);

            halves.copy_from_slice(&y);
            let mut t_half = t;
            self.stepper.step(system, &mut t_half, &mut halves, dt * half);
            self.stepper.step(system, &mut t_half, &mut halves, dt * half);

            if halves.iter().chain(full.iter()).any(|v| !v.is_finite()) {
                return Err(AdaptiveFailure::NonFinite { t: to_f64(t) });
            }

            let mut error = T::zero();
            for (a, b) in full.iter().zip(halves.iter()) {
                let scale = self.tolerance * (T::one() + b.abs());
                error = error.max((*a - *b).abs() / scale);
            }

            if error <= T::one() {
                t = t + dt;
                y.copy_from_slice(&halves);
                out.push((t, y.clone()));
            }

            let factor = if error == T::zero() {
                lit(4.0)
            } else {
                (safety * error.powf(fifth)).max(lit(0.1)).min(lit(4.0))
            };
            dt = dt * factor;
            if dt.abs() < min_step {
                return Err(AdaptiveFailure::StepUnderflow { t: to_f64(t) });
            }
        }

        if (t1 - t) * direction <= T::zero() {
            Ok(out)
        } else {
            Err(AdaptiveFailure::BudgetExhausted {
                steps: self.max_steps,
                t: to_f64(t),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AdaptiveFailure, AdaptiveTsit5, Tsit5, RK4};
    use crate::traits::{DynamicalSystem, Steppable};

    struct Growth;

    impl DynamicalSystem<f64> for Growth {
        fn dimension(&self) -> usize {
            1
        }
        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[0];
        }
    }

    struct Oscillator;

    impl DynamicalSystem<f64> for Oscillator {
        fn dimension(&self) -> usize {
            2
        }
        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[1];
            out[1] = -x[0];
        }
    }

    struct BlowUp;

    impl DynamicalSystem<f64> for BlowUp {
        fn dimension(&self) -> usize {
            1
        }
        fn apply(&self, _t: f64, x: &[f64], out: &mut [f64]) {
            out[0] = x[0] * x[0];
        }
    }

    #[test]
    fn rk4_tracks_exponential_growth() {
        let mut solver = RK4::new(1);
        let mut t = 0.0;
        let mut state = [1.0];
        for _ in 0..100 {
            solver.step(&Growth, &mut t, &mut state, 0.01);
        }
        assert!((state[0] - std::f64::consts::E).abs() < 1e-8);
        assert!((t - 1.0).abs() < 1e-12);
    }

    #[test]
    fn tsit5_preserves_oscillator_energy() {
        let mut solver = Tsit5::new(2);
        let mut t = 0.0;
        let mut state = [1.0, 0.0];
        for _ in 0..1000 {
            solver.step(&Oscillator, &mut t, &mut state, 0.01);
        }
        let energy = state[0] * state[0] + state[1] * state[1];
        assert!((energy - 1.0).abs() < 1e-8);
        assert!((state[0] - 10f64.cos()).abs() < 1e-7);
    }

    #[test]
    fn tsit5_error_shrinks_at_fifth_order() {
        let error_at = |dt: f64| {
            let mut solver = Tsit5::new(2);
            let mut t = 0.0;
            let mut state = [1.0, 0.0];
            let steps = (10.0 / dt).round() as usize;
            for _ in 0..steps {
                solver.step(&Oscillator, &mut t, &mut state, dt);
            }
            (state[0] - 10f64.cos()).abs()
        };
        let coarse = error_at(0.1);
        let fine = error_at(0.05);
        assert!(coarse < 1e-7, "coarse error {coarse}");
        assert!(coarse / fine > 20.0, "ratio {}", coarse / fine);
    }

    #[test]
    fn adaptive_run_reaches_the_end_accurately() {
        let mut solver = AdaptiveTsit5::new(1, 1e-10, 10_000);
        let path = solver.integrate(&Growth, 0.0, 2.0, &[1.0]).expect("converges");
        let (t, y) = path.last().expect("non-empty");
        assert!((t - 2.0).abs() < 1e-12);
        assert!((y[0] - 2f64.exp()).abs() < 1e-7);
    }

    #[test]
    fn adaptive_run_reports_blow_up() {
        // y' = y^2, y(0) = 1 blows up at t = 1.
        let mut solver = AdaptiveTsit5::new(1, 1e-8, 2_000);
        let result = solver.integrate(&BlowUp, 0.0, 2.0, &[1.0]);
        assert!(matches!(
            result,
            Err(AdaptiveFailure::StepUnderflow { .. })
                | Err(AdaptiveFailure::BudgetExhausted { .. })
                | Err(AdaptiveFailure::NonFinite { .. })
        ));
    }
}
