use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// Numeric types the bytecode VM and the ODE steppers can run on.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A first-order system `y' = f(t, y)`.
pub trait DynamicalSystem<T: Scalar> {
    /// Dimension of the state vector.
    fn dimension(&self) -> usize;

    /// Writes `f(t, x)` into `out`.
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// One-step integrators.
pub trait Steppable<T: Scalar> {
    /// Advances `state` from `t` to `t + dt`, updating both in place.
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}
