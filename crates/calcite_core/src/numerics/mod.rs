//! Sampling-based numerical routines over compiled evaluators or plain
//! closures. Every routine bounds its sample and iteration counts and
//! reports failure as an empty result, `None` or `NaN`.

pub mod geometry;
pub mod linear;
pub mod quadrature;
pub mod roots;

pub use geometry::{arc_length, curvature, osculating_circle, tangent_line, OsculatingCircle, TangentLine};
pub use linear::{gaussian_solve, solve_linear_system, LinearSolution};
pub use quadrature::{sample_curve, simpson_integrate};
pub use roots::{find_extrema, find_intersections, find_zeros, Extremum, ExtremumKind};
