//! The `calcite_core` crate is the computation engine behind the Calcite
//! graphing calculator. Everything is driven by expression text.
//!
//! Key components:
//! - **Expression Compiler**: parsing, user-function expansion and a cached
//!   bytecode [`Evaluator`](equation_engine::Evaluator), owned by an
//!   [`EngineContext`](context::EngineContext).
//! - **Numerics**: roots, extrema, intersections, Simpson quadrature, curve
//!   geometry and small linear systems.
//! - **ODE**: RK4 and adaptive Tsit5 integration, closed forms and phase
//!   portraits.
//! - **Integration**: rule-based symbolic antiderivatives with domain notes.
//! - **Contour**: marching squares for implicit curves and a marching-cubes
//!   surface extractor.
//! - **Linalg** and **Dispatcher**: dense matrix/vector operations and the
//!   categorised `solve` entry point.
//! - **Jobs**: cancellable background workers for the expensive paths.

pub mod cache;
pub mod compiler;
pub mod config;
pub mod context;
pub mod contour;
pub mod dispatcher;
pub mod equation_engine;
pub mod error;
pub mod format;
pub mod integration;
#[cfg(not(target_arch = "wasm32"))]
pub mod jobs;
pub mod linalg;
pub mod numerics;
pub mod ode;
pub mod registry;
pub mod solvers;
pub mod symbolic;
pub mod text;
pub mod traits;

pub use config::EngineConfig;
pub use context::EngineContext;
pub use dispatcher::{solve, SolveError, SolverCategory, SolverResult};
pub use error::{EngineError, EngineResult};
