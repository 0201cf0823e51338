use serde::{Deserialize, Serialize};

/// Tunables for one [`EngineContext`](crate::context::EngineContext).
///
/// Deserializes with defaults for any missing field, so callers (including the
/// WASM bridge) can override only what they need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of compiled expressions (and failure markers) kept.
    pub compile_cache_capacity: usize,
    /// Maximum number of contour results kept.
    pub contour_cache_capacity: usize,
    /// Sample count used by the root, extremum and intersection scanners.
    pub sample_count: usize,
    /// Upper bound on reported curve intersections.
    pub max_intersections: usize,
    /// Fixed RK4 step count, also used for the fallback path.
    pub ode_steps: usize,
    /// Relative/absolute tolerance of the adaptive integrator.
    pub ode_tolerance: f64,
    /// Step budget of the adaptive integrator before it gives up.
    pub ode_max_adaptive_steps: usize,
    /// Hard ceiling on nested user-function expansion.
    pub max_expansion_depth: usize,
    /// Wall-clock budget for 3D surface extraction, in milliseconds.
    pub surface_timeout_ms: u64,
    /// Half-width of the interval scanned by the numeric equation solver.
    pub algebra_search_radius: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compile_cache_capacity: 64,
            contour_cache_capacity: 64,
            sample_count: 200,
            max_intersections: 20,
            ode_steps: 1000,
            ode_tolerance: 1e-8,
            ode_max_adaptive_steps: 20_000,
            max_expansion_depth: 16,
            surface_timeout_ms: 1500,
            algebra_search_radius: 100.0,
        }
    }
}
