//! Synchronous engine surface: compile handles, evaluation, sampling,
//! solving, integration and contouring.

use crate::{build_context, js_error, parse_config, to_js};
use calcite_core::compiler::{CompileOptions, Notation};
use calcite_core::context::EngineContext;
use calcite_core::contour::{
    assemble_rings, extract_surface, grid_size_for_viewport, marching_squares, SurfaceBounds,
    Viewport,
};
use calcite_core::dispatcher::{solve, SolverCategory};
use calcite_core::equation_engine::{Evaluator, Scope};
use calcite_core::integration::integrate_symbolically;
use calcite_core::numerics::{find_extrema, find_intersections, find_zeros, sample_curve};
use js_sys::Float64Array;
use serde::Serialize;
use serde_wasm_bindgen::from_value;
use std::collections::HashMap;
use std::rc::Rc;
use wasm_bindgen::prelude::*;

const RING_TOLERANCE: f64 = 1e-9;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheStats {
    compile_entries: usize,
    compile_hits: u64,
    contour_entries: usize,
    registry_version: u64,
}

#[wasm_bindgen]
pub struct WasmEngine {
    ctx: EngineContext,
    evaluators: HashMap<u32, Rc<Evaluator>>,
    next_handle: u32,
}

impl WasmEngine {
    fn evaluator(&self, handle: u32) -> Result<&Rc<Evaluator>, JsValue> {
        self.evaluators
            .get(&handle)
            .ok_or_else(|| JsValue::from_str(&format!("Unknown evaluator handle: {}", handle)))
    }

    fn viewport(value: JsValue) -> Result<Viewport, JsValue> {
        from_value(value).map_err(|e| JsValue::from_str(&format!("Invalid viewport: {}", e)))
    }

    fn univariate(&self, handle: u32, variable: &str) -> Result<impl Fn(f64) -> f64, JsValue> {
        let evaluator = self.evaluator(handle)?.clone();
        let variable = variable.to_string();
        Ok(move |x: f64| evaluator.eval_at(&variable, x))
    }
}

#[wasm_bindgen]
impl WasmEngine {
    /// `config` may be `undefined` or a partial `EngineConfig` object.
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<WasmEngine, JsValue> {
        console_error_panic_hook::set_once();
        let config = parse_config(config).map_err(js_error)?;
        Ok(WasmEngine {
            ctx: EngineContext::new(config),
            evaluators: HashMap::new(),
            next_handle: 1,
        })
    }

    /// Compiles `text` and returns a handle, or `undefined` when it does not
    /// compile.
    pub fn compile(&mut self, text: &str, markup: bool, allow_user_functions: bool) -> Option<u32> {
        let options = CompileOptions {
            notation: if markup { Notation::Markup } else { Notation::Plain },
            allow_user_functions,
        };
        let evaluator = self.ctx.compile(text, options)?;
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1).max(1);
        self.evaluators.insert(handle, evaluator);
        Some(handle)
    }

    pub fn release(&mut self, handle: u32) {
        self.evaluators.remove(&handle);
    }

    pub fn variables(&self, handle: u32) -> Result<Vec<String>, JsValue> {
        Ok(self.evaluator(handle)?.variables().to_vec())
    }

    /// Evaluates against a `{ name: value }` object. Missing variables read
    /// as NaN.
    pub fn evaluate(&self, handle: u32, scope: JsValue) -> Result<f64, JsValue> {
        let values: HashMap<String, f64> = if scope.is_undefined() || scope.is_null() {
            HashMap::new()
        } else {
            from_value(scope).map_err(|e| JsValue::from_str(&format!("Invalid scope: {}", e)))?
        };
        let scope: Scope = values.into_iter().collect();
        Ok(self.evaluator(handle)?.evaluate(&scope))
    }

    /// `n + 1` samples interleaved as `[x0, y0, x1, y1, ...]`.
    pub fn sample(
        &self,
        handle: u32,
        variable: &str,
        x_min: f64,
        x_max: f64,
        n: u32,
    ) -> Result<Float64Array, JsValue> {
        let f = self.univariate(handle, variable)?;
        let points = sample_curve(f, x_min, x_max, n as usize);
        let flat: Vec<f64> = points.iter().flat_map(|&(x, y)| [x, y]).collect();
        Ok(Float64Array::from(flat.as_slice()))
    }

    pub fn zeros(&self, handle: u32, variable: &str, x_min: f64, x_max: f64) -> Result<Float64Array, JsValue> {
        let f = self.univariate(handle, variable)?;
        let zeros = find_zeros(f, x_min, x_max, self.ctx.config.sample_count);
        Ok(Float64Array::from(zeros.as_slice()))
    }

    pub fn extrema(&self, handle: u32, variable: &str, x_min: f64, x_max: f64) -> Result<JsValue, JsValue> {
        let f = self.univariate(handle, variable)?;
        to_js(&find_extrema(f, x_min, x_max, self.ctx.config.sample_count))
    }

    /// Intersections of two compiled curves, interleaved as `[x0, y0, ...]`.
    pub fn intersections(
        &self,
        first: u32,
        second: u32,
        variable: &str,
        x_min: f64,
        x_max: f64,
    ) -> Result<Float64Array, JsValue> {
        let f = self.univariate(first, variable)?;
        let g = self.univariate(second, variable)?;
        let config = &self.ctx.config;
        let points = find_intersections(f, g, x_min, x_max, config.sample_count, config.max_intersections);
        let flat: Vec<f64> = points.iter().flat_map(|&(x, y)| [x, y]).collect();
        Ok(Float64Array::from(flat.as_slice()))
    }

    /// Resolves to a `SolverResult`; rejects with a `SolveError` object.
    pub fn solve(&self, category: &str, input: &str) -> Result<JsValue, JsValue> {
        let category: SolverCategory = category
            .parse()
            .map_err(|e| JsValue::from_str(&format!("{}", e)))?;
        match solve(&self.ctx, category, input) {
            Ok(result) => to_js(&result),
            Err(err) => Err(to_js(&err)?),
        }
    }

    pub fn integrate(&self, expression: &str, variable: &str) -> Result<JsValue, JsValue> {
        match integrate_symbolically(&self.ctx, expression, variable) {
            Ok(result) => to_js(&result),
            Err(failure) => Err(to_js(&failure)?),
        }
    }

    /// Replaces all user functions; returns how many were defined.
    pub fn define_functions(&mut self, text: &str) -> Result<u32, JsValue> {
        let count = self
            .ctx
            .define_functions(text)
            .map_err(|e| JsValue::from_str(&format!("Invalid function definitions: {}", e)))?;
        Ok(count as u32)
    }

    /// Segments flattened as `[ax, ay, bx, by, ...]`.
    pub fn contour(&mut self, expression: &str, viewport: JsValue, grid: u32) -> Result<Float64Array, JsValue> {
        let viewport = Self::viewport(viewport)?;
        let segments = marching_squares(&mut self.ctx, expression, viewport, grid as usize)
            .ok_or_else(|| JsValue::from_str(&format!("Cannot contour '{}'", expression)))?;
        let flat: Vec<f64> = segments
            .iter()
            .flat_map(|s| [s.a.0, s.a.1, s.b.0, s.b.1])
            .collect();
        Ok(Float64Array::from(flat.as_slice()))
    }

    /// Segments chained into polylines.
    pub fn contour_rings(&mut self, expression: &str, viewport: JsValue, grid: u32) -> Result<JsValue, JsValue> {
        let viewport = Self::viewport(viewport)?;
        let segments = marching_squares(&mut self.ctx, expression, viewport, grid as usize)
            .ok_or_else(|| JsValue::from_str(&format!("Cannot contour '{}'", expression)))?;
        to_js(&assemble_rings(&segments, RING_TOLERANCE))
    }

    pub fn grid_size(&self, viewport: JsValue, base: u32) -> Result<u32, JsValue> {
        let viewport = Self::viewport(viewport)?;
        Ok(grid_size_for_viewport(&viewport, base as usize) as u32)
    }

    /// Triangulates `expression = 0`; the mesh carries `timedOut` when the
    /// configured budget ran out.
    pub fn surface(&mut self, expression: &str, bounds: JsValue, grid: u32) -> Result<JsValue, JsValue> {
        let bounds: SurfaceBounds = from_value(bounds)
            .map_err(|e| JsValue::from_str(&format!("Invalid surface bounds: {}", e)))?;
        let timeout = self.ctx.config.surface_timeout_ms as f64;
        let mesh = extract_surface(
            &mut self.ctx,
            expression,
            bounds,
            grid as usize,
            timeout,
            js_sys::Date::now,
        )
        .map_err(|e| JsValue::from_str(&format!("Surface extraction failed: {}", e)))?;
        to_js(&mesh)
    }

    pub fn cache_stats(&self) -> Result<JsValue, JsValue> {
        to_js(&CacheStats {
            compile_entries: self.ctx.compile_cache_len(),
            compile_hits: self.ctx.compile_cache_hits(),
            contour_entries: self.ctx.contour_cache_len(),
            registry_version: self.ctx.registry().version(),
        })
    }

    pub fn clear_caches(&mut self) {
        self.ctx.clear_caches();
    }

    /// Swaps in a new config and user functions, dropping caches and handles.
    pub fn reset(&mut self, config: JsValue, definitions: &str) -> Result<(), JsValue> {
        self.ctx = build_context(config, definitions).map_err(js_error)?;
        self.evaluators.clear();
        Ok(())
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use wasm_bindgen_test::wasm_bindgen_test;

    fn engine() -> WasmEngine {
        WasmEngine::new(JsValue::UNDEFINED).expect("engine")
    }

    #[wasm_bindgen_test]
    fn compiles_and_evaluates_through_handles() {
        let mut engine = engine();
        let handle = engine.compile("x^2 + y", false, true).expect("handle");
        assert_eq!(engine.variables(handle).expect("vars"), vec!["x", "y"]);
        let scope = serde_wasm_bindgen::to_value(&HashMap::from([("x", 3.0), ("y", 1.0)])).expect("scope");
        assert_eq!(engine.evaluate(handle, scope).expect("value"), 10.0);
        assert!(engine.compile("x +* 1", false, true).is_none());
        engine.release(handle);
        assert!(engine.variables(handle).is_err());
    }

    #[wasm_bindgen_test]
    fn samples_are_interleaved() {
        let mut engine = engine();
        let handle = engine.compile("2*x", false, true).expect("handle");
        let samples = engine.sample(handle, "x", 0.0, 1.0, 2).expect("samples").to_vec();
        assert_eq!(samples, vec![0.0, 0.0, 0.5, 1.0, 1.0, 2.0]);
    }

    #[wasm_bindgen_test]
    fn solve_rejects_unknown_categories() {
        let engine = engine();
        assert!(engine.solve("algebra", "x^2 - 4 = 0").is_ok());
        let message = engine.solve("geometry", "x").err().and_then(|e| e.as_string()).unwrap_or_default();
        assert!(message.contains("unsupported"));
    }

    #[wasm_bindgen_test]
    fn user_functions_expand_in_compiled_handles() {
        let mut engine = engine();
        assert_eq!(engine.define_functions("f(x) = x + 1").expect("defined"), 1);
        let handle = engine.compile("f(2)", false, true).expect("handle");
        assert_eq!(engine.evaluate(handle, JsValue::UNDEFINED).expect("value"), 3.0);
    }
}
