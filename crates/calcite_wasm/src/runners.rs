//! Stepped runners for contouring and phase portraits.
//!
//! Callers drive them in batches (`run_rows` / `run_seeds`) so the UI thread
//! stays responsive, and drop or `cancel()` them when the viewport or the
//! expression changes.

use crate::{build_context, js_error, to_js};
use calcite_core::contour::{ContourSampler, Viewport};
use calcite_core::ode::{PhasePortrait, PhasePortraitRequest};
use js_sys::Float64Array;
use serde::Serialize;
use serde_wasm_bindgen::from_value;
use wasm_bindgen::prelude::*;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Progress {
    done: usize,
    total: usize,
    finished: bool,
}

fn cancelled() -> JsValue {
    JsValue::from_str("Runner cancelled or already consumed")
}

/// WASM-exported marching-squares runner.
#[wasm_bindgen]
pub struct WasmContourRunner {
    sampler: Option<ContourSampler>,
}

#[wasm_bindgen]
impl WasmContourRunner {
    #[wasm_bindgen(constructor)]
    pub fn new(
        config: JsValue,
        definitions: &str,
        expression: &str,
        viewport: JsValue,
        grid: u32,
    ) -> Result<WasmContourRunner, JsValue> {
        console_error_panic_hook::set_once();
        let viewport: Viewport = from_value(viewport)
            .map_err(|e| JsValue::from_str(&format!("Invalid viewport: {}", e)))?;
        let mut ctx = build_context(config, definitions).map_err(js_error)?;
        let sampler = ContourSampler::new(&mut ctx, expression, viewport, grid as usize)
            .map_err(|e| JsValue::from_str(&format!("Cannot contour '{}': {}", expression, e)))?;
        Ok(WasmContourRunner {
            sampler: Some(sampler),
        })
    }

    pub fn is_done(&self) -> bool {
        self.sampler.as_ref().map_or(true, |s| s.is_done())
    }

    /// Samples up to `batch` grid rows and reports progress.
    pub fn run_rows(&mut self, batch: u32) -> Result<JsValue, JsValue> {
        let sampler = self.sampler.as_mut().ok_or_else(cancelled)?;
        sampler.sample_rows(batch as usize);
        to_js(&Progress {
            done: sampler.rows_done(),
            total: sampler.total_rows(),
            finished: sampler.is_done(),
        })
    }

    /// Finishes any remaining rows and returns `[ax, ay, bx, by, ...]`.
    pub fn take_result(&mut self) -> Result<Float64Array, JsValue> {
        let sampler = self.sampler.take().ok_or_else(cancelled)?;
        let flat: Vec<f64> = sampler
            .finish()
            .iter()
            .flat_map(|s| [s.a.0, s.a.1, s.b.0, s.b.1])
            .collect();
        Ok(Float64Array::from(flat.as_slice()))
    }

    pub fn cancel(&mut self) {
        self.sampler = None;
    }
}

/// WASM-exported phase-portrait runner; one seed per unit of work.
#[wasm_bindgen]
pub struct WasmPhasePortraitRunner {
    portrait: Option<PhasePortrait>,
}

#[wasm_bindgen]
impl WasmPhasePortraitRunner {
    /// `request` is a `PhasePortraitRequest` object.
    #[wasm_bindgen(constructor)]
    pub fn new(
        config: JsValue,
        definitions: &str,
        request: JsValue,
    ) -> Result<WasmPhasePortraitRunner, JsValue> {
        console_error_panic_hook::set_once();
        let request: PhasePortraitRequest = from_value(request)
            .map_err(|e| JsValue::from_str(&format!("Invalid phase portrait request: {}", e)))?;
        let mut ctx = build_context(config, definitions).map_err(js_error)?;
        let portrait = PhasePortrait::new(&mut ctx, &request)
            .map_err(|e| JsValue::from_str(&format!("Phase portrait init failed: {}", e)))?;
        Ok(WasmPhasePortraitRunner {
            portrait: Some(portrait),
        })
    }

    pub fn is_done(&self) -> bool {
        self.portrait.as_ref().map_or(true, |p| p.is_done())
    }

    pub fn run_seeds(&mut self, batch: u32) -> Result<JsValue, JsValue> {
        let portrait = self.portrait.as_mut().ok_or_else(cancelled)?;
        portrait.advance(batch as usize);
        to_js(&Progress {
            done: portrait.completed(),
            total: portrait.total(),
            finished: portrait.is_done(),
        })
    }

    /// Trajectories traced so far, including any partial run.
    pub fn take_result(&mut self) -> Result<JsValue, JsValue> {
        let portrait = self.portrait.take().ok_or_else(cancelled)?;
        to_js(portrait.trajectories())
    }

    pub fn cancel(&mut self) {
        self.portrait = None;
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod tests {
    use super::*;
    use calcite_core::contour::Viewport;
    use serde_wasm_bindgen::to_value;
    use wasm_bindgen_test::wasm_bindgen_test;

    fn viewport() -> JsValue {
        to_value(&Viewport::new(-3.0, 3.0, -3.0, 3.0)).expect("viewport")
    }

    #[wasm_bindgen_test]
    fn contour_runner_steps_rows() {
        let mut runner =
            WasmContourRunner::new(JsValue::UNDEFINED, "", "x^2 + y^2 = 4", viewport(), 32).expect("runner");
        assert!(!runner.is_done());
        while !runner.is_done() {
            runner.run_rows(5).expect("rows");
        }
        let segments = runner.take_result().expect("segments");
        assert!(segments.length() > 0);
        assert_eq!(segments.length() % 4, 0);
        assert!(runner.take_result().is_err());
    }

    #[wasm_bindgen_test]
    fn cancelled_runner_refuses_work() {
        let mut runner =
            WasmContourRunner::new(JsValue::UNDEFINED, "", "x - y", viewport(), 16).expect("runner");
        runner.cancel();
        assert!(runner.is_done());
        assert!(runner.run_rows(1).is_err());
    }

    #[wasm_bindgen_test]
    fn contour_runner_rejects_extra_variables() {
        let result = WasmContourRunner::new(JsValue::UNDEFINED, "", "x + z", viewport(), 16);
        let message = result.err().and_then(|e| e.as_string()).unwrap_or_default();
        assert!(message.contains("unexpected variable"));
    }

    #[wasm_bindgen_test]
    fn phase_runner_traces_seeds() {
        let request = PhasePortraitRequest {
            dx: "y".to_string(),
            dy: "-x".to_string(),
            x_range: (-1.0, 1.0),
            y_range: (-1.0, 1.0),
            seeds_per_axis: 2,
            duration: 1.0,
            steps: 20,
        };
        let mut runner =
            WasmPhasePortraitRunner::new(JsValue::UNDEFINED, "", to_value(&request).expect("request"))
                .expect("runner");
        runner.run_seeds(3).expect("seeds");
        assert!(!runner.is_done());
        runner.run_seeds(3).expect("seeds");
        assert!(runner.is_done());
        assert!(runner.take_result().is_ok());
    }
}
