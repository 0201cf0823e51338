//! WASM bindings for the Calcite engine.
//!
//! [`WasmEngine`] wraps one `EngineContext` for the synchronous surface.
//! The expensive paths run through the batch-stepped runners, each of which
//! owns a separate context so nothing cached is shared with the engine.

mod engine;
mod runners;

pub use engine::WasmEngine;
pub use runners::{WasmContourRunner, WasmPhasePortraitRunner};

use calcite_core::config::EngineConfig;
use calcite_core::context::EngineContext;
use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

pub(crate) fn js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{err:#}"))
}

pub(crate) fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue, JsValue> {
    to_value(value).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// `undefined` and `null` mean the defaults.
pub(crate) fn parse_config(value: JsValue) -> anyhow::Result<EngineConfig> {
    if value.is_undefined() || value.is_null() {
        return Ok(EngineConfig::default());
    }
    from_value(value).map_err(|e| anyhow::anyhow!("Invalid engine config: {}", e))
}

/// A fresh context with `definitions` installed.
pub(crate) fn build_context(config: JsValue, definitions: &str) -> anyhow::Result<EngineContext> {
    let mut ctx = EngineContext::new(parse_config(config)?);
    if !definitions.trim().is_empty() {
        ctx.define_functions(definitions)
            .map_err(|e| anyhow::anyhow!("Invalid function definitions: {}", e))?;
    }
    Ok(ctx)
}
