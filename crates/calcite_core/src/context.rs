use crate::cache::LruCache;
use crate::compiler::{self, CompileKey, CompileOptions, Notation};
use crate::config::EngineConfig;
use crate::contour::{ContourKey, ContourSegment};
use crate::equation_engine::{Evaluator, Expr};
use crate::error::EngineResult;
use crate::registry::{FunctionDefinition, FunctionRegistry};
use crate::symbolic::{BuiltinEngine, SymbolicEngine};
use std::rc::Rc;

/// Owns everything that outlives a single request: the symbolic engine, the
/// user-function registry and the bounded caches.
///
/// Contexts are single-threaded; background jobs build their own.
pub struct EngineContext {
    pub config: EngineConfig,
    engine: Box<dyn SymbolicEngine>,
    registry: FunctionRegistry,
    compile_cache: LruCache<CompileKey, Option<Rc<Evaluator>>>,
    pub(crate) contour_cache: LruCache<ContourKey, Rc<Vec<ContourSegment>>>,
}

impl Default for EngineContext {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl EngineContext {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_engine(config, Box::new(BuiltinEngine))
    }

    pub fn with_engine(config: EngineConfig, engine: Box<dyn SymbolicEngine>) -> Self {
        Self {
            compile_cache: LruCache::new(config.compile_cache_capacity),
            contour_cache: LruCache::new(config.contour_cache_capacity),
            engine,
            registry: FunctionRegistry::new(),
            config,
        }
    }

    pub fn engine(&self) -> &dyn SymbolicEngine {
        self.engine.as_ref()
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Compiles `text`, serving repeated requests from the cache. Failures are
    /// cached too and come back as `None`.
    pub fn compile(&mut self, text: &str, options: CompileOptions) -> Option<Rc<Evaluator>> {
        let key = CompileKey {
            text: text.to_string(),
            notation: options.notation,
            registry_version: options
                .allow_user_functions
                .then(|| self.registry.version()),
        };
        if let Some(entry) = self.compile_cache.get(&key) {
            log::debug!("compile cache hit for '{text}'");
            return entry.clone();
        }

        let registry = options.allow_user_functions.then_some(&self.registry);
        let result = match compiler::build_evaluator(
            self.engine.as_ref(),
            registry,
            text,
            options.notation,
            self.config.max_expansion_depth,
        ) {
            Ok(evaluator) => Some(Rc::new(evaluator)),
            Err(err) => {
                log::debug!("compile failed for '{text}': {err}");
                None
            }
        };
        for evicted in self.compile_cache.insert(key, result.clone()) {
            log::debug!("compile cache evicted '{}'", evicted.text);
        }
        result
    }

    /// Plain-notation compile with user functions enabled.
    pub fn compile_plain(&mut self, text: &str) -> Option<Rc<Evaluator>> {
        self.compile(text, CompileOptions::default())
    }

    /// Parses and expands `text` without compiling it.
    pub fn prepare(&self, text: &str, notation: Notation) -> EngineResult<Expr> {
        compiler::prepare(
            self.engine.as_ref(),
            Some(&self.registry),
            text,
            notation,
            self.config.max_expansion_depth,
        )
    }

    /// Replaces every user function with the definitions in `text`. On a
    /// parse error the registry is left untouched.
    pub fn define_functions(&mut self, text: &str) -> EngineResult<usize> {
        let definitions = FunctionDefinition::parse_many(text)?;
        let count = definitions.len();
        self.registry.rebuild(definitions);
        Ok(count)
    }

    pub fn compile_cache_len(&self) -> usize {
        self.compile_cache.len()
    }

    pub fn compile_cache_hits(&self) -> u64 {
        self.compile_cache.hits()
    }

    pub fn contour_cache_len(&self) -> usize {
        self.contour_cache.len()
    }

    pub fn clear_caches(&mut self) {
        self.compile_cache.clear();
        self.contour_cache.clear();
    }
}
