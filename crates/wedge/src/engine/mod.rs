mod stats;

use std::sync::Arc;

use wasmparser::{Validator, WasmFeatures};

pub use stats::Statistics;

/// Default ceiling on nested wasm calls.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 10_000;
/// Default ceiling on operand-stack values across all frames.
pub const DEFAULT_MAX_STACK_VALUES: usize = 1 << 20;

/// Engine configuration. Every knob has a builder-style setter.
#[derive(Debug, Clone)]
pub struct Config {
    threads: bool,
    exceptions: bool,
    bulk_memory: bool,
    reference_types: bool,
    multi_value: bool,
    max_call_depth: usize,
    max_stack_values: usize,
    cost_limit: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            threads: true,
            exceptions: true,
            bulk_memory: true,
            reference_types: true,
            multi_value: true,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_stack_values: DEFAULT_MAX_STACK_VALUES,
            cost_limit: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn threads(&mut self, enable: bool) -> &mut Self {
        self.threads = enable;
        self
    }

    /// Legacy exception handling (`try`/`catch`/`throw`/`rethrow`).
    pub fn exceptions(&mut self, enable: bool) -> &mut Self {
        self.exceptions = enable;
        self
    }

    pub fn bulk_memory(&mut self, enable: bool) -> &mut Self {
        self.bulk_memory = enable;
        self
    }

    pub fn reference_types(&mut self, enable: bool) -> &mut Self {
        self.reference_types = enable;
        self
    }

    pub fn multi_value(&mut self, enable: bool) -> &mut Self {
        self.multi_value = enable;
        self
    }

    pub fn max_call_depth(&mut self, depth: usize) -> &mut Self {
        self.max_call_depth = depth;
        self
    }

    pub fn max_stack_values(&mut self, values: usize) -> &mut Self {
        self.max_stack_values = values;
        self
    }

    /// Trap once this many instructions have been executed across every
    /// store of the engine.
    pub fn cost_limit(&mut self, limit: Option<u64>) -> &mut Self {
        self.cost_limit = limit;
        self
    }

    fn features(&self) -> WasmFeatures {
        let mut features = WasmFeatures::default();
        features.set(WasmFeatures::SIMD, false);
        features.set(WasmFeatures::RELAXED_SIMD, false);
        features.set(WasmFeatures::GC, false);
        features.set(WasmFeatures::TAIL_CALL, false);
        features.set(WasmFeatures::MEMORY64, false);
        features.set(WasmFeatures::FUNCTION_REFERENCES, false);
        features.set(WasmFeatures::EXCEPTIONS, self.exceptions);
        features.set(WasmFeatures::THREADS, self.threads);
        features.set(WasmFeatures::LEGACY_EXCEPTIONS, self.exceptions);
        features.set(WasmFeatures::BULK_MEMORY, self.bulk_memory);
        features.set(WasmFeatures::REFERENCE_TYPES, self.reference_types);
        features.set(WasmFeatures::MULTI_VALUE, self.multi_value);
        features
    }
}

/// Shared engine state. Cloning is cheap; clones share the configuration and
/// the statistics with every store created from them.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

#[derive(Debug)]
struct EngineInner {
    config: Config,
    features: WasmFeatures,
    stats: Arc<Statistics>,
}

impl Engine {
    pub fn new(config: &Config) -> Self {
        let stats = Arc::new(Statistics::new(config.cost_limit));
        Self::with_statistics(config, stats)
    }

    /// Build an engine that reports into an existing statistics sink.
    pub fn with_statistics(config: &Config, stats: Arc<Statistics>) -> Self {
        Engine {
            inner: Arc::new(EngineInner {
                config: config.clone(),
                features: config.features(),
                stats,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Create a new validator with the engine's features.
    pub fn new_validator(&self) -> Validator {
        Validator::new_with_features(self.inner.features)
    }

    pub fn statistics(&self) -> &Arc<Statistics> {
        &self.inner.stats
    }

    pub(crate) fn max_call_depth(&self) -> usize {
        self.inner.config.max_call_depth
    }

    pub(crate) fn max_stack_values(&self) -> usize {
        self.inner.config.max_stack_values
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_statistics() {
        let engine = Engine::default();
        let clone = engine.clone();
        engine.statistics().add_instructions(3).unwrap();
        assert_eq!(clone.statistics().instruction_count(), 3);
    }

    #[test]
    fn features_follow_config() {
        let engine = Engine::new(Config::new().exceptions(false));
        let mut validator = engine.new_validator();
        let bytes = wat::parse_str(
            r#"(module (tag $e) (func try nop catch $e end))"#,
        )
        .unwrap();
        assert!(validator.validate_all(&bytes).is_err());
    }
}
