use hashbrown::HashMap;
use tracing::debug;
use vecpipe_common::{Metric, PipelineConfig, PipelineError, PipelineResult};

use crate::flat::FlatIndex;
use crate::stage::BaseIndex;

/// Builds a base stage from a config whose dimension and metric have already
/// been validated.
pub type StageConstructor = fn(&PipelineConfig) -> PipelineResult<Box<dyn BaseIndex>>;

#[derive(Debug, Clone)]
struct RegisteredStage {
    constructor: StageConstructor,
    metrics: Vec<Metric>,
}

/// Base algorithms available to the pipeline builder, keyed by upper-case
/// name.
#[derive(Debug, Clone, Default)]
pub struct StageRegistry {
    stages: HashMap<String, RegisteredStage>,
}

impl StageRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in `FLAT` algorithm.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.stages.insert(
            FlatIndex::NAME.to_string(),
            RegisteredStage {
                constructor: FlatIndex::create,
                metrics: vec![Metric::L2, Metric::InnerProduct, Metric::Cosine],
            },
        );
        registry
    }

    pub fn register(
        &mut self,
        name: &str,
        metrics: &[Metric],
        constructor: StageConstructor,
    ) -> PipelineResult<()> {
        let key = name.to_ascii_uppercase();
        if key.is_empty() {
            return Err(PipelineError::InvalidArgs(
                "index type name must not be empty".to_string(),
            ));
        }
        if self.stages.contains_key(&key) {
            return Err(PipelineError::InvalidArgs(format!(
                "index type {key} is already registered"
            )));
        }
        debug!(index_type = %key, ?metrics, "registered base stage");
        self.stages.insert(
            key,
            RegisteredStage {
                constructor,
                metrics: metrics.to_vec(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(&name.to_ascii_uppercase())
    }

    /// Metrics supported by `name`, if it is registered.
    pub fn metrics(&self, name: &str) -> Option<&[Metric]> {
        self.stages
            .get(&name.to_ascii_uppercase())
            .map(|stage| stage.metrics.as_slice())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Builds the base stage named by `config.index_type`.
    pub fn create(&self, config: &PipelineConfig) -> PipelineResult<Box<dyn BaseIndex>> {
        let key = config.index_type.to_ascii_uppercase();
        let stage = self
            .stages
            .get(&key)
            .ok_or_else(|| PipelineError::UnknownIndexType(config.index_type.clone()))?;
        if !stage.metrics.contains(&config.metric) {
            return Err(PipelineError::UnsupportedMetric {
                index_type: key,
                metric: config.metric,
            });
        }
        (stage.constructor)(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l2_only(config: &PipelineConfig) -> PipelineResult<Box<dyn BaseIndex>> {
        Ok(Box::new(FlatIndex::new(config.dim, Metric::L2)?))
    }

    #[test]
    fn test_defaults_contain_flat() {
        let registry = StageRegistry::with_defaults();
        assert_eq!(registry.names(), vec!["FLAT"]);
        assert!(registry.contains("flat"));
        assert_eq!(registry.metrics("Flat").map(<[Metric]>::len), Some(3));

        let base = registry
            .create(&PipelineConfig::new("flat", 4, Metric::Cosine))
            .unwrap();
        assert_eq!(base.name(), "FLAT");
        assert_eq!(base.metric(), Metric::Cosine);
    }

    #[test]
    fn test_unknown_index_type() {
        let registry = StageRegistry::with_defaults();
        assert!(matches!(
            registry.create(&PipelineConfig::new("HNSW", 4, Metric::L2)),
            Err(PipelineError::UnknownIndexType(name)) if name == "HNSW"
        ));
        assert!(StageRegistry::new().names().is_empty());
    }

    #[test]
    fn test_register_and_metric_check() {
        let mut registry = StageRegistry::with_defaults();
        registry.register("l2flat", &[Metric::L2], l2_only).unwrap();
        assert_eq!(registry.names(), vec!["FLAT", "L2FLAT"]);
        assert!(registry.create(&PipelineConfig::new("L2FLAT", 2, Metric::L2)).is_ok());
        assert!(matches!(
            registry.create(&PipelineConfig::new("L2FLAT", 2, Metric::InnerProduct)),
            Err(PipelineError::UnsupportedMetric { .. })
        ));

        assert!(registry.register("L2Flat", &[Metric::L2], l2_only).is_err());
        assert!(registry.register("", &[Metric::L2], l2_only).is_err());
    }
}
