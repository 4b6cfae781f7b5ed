use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;
use crate::metric::Metric;
use crate::types::{DataFormat, PreTransformType, RefineType};

pub const DEFAULT_REFINE_K: f32 = 2.0;
pub const DEFAULT_SEED: u64 = 42;

/// Build-time description of a pipeline.
///
/// ```json
/// { "index_type": "FLAT", "dim": 128, "metric": "L2", "refine_type": "fp16" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the base algorithm as registered in the stage registry.
    pub index_type: String,
    pub dim: usize,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default)]
    pub data_format: DataFormat,
    #[serde(default)]
    pub refine_type: Option<RefineType>,
    /// Over-fetch factor of the refine stage: the base stage returns
    /// `k * refine_k` candidates for re-ranking.
    #[serde(default = "default_refine_k")]
    pub refine_k: f32,
    #[serde(default)]
    pub pre_transform: Option<PreTransformType>,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_refine_k() -> f32 {
    DEFAULT_REFINE_K
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

impl PipelineConfig {
    pub fn new(index_type: impl Into<String>, dim: usize, metric: Metric) -> Self {
        Self {
            index_type: index_type.into(),
            dim,
            metric,
            data_format: DataFormat::default(),
            refine_type: None,
            refine_k: DEFAULT_REFINE_K,
            pre_transform: None,
            seed: DEFAULT_SEED,
        }
    }

    pub fn from_json(json: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_data_format(mut self, data_format: DataFormat) -> Self {
        self.data_format = data_format;
        self
    }

    pub fn with_refine(mut self, refine_type: RefineType) -> Self {
        self.refine_type = Some(refine_type);
        self
    }

    pub fn with_refine_k(mut self, refine_k: f32) -> Self {
        self.refine_k = refine_k;
        self
    }

    pub fn with_pre_transform(mut self, pre_transform: PreTransformType) -> Self {
        self.pre_transform = Some(pre_transform);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}
