use tracing::debug;
use vecpipe_common::{PipelineConfig, PipelineError, PipelineResult, PreTransformType};

use crate::pipeline::Pipeline;
use crate::refine::RefineStage;
use crate::registry::StageRegistry;
use crate::transform::{PreTransformStage, RandomRotation};

/// Assembles pipelines from configs, resolving base algorithms through a
/// [`StageRegistry`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineBuilder<'r> {
    registry: &'r StageRegistry,
}

impl<'r> PipelineBuilder<'r> {
    pub fn new(registry: &'r StageRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r StageRegistry {
        self.registry
    }

    pub fn build(&self, config: &PipelineConfig) -> PipelineResult<Pipeline> {
        if config.dim == 0 {
            return Err(PipelineError::InvalidArgs(
                "dimension must be positive".to_string(),
            ));
        }
        let base = self.registry.create(config)?;

        let pipeline = match (config.refine_type, config.pre_transform) {
            (None, None) => Pipeline::Base(base),
            (None, Some(pre_transform)) => {
                return Err(PipelineError::InvalidArgs(format!(
                    "pre-transform {pre_transform} requires a refine stage"
                )));
            }
            (Some(refine_type), pre_transform) => {
                let refine =
                    RefineStage::new(base, refine_type, config.data_format, config.refine_k)?;
                match pre_transform {
                    None => Pipeline::Refine(refine),
                    Some(PreTransformType::Rotation) => {
                        let rotation = RandomRotation::new(config.dim, config.seed)?;
                        Pipeline::PreTransform(PreTransformStage::new(rotation, refine)?)
                    }
                }
            }
        };
        debug!(
            index_type = %config.index_type,
            dim = config.dim,
            metric = %config.metric,
            shape = %pipeline.shape(),
            "built pipeline"
        );
        Ok(pipeline)
    }
}
