//! Composable vector index pipelines: a base index, optionally wrapped by a
//! refine stage that re-ranks with higher-precision codes, optionally wrapped
//! by a random rotation.
//!
//! ```no_run
//! use vecpipe_common::{Metric, PipelineConfig, RefineType};
//! use vecpipe_pipeline::{IndexStage, PipelineBuilder, SearchParams, StageRegistry};
//!
//! let registry = StageRegistry::with_defaults();
//! let config = PipelineConfig::new("FLAT", 2, Metric::L2).with_refine(RefineType::Fp16);
//! let mut pipeline = PipelineBuilder::new(&registry).build(&config)?;
//! pipeline.add(&[0.0, 0.0, 1.0, 1.0])?;
//!
//! let mut distances = [0.0; 1];
//! let mut labels = [0; 1];
//! pipeline.search(&[0.9, 0.9], 1, &mut distances, &mut labels, &SearchParams::new())?;
//! assert_eq!(labels, [1]);
//! # Ok::<(), vecpipe_common::PipelineError>(())
//! ```

pub mod builder;
pub mod codec;
pub mod flat;
pub mod pipeline;
pub mod refine;
pub mod registry;
pub mod stage;
mod topk;
pub mod transform;

pub use builder::PipelineBuilder;
pub use codec::RefineCodes;
pub use flat::FlatIndex;
pub use pipeline::{Pipeline, PipelineShape};
pub use refine::{BRUTE_FORCE_RATIO, RefineStage};
pub use registry::{StageConstructor, StageRegistry};
pub use stage::{
    BaseIndex, DistanceComputer, IndexStage, IterableIndex, IteratorParams, RefineSearchParams,
    SearchIterator, SearchParams, StageParams,
};
pub use transform::{PreTransformStage, RandomRotation};
