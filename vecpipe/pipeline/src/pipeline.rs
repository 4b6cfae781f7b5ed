//! The composed stage tree and navigation over it.

use strum::Display;
use tracing::info;
use vecpipe_common::{Idx, Metric, PipelineError, PipelineResult, RangeSearchResult};

use crate::refine::RefineStage;
use crate::stage::{BaseIndex, DistanceComputer, IndexStage, SearchIterator, SearchParams};
use crate::transform::PreTransformStage;

/// Which stages a pipeline is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PipelineShape {
    #[strum(serialize = "base")]
    Base,
    #[strum(serialize = "refine(base)")]
    Refine,
    #[strum(serialize = "pre_transform(refine(base))")]
    PreTransform,
}

/// One of the three supported stage trees. The outermost stage owns the
/// next one down.
pub enum Pipeline {
    Base(Box<dyn BaseIndex>),
    Refine(RefineStage),
    PreTransform(PreTransformStage),
}

macro_rules! forward {
    ($self:expr, $stage:ident => $body:expr) => {
        match $self {
            Pipeline::Base($stage) => $body,
            Pipeline::Refine($stage) => $body,
            Pipeline::PreTransform($stage) => $body,
        }
    };
}

impl Pipeline {
    /// Wraps an already assembled stage tree.
    pub fn from_stage(stage: impl Into<Pipeline>) -> Self {
        stage.into()
    }

    pub fn shape(&self) -> PipelineShape {
        match self {
            Pipeline::Base(_) => PipelineShape::Base,
            Pipeline::Refine(_) => PipelineShape::Refine,
            Pipeline::PreTransform(_) => PipelineShape::PreTransform,
        }
    }

    /// The innermost stage.
    pub fn base(&self) -> &dyn BaseIndex {
        match self {
            Pipeline::Base(base) => base.as_ref(),
            Pipeline::Refine(refine) => refine.base(),
            Pipeline::PreTransform(pre) => pre.inner().base(),
        }
    }

    pub fn base_mut(&mut self) -> &mut dyn BaseIndex {
        match self {
            Pipeline::Base(base) => base.as_mut(),
            Pipeline::Refine(refine) => refine.base_mut(),
            Pipeline::PreTransform(pre) => pre.inner_mut().base_mut(),
        }
    }

    pub fn refine(&self) -> Option<&RefineStage> {
        match self {
            Pipeline::Base(_) => None,
            Pipeline::Refine(refine) => Some(refine),
            Pipeline::PreTransform(pre) => Some(pre.inner()),
        }
    }

    pub fn refine_mut(&mut self) -> Option<&mut RefineStage> {
        match self {
            Pipeline::Base(_) => None,
            Pipeline::Refine(refine) => Some(refine),
            Pipeline::PreTransform(pre) => Some(pre.inner_mut()),
        }
    }

    pub fn pre_transform(&self) -> Option<&PreTransformStage> {
        match self {
            Pipeline::PreTransform(pre) => Some(pre),
            _ => None,
        }
    }

    pub fn pre_transform_mut(&mut self) -> Option<&mut PreTransformStage> {
        match self {
            Pipeline::PreTransform(pre) => Some(pre),
            _ => None,
        }
    }

    /// Incremental search straight against the base stage, or `None` if the
    /// base algorithm cannot iterate. The query is rotated first when the
    /// pipeline has a pre-transform.
    pub fn iterator_workspace(
        &self,
        query: &[f32],
        params: &SearchParams<'_>,
    ) -> PipelineResult<Option<Box<dyn SearchIterator>>> {
        let Some(iterable) = self.base().as_iterable() else {
            return Ok(None);
        };
        let workspace = match self.pre_transform() {
            Some(pre) => iterable.iterator_workspace(&pre.transform().apply(query)?, params)?,
            None => iterable.iterator_workspace(query, params)?,
        };
        Ok(Some(workspace))
    }

    /// Re-encodes refine codes after vectors reached the base stage directly.
    /// A no-op returning 0 for a pipeline without a refine stage.
    pub fn sync_refine(&mut self) -> PipelineResult<usize> {
        match self.refine_mut() {
            Some(refine) => refine.sync_refine(),
            None => Ok(0),
        }
    }

    /// Moves every vector of `other` into `self`, leaving `other` empty.
    /// Both pipelines must have the same shape.
    pub fn merge_from(&mut self, other: &mut Pipeline, add_id: Idx) -> PipelineResult<()> {
        let moved = other.ntotal();
        match (&mut *self, &mut *other) {
            (Pipeline::Base(a), Pipeline::Base(b)) => a.merge_from(b.as_mut(), add_id)?,
            (Pipeline::Refine(a), Pipeline::Refine(b)) => a.merge_from(b, add_id)?,
            (Pipeline::PreTransform(a), Pipeline::PreTransform(b)) => a.merge_from(b, add_id)?,
            (a, b) => {
                return Err(PipelineError::IncompatibleMerge(format!(
                    "pipeline shape {} vs {}",
                    a.shape(),
                    b.shape()
                )));
            }
        }
        info!(moved, ntotal = self.ntotal(), shape = %self.shape(), "merged pipelines");
        Ok(())
    }
}

impl IndexStage for Pipeline {
    fn dim(&self) -> usize {
        forward!(self, stage => stage.dim())
    }

    fn metric(&self) -> Metric {
        forward!(self, stage => stage.metric())
    }

    fn ntotal(&self) -> usize {
        forward!(self, stage => stage.ntotal())
    }

    fn is_trained(&self) -> bool {
        forward!(self, stage => stage.is_trained())
    }

    fn train(&mut self, x: &[f32]) -> PipelineResult<()> {
        forward!(self, stage => stage.train(x))
    }

    fn add(&mut self, x: &[f32]) -> PipelineResult<()> {
        forward!(self, stage => stage.add(x))
    }

    fn search(
        &self,
        queries: &[f32],
        k: usize,
        distances: &mut [f32],
        labels: &mut [Idx],
        params: &SearchParams<'_>,
    ) -> PipelineResult<()> {
        forward!(self, stage => stage.search(queries, k, distances, labels, params))
    }

    fn range_search(
        &self,
        queries: &[f32],
        radius: f32,
        params: &SearchParams<'_>,
    ) -> PipelineResult<RangeSearchResult> {
        forward!(self, stage => stage.range_search(queries, radius, params))
    }

    fn reset(&mut self) {
        forward!(self, stage => stage.reset())
    }

    fn reconstruct(&self, id: Idx) -> PipelineResult<Vec<f32>> {
        forward!(self, stage => stage.reconstruct(id))
    }

    fn reconstruct_n(&self, start: usize, n: usize) -> PipelineResult<Vec<f32>> {
        forward!(self, stage => stage.reconstruct_n(start, n))
    }

    fn distance_computer(&self) -> Box<dyn DistanceComputer + '_> {
        forward!(self, stage => stage.distance_computer())
    }
}

impl From<Box<dyn BaseIndex>> for Pipeline {
    fn from(base: Box<dyn BaseIndex>) -> Self {
        Pipeline::Base(base)
    }
}

impl From<RefineStage> for Pipeline {
    fn from(refine: RefineStage) -> Self {
        Pipeline::Refine(refine)
    }
}

impl From<PreTransformStage> for Pipeline {
    fn from(pre: PreTransformStage) -> Self {
        Pipeline::PreTransform(pre)
    }
}
