//! The uniform surface every pipeline stage exposes.

use vecpipe_bitset::BitsetView;
use vecpipe_common::{Idx, Metric, PipelineError, PipelineResult, RangeSearchResult};

/// Per-algorithm tuning carried through a search call.
///
/// A stage inspects the variant it understands and falls back to its own
/// defaults for anything else.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StageParams {
    #[default]
    Default,
    Refine(RefineSearchParams),
    Iterator(IteratorParams),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefineSearchParams {
    /// The base stage is asked for `k * k_factor` candidates, at most as
    /// many as it holds. Must be finite and at least 1.
    pub k_factor: f32,
    /// Params forwarded to the base stage.
    pub base: Box<StageParams>,
}

impl RefineSearchParams {
    pub fn new(k_factor: f32) -> Self {
        Self {
            k_factor,
            base: Box::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IteratorParams {
    /// Hits returned by [`SearchIterator::next_default_batch`].
    pub batch_size: usize,
}

impl IteratorParams {
    pub const DEFAULT_BATCH_SIZE: usize = 32;

    /// Iterator tuning from `params`, or the defaults.
    pub fn from_stage(params: &StageParams) -> Self {
        match params {
            StageParams::Iterator(params) if params.batch_size > 0 => *params,
            _ => Self::default(),
        }
    }
}

impl Default for IteratorParams {
    fn default() -> Self {
        Self {
            batch_size: Self::DEFAULT_BATCH_SIZE,
        }
    }
}

/// Search-time parameters: the exclusion filter plus stage tuning.
#[derive(Debug, Clone, Default)]
pub struct SearchParams<'a> {
    pub filter: BitsetView<'a>,
    pub stage: StageParams,
}

impl<'a> SearchParams<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(filter: BitsetView<'a>) -> Self {
        Self {
            filter,
            stage: StageParams::Default,
        }
    }

    pub fn with_stage(mut self, stage: StageParams) -> Self {
        self.stage = stage;
        self
    }

    /// Same filter, different tuning. Used when a wrapper forwards to its
    /// inner stage.
    pub fn for_stage(&self, stage: StageParams) -> SearchParams<'a> {
        SearchParams {
            filter: self.filter,
            stage,
        }
    }
}

/// Operations shared by base, refine and pre-transform stages.
///
/// Vectors are row-major `f32` buffers whose length is a multiple of `dim()`.
pub trait IndexStage: Send + Sync {
    fn dim(&self) -> usize;

    fn metric(&self) -> Metric;

    /// Number of vectors added so far.
    fn ntotal(&self) -> usize;

    fn is_trained(&self) -> bool {
        true
    }

    fn train(&mut self, x: &[f32]) -> PipelineResult<()>;

    /// Appends vectors; ids are assigned sequentially from `ntotal()`.
    fn add(&mut self, x: &[f32]) -> PipelineResult<()>;

    /// k-NN search. `distances` and `labels` hold `n * k` slots; slots
    /// without a hit get label `-1` and the metric's worst distance.
    fn search(
        &self,
        queries: &[f32],
        k: usize,
        distances: &mut [f32],
        labels: &mut [Idx],
        params: &SearchParams<'_>,
    ) -> PipelineResult<()>;

    fn range_search(
        &self,
        queries: &[f32],
        radius: f32,
        params: &SearchParams<'_>,
    ) -> PipelineResult<RangeSearchResult>;

    /// Drops every vector; the trained state is kept.
    fn reset(&mut self);

    fn reconstruct(&self, id: Idx) -> PipelineResult<Vec<f32>>;

    /// Vectors `start..start + n`, row-major.
    fn reconstruct_n(&self, start: usize, n: usize) -> PipelineResult<Vec<f32>> {
        let mut out = Vec::with_capacity(n * self.dim());
        for id in start..start + n {
            out.extend(self.reconstruct(id as Idx)?);
        }
        Ok(out)
    }

    fn distance_computer(&self) -> Box<dyn DistanceComputer + '_>;
}

/// Computes distances from one query to stored vectors.
pub trait DistanceComputer {
    fn set_query(&mut self, query: &[f32]) -> PipelineResult<()>;

    /// Distance from the current query to vector `id`.
    fn distance(&self, id: Idx) -> PipelineResult<f32>;

    /// Distance between two stored vectors.
    fn symmetric_distance(&self, i: Idx, j: Idx) -> PipelineResult<f32>;
}

/// Incremental search over one query, nearest first.
pub trait SearchIterator: Send {
    /// Up to `max` next hits. An empty batch means the search is exhausted.
    fn next_batch(&mut self, max: usize) -> Vec<(Idx, f32)>;

    fn remaining(&self) -> usize;

    /// Batch size the iterator was created with.
    fn batch_size(&self) -> usize;

    fn next_default_batch(&mut self) -> Vec<(Idx, f32)> {
        let max = self.batch_size();
        self.next_batch(max)
    }
}

pub trait IterableIndex {
    fn iterator_workspace(
        &self,
        query: &[f32],
        params: &SearchParams<'_>,
    ) -> PipelineResult<Box<dyn SearchIterator>>;
}

/// The innermost stage of a pipeline.
pub trait BaseIndex: IndexStage {
    /// Registry name, e.g. `FLAT`.
    fn name(&self) -> &'static str;

    /// Moves every vector of `other` into `self`, leaving `other` empty.
    fn merge_from(&mut self, other: &mut dyn BaseIndex, add_id: Idx) -> PipelineResult<()>;

    /// Iterator-style search capability, if the algorithm has one.
    fn as_iterable(&self) -> Option<&dyn IterableIndex> {
        None
    }
}

/// Number of rows in `x`.
pub(crate) fn row_count(x: &[f32], dim: usize) -> PipelineResult<usize> {
    if dim == 0 || x.len() % dim != 0 {
        return Err(PipelineError::InvalidArgs(format!(
            "buffer of {} floats is not a whole number of {dim}-dimensional vectors",
            x.len()
        )));
    }
    Ok(x.len() / dim)
}

pub(crate) fn check_search_buffers(
    n: usize,
    k: usize,
    distances: &[f32],
    labels: &[Idx],
) -> PipelineResult<()> {
    if distances.len() != n * k || labels.len() != n * k {
        return Err(PipelineError::InvalidArgs(format!(
            "search of {n} queries with k = {k} needs {} output slots, got {} distances and {} labels",
            n * k,
            distances.len(),
            labels.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_query_dim(query: &[f32], dim: usize) -> PipelineResult<()> {
    if query.len() != dim {
        return Err(PipelineError::DimensionMismatch {
            expected: dim,
            actual: query.len(),
        });
    }
    Ok(())
}

/// Dimension and metric must agree before two stages can be merged.
pub(crate) fn check_mergeable(
    this: &(impl IndexStage + ?Sized),
    other: &(impl IndexStage + ?Sized),
) -> PipelineResult<()> {
    if this.dim() != other.dim() {
        return Err(PipelineError::IncompatibleMerge(format!(
            "dimension {} vs {}",
            this.dim(),
            other.dim()
        )));
    }
    if this.metric() != other.metric() {
        return Err(PipelineError::IncompatibleMerge(format!(
            "metric {} vs {}",
            this.metric(),
            other.metric()
        )));
    }
    Ok(())
}
