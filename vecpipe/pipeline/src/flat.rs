//! Exact brute-force base stage.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use vecpipe_common::{Idx, Metric, PipelineConfig, PipelineError, PipelineResult, RangeSearchResult};

use crate::stage::{
    BaseIndex, DistanceComputer, IndexStage, IterableIndex, IteratorParams, SearchIterator,
    SearchParams, check_mergeable, check_query_dim, row_count,
};
use crate::topk::{TopK, range_rows, search_rows};

/// Stores every vector in full precision and scans all of them per query.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dim: usize,
    metric: Metric,
    data: Vec<f32>,
}

impl FlatIndex {
    pub const NAME: &'static str = "FLAT";

    pub fn new(dim: usize, metric: Metric) -> PipelineResult<Self> {
        if dim == 0 {
            return Err(PipelineError::InvalidArgs(
                "dimension must be positive".to_string(),
            ));
        }
        Ok(Self {
            dim,
            metric,
            data: Vec::new(),
        })
    }

    /// Registry constructor.
    pub fn create(config: &PipelineConfig) -> PipelineResult<Box<dyn BaseIndex>> {
        Ok(Box::new(Self::new(config.dim, config.metric)?))
    }

    #[inline]
    fn vector(&self, id: usize) -> &[f32] {
        &self.data[id * self.dim..(id + 1) * self.dim]
    }

    fn checked_id(&self, id: Idx) -> PipelineResult<usize> {
        usize::try_from(id)
            .ok()
            .filter(|&id| id < self.ntotal())
            .ok_or(PipelineError::IdOutOfRange {
                id,
                ntotal: self.ntotal(),
            })
    }

    /// Distances to every id the filter lets through, in id order.
    fn scan<'s>(
        &'s self,
        query: &'s [f32],
        params: &'s SearchParams<'_>,
    ) -> impl Iterator<Item = (Idx, f32)> + 's {
        let filter = params.filter;
        (0..self.ntotal())
            .filter(move |&id| !filter.is_excluded(id))
            .map(move |id| (id as Idx, self.metric.distance(query, self.vector(id))))
    }

    fn search_one(&self, query: &[f32], k: usize, params: &SearchParams<'_>) -> Vec<(Idx, f32)> {
        let mut topk = TopK::new(k, self.metric);
        for (id, distance) in self.scan(query, params) {
            topk.push(id, distance);
        }
        topk.into_sorted()
    }
}

impl IndexStage for FlatIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn ntotal(&self) -> usize {
        self.data.len() / self.dim
    }

    fn train(&mut self, x: &[f32]) -> PipelineResult<()> {
        row_count(x, self.dim)?;
        Ok(())
    }

    fn add(&mut self, x: &[f32]) -> PipelineResult<()> {
        row_count(x, self.dim)?;
        self.data.extend_from_slice(x);
        Ok(())
    }

    fn search(
        &self,
        queries: &[f32],
        k: usize,
        distances: &mut [f32],
        labels: &mut [Idx],
        params: &SearchParams<'_>,
    ) -> PipelineResult<()> {
        search_rows(
            queries,
            self.dim,
            k,
            self.metric,
            distances,
            labels,
            |_, query| Ok(self.search_one(query, k, params)),
        )
    }

    fn range_search(
        &self,
        queries: &[f32],
        radius: f32,
        params: &SearchParams<'_>,
    ) -> PipelineResult<RangeSearchResult> {
        range_rows(queries, self.dim, |_, query| {
            Ok(self
                .scan(query, params)
                .filter(|&(_, distance)| self.metric.within_radius(distance, radius))
                .collect())
        })
    }

    fn reset(&mut self) {
        self.data.clear();
    }

    fn reconstruct(&self, id: Idx) -> PipelineResult<Vec<f32>> {
        let id = self.checked_id(id)?;
        Ok(self.vector(id).to_vec())
    }

    fn reconstruct_n(&self, start: usize, n: usize) -> PipelineResult<Vec<f32>> {
        let end = start + n;
        if end > self.ntotal() {
            return Err(PipelineError::IdOutOfRange {
                id: end as Idx - 1,
                ntotal: self.ntotal(),
            });
        }
        Ok(self.data[start * self.dim..end * self.dim].to_vec())
    }

    fn distance_computer(&self) -> Box<dyn DistanceComputer + '_> {
        Box::new(FlatDistanceComputer {
            index: self,
            query: Vec::new(),
        })
    }
}

impl BaseIndex for FlatIndex {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn merge_from(&mut self, other: &mut dyn BaseIndex, add_id: Idx) -> PipelineResult<()> {
        if other.name() != self.name() {
            return Err(PipelineError::IncompatibleMerge(format!(
                "cannot merge {} into {}",
                other.name(),
                self.name()
            )));
        }
        check_mergeable(&*self, &*other)?;
        // ids of a flat index are positions, they cannot be shifted
        if add_id != 0 {
            return Err(PipelineError::NotSupported(
                "flat index cannot offset merged ids".to_string(),
            ));
        }
        let vectors = other.reconstruct_n(0, other.ntotal())?;
        self.data.extend_from_slice(&vectors);
        other.reset();
        Ok(())
    }

    fn as_iterable(&self) -> Option<&dyn IterableIndex> {
        Some(self)
    }
}

impl IterableIndex for FlatIndex {
    fn iterator_workspace(
        &self,
        query: &[f32],
        params: &SearchParams<'_>,
    ) -> PipelineResult<Box<dyn SearchIterator>> {
        check_query_dim(query, self.dim)?;
        let metric = self.metric;
        let pending = self
            .scan(query, params)
            .map(|(id, distance)| Reverse((OrderedFloat(metric.ordering_key(distance)), id)))
            .collect();
        Ok(Box::new(FlatSearchIterator {
            metric,
            pending,
            batch_size: IteratorParams::from_stage(&params.stage).batch_size,
        }))
    }
}

/// All distances are computed up front; batches pop from a min-heap.
struct FlatSearchIterator {
    metric: Metric,
    pending: BinaryHeap<Reverse<(OrderedFloat<f32>, Idx)>>,
    batch_size: usize,
}

impl SearchIterator for FlatSearchIterator {
    fn next_batch(&mut self, max: usize) -> Vec<(Idx, f32)> {
        let mut batch = Vec::with_capacity(max.min(self.pending.len()));
        while batch.len() < max {
            let Some(Reverse((key, id))) = self.pending.pop() else {
                break;
            };
            batch.push((id, self.metric.ordering_key(key.0)));
        }
        batch
    }

    fn remaining(&self) -> usize {
        self.pending.len()
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }
}

struct FlatDistanceComputer<'a> {
    index: &'a FlatIndex,
    query: Vec<f32>,
}

impl DistanceComputer for FlatDistanceComputer<'_> {
    fn set_query(&mut self, query: &[f32]) -> PipelineResult<()> {
        check_query_dim(query, self.index.dim)?;
        self.query.clear();
        self.query.extend_from_slice(query);
        Ok(())
    }

    fn distance(&self, id: Idx) -> PipelineResult<f32> {
        check_query_dim(&self.query, self.index.dim)?;
        let id = self.index.checked_id(id)?;
        Ok(self.index.metric.distance(&self.query, self.index.vector(id)))
    }

    fn symmetric_distance(&self, i: Idx, j: Idx) -> PipelineResult<f32> {
        let i = self.index.checked_id(i)?;
        let j = self.index.checked_id(j)?;
        Ok(self
            .index
            .metric
            .distance(self.index.vector(i), self.index.vector(j)))
    }
}
