use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;
use rayon::prelude::*;
use vecpipe_common::{Idx, Metric, PipelineResult, RangeSearchResult};

use crate::stage::{check_search_buffers, row_count};

/// Bounded heap keeping the best `k` hits for one query.
pub(crate) struct TopK {
    k: usize,
    metric: Metric,
    // max-heap on the ordering key: the worst kept hit is on top
    heap: BinaryHeap<(OrderedFloat<f32>, Idx)>,
}

impl TopK {
    pub(crate) fn new(k: usize, metric: Metric) -> Self {
        Self {
            k,
            metric,
            heap: BinaryHeap::with_capacity(k),
        }
    }

    #[inline]
    pub(crate) fn push(&mut self, id: Idx, distance: f32) {
        if self.k == 0 {
            return;
        }
        let key = OrderedFloat(self.metric.ordering_key(distance));
        if self.heap.len() < self.k {
            self.heap.push((key, id));
        } else if let Some(&worst) = self.heap.peek() {
            if (key, id) < worst {
                self.heap.pop();
                self.heap.push((key, id));
            }
        }
    }

    /// Hits ordered best first.
    pub(crate) fn into_sorted(self) -> Vec<(Idx, f32)> {
        let metric = self.metric;
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|(key, id)| (id, metric.ordering_key(key.0)))
            .collect()
    }
}

/// Fills one query's output slots, padding with `-1` and the worst distance.
pub(crate) fn write_hits(
    hits: &[(Idx, f32)],
    metric: Metric,
    distances: &mut [f32],
    labels: &mut [Idx],
) {
    for (slot, (distance, label)) in distances.iter_mut().zip(labels.iter_mut()).enumerate() {
        match hits.get(slot) {
            Some(&(id, d)) => {
                *label = id;
                *distance = d;
            }
            None => {
                *label = -1;
                *distance = metric.worst_distance();
            }
        }
    }
}

/// Runs `search_one(row, query)` for every query row in parallel and writes
/// the hits.
pub(crate) fn search_rows<F>(
    queries: &[f32],
    dim: usize,
    k: usize,
    metric: Metric,
    distances: &mut [f32],
    labels: &mut [Idx],
    search_one: F,
) -> PipelineResult<()>
where
    F: Fn(usize, &[f32]) -> PipelineResult<Vec<(Idx, f32)>> + Sync,
{
    let n = row_count(queries, dim)?;
    check_search_buffers(n, k, distances, labels)?;
    if n == 0 || k == 0 {
        return Ok(());
    }

    queries
        .par_chunks(dim)
        .zip(distances.par_chunks_mut(k))
        .zip(labels.par_chunks_mut(k))
        .enumerate()
        .try_for_each(|(row, ((query, distances), labels))| {
            let hits = search_one(row, query)?;
            write_hits(&hits, metric, distances, labels);
            Ok(())
        })
}

/// Runs `range_one(row, query)` for every query row in parallel.
pub(crate) fn range_rows<F>(
    queries: &[f32],
    dim: usize,
    range_one: F,
) -> PipelineResult<RangeSearchResult>
where
    F: Fn(usize, &[f32]) -> PipelineResult<Vec<(Idx, f32)>> + Sync + Send,
{
    row_count(queries, dim)?;
    let per_query = queries
        .par_chunks(dim)
        .enumerate()
        .map(|(row, query)| range_one(row, query))
        .collect::<PipelineResult<Vec<_>>>()?;
    Ok(per_query.into_iter().collect())
}
