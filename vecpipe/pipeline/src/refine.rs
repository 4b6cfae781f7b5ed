//! Re-ranking stage wrapped around a base index.

use std::cell::RefCell;

use tracing::{debug, info};
use vecpipe_bitset::BitsetView;
use vecpipe_common::{
    DataFormat, Idx, Metric, PipelineError, PipelineResult, RangeSearchResult, RefineType,
};

use crate::codec::RefineCodes;
use crate::stage::{
    BaseIndex, DistanceComputer, IndexStage, SearchParams, StageParams, check_mergeable,
    check_query_dim, check_search_buffers, row_count,
};
use crate::topk::{TopK, range_rows, search_rows};

/// When at least this fraction of ids is filtered out, the refine stage scans
/// the remaining ids over its own codes instead of asking the base stage.
pub const BRUTE_FORCE_RATIO: f32 = 0.9;

/// Keeps a higher-fidelity copy of every vector and re-scores the base
/// stage's shortlist with it.
pub struct RefineStage {
    base: Box<dyn BaseIndex>,
    codes: RefineCodes,
    k_factor: f32,
}

impl RefineStage {
    pub fn new(
        base: Box<dyn BaseIndex>,
        refine_type: RefineType,
        data_format: DataFormat,
        k_factor: f32,
    ) -> PipelineResult<Self> {
        check_k_factor(k_factor)?;
        let codes = RefineCodes::new(refine_type, data_format)?;
        let mut stage = Self {
            base,
            codes,
            k_factor,
        };
        stage.sync_refine()?;
        Ok(stage)
    }

    pub fn base(&self) -> &dyn BaseIndex {
        self.base.as_ref()
    }

    /// Direct access to the base stage. Vectors added or merged through it
    /// leave the refine codes behind until [`sync_refine`](Self::sync_refine).
    pub fn base_mut(&mut self) -> &mut dyn BaseIndex {
        self.base.as_mut()
    }

    pub fn refine_type(&self) -> RefineType {
        self.codes.refine_type()
    }

    pub fn k_factor(&self) -> f32 {
        self.k_factor
    }

    /// Number of vectors held by the refine codes.
    pub fn refine_ntotal(&self) -> usize {
        self.codes.len() / self.dim()
    }

    pub fn is_synced(&self) -> bool {
        self.refine_ntotal() == self.base.ntotal()
    }

    /// Brings the refine codes in line with the base stage: drops codes the
    /// base no longer has, and encodes vectors it gained from its own
    /// reconstruction. Returns the number of vectors encoded.
    pub fn sync_refine(&mut self) -> PipelineResult<usize> {
        let dim = self.dim();
        let refined = self.refine_ntotal();
        let total = self.base.ntotal();
        if refined > total {
            self.codes.truncate(total * dim);
            info!(dropped = refined - total, "dropped stale refine codes");
            return Ok(0);
        }
        let missing = total - refined;
        if missing > 0 {
            let vectors = self.base.reconstruct_n(refined, missing)?;
            self.codes.encode_extend(&vectors);
            info!(encoded = missing, "encoded refine codes from base stage");
        }
        Ok(missing)
    }

    fn ensure_synced(&self) -> PipelineResult<()> {
        if !self.is_synced() {
            return Err(PipelineError::RefineOutOfSync {
                base: self.base.ntotal(),
                refine: self.refine_ntotal(),
            });
        }
        Ok(())
    }

    #[inline]
    fn refine_distance(&self, query: &[f32], id: usize, scratch: &mut [f32]) -> f32 {
        self.codes.decode_into(id * self.dim(), scratch);
        self.metric().distance(query, scratch)
    }

    fn rerank(&self, query: &[f32], candidates: &[Idx], k: usize) -> Vec<(Idx, f32)> {
        let mut scratch = vec![0.0; self.dim()];
        let mut topk = TopK::new(k, self.metric());
        for &id in candidates.iter().filter(|&&id| id >= 0) {
            topk.push(id, self.refine_distance(query, id as usize, &mut scratch));
        }
        topk.into_sorted()
    }

    fn brute_force(&self, query: &[f32], k: usize, filter: BitsetView<'_>) -> Vec<(Idx, f32)> {
        let ntotal = self.ntotal();
        let covered = filter.bit_count().min(ntotal);
        let ids = filter
            .iter_included()
            .take_while(|&id| id < ntotal)
            .chain(covered..ntotal);

        let mut scratch = vec![0.0; self.dim()];
        let mut topk = TopK::new(k, self.metric());
        for id in ids {
            topk.push(id as Idx, self.refine_distance(query, id, &mut scratch));
        }
        topk.into_sorted()
    }

    /// Over-fetch factor and base params for one call; unrecognised params
    /// go to the base stage untouched.
    fn split_params(&self, params: &SearchParams<'_>) -> PipelineResult<(f32, StageParams)> {
        match &params.stage {
            StageParams::Refine(refine) => {
                check_k_factor(refine.k_factor)?;
                Ok((refine.k_factor, (*refine.base).clone()))
            }
            other => Ok((self.k_factor, other.clone())),
        }
    }

    /// Candidates asked from the base stage: `ceil(k * k_factor)` clamped to
    /// `k..=max(k, base ntotal)`.
    fn base_candidates(&self, k: usize, k_factor: f32) -> usize {
        let cap = self.base.ntotal().max(k);
        let wanted = (k as f64 * f64::from(k_factor)).ceil();
        if wanted >= cap as f64 {
            cap
        } else {
            (wanted as usize).max(k)
        }
    }

    fn code_index(&self, id: Idx) -> PipelineResult<usize> {
        let refined = self.refine_ntotal();
        usize::try_from(id)
            .ok()
            .filter(|&index| index < refined)
            .ok_or(PipelineError::IdOutOfRange {
                id,
                ntotal: refined,
            })
    }

    /// Moves every vector of `other` into `self`, leaving `other` empty.
    pub fn merge_from(&mut self, other: &mut RefineStage, add_id: Idx) -> PipelineResult<()> {
        check_mergeable(&*self, &*other)?;
        if self.refine_type() != other.refine_type() {
            return Err(PipelineError::IncompatibleMerge(format!(
                "refine type {} vs {}",
                self.refine_type(),
                other.refine_type()
            )));
        }
        self.ensure_synced()?;
        other.ensure_synced()?;

        self.base.merge_from(other.base.as_mut(), add_id)?;
        self.codes.append(&mut other.codes)
    }
}

impl IndexStage for RefineStage {
    fn dim(&self) -> usize {
        self.base.dim()
    }

    fn metric(&self) -> Metric {
        self.base.metric()
    }

    fn ntotal(&self) -> usize {
        self.base.ntotal()
    }

    fn is_trained(&self) -> bool {
        self.base.is_trained()
    }

    fn train(&mut self, x: &[f32]) -> PipelineResult<()> {
        self.base.train(x)
    }

    fn add(&mut self, x: &[f32]) -> PipelineResult<()> {
        row_count(x, self.dim())?;
        self.ensure_synced()?;
        self.base.add(x)?;
        self.codes.encode_extend(x);
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
        self.ensure_synced()?;
        let dim = self.dim();
        let metric = self.metric();
        let n = row_count(queries, dim)?;
        check_search_buffers(n, k, distances, labels)?;
        if n == 0 || k == 0 {
            return Ok(());
        }

        let filter = params.filter;
        if filter.excluded_fraction() >= BRUTE_FORCE_RATIO {
            debug!(
                excluded_fraction = filter.excluded_fraction(),
                "refine stage scanning included ids directly"
            );
            return search_rows(queries, dim, k, metric, distances, labels, |_, query| {
                Ok(self.brute_force(query, k, filter))
            });
        }

        let (k_factor, base_params) = self.split_params(params)?;
        let k_base = self.base_candidates(k, k_factor);
        let slots = n.checked_mul(k_base).ok_or_else(|| {
            PipelineError::InvalidArgs(format!(
                "{n} queries with {k_base} base candidates each overflow the result buffer"
            ))
        })?;
        let mut base_distances = vec![0.0; slots];
        let mut base_labels = vec![-1; slots];
        self.base.search(
            queries,
            k_base,
            &mut base_distances,
            &mut base_labels,
            &params.for_stage(base_params),
        )?;

        search_rows(queries, dim, k, metric, distances, labels, |row, query| {
            let candidates = &base_labels[row * k_base..(row + 1) * k_base];
            Ok(self.rerank(query, candidates, k))
        })
    }

    fn range_search(
        &self,
        queries: &[f32],
        radius: f32,
        params: &SearchParams<'_>,
    ) -> PipelineResult<RangeSearchResult> {
        self.ensure_synced()?;
        let (_, base_params) = self.split_params(params)?;
        let shortlist = self
            .base
            .range_search(queries, radius, &params.for_stage(base_params))?;

        let metric = self.metric();
        range_rows(queries, self.dim(), |row, query| {
            let mut scratch = vec![0.0; self.dim()];
            let hits = shortlist
                .query(row)
                .map(|(labels, _)| labels)
                .unwrap_or_default();
            Ok(hits
                .iter()
                .filter(|&&id| id >= 0)
                .map(|&id| (id, self.refine_distance(query, id as usize, &mut scratch)))
                .filter(|&(_, distance)| metric.within_radius(distance, radius))
                .collect())
        })
    }

    fn reset(&mut self) {
        self.base.reset();
        self.codes.clear();
    }

    fn reconstruct(&self, id: Idx) -> PipelineResult<Vec<f32>> {
        let index = self.code_index(id)?;
        let mut out = vec![0.0; self.dim()];
        self.codes.decode_into(index * self.dim(), &mut out);
        Ok(out)
    }

    fn distance_computer(&self) -> Box<dyn DistanceComputer + '_> {
        Box::new(RefineDistanceComputer {
            stage: self,
            query: Vec::new(),
            scratch: RefCell::new(vec![0.0; 2 * self.dim()]),
        })
    }
}

/// Rejects over-fetch factors below 1, NaN and infinity.
fn check_k_factor(k_factor: f32) -> PipelineResult<()> {
    if !k_factor.is_finite() || k_factor < 1.0 {
        return Err(PipelineError::InvalidArgs(format!(
            "refine k factor must be finite and at least 1, got {k_factor}"
        )));
    }
    Ok(())
}

/// Distances over the refine codes rather than the base representation.
struct RefineDistanceComputer<'a> {
    stage: &'a RefineStage,
    query: Vec<f32>,
    // two decoded vectors, reused across calls
    scratch: RefCell<Vec<f32>>,
}

impl DistanceComputer for RefineDistanceComputer<'_> {
    fn set_query(&mut self, query: &[f32]) -> PipelineResult<()> {
        check_query_dim(query, self.stage.dim())?;
        self.query.clear();
        self.query.extend_from_slice(query);
        Ok(())
    }

    fn distance(&self, id: Idx) -> PipelineResult<f32> {
        let dim = self.stage.dim();
        check_query_dim(&self.query, dim)?;
        let index = self.stage.code_index(id)?;
        let mut scratch = self.scratch.borrow_mut();
        Ok(self.stage.refine_distance(&self.query, index, &mut scratch[..dim]))
    }

    fn symmetric_distance(&self, i: Idx, j: Idx) -> PipelineResult<f32> {
        let dim = self.stage.dim();
        let (i, j) = (self.stage.code_index(i)?, self.stage.code_index(j)?);
        let mut scratch = self.scratch.borrow_mut();
        let (a, b) = scratch.split_at_mut(dim);
        self.stage.codes.decode_into(i * dim, a);
        self.stage.codes.decode_into(j * dim, b);
        Ok(self.stage.metric().distance(a, b))
    }
}
