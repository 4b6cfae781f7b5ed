//! Random orthogonal rotation applied in front of the refine stage.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;
use vecpipe_common::{Idx, Metric, PipelineError, PipelineResult, RangeSearchResult};

use crate::refine::RefineStage;
use crate::stage::{
    DistanceComputer, IndexStage, SearchParams, check_mergeable, check_query_dim, row_count,
};

/// Seeded orthogonal `dim x dim` matrix, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomRotation {
    dim: usize,
    seed: u64,
    matrix: Vec<f32>,
}

impl RandomRotation {
    pub fn new(dim: usize, seed: u64) -> PipelineResult<Self> {
        if dim == 0 {
            return Err(PipelineError::InvalidArgs(
                "rotation dimension must be positive".to_string(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows: Vec<Vec<f64>> = Vec::with_capacity(dim);
        while rows.len() < dim {
            let mut row: Vec<f64> = (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect();
            for basis in &rows {
                let projection = dot(&row, basis);
                for (x, b) in row.iter_mut().zip(basis) {
                    *x -= projection * b;
                }
            }
            let norm = dot(&row, &row).sqrt();
            // nearly dependent on the rows so far, draw again
            if norm < 1e-6 {
                continue;
            }
            row.iter_mut().for_each(|x| *x /= norm);
            rows.push(row);
        }
        let matrix = rows.into_iter().flatten().map(|x| x as f32).collect();
        debug!(dim, seed, "generated random rotation");
        Ok(Self { dim, seed, matrix })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// `R * x` for every row of `x`.
    pub fn apply(&self, x: &[f32]) -> PipelineResult<Vec<f32>> {
        row_count(x, self.dim)?;
        let mut out = Vec::with_capacity(x.len());
        for vector in x.chunks_exact(self.dim) {
            out.extend(
                self.matrix
                    .chunks_exact(self.dim)
                    .map(|row| row.iter().zip(vector).map(|(r, v)| r * v).sum::<f32>()),
            );
        }
        Ok(out)
    }

    /// `R^T * y` for every row of `y`; undoes [`apply`](Self::apply).
    pub fn reverse(&self, y: &[f32]) -> PipelineResult<Vec<f32>> {
        row_count(y, self.dim)?;
        let mut out = vec![0.0; y.len()];
        for (vector, dst) in y.chunks_exact(self.dim).zip(out.chunks_exact_mut(self.dim)) {
            for (row, &v) in self.matrix.chunks_exact(self.dim).zip(vector) {
                for (d, r) in dst.iter_mut().zip(row) {
                    *d += r * v;
                }
            }
        }
        Ok(out)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Rotates vectors before handing them to the wrapped refine stage.
pub struct PreTransformStage {
    transform: RandomRotation,
    inner: RefineStage,
}

impl PreTransformStage {
    pub fn new(transform: RandomRotation, inner: RefineStage) -> PipelineResult<Self> {
        if transform.dim() != inner.dim() {
            return Err(PipelineError::DimensionMismatch {
                expected: inner.dim(),
                actual: transform.dim(),
            });
        }
        Ok(Self { transform, inner })
    }

    pub fn transform(&self) -> &RandomRotation {
        &self.transform
    }

    pub fn inner(&self) -> &RefineStage {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut RefineStage {
        &mut self.inner
    }

    /// Moves every vector of `other` into `self`, leaving `other` empty.
    /// Both sides must rotate identically.
    pub fn merge_from(&mut self, other: &mut PreTransformStage, add_id: Idx) -> PipelineResult<()> {
        check_mergeable(&*self, &*other)?;
        if self.transform != other.transform {
            return Err(PipelineError::IncompatibleMerge(format!(
                "rotation seeds {} vs {}",
                self.transform.seed(),
                other.transform.seed()
            )));
        }
        self.inner.merge_from(&mut other.inner, add_id)
    }
}

impl IndexStage for PreTransformStage {
    fn dim(&self) -> usize {
        self.inner.dim()
    }

    fn metric(&self) -> Metric {
        self.inner.metric()
    }

    fn ntotal(&self) -> usize {
        self.inner.ntotal()
    }

    fn is_trained(&self) -> bool {
        self.inner.is_trained()
    }

    fn train(&mut self, x: &[f32]) -> PipelineResult<()> {
        let rotated = self.transform.apply(x)?;
        self.inner.train(&rotated)
    }

    fn add(&mut self, x: &[f32]) -> PipelineResult<()> {
        let rotated = self.transform.apply(x)?;
        self.inner.add(&rotated)
    }

    fn search(
        &self,
        queries: &[f32],
        k: usize,
        distances: &mut [f32],
        labels: &mut [Idx],
        params: &SearchParams<'_>,
    ) -> PipelineResult<()> {
        let rotated = self.transform.apply(queries)?;
        self.inner.search(&rotated, k, distances, labels, params)
    }

    fn range_search(
        &self,
        queries: &[f32],
        radius: f32,
        params: &SearchParams<'_>,
    ) -> PipelineResult<RangeSearchResult> {
        let rotated = self.transform.apply(queries)?;
        self.inner.range_search(&rotated, radius, params)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }

    fn reconstruct(&self, id: Idx) -> PipelineResult<Vec<f32>> {
        self.transform.reverse(&self.inner.reconstruct(id)?)
    }

    fn distance_computer(&self) -> Box<dyn DistanceComputer + '_> {
        Box::new(RotatingDistanceComputer {
            transform: &self.transform,
            inner: self.inner.distance_computer(),
        })
    }
}

struct RotatingDistanceComputer<'a> {
    transform: &'a RandomRotation,
    inner: Box<dyn DistanceComputer + 'a>,
}

impl DistanceComputer for RotatingDistanceComputer<'_> {
    fn set_query(&mut self, query: &[f32]) -> PipelineResult<()> {
        check_query_dim(query, self.transform.dim())?;
        let rotated = self.transform.apply(query)?;
        self.inner.set_query(&rotated)
    }

    fn distance(&self, id: Idx) -> PipelineResult<f32> {
        self.inner.distance(id)
    }

    fn symmetric_distance(&self, i: Idx, j: Idx) -> PipelineResult<f32> {
        self.inner.symmetric_distance(i, j)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use vecpipe_common::{DataFormat, RefineType};

    use super::*;
    use crate::flat::FlatIndex;

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n * dim).map(|_| rng.random_range(-10.0..10.0)).collect()
    }

    fn stage(dim: usize, seed: u64) -> PreTransformStage {
        let base = Box::new(FlatIndex::new(dim, Metric::L2).unwrap());
        let refine = RefineStage::new(base, RefineType::Fp32, DataFormat::Fp32, 2.0).unwrap();
        PreTransformStage::new(RandomRotation::new(dim, seed).unwrap(), refine).unwrap()
    }

    #[test]
    fn test_rotation_is_orthogonal() {
        let dim = 16;
        let rotation = RandomRotation::new(dim, 7).unwrap();
        for i in 0..dim {
            for j in 0..dim {
                let a = &rotation.matrix[i * dim..(i + 1) * dim];
                let b = &rotation.matrix[j * dim..(j + 1) * dim];
                let product: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(product, expected, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_rotation_round_trip_and_norm() {
        let dim = 8;
        let rotation = RandomRotation::new(dim, 3).unwrap();
        let x = random_vectors(5, dim, 11);
        let y = rotation.apply(&x).unwrap();
        for (a, b) in x.chunks(dim).zip(y.chunks(dim)) {
            let na: f32 = a.iter().map(|v| v * v).sum();
            let nb: f32 = b.iter().map(|v| v * v).sum();
            assert_abs_diff_eq!(na, nb, epsilon = na * 1e-4);
        }
        for (orig, back) in x.iter().zip(rotation.reverse(&y).unwrap()) {
            assert_abs_diff_eq!(*orig, back, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_rotation_is_seeded() {
        assert_eq!(RandomRotation::new(4, 42).unwrap(), RandomRotation::new(4, 42).unwrap());
        assert_ne!(RandomRotation::new(4, 42).unwrap(), RandomRotation::new(4, 43).unwrap());
        assert!(RandomRotation::new(0, 42).is_err());
        assert!(RandomRotation::new(4, 42).unwrap().apply(&[1.0; 3]).is_err());
    }

    #[test]
    fn test_pre_transform_search_matches_plain() {
        let dim = 8;
        let data = random_vectors(50, dim, 1);
        let queries = random_vectors(3, dim, 2);

        let mut plain = FlatIndex::new(dim, Metric::L2).unwrap();
        plain.add(&data).unwrap();
        let mut rotated = stage(dim, 5);
        rotated.add(&data).unwrap();

        let k = 5;
        let mut expected_distances = vec![0.0; 3 * k];
        let mut expected_labels = vec![0; 3 * k];
        plain
            .search(
                &queries,
                k,
                &mut expected_distances,
                &mut expected_labels,
                &SearchParams::new(),
            )
            .unwrap();
        let mut distances = vec![0.0; 3 * k];
        let mut labels = vec![0; 3 * k];
        rotated
            .search(&queries, k, &mut distances, &mut labels, &SearchParams::new())
            .unwrap();

        assert_eq!(labels, expected_labels);
        for (d, e) in distances.iter().zip(&expected_distances) {
            assert_abs_diff_eq!(*d, *e, epsilon = e * 1e-3 + 1e-3);
        }
    }

    #[test]
    fn test_pre_transform_reconstruct_and_distance() {
        let dim = 4;
        let mut stage = stage(dim, 9);
        stage.add(&[1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        for (got, want) in stage.reconstruct(0).unwrap().iter().zip([1.0, 2.0, 3.0, 4.0]) {
            assert_abs_diff_eq!(*got, want, epsilon = 1e-4);
        }

        let mut computer = stage.distance_computer();
        computer.set_query(&[0.0; 4]).unwrap();
        assert_abs_diff_eq!(computer.distance(0).unwrap(), 30.0, epsilon = 1e-3);
        assert_abs_diff_eq!(computer.symmetric_distance(0, 1).unwrap(), 30.0, epsilon = 1e-3);
    }

    #[test]
    fn test_pre_transform_merge_requires_same_rotation() {
        let dim = 4;
        let mut a = stage(dim, 1);
        let mut b = stage(dim, 1);
        let mut c = stage(dim, 2);
        b.add(&random_vectors(3, dim, 4)).unwrap();
        a.merge_from(&mut b, 0).unwrap();
        assert_eq!(a.ntotal(), 3);
        assert_eq!(b.ntotal(), 0);
        assert!(matches!(
            a.merge_from(&mut c, 0),
            Err(PipelineError::IncompatibleMerge(_))
        ));
    }
}
