mod common;

use std::collections::BTreeSet;

use approx::assert_abs_diff_eq;
use common::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vecpipe_bitset::FilterBitmap;
use vecpipe_common::{
    DataFormat, Idx, Metric, PipelineConfig, PipelineError, PipelineResult, PreTransformType,
    RangeSearchResult, RefineType,
};
use vecpipe_pipeline::{
    BRUTE_FORCE_RATIO, BaseIndex, DistanceComputer, FlatIndex, IndexStage, PipelineBuilder,
    PipelineShape, RefineSearchParams, SearchParams, StageParams, StageRegistry,
};

fn flat_config() -> PipelineConfig {
    PipelineConfig::new("FLAT", DIM, Metric::L2)
}

fn random_exclusions(n: usize, fraction: f64, seed: u64) -> BTreeSet<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).filter(|_| rng.random_bool(fraction)).collect()
}

/// Exact filtered top-k by scanning every vector.
fn naive_search(
    data: &[f32],
    query: &[f32],
    k: usize,
    excluded: &BTreeSet<usize>,
    metric: Metric,
) -> Vec<Idx> {
    let mut scored: Vec<(f32, usize)> = data
        .chunks(query.len())
        .enumerate()
        .filter(|(id, _)| !excluded.contains(id))
        .map(|(id, vector)| (metric.ordering_key(metric.distance(query, vector)), id))
        .collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.into_iter().take(k).map(|(_, id)| id as Idx).collect()
}

#[test]
fn test_refine_composite_end_to_end() -> PipelineResult<()> {
    let pipeline = build_filled(&flat_config().with_refine(RefineType::Fp16))?;
    assert_eq!(pipeline.shape(), PipelineShape::Refine);

    let refine = pipeline.refine().expect("refine stage requested");
    let base = pipeline.base();
    assert!(!std::ptr::addr_eq(
        std::ptr::from_ref(base),
        std::ptr::from_ref(refine)
    ));
    assert_eq!(base.ntotal(), NUM_VECTORS);
    assert_eq!(refine.refine_ntotal(), NUM_VECTORS);

    let k = 10;
    let queries = random_vectors(NUM_QUERIES, DIM, 2);
    let (distances, labels) = search(&pipeline, &queries, k, &SearchParams::new())?;
    for (row, hits) in labels.chunks(k).enumerate() {
        assert_eq!(hits.iter().filter(|&&id| id >= 0).count(), k, "query {row}");
    }
    for row in distances.chunks(k) {
        assert!(row.windows(2).all(|pair| pair[0] <= pair[1]));
    }
    Ok(())
}

#[test]
fn test_unsupported_refine_fails_build() {
    for refine_type in [RefineType::Sq8, RefineType::DataView] {
        let result = build(&flat_config().with_refine(refine_type));
        assert!(matches!(result, Err(PipelineError::InvalidArgs(_))));
    }
    let result = build(
        &flat_config()
            .with_data_format(DataFormat::Bf16)
            .with_refine(RefineType::Fp16),
    );
    assert!(matches!(result, Err(PipelineError::InvalidArgs(_))));
}

#[test]
fn test_navigation_matches_direct_construction() -> PipelineResult<()> {
    let direct = FlatIndex::new(DIM, Metric::L2)?;

    let full = build(
        &flat_config()
            .with_refine(RefineType::Fp32)
            .with_pre_transform(PreTransformType::Rotation),
    )?;
    assert_eq!(full.shape(), PipelineShape::PreTransform);
    assert!(full.refine().is_some());
    assert!(full.pre_transform().is_some());
    assert_eq!(full.base().dim(), direct.dim());
    assert_eq!(full.base().metric(), direct.metric());
    assert_eq!(full.base().name(), direct.name());

    let mut plain = build(&flat_config())?;
    assert_eq!(plain.shape(), PipelineShape::Base);
    assert!(plain.refine().is_none());
    assert!(plain.refine_mut().is_none());
    assert!(plain.pre_transform().is_none());
    assert_eq!(plain.base().name(), FlatIndex::NAME);
    Ok(())
}

#[test]
fn test_build_from_json_config() -> PipelineResult<()> {
    let config = PipelineConfig::from_json(
        r#"{
            "index_type": "flat",
            "dim": 16,
            "metric": "IP",
            "refine_type": "bf16",
            "refine_k": 3.0,
            "pre_transform": "rotation",
            "seed": 11
        }"#,
    )?;
    let pipeline = build_filled(&config)?;
    assert_eq!(pipeline.shape(), PipelineShape::PreTransform);
    assert_eq!(pipeline.metric(), Metric::InnerProduct);
    assert_eq!(pipeline.refine().map(|refine| refine.k_factor()), Some(3.0));
    assert_eq!(pipeline.ntotal(), NUM_VECTORS);

    assert!(matches!(
        PipelineConfig::from_json(r#"{ "index_type": "FLAT", "dim": 4, "metric": "HAMMING" }"#),
        Err(PipelineError::Config(_))
    ));
    Ok(())
}

#[test]
fn test_fp32_refine_matches_exact_search() -> PipelineResult<()> {
    let data = random_vectors(NUM_VECTORS, DIM, 1);
    let queries = random_vectors(NUM_QUERIES, DIM, 3);
    let k = 5;

    for metric in [Metric::L2, Metric::InnerProduct, Metric::Cosine] {
        let config = PipelineConfig::new("FLAT", DIM, metric).with_refine(RefineType::Fp32);
        let pipeline = build_filled(&config)?;
        let (_, labels) = search(&pipeline, &queries, k, &SearchParams::new())?;
        for (query, hits) in queries.chunks(DIM).zip(labels.chunks(k)) {
            assert_eq!(
                hits,
                naive_search(&data, query, k, &BTreeSet::new(), metric),
                "metric {metric}"
            );
        }
    }
    Ok(())
}

#[test]
fn test_filtered_search_light_and_heavy() -> PipelineResult<()> {
    let data = random_vectors(NUM_VECTORS, DIM, 1);
    let queries = random_vectors(NUM_QUERIES, DIM, 4);
    let pipeline = build_filled(&flat_config().with_refine(RefineType::Fp32))?;
    let k = 10;

    for (fraction, seed) in [(0.3, 5), (0.97, 6)] {
        let excluded = random_exclusions(NUM_VECTORS, fraction, seed);
        let bitmap = FilterBitmap::from_excluded(excluded.iter().copied(), NUM_VECTORS);
        let params = SearchParams::with_filter(bitmap.view());
        assert_eq!(
            params.filter.excluded_fraction() >= BRUTE_FORCE_RATIO,
            fraction > 0.9
        );

        let (_, labels) = search(&pipeline, &queries, k, &params)?;
        for (query, hits) in queries.chunks(DIM).zip(labels.chunks(k)) {
            let expected = naive_search(&data, query, k, &excluded, Metric::L2);
            let found: Vec<Idx> = hits.iter().copied().filter(|&id| id >= 0).collect();
            assert_eq!(found, expected, "excluded fraction {fraction}");
            assert!(found.iter().all(|&id| !excluded.contains(&(id as usize))));
        }
    }
    Ok(())
}

#[test]
fn test_search_params_reach_refine_stage() -> PipelineResult<()> {
    let pipeline = build_filled(&flat_config().with_refine(RefineType::Fp16))?;
    let queries = random_vectors(2, DIM, 7);
    let params =
        SearchParams::new().with_stage(StageParams::Refine(RefineSearchParams::new(8.0)));
    let (_, wide) = search(&pipeline, &queries, 4, &params)?;
    let (_, default) = search(&pipeline, &queries, 4, &SearchParams::new())?;
    assert_eq!(wide.len(), default.len());
    assert!(wide.iter().all(|&id| id >= 0));
    Ok(())
}

#[test]
fn test_refine_k_factor_bounds() -> PipelineResult<()> {
    let refined = flat_config().with_refine(RefineType::Fp32);
    for k_factor in [f32::INFINITY, f32::NAN, 0.0] {
        let result = build(&refined.clone().with_refine_k(k_factor));
        assert!(matches!(result, Err(PipelineError::InvalidArgs(_))), "refine_k {k_factor}");
    }

    // a huge factor is capped at the base size instead of sizing the shortlist by it
    let data = random_vectors(NUM_VECTORS, DIM, 1);
    let queries = random_vectors(NUM_QUERIES, DIM, 3);
    let k = 5;
    let huge = build_filled(&refined.clone().with_refine_k(1e12))?;
    let (_, labels) = search(&huge, &queries, k, &SearchParams::new())?;
    for (query, hits) in queries.chunks(DIM).zip(labels.chunks(k)) {
        assert_eq!(hits, naive_search(&data, query, k, &BTreeSet::new(), Metric::L2));
    }

    let pipeline = build_filled(&refined)?;
    let params = SearchParams::new()
        .with_stage(StageParams::Refine(RefineSearchParams::new(f32::INFINITY)));
    assert!(matches!(
        search(&pipeline, &queries, k, &params),
        Err(PipelineError::InvalidArgs(_))
    ));
    let params =
        SearchParams::new().with_stage(StageParams::Refine(RefineSearchParams::new(1e12)));
    let (_, wide) = search(&pipeline, &queries, k, &params)?;
    assert_eq!(wide, labels);
    Ok(())
}

/// Exact scan that offers no iterator-style search.
struct ScanOnly(FlatIndex);

impl ScanOnly {
    const NAME: &'static str = "SCAN_ONLY";

    fn create(config: &PipelineConfig) -> PipelineResult<Box<dyn BaseIndex>> {
        Ok(Box::new(ScanOnly(FlatIndex::new(config.dim, config.metric)?)))
    }
}

impl IndexStage for ScanOnly {
    fn dim(&self) -> usize {
        self.0.dim()
    }

    fn metric(&self) -> Metric {
        self.0.metric()
    }

    fn ntotal(&self) -> usize {
        self.0.ntotal()
    }

    fn train(&mut self, x: &[f32]) -> PipelineResult<()> {
        self.0.train(x)
    }

    fn add(&mut self, x: &[f32]) -> PipelineResult<()> {
        self.0.add(x)
    }

    fn search(
        &self,
        queries: &[f32],
        k: usize,
        distances: &mut [f32],
        labels: &mut [Idx],
        params: &SearchParams<'_>,
    ) -> PipelineResult<()> {
        self.0.search(queries, k, distances, labels, params)
    }

    fn range_search(
        &self,
        queries: &[f32],
        radius: f32,
        params: &SearchParams<'_>,
    ) -> PipelineResult<RangeSearchResult> {
        self.0.range_search(queries, radius, params)
    }

    fn reset(&mut self) {
        self.0.reset();
    }

    fn reconstruct(&self, id: Idx) -> PipelineResult<Vec<f32>> {
        self.0.reconstruct(id)
    }

    fn distance_computer(&self) -> Box<dyn DistanceComputer + '_> {
        self.0.distance_computer()
    }
}

impl BaseIndex for ScanOnly {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn merge_from(&mut self, _other: &mut dyn BaseIndex, _add_id: Idx) -> PipelineResult<()> {
        Err(PipelineError::NotSupported("scan-only merge".to_string()))
    }
}

#[test]
fn test_iterator_workspace_absent_without_capability() -> PipelineResult<()> {
    init_tracing();
    let mut registry = StageRegistry::with_defaults();
    registry.register(ScanOnly::NAME, &[Metric::L2], ScanOnly::create)?;
    let builder = PipelineBuilder::new(&registry);

    let base = PipelineConfig::new(ScanOnly::NAME, DIM, Metric::L2);
    let configs = [
        base.clone(),
        base.clone().with_refine(RefineType::Fp16),
        base.with_refine(RefineType::Fp32)
            .with_pre_transform(PreTransformType::Rotation),
    ];
    let query = random_vectors(1, DIM, 5);
    for config in &configs {
        let mut pipeline = builder.build(config)?;
        pipeline.add(&random_vectors(20, DIM, 4))?;
        assert_eq!(pipeline.base().name(), ScanOnly::NAME);
        assert!(
            pipeline.iterator_workspace(&query, &SearchParams::new())?.is_none(),
            "shape {}",
            pipeline.shape()
        );
        let (_, labels) = search(&pipeline, &query, 3, &SearchParams::new())?;
        assert!(labels.iter().all(|&id| id >= 0));
    }
    Ok(())
}

#[test]
fn test_merge_pipelines() -> PipelineResult<()> {
    let config = flat_config().with_refine(RefineType::Fp16);
    let mut a = build_filled(&config)?;
    let mut b = build(&config)?;
    b.add(&random_vectors(20, DIM, 9))?;

    a.merge_from(&mut b, 0)?;
    assert_eq!(a.ntotal(), NUM_VECTORS + 20);
    assert_eq!(a.refine().map(|refine| refine.refine_ntotal()), Some(NUM_VECTORS + 20));
    assert_eq!(b.ntotal(), 0);

    let mut plain = build(&flat_config())?;
    assert!(matches!(
        a.merge_from(&mut plain, 0),
        Err(PipelineError::IncompatibleMerge(_))
    ));
    Ok(())
}

#[test]
fn test_base_merge_with_lazy_refine_sync() -> PipelineResult<()> {
    let mut pipeline = build_filled(&flat_config().with_refine(RefineType::Bf16))?;
    let mut incoming = build(&flat_config())?;
    let extra = random_vectors(30, DIM, 10);
    incoming.add(&extra)?;

    pipeline.base_mut().merge_from(incoming.base_mut(), 0)?;
    assert_eq!(pipeline.base().ntotal(), NUM_VECTORS + 30);
    assert_eq!(incoming.ntotal(), 0);

    let queries = random_vectors(1, DIM, 11);
    assert!(matches!(
        search(&pipeline, &queries, 3, &SearchParams::new()),
        Err(PipelineError::RefineOutOfSync { .. })
    ));

    assert_eq!(pipeline.sync_refine()?, 30);
    let (_, labels) = search(&pipeline, &extra[..DIM], 1, &SearchParams::new())?;
    assert_eq!(labels, vec![NUM_VECTORS as Idx]);
    Ok(())
}

#[test]
fn test_iterator_workspace_over_pre_transform() -> PipelineResult<()> {
    let pipeline = build_filled(
        &flat_config()
            .with_refine(RefineType::Fp32)
            .with_pre_transform(PreTransformType::Rotation),
    )?;
    let excluded = random_exclusions(NUM_VECTORS, 0.5, 12);
    let bitmap = FilterBitmap::from_excluded(excluded.iter().copied(), NUM_VECTORS);
    let query = random_vectors(1, DIM, 13);

    let mut workspace = pipeline
        .iterator_workspace(&query, &SearchParams::with_filter(bitmap.view()))?
        .expect("flat base iterates");
    assert_eq!(workspace.remaining(), NUM_VECTORS - excluded.len());

    let mut seen = Vec::new();
    loop {
        let batch = workspace.next_batch(64);
        if batch.is_empty() {
            break;
        }
        seen.extend(batch);
    }
    assert_eq!(seen.len(), NUM_VECTORS - excluded.len());
    assert!(seen.windows(2).all(|pair| pair[0].1 <= pair[1].1));
    assert!(seen.iter().all(|(id, _)| !excluded.contains(&(*id as usize))));

    let (_, labels) = search(&pipeline, &query, 1, &SearchParams::with_filter(bitmap.view()))?;
    assert_eq!(labels[0], seen[0].0);
    Ok(())
}

#[test]
fn test_pre_transform_reconstruct_and_distances() -> PipelineResult<()> {
    let data = random_vectors(NUM_VECTORS, DIM, 1);
    let pipeline = build_filled(
        &flat_config()
            .with_refine(RefineType::Fp32)
            .with_pre_transform(PreTransformType::Rotation),
    )?;

    for id in [0, 17, NUM_VECTORS - 1] {
        let vector = pipeline.reconstruct(id as Idx)?;
        for (got, want) in vector.iter().zip(&data[id * DIM..(id + 1) * DIM]) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-4);
        }
    }

    let query = random_vectors(1, DIM, 14);
    let (distances, labels) = search(&pipeline, &query, 3, &SearchParams::new())?;
    let mut computer = pipeline.distance_computer();
    computer.set_query(&query)?;
    for (id, distance) in labels.iter().zip(&distances) {
        assert_abs_diff_eq!(computer.distance(*id)?, *distance, epsilon = 1e-4);
    }
    Ok(())
}

#[test]
fn test_range_search_through_pipeline() -> PipelineResult<()> {
    let pipeline = build_filled(&flat_config().with_refine(RefineType::Fp32))?;
    let queries = random_vectors(3, DIM, 15);
    let (distances, _) = search(&pipeline, &queries, 5, &SearchParams::new())?;

    // a radius just past each query's 5th hit returns at least those hits
    let radius = distances.chunks(5).map(|row| row[4]).fold(0.0, f32::max) + 1e-3;
    let result = pipeline.range_search(&queries, radius, &SearchParams::new())?;
    assert_eq!(result.nq(), 3);
    assert_eq!(result.lims().len(), 4);
    for row in 0..3 {
        let (labels, hit_distances) = result.query(row).expect("row in range");
        assert!(labels.len() >= 5);
        assert!(hit_distances.iter().all(|&d| d < radius));
    }
    Ok(())
}
