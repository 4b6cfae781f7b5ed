use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vecpipe_common::{Idx, PipelineConfig, PipelineResult};
use vecpipe_pipeline::{IndexStage, Pipeline, PipelineBuilder, SearchParams, StageRegistry};

pub const DIM: usize = 16;
pub const NUM_VECTORS: usize = 500;
pub const NUM_QUERIES: usize = 8;

/// Routes library logs to the captured test output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.random_range(-1.0..1.0)).collect()
}

pub fn build(config: &PipelineConfig) -> PipelineResult<Pipeline> {
    init_tracing();
    let registry = StageRegistry::with_defaults();
    PipelineBuilder::new(&registry).build(config)
}

/// Builds `config` and fills it with `NUM_VECTORS` random vectors.
pub fn build_filled(config: &PipelineConfig) -> PipelineResult<Pipeline> {
    let mut pipeline = build(config)?;
    pipeline.add(&random_vectors(NUM_VECTORS, config.dim, 1))?;
    Ok(pipeline)
}

pub fn search(
    pipeline: &impl IndexStage,
    queries: &[f32],
    k: usize,
    params: &SearchParams<'_>,
) -> PipelineResult<(Vec<f32>, Vec<Idx>)> {
    let n = queries.len() / pipeline.dim();
    let mut distances = vec![0.0; n * k];
    let mut labels = vec![0; n * k];
    pipeline.search(queries, k, &mut distances, &mut labels, params)?;
    Ok((distances, labels))
}
