use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Similarity metric shared by every stage of a pipeline.
///
/// `L2` reports squared euclidean distances (smaller is closer). `IP` and
/// `COSINE` report similarities (larger is closer).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(try_from = "String", into = "String")]
pub enum Metric {
    #[default]
    L2,
    #[strum(serialize = "IP")]
    InnerProduct,
    Cosine,
}

impl Metric {
    /// Whether larger values mean closer vectors.
    #[inline]
    pub fn is_similarity(self) -> bool {
        !matches!(self, Metric::L2)
    }

    /// Distance reported for unfilled result slots.
    #[inline]
    pub fn worst_distance(self) -> f32 {
        if self.is_similarity() {
            f32::NEG_INFINITY
        } else {
            f32::INFINITY
        }
    }

    /// Maps a distance onto a key where smaller is always better.
    #[inline]
    pub fn ordering_key(self, distance: f32) -> f32 {
        if self.is_similarity() {
            -distance
        } else {
            distance
        }
    }

    #[inline]
    pub fn is_better(self, lhs: f32, rhs: f32) -> bool {
        self.ordering_key(lhs) < self.ordering_key(rhs)
    }

    /// Range search predicate: `d < radius` for L2, `d > radius` for similarities.
    #[inline]
    pub fn within_radius(self, distance: f32, radius: f32) -> bool {
        self.is_better(distance, radius)
    }

    /// Distance between two vectors of equal length.
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Metric::L2 => a
                .iter()
                .zip(b)
                .map(|(x, y)| {
                    let diff = x - y;
                    diff * diff
                })
                .sum(),
            Metric::InnerProduct => dot(a, b),
            Metric::Cosine => {
                let norms = (dot(a, a) * dot(b, b)).sqrt();
                if norms == 0.0 { 0.0 } else { dot(a, b) / norms }
            }
        }
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl_string_serde!(Metric);
