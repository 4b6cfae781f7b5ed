use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Candidate id. Unfilled result slots carry `-1`.
pub type Idx = i64;

/// Element type of the raw vectors handed to the pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(try_from = "String", into = "String")]
pub enum DataFormat {
    #[default]
    Fp32,
    Fp16,
    Bf16,
}

/// Representation kept by a refine stage for re-ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(try_from = "String", into = "String")]
pub enum RefineType {
    /// Re-rank against the caller's raw data without a copy.
    DataView,
    Sq8,
    Fp16,
    Bf16,
    Fp32,
}

impl RefineType {
    /// Bytes stored per dimension, or `None` for representations without a
    /// stored copy.
    pub fn code_size(self) -> Option<usize> {
        match self {
            RefineType::DataView => None,
            RefineType::Sq8 => Some(1),
            RefineType::Fp16 | RefineType::Bf16 => Some(2),
            RefineType::Fp32 => Some(4),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[serde(try_from = "String", into = "String")]
pub enum PreTransformType {
    /// Seeded random orthogonal rotation.
    Rotation,
}

impl_string_serde!(DataFormat, RefineType, PreTransformType);
