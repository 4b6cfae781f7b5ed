//! Storage formats of the refine stage.

use half::{bf16, f16};
use vecpipe_common::{DataFormat, PipelineError, PipelineResult, RefineType};

/// Re-ranking copy of every added vector.
#[derive(Debug, Clone, PartialEq)]
pub enum RefineCodes {
    Fp32(Vec<f32>),
    Fp16(Vec<f16>),
    Bf16(Vec<bf16>),
}

impl RefineCodes {
    /// Empty storage for `refine_type`, or an error if that representation
    /// cannot re-rank data arriving as `data_format`.
    pub fn new(refine_type: RefineType, data_format: DataFormat) -> PipelineResult<Self> {
        match (refine_type, data_format) {
            (RefineType::Fp32, _) => Ok(RefineCodes::Fp32(Vec::new())),
            (RefineType::Fp16, DataFormat::Fp32 | DataFormat::Fp16) => {
                Ok(RefineCodes::Fp16(Vec::new()))
            }
            (RefineType::Bf16, DataFormat::Fp32 | DataFormat::Bf16) => {
                Ok(RefineCodes::Bf16(Vec::new()))
            }
            (RefineType::Fp16 | RefineType::Bf16, _) => Err(PipelineError::InvalidArgs(format!(
                "refine type {refine_type} would lose precision on {data_format} data"
            ))),
            (RefineType::Sq8 | RefineType::DataView, _) => Err(PipelineError::InvalidArgs(
                format!("refine type {refine_type} is not supported"),
            )),
        }
    }

    pub fn refine_type(&self) -> RefineType {
        match self {
            RefineCodes::Fp32(_) => RefineType::Fp32,
            RefineCodes::Fp16(_) => RefineType::Fp16,
            RefineCodes::Bf16(_) => RefineType::Bf16,
        }
    }

    /// Number of stored scalars.
    pub fn len(&self) -> usize {
        match self {
            RefineCodes::Fp32(codes) => codes.len(),
            RefineCodes::Fp16(codes) => codes.len(),
            RefineCodes::Bf16(codes) => codes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn encode_extend(&mut self, x: &[f32]) {
        match self {
            RefineCodes::Fp32(codes) => codes.extend_from_slice(x),
            RefineCodes::Fp16(codes) => codes.extend(x.iter().map(|&v| f16::from_f32(v))),
            RefineCodes::Bf16(codes) => codes.extend(x.iter().map(|&v| bf16::from_f32(v))),
        }
    }

    /// Decodes scalars `start..start + out.len()` into `out`.
    pub fn decode_into(&self, start: usize, out: &mut [f32]) {
        let end = start + out.len();
        match self {
            RefineCodes::Fp32(codes) => out.copy_from_slice(&codes[start..end]),
            RefineCodes::Fp16(codes) => {
                for (dst, src) in out.iter_mut().zip(&codes[start..end]) {
                    *dst = src.to_f32();
                }
            }
            RefineCodes::Bf16(codes) => {
                for (dst, src) in out.iter_mut().zip(&codes[start..end]) {
                    *dst = src.to_f32();
                }
            }
        }
    }

    pub fn truncate(&mut self, len: usize) {
        match self {
            RefineCodes::Fp32(codes) => codes.truncate(len),
            RefineCodes::Fp16(codes) => codes.truncate(len),
            RefineCodes::Bf16(codes) => codes.truncate(len),
        }
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Moves the codes of `other` to the end of `self`.
    pub fn append(&mut self, other: &mut RefineCodes) -> PipelineResult<()> {
        match (self, other) {
            (RefineCodes::Fp32(a), RefineCodes::Fp32(b)) => a.append(b),
            (RefineCodes::Fp16(a), RefineCodes::Fp16(b)) => a.append(b),
            (RefineCodes::Bf16(a), RefineCodes::Bf16(b)) => a.append(b),
            (a, b) => {
                return Err(PipelineError::IncompatibleMerge(format!(
                    "refine type {} vs {}",
                    a.refine_type(),
                    b.refine_type()
                )));
            }
        }
        Ok(())
    }
}
