/// Routes serde through the `strum` string forms so config keys accept the
/// same case-insensitive names as `FromStr`.
macro_rules! impl_string_serde {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl TryFrom<String> for $ty {
                type Error = strum::ParseError;

                fn try_from(value: String) -> Result<Self, Self::Error> {
                    value.parse()
                }
            }

            impl From<$ty> for String {
                fn from(value: $ty) -> Self {
                    value.to_string()
                }
            }
        )+
    };
}

pub mod config;
pub mod error;
pub mod metric;
pub mod result;
pub mod types;

pub use config::PipelineConfig;
pub use error::{PipelineError, PipelineResult};
pub use metric::Metric;
pub use result::RangeSearchResult;
pub use types::{DataFormat, Idx, PreTransformType, RefineType};
