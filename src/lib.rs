pub mod config;
pub mod convert;
pub mod kernels;
pub mod model;
pub mod persist;
pub mod reference;
pub mod verify;

pub use config::{ConvertConfig, OutputFormat};
pub use convert::{ConversionReport, ConvertError, ConvertedModel, convert, load, run};
pub use model::TfliteModel;
