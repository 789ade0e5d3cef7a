//! Common structs for model artifacts, retraining jobs, datasets and errors shared across crates.

mod dataset;
mod error;
mod job;
mod model;

pub use dataset::*;
pub use error::*;
pub use job::*;
pub use model::*;
