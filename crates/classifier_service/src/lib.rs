//! Image classifier service
//!
//! Serves predictions from the currently promoted model and retrains new
//! models from a directory of labeled images.

pub mod api;
pub mod commands;
pub mod inference;
pub mod jobs;
pub mod retrain;

#[cfg(test)]
mod testing;
