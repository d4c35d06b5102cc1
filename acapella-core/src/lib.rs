pub mod batch;
pub mod checkpoint;
pub mod chopper;
pub mod config;
pub mod conversion;
pub mod data;
mod error;
pub mod model;
pub mod normalizer;
pub mod reconstruct;
pub mod trainer;

pub use config::Config;
pub use error::{Error, Result};
