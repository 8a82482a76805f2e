//! Benchmark dataset and prediction loading

pub mod loader;
pub mod types;

pub use loader::{load_work_items, DatasetFilter, DatasetFilters, LoadReport};
pub use types::{Dimension, Prediction, WorkItem};
