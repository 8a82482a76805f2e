//! Patch evaluation engine
//!
//! Grades model-generated patches against real repositories. Each work item
//! is evaluated in its own container, its test output is normalised into a
//! canonical status map, and a per-track gate turns that into a score.
//!
//! ## Module Structure
//!
//! - `config/`: Run configuration, limits, proxy and judge settings
//! - `dataset/`: Work items, predictions and dataset filters
//! - `container/`: Container runtime trait, Docker backend, sessions, admission
//! - `runner/`: Stage scripts and the stage runner
//! - `parsers/`: Per-repository log parsers and registries
//! - `gate`: Functional and performance gates
//! - `coverage/`: Patch line coverage
//! - `judge`: LLM-judged code understanding
//! - `track/`: Track policies, the shared pipeline and the evaluator dispatcher
//! - `dispatch`: Single-flight claims and the worker pool
//! - `summary`: Result aggregation and reports

/// Shared utility functions
pub mod util;

/// Error types
pub mod error;

/// Run configuration
pub mod config;

/// Dataset and predictions
pub mod dataset;

/// Log parsers; defines `regex!` for the modules below
#[macro_use]
pub mod parsers;

/// Container management
pub mod container;

/// Stage execution
pub mod runner;

/// Pass/fail gates
pub mod gate;

/// Patch coverage
pub mod coverage;

/// Code-understanding judge
pub mod judge;

/// Evaluation tracks
pub mod track;

/// Work dispatch
pub mod dispatch;

/// Result aggregation
pub mod summary;

pub use config::{RunConfig, RunPaths};
pub use container::{ContainerRuntime, ContainerSession, DockerRuntime};
pub use dataset::{load_work_items, DatasetFilters, WorkItem};
pub use dispatch::{ClaimGuard, ClaimOutcome, DispatchEngine, DispatchSummary, ItemStatus};
pub use error::{EvalError, EvalResult};
pub use gate::{functional_gate, GateResult, PerformanceGate};
pub use judge::{HttpJudge, Judge, UnderstandingScorer};
pub use parsers::{ParserRegistry, StatusMap, TestStatus};
pub use summary::{Aggregator, RunReport};
pub use track::{EvaluatorDispatcher, Track, TrackOutcome, TrackPolicy};
