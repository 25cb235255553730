// Library root: exposes the pipeline for hosts and integration tests.
// The console binary entry point is src/main.rs.

pub mod config;
pub mod console;
pub mod error;
pub mod logger;
pub mod pipeline;
pub mod ragflow;

pub use pipeline::{BlockingFragments, Fragments, Pipeline, RagFlowPipeline};
