//! Lead discovery pipeline and domain logic for Leadflow.
//!
//! This crate plans each day's rotation, scores and selects leads, enriches
//! them with contact paths and colleagues, and ties the collaborator crates
//! together into one run (see [`pipeline::Pipeline`]).

pub mod colleague;
pub mod contact;
pub mod pipeline;
pub mod rotation;
pub mod scoring;

#[cfg(test)]
pub(crate) mod testing;

pub use pipeline::{
    Collaborators, Pipeline, PipelineSettings, ProgressReporter, RunOutcome, RunSummary,
    SilentProgress,
};
