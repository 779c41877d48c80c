//! HealPlus Pipeline - assessment orchestration.
//!
//! [`AssessmentOrchestrator`] runs a wound capture through assessment
//! creation, vision analysis, risk computation and an optional FHIR push.
//! The crate also carries the `healplus` command-line driver and its
//! tracing setup.

pub mod cli;
pub mod error;
pub mod orchestrator;
pub mod telemetry;

pub use cli::{parse_args, Command};
pub use error::CliError;
pub use orchestrator::{AssessmentOrchestrator, PipelineResult};
pub use telemetry::{init_tracing, LogFormat};
