#![forbid(unsafe_code)]

pub mod batch;
pub mod cli;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod logging;
pub mod process;
pub mod recorder;
pub mod registry;
pub mod session;
pub mod stages;
pub mod transforms;

pub use batch::{BatchReport, BatchRunner};
pub use engine::{PipelineEngine, StageOutcome};
pub use error::{BpError, BpResult};
pub use registry::{Stage, StageRegistry};
pub use session::Session;
