//! Batch runner: the same stage chain across many sessions, with
//! per-session failure isolation.
//!
//! The runner is the isolation boundary for a single session: a stage
//! failure abandons that session's remaining stages and moves on. Only
//! wiring errors (unknown/duplicate stage) abort the batch, since they would
//! deterministically fail every remaining session too.

use serde::Serialize;

use crate::cli::ShutdownController;
use crate::engine::PipelineEngine;
use crate::error::BpResult;
use crate::registry::StageRegistry;
use crate::session::Session;

/// One failed session: enough detail for an operator to re-run the failed
/// subset with `force`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub session: String,
    pub stage: String,
    pub error: String,
    pub code: String,
}

/// Aggregate outcome of a batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Sessions skipped entirely because the chain for every stage was
    /// already complete.
    pub skipped: usize,
    pub interrupted: bool,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    fn new(total: usize) -> Self {
        Self {
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            interrupted: false,
            failures: Vec::new(),
        }
    }

    /// Process exit code for this report: interrupt wins, then failures.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            ShutdownController::signal_exit_code()
        } else if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// Drives a stage plan across an ordered collection of sessions.
#[derive(Debug)]
pub struct BatchRunner<'r> {
    engine: PipelineEngine<'r>,
}

impl<'r> BatchRunner<'r> {
    #[must_use]
    pub const fn new(registry: &'r StageRegistry) -> Self {
        Self {
            engine: PipelineEngine::new(registry),
        }
    }

    /// Run `stage_plan` in order for every session, writing into the same
    /// output group across the chain.
    ///
    /// Sessions are processed strictly in the given order. An interrupt
    /// stops iteration before the next session starts; the in-flight stage
    /// unwinds through its scoped cleanup and is reported as a failure.
    pub fn run_all(
        &self,
        sessions: &[Session],
        stage_plan: &[String],
        group: &str,
        force: bool,
    ) -> BpResult<BatchReport> {
        let mut report = BatchReport::new(sessions.len());

        for (index, session) in sessions.iter().enumerate() {
            if ShutdownController::is_shutting_down() {
                tracing::warn!(
                    remaining = sessions.len() - index,
                    "interrupt received, stopping before next session"
                );
                report.interrupted = true;
                break;
            }

            tracing::info!(
                session = session.id(),
                name = %session.name(),
                index = index + 1,
                total = sessions.len(),
                "processing session"
            );

            let mut chain_skipped = true;
            let mut failure: Option<BatchFailure> = None;

            for stage_name in stage_plan {
                match self.engine.run(session, stage_name, group, force) {
                    Ok(outcome) => {
                        if !outcome.was_skipped() {
                            chain_skipped = false;
                        }
                    }
                    Err(error) if error.is_wiring_error() => return Err(error),
                    Err(error) => {
                        tracing::error!(
                            session = session.id(),
                            stage = stage_name.as_str(),
                            "stage failed: {error}"
                        );
                        if error.is_interrupt() {
                            report.interrupted = true;
                        }
                        failure = Some(BatchFailure {
                            session: session.id().to_owned(),
                            stage: stage_name.clone(),
                            error: error.to_string(),
                            code: error.root_code().to_owned(),
                        });
                        break;
                    }
                }
            }

            match failure {
                Some(detail) => {
                    report.failed += 1;
                    report.failures.push(detail);
                    if report.interrupted {
                        break;
                    }
                }
                None => {
                    report.succeeded += 1;
                    if chain_skipped {
                        report.skipped += 1;
                    }
                }
            }
        }

        Ok(report)
    }
}
