//! Pipeline engine: executes one (session, stage) pair.
//!
//! The engine is the isolation boundary for a single stage: it resolves the
//! stage, decides whether the work is already done, runs it if needed, and
//! verifies the declared artifacts afterwards. Failure travels back as an
//! error annotated with (session, stage) context; skip/success travel back
//! as an explicit [`StageOutcome`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BpError, BpResult};
use crate::registry::StageRegistry;
use crate::session::Session;

/// Outcome of one engine invocation. Failure is the `Err` arm of
/// [`PipelineEngine::run`], not a variant here, so callers cannot ignore it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The primary artifact already existed; the stage body never ran.
    Skipped { artifacts: Vec<PathBuf> },
    /// The stage body ran and every declared artifact was verified.
    Succeeded { artifacts: Vec<PathBuf> },
}

impl StageOutcome {
    #[must_use]
    pub fn artifacts(&self) -> &[PathBuf] {
        match self {
            Self::Skipped { artifacts } | Self::Succeeded { artifacts } => artifacts,
        }
    }

    #[must_use]
    pub const fn was_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }
}

/// Drives stages resolved from a [`StageRegistry`].
#[derive(Debug)]
pub struct PipelineEngine<'r> {
    registry: &'r StageRegistry,
}

impl<'r> PipelineEngine<'r> {
    #[must_use]
    pub const fn new(registry: &'r StageRegistry) -> Self {
        Self { registry }
    }

    /// Execute `stage_name` for `session`, writing into
    /// `<session>/processed/<group>/`.
    ///
    /// Idempotency is an existence check: when `force` is false and the
    /// stage's primary artifact already exists non-empty, the body is not
    /// invoked and the prior artifacts are returned as `Skipped`. The check
    /// does not hash content, so a stage whose upstream inputs changed (for
    /// example after recalibration) is still skipped unless `force` is set.
    pub fn run(
        &self,
        session: &Session,
        stage_name: &str,
        group: &str,
        force: bool,
    ) -> BpResult<StageOutcome> {
        // Resolve and validate before touching the filesystem, so an unknown
        // stage or bad group name leaves no side effects.
        let stage = self.registry.resolve(stage_name)?;
        validate_group(group)?;

        let output_dir = session.processed_dir().join(group);
        let primary = stage.primary_artifact(&output_dir);

        if !force && artifact_is_complete(&primary) {
            tracing::info!(
                session = session.id(),
                stage = stage_name,
                artifact = %primary.display(),
                "already processed, skipping (use force to re-run)"
            );
            return Ok(StageOutcome::Skipped {
                artifacts: existing_artifacts(stage.declared_artifacts(&output_dir)),
            });
        }

        fs::create_dir_all(&output_dir)
            .map_err(|e| BpError::from(e).with_stage_context(session.id(), stage_name))?;

        if force {
            // A forced run replaces prior output rather than appending to it.
            for artifact in stage.declared_artifacts(&output_dir) {
                if artifact.exists() {
                    fs::remove_file(&artifact).map_err(|e| {
                        BpError::from(e).with_stage_context(session.id(), stage_name)
                    })?;
                }
            }
        }

        tracing::info!(session = session.id(), stage = stage_name, "running stage");
        let artifacts = stage
            .run(session, &output_dir)
            .map_err(|e| e.with_stage_context(session.id(), stage_name))?;

        // A stage that silently fails to write must not count as success.
        for artifact in stage.declared_artifacts(&output_dir) {
            if !artifact_is_complete(&artifact) {
                return Err(BpError::IncompleteArtifact(artifact)
                    .with_stage_context(session.id(), stage_name));
            }
        }

        tracing::info!(
            session = session.id(),
            stage = stage_name,
            artifacts = artifacts.len(),
            "stage completed"
        );
        Ok(StageOutcome::Succeeded { artifacts })
    }
}

/// Output groups are plain directory names under session-scoped storage.
/// Absolute paths or parent escapes are configuration errors.
fn validate_group(group: &str) -> BpResult<()> {
    let invalid = group.is_empty()
        || group == "."
        || group == ".."
        || group.contains('/')
        || group.contains('\\')
        || Path::new(group).is_absolute();
    if invalid {
        return Err(BpError::InvalidOutputGroup(group.to_owned()));
    }
    Ok(())
}

/// Presence plus non-emptiness: an empty file is not a completion marker.
fn artifact_is_complete(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

fn existing_artifacts(declared: Vec<PathBuf>) -> Vec<PathBuf> {
    declared.into_iter().filter(|p| p.exists()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_validation_rejects_escapes() {
        assert!(validate_group("slam").is_ok());
        assert!(validate_group("slam2").is_ok());
        for bad in ["", ".", "..", "/abs", "a/b", "..\\up", "/"] {
            let err = validate_group(bad).unwrap_err();
            assert_eq!(err.error_code(), "BP-OUTPUT-GROUP", "group `{bad}`");
        }
    }

    #[test]
    fn empty_file_is_not_complete() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("artifact");
        assert!(!artifact_is_complete(&path), "absent");
        std::fs::write(&path, b"").expect("write");
        assert!(!artifact_is_complete(&path), "empty");
        std::fs::write(&path, b"x").expect("write");
        assert!(artifact_is_complete(&path), "non-empty");
    }

    #[test]
    fn directory_is_not_a_complete_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!artifact_is_complete(dir.path()));
    }
}
