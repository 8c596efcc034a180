//! Stage registry: the mapping from stage name to stage implementation.
//!
//! The registry is an explicit object constructed once at startup and passed
//! by reference to the engine and batch runner. Registration is checked for
//! duplicates; there is no import-time or global mutable state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{BpError, BpResult};
use crate::session::Session;

/// A named, idempotent unit of processing.
///
/// A stage is a pure mapping `(Session, output_dir) -> artifacts`: it must
/// not depend on mutable state beyond what is passed in. The primary
/// artifact doubles as the durable completion marker the engine probes for
/// idempotency; there is no separate state store.
pub trait Stage: Send + Sync {
    /// Registration name; must be unique within a registry.
    fn name(&self) -> &str;

    /// The completion-marker artifact inside `output_dir`.
    fn primary_artifact(&self, output_dir: &Path) -> PathBuf;

    /// Every artifact this stage promises to produce. All of them must exist
    /// and be non-empty after a successful run.
    fn declared_artifacts(&self, output_dir: &Path) -> Vec<PathBuf> {
        vec![self.primary_artifact(output_dir)]
    }

    /// Execute the stage. `output_dir` exists when this is called.
    fn run(&self, session: &Session, output_dir: &Path) -> BpResult<Vec<PathBuf>>;
}

/// Name → stage mapping. `BTreeMap` keeps `names()` deterministic.
#[derive(Default)]
pub struct StageRegistry {
    stages: BTreeMap<String, Box<dyn Stage>>,
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRegistry")
            .field("stages", &self.names())
            .finish()
    }
}

impl StageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a stage under its own name. Re-registering a name is a wiring
    /// error, not a replacement.
    pub fn register(&mut self, stage: Box<dyn Stage>) -> BpResult<()> {
        let name = stage.name().to_owned();
        if self.stages.contains_key(&name) {
            return Err(BpError::DuplicateStage { name });
        }
        self.stages.insert(name, stage);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> BpResult<&dyn Stage> {
        self.stages
            .get(name)
            .map(AsRef::as_ref)
            .ok_or_else(|| BpError::UnknownStage {
                name: name.to_owned(),
            })
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.stages.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NamedStage(&'static str);

    impl Stage for NamedStage {
        fn name(&self) -> &str {
            self.0
        }

        fn primary_artifact(&self, output_dir: &Path) -> PathBuf {
            output_dir.join(format!("{}.out", self.0))
        }

        fn run(&self, _session: &Session, output_dir: &Path) -> BpResult<Vec<PathBuf>> {
            Ok(vec![self.primary_artifact(output_dir)])
        }
    }

    #[test]
    fn register_and_resolve() {
        let mut registry = StageRegistry::new();
        registry.register(Box::new(NamedStage("alpha"))).expect("register");
        let stage = registry.resolve("alpha").expect("resolve");
        assert_eq!(stage.name(), "alpha");
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let mut registry = StageRegistry::new();
        registry.register(Box::new(NamedStage("alpha"))).expect("first");
        let err = registry.register(Box::new(NamedStage("alpha"))).unwrap_err();
        assert_eq!(err.error_code(), "BP-STAGE-DUP");
        assert_eq!(registry.len(), 1, "failed registration must not replace");
    }

    #[test]
    fn unknown_stage_is_an_error() {
        let registry = StageRegistry::new();
        let err = registry.resolve("missing").err().expect("unknown stage");
        assert_eq!(err.error_code(), "BP-STAGE-UNKNOWN");
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn names_are_sorted_and_complete() {
        let mut registry = StageRegistry::new();
        registry.register(Box::new(NamedStage("zeta"))).expect("zeta");
        registry.register(Box::new(NamedStage("alpha"))).expect("alpha");
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn declared_artifacts_default_to_primary() {
        let stage = NamedStage("alpha");
        let dir = Path::new("/tmp/out");
        assert_eq!(
            stage.declared_artifacts(dir),
            vec![dir.join("alpha.out")]
        );
    }
}
