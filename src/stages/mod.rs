//! Concrete pipeline stages and default registry wiring.

mod slam;
mod slam_config;

pub use slam::SlamStage;
pub use slam_config::SlamConfigStage;

use crate::error::BpResult;
use crate::registry::StageRegistry;

/// Build the registry with the standard two-stage chain: configuration
/// generation followed by the supervised SLAM run.
pub fn default_registry() -> BpResult<StageRegistry> {
    let mut registry = StageRegistry::new();
    registry.register(Box::new(SlamConfigStage::from_env()))?;
    registry.register(Box::new(SlamStage::from_env()))?;
    Ok(registry)
}

/// The standard per-session stage chain, in dependency order.
#[must_use]
pub fn default_stage_plan() -> Vec<String> {
    vec![
        SlamConfigStage::NAME.to_owned(),
        SlamStage::NAME.to_owned(),
    ]
}
