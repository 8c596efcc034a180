//! Configuration-generation stage: sensors + calibration → tool config.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{load_base_config, load_vendor_preset, merge_tool_config};
use crate::error::{BpError, BpResult};
use crate::registry::Stage;
use crate::session::{SensorVendor, Session};
use crate::transforms::TfTree;

const BASE_CONFIG_ENV: &str = "BAGPIPE_BASE_CONFIG";
const VENDOR_PRESETS_ENV: &str = "BAGPIPE_VENDOR_PRESETS";

/// Generates the per-session tool configuration from the session's sensors,
/// its calibration transforms, and the vendor preset for its lidar.
#[derive(Debug)]
pub struct SlamConfigStage {
    base_config: PathBuf,
    vendor_presets: PathBuf,
}

impl SlamConfigStage {
    pub const NAME: &'static str = "slam-config";

    /// Filename of the produced artifact inside the output group.
    pub const ARTIFACT: &'static str = "slam_config.yaml";

    #[must_use]
    pub fn new(base_config: PathBuf, vendor_presets: PathBuf) -> Self {
        Self {
            base_config,
            vendor_presets,
        }
    }

    /// Template paths from `BAGPIPE_BASE_CONFIG` / `BAGPIPE_VENDOR_PRESETS`,
    /// falling back to the conventional `config/` locations.
    #[must_use]
    pub fn from_env() -> Self {
        let base = std::env::var(BASE_CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/params.yaml"));
        let presets = std::env::var(VENDOR_PRESETS_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/lidar_presets.yaml"));
        Self::new(base, presets)
    }
}

impl Stage for SlamConfigStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn primary_artifact(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(Self::ARTIFACT)
    }

    fn run(&self, session: &Session, output_dir: &Path) -> BpResult<Vec<PathBuf>> {
        let lidar = session
            .preferred_lidar()
            .ok_or_else(|| BpError::Session("no 3D LiDAR sensor found".to_owned()))?;
        let imu = session
            .imus()
            .first()
            .ok_or_else(|| BpError::Session("no IMU sensor found".to_owned()))?;

        if lidar.topic.is_empty() {
            return Err(BpError::Session(format!(
                "no point cloud topic for LiDAR `{}`",
                lidar.name
            )));
        }
        if imu.topic.is_empty() {
            return Err(BpError::Session(format!(
                "no IMU topic for IMU `{}`",
                imu.name
            )));
        }

        tracing::info!(lidar = %lidar.name, frame = %lidar.frame_id, "selected lidar");
        tracing::info!(imu = %imu.name, frame = %imu.frame_id, "selected imu");

        let calibration = session.calibration_file("default.yaml").ok_or_else(|| {
            BpError::Session(format!(
                "calibration file not found: {}/default.yaml",
                session.calibration_dir().display()
            ))
        })?;

        let tf_tree = TfTree::from_file(&calibration)?;
        if tf_tree.is_empty() {
            return Err(BpError::Session(format!(
                "no transforms found in calibration file: {}",
                calibration.display()
            )));
        }
        let extrinsic = tf_tree.require_transform(&lidar.frame_id, &imu.frame_id)?;

        let vendor = SensorVendor::detect(&lidar.name).ok_or_else(|| {
            BpError::Session(format!("unknown LiDAR vendor in name: {}", lidar.name))
        })?;
        let preset = load_vendor_preset(&self.vendor_presets, vendor.key())?;
        tracing::info!(
            vendor = vendor.key(),
            n_scan = preset.n_scan,
            horizon_scan = preset.horizon_scan,
            "applying vendor preset"
        );

        let base = load_base_config(&self.base_config)?;
        let merged = merge_tool_config(base, lidar, imu, &preset, &extrinsic);

        let artifact = self.primary_artifact(output_dir);
        fs::write(&artifact, serde_yaml::to_string(&merged)?)?;
        tracing::info!(artifact = %artifact.display(), "config generated");

        Ok(vec![artifact])
    }
}
