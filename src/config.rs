//! Configuration templating: base tool parameters plus vendor-keyed presets,
//! merged with per-session sensor data into the config artifact the SLAM
//! tool consumes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::{BpError, BpResult};
use crate::session::Sensor;
use crate::transforms::RigidTransform;

/// Top-level key the tool parameters live under in the merged document.
pub const TOOL_NAMESPACE: &str = "slam";

/// Scan geometry preset for one lidar vendor.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VendorPreset {
    pub sensor: String,
    #[serde(rename = "N_SCAN")]
    pub n_scan: u32,
    #[serde(rename = "Horizon_SCAN")]
    pub horizon_scan: u32,
}

/// Load the base parameter document.
pub fn load_base_config(path: &Path) -> BpResult<Mapping> {
    if !path.is_file() {
        return Err(BpError::Configuration(format!(
            "base config not found: {}",
            path.display()
        )));
    }
    let text = fs::read_to_string(path)?;
    let value: Value = serde_yaml::from_str(&text)?;
    match value {
        Value::Mapping(mapping) => Ok(mapping),
        _ => Err(BpError::Configuration(format!(
            "base config is not a mapping: {}",
            path.display()
        ))),
    }
}

/// Load the preset for `vendor` from the vendor-keyed preset document.
///
/// An unknown vendor fails with the list of available vendors so operators
/// can fix the preset file or the sensor naming.
pub fn load_vendor_preset(path: &Path, vendor: &str) -> BpResult<VendorPreset> {
    if !path.is_file() {
        return Err(BpError::Configuration(format!(
            "preset file not found: {}",
            path.display()
        )));
    }
    let text = fs::read_to_string(path)?;
    let presets: BTreeMap<String, VendorPreset> = serde_yaml::from_str(&text)?;

    presets.get(vendor).cloned().ok_or_else(|| {
        let available: Vec<&str> = presets.keys().map(String::as_str).collect();
        BpError::Configuration(format!(
            "no preset found for vendor `{vendor}`; available vendors: {}",
            available.join(", ")
        ))
    })
}

/// Merge session-derived parameters into the base document's tool namespace.
///
/// The lidar→imu extrinsic is written as a translation triple and a
/// flattened rotation matrix; the tool reads the same matrix for both its
/// rotation and RPY extrinsic parameters.
#[must_use]
pub fn merge_tool_config(
    mut base: Mapping,
    lidar: &Sensor,
    imu: &Sensor,
    preset: &VendorPreset,
    extrinsic: &RigidTransform,
) -> Mapping {
    let rotation: Vec<Value> = extrinsic
        .flattened_rotation()
        .iter()
        .map(|v| Value::from(*v))
        .collect();
    let translation: Vec<Value> = extrinsic.translation.iter().map(|v| Value::from(*v)).collect();

    let updates: [(&str, Value); 10] = [
        ("pointCloudTopic", Value::from(lidar.topic.clone())),
        ("imuTopic", Value::from(imu.topic.clone())),
        ("lidarFrame", Value::from(lidar.frame_id.clone())),
        ("baselinkFrame", Value::from("base_link")),
        ("sensor", Value::from(preset.sensor.clone())),
        ("N_SCAN", Value::from(preset.n_scan)),
        ("Horizon_SCAN", Value::from(preset.horizon_scan)),
        ("extrinsicTrans", Value::Sequence(translation)),
        ("extrinsicRot", Value::Sequence(rotation.clone())),
        ("extrinsicRPY", Value::Sequence(rotation)),
    ];
    let namespace = base
        .entry(Value::String(TOOL_NAMESPACE.to_owned()))
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !namespace.is_mapping() {
        *namespace = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(section) = namespace {
        for (key, value) in updates {
            section.insert(Value::String(key.to_owned()), value);
        }
    }

    base
}
