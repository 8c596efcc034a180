//! Static transform tree loaded from a calibration file.
//!
//! Only the query contract matters to the pipeline: given two frame names,
//! produce the rigid transform between them or report that no path exists.
//! Composition walks the calibration graph, inverting edges as needed, so a
//! lidar→imu extrinsic can be resolved even when both are only calibrated
//! against `base_link`.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{BpError, BpResult};

/// A rigid transform: `p_parent = R * p_child + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub translation: [f64; 3],
    pub rotation: [[f64; 3]; 3],
}

impl RigidTransform {
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            translation: [0.0; 3],
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        let mut rotation = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                rotation[i][j] = (0..3).map(|k| self.rotation[i][k] * other.rotation[k][j]).sum();
            }
        }
        let mut translation = [0.0; 3];
        for i in 0..3 {
            translation[i] = self.translation[i]
                + (0..3).map(|k| self.rotation[i][k] * other.translation[k]).sum::<f64>();
        }
        Self {
            translation,
            rotation,
        }
    }

    /// Inverse of a rigid transform: `R' = Rᵀ`, `t' = -Rᵀ t`.
    #[must_use]
    pub fn inverse(&self) -> Self {
        let mut rotation = [[0.0; 3]; 3];
        for i in 0..3 {
            for j in 0..3 {
                rotation[i][j] = self.rotation[j][i];
            }
        }
        let mut translation = [0.0; 3];
        for i in 0..3 {
            translation[i] = -(0..3).map(|k| rotation[i][k] * self.translation[k]).sum::<f64>();
        }
        Self {
            translation,
            rotation,
        }
    }

    /// Row-major flattening of the rotation matrix, the layout the tool
    /// config expects.
    #[must_use]
    pub fn flattened_rotation(&self) -> [f64; 9] {
        let mut flat = [0.0; 9];
        for i in 0..3 {
            for j in 0..3 {
                flat[i * 3 + j] = self.rotation[i][j];
            }
        }
        flat
    }
}

/// One calibrated edge in the file: the child frame expressed in the parent.
#[derive(Debug, Deserialize)]
struct CalibratedEdge {
    parent: String,
    child: String,
    translation: [f64; 3],
    rotation: [[f64; 3]; 3],
}

#[derive(Debug, Deserialize)]
struct CalibrationDoc {
    #[serde(default)]
    transforms: Vec<CalibratedEdge>,
}

/// Frame graph built from a calibration document.
#[derive(Debug)]
pub struct TfTree {
    // frame -> (neighbor frame, transform neighbor->frame)
    edges: HashMap<String, Vec<(String, RigidTransform)>>,
}

impl TfTree {
    /// Load a calibration YAML document.
    pub fn from_file(path: &Path) -> BpResult<Self> {
        let text = fs::read_to_string(path)?;
        let doc: CalibrationDoc = serde_yaml::from_str(&text)?;

        let mut edges: HashMap<String, Vec<(String, RigidTransform)>> = HashMap::new();
        for edge in doc.transforms {
            let forward = RigidTransform {
                translation: edge.translation,
                rotation: edge.rotation,
            };
            // parent -> child carries the child-in-parent transform; the
            // reverse edge carries its inverse.
            edges
                .entry(edge.parent.clone())
                .or_default()
                .push((edge.child.clone(), forward));
            edges
                .entry(edge.child)
                .or_default()
                .push((edge.parent, forward.inverse()));
        }

        Ok(Self { edges })
    }

    /// True when the calibration file carried no transforms at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// All frame names known to the tree, sorted, for diagnostics.
    #[must_use]
    pub fn all_frames(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self.edges.keys().collect();
        set.into_iter().cloned().collect()
    }

    /// Compose the transform taking points in `from` to points in `to`.
    ///
    /// Returns `None` when either frame is unknown or no path connects them.
    #[must_use]
    pub fn get_transform(&self, from: &str, to: &str) -> Option<RigidTransform> {
        if !self.edges.contains_key(from) || !self.edges.contains_key(to) {
            return None;
        }
        if from == to {
            return Some(RigidTransform::identity());
        }

        // BFS from `to`, accumulating the transform that maps each visited
        // frame into `to`.
        let mut queue = VecDeque::new();
        let mut visited: HashMap<&str, RigidTransform> = HashMap::new();
        visited.insert(to, RigidTransform::identity());
        queue.push_back(to);

        while let Some(frame) = queue.pop_front() {
            let into_to = visited[frame];
            if frame == from {
                return Some(into_to);
            }
            if let Some(neighbors) = self.edges.get(frame) {
                for (neighbor, neighbor_in_frame) in neighbors {
                    if !visited.contains_key(neighbor.as_str()) {
                        visited.insert(neighbor, into_to.compose(neighbor_in_frame));
                        queue.push_back(neighbor);
                    }
                }
            }
        }
        None
    }

    /// `get_transform` that fails with a diagnostic listing known frames.
    pub fn require_transform(&self, from: &str, to: &str) -> BpResult<RigidTransform> {
        self.get_transform(from, to)
            .ok_or_else(|| BpError::TransformMissing {
                from: from.to_owned(),
                to: to.to_owned(),
                available: self.all_frames().join(", "),
            })
    }
}
