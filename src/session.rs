//! Session model: one recorded dataset from a robot run.
//!
//! On disk a session lives under a two-level layout rooted at the data root:
//!
//! ```text
//! <data_root>/<environment>_<robot>/<session_name>/
//!     session.yaml          # sensor manifest + identity
//!     raw/                  # recorded sensor logs
//!     calibration/*.yaml    # static transform calibration
//!     processed/<group>/    # per-group stage artifacts (engine-owned)
//! ```
//!
//! A `Session` is immutable for the duration of a pipeline run; the engine
//! only ever reads it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BpError, BpResult};

/// One discovered sensor: a name, the TF frame it reports in, and its
/// primary data topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub name: String,
    pub frame_id: String,
    pub topic: String,
}

/// Lidar vendors the config templating has presets for, detected from the
/// sensor name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorVendor {
    Velodyne,
    Ouster,
}

impl SensorVendor {
    /// Detect the vendor from a sensor name, case-insensitively.
    #[must_use]
    pub fn detect(sensor_name: &str) -> Option<Self> {
        let lower = sensor_name.to_ascii_lowercase();
        if lower.contains("velodyne") {
            Some(Self::Velodyne)
        } else if lower.contains("ouster") {
            Some(Self::Ouster)
        } else {
            None
        }
    }

    /// The key used to look this vendor up in the preset document.
    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Velodyne => "velodyne",
            Self::Ouster => "ouster",
        }
    }
}

/// The `session.yaml` manifest as written by the recording side.
#[derive(Debug, Default, Deserialize)]
struct SessionManifest {
    uuid: Option<Uuid>,
    robot: Option<String>,
    environment: Option<String>,
    date: Option<String>,
    #[serde(default)]
    sensors: SensorManifest,
}

#[derive(Debug, Default, Deserialize)]
struct SensorManifest {
    #[serde(default)]
    lidars_3d: Vec<Sensor>,
    #[serde(default)]
    imus: Vec<Sensor>,
}

/// One recorded dataset. Identity is the manifest UUID when present,
/// otherwise a UUID derived deterministically from the session path.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    root: PathBuf,
    robot: String,
    environment: String,
    date: Option<String>,
    lidars_3d: Vec<Sensor>,
    imus: Vec<Sensor>,
}

impl Session {
    /// Load a session from its root directory.
    ///
    /// Fails if the directory does not exist; a missing or empty
    /// `session.yaml` is tolerated (sensor lists are then empty and stages
    /// that need sensors fail with their own diagnostics).
    pub fn load(root: &Path) -> BpResult<Self> {
        if !root.is_dir() {
            return Err(BpError::Session(format!(
                "session directory not found: {}",
                root.display()
            )));
        }

        let manifest_path = root.join("session.yaml");
        let manifest: SessionManifest = if manifest_path.is_file() {
            let text = fs::read_to_string(&manifest_path)?;
            serde_yaml::from_str(&text)?
        } else {
            SessionManifest::default()
        };

        let (dir_env, dir_robot) = split_env_robot(root);
        let id = manifest
            .uuid
            .unwrap_or_else(|| derive_session_uuid(root))
            .to_string();

        Ok(Self {
            id,
            root: root.to_path_buf(),
            robot: manifest.robot.unwrap_or(dir_robot),
            environment: manifest.environment.unwrap_or(dir_env),
            date: manifest.date.or_else(|| date_from_name(root)),
            lidars_3d: manifest.sensors.lidars_3d,
            imus: manifest.sensors.imus,
        })
    }

    /// Resolve a session given either a filesystem path or a UUID.
    ///
    /// A path that exists wins; otherwise the data root is scanned for a
    /// session whose id matches.
    pub fn open(path_or_uuid: &str, data_root: &Path) -> BpResult<Self> {
        let as_path = Path::new(path_or_uuid);
        if as_path.is_dir() {
            return Self::load(as_path);
        }

        for candidate in discover_session_dirs(data_root)? {
            let session = Self::load(&candidate)?;
            if session.id == path_or_uuid {
                return Ok(session);
            }
        }

        Err(BpError::Session(format!(
            "no session found for `{path_or_uuid}` under {}",
            data_root.display()
        )))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn robot(&self) -> &str {
        &self.robot
    }

    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    #[must_use]
    pub fn date(&self) -> Option<&str> {
        self.date.as_deref()
    }

    /// True when the session carries recorded raw data (at least one file
    /// under `raw/`).
    #[must_use]
    pub fn has_raw_data(&self) -> bool {
        let raw = self.root.join("raw");
        fs::read_dir(&raw)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    #[must_use]
    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    #[must_use]
    pub fn lidars_3d(&self) -> &[Sensor] {
        &self.lidars_3d
    }

    #[must_use]
    pub fn imus(&self) -> &[Sensor] {
        &self.imus
    }

    /// The lidar to configure the tool with: velodyne wins when present,
    /// otherwise the first discovered lidar (discovery order is priority
    /// order).
    #[must_use]
    pub fn preferred_lidar(&self) -> Option<&Sensor> {
        self.lidars_3d
            .iter()
            .find(|l| l.name.to_ascii_lowercase().contains("velodyne"))
            .or_else(|| self.lidars_3d.first())
    }

    #[must_use]
    pub fn calibration_dir(&self) -> PathBuf {
        self.root.join("calibration")
    }

    /// Look up a calibration artifact by logical name. Returns `None` when
    /// the file does not exist.
    #[must_use]
    pub fn calibration_file(&self, name: &str) -> Option<PathBuf> {
        let path = self.calibration_dir().join(name);
        path.is_file().then_some(path)
    }

    /// All stage output lives under here, one subdirectory per logical group.
    #[must_use]
    pub fn processed_dir(&self) -> PathBuf {
        self.root.join("processed")
    }
}

/// Scan the two-level `env_robot/session` layout and return session
/// directories in sorted order.
pub(crate) fn discover_session_dirs(data_root: &Path) -> BpResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    if !data_root.is_dir() {
        return Ok(found);
    }

    for group in sorted_subdirs(data_root)? {
        for session_dir in sorted_subdirs(&group)? {
            // A session is any directory carrying raw data or a manifest.
            if session_dir.join("raw").is_dir() || session_dir.join("session.yaml").is_file() {
                found.push(session_dir);
            }
        }
    }
    Ok(found)
}

fn sorted_subdirs(dir: &Path) -> BpResult<Vec<PathBuf>> {
    let mut subdirs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();
    Ok(subdirs)
}

/// `<environment>_<robot>` parent directory, split at the first underscore.
fn split_env_robot(session_root: &Path) -> (String, String) {
    let parent_name = session_root
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match parent_name.split_once('_') {
        Some((env, robot)) => (env.to_owned(), robot.to_owned()),
        None => (parent_name, String::new()),
    }
}

/// Sessions are conventionally named `YYYY-MM-DD_label`; the date component
/// is used for batch filtering when the manifest omits one.
fn date_from_name(session_root: &Path) -> Option<String> {
    let name = session_root.file_name()?.to_string_lossy().into_owned();
    let candidate = name.split('_').next()?;
    let looks_like_date = candidate.len() == 10
        && candidate
            .chars()
            .enumerate()
            .all(|(i, c)| if i == 4 || i == 7 { c == '-' } else { c.is_ascii_digit() });
    looks_like_date.then(|| candidate.to_owned())
}

fn derive_session_uuid(root: &Path) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, root.to_string_lossy().as_bytes())
}
