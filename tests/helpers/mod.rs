//! Shared fixtures for integration tests: on-disk session layouts, template
//! documents, and instrumented stages.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bagpipe::error::{BpError, BpResult};
use bagpipe::registry::Stage;
use bagpipe::session::Session;

pub const MANIFEST_FULL: &str = r#"
sensors:
  lidars_3d:
    - name: velodyne_vlp16
      frame_id: velodyne
      topic: /velodyne_points
  imus:
    - name: xsens_mti
      frame_id: imu_link
      topic: /imu/data
"#;

pub const MANIFEST_NO_IMU: &str = r#"
sensors:
  lidars_3d:
    - name: velodyne_vlp16
      frame_id: velodyne
      topic: /velodyne_points
"#;

pub const CALIBRATION: &str = r#"
transforms:
  - parent: base_link
    child: velodyne
    translation: [0.1, 0.0, 0.5]
    rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
  - parent: base_link
    child: imu_link
    translation: [0.0, 0.2, 0.0]
    rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
"#;

pub const BASE_CONFIG: &str = "slam:\n  mappingFrequency: 2.0\n";

pub const VENDOR_PRESETS: &str =
    "velodyne:\n  sensor: velodyne\n  N_SCAN: 16\n  Horizon_SCAN: 1800\n";

/// Create a full session directory (manifest, calibration, raw data) under
/// `data_root/<group>/<name>` and load it.
pub fn make_session(data_root: &Path, group: &str, name: &str, manifest: &str) -> Session {
    let root = data_root.join(group).join(name);
    fs::create_dir_all(root.join("raw")).expect("session dirs");
    fs::write(root.join("raw").join("log_0.bag"), b"raw-bytes").expect("raw data");
    fs::write(root.join("session.yaml"), manifest).expect("manifest");
    fs::create_dir_all(root.join("calibration")).expect("calibration dir");
    fs::write(root.join("calibration").join("default.yaml"), CALIBRATION).expect("calibration");
    Session::load(&root).expect("load session")
}

/// Write the base config and vendor preset documents, returning their paths.
pub fn write_templates(dir: &Path) -> (PathBuf, PathBuf) {
    let base = dir.join("params.yaml");
    fs::write(&base, BASE_CONFIG).expect("base config");
    let presets = dir.join("lidar_presets.yaml");
    fs::write(&presets, VENDOR_PRESETS).expect("presets");
    (base, presets)
}

/// A mock tool command that emits two channel events and then stays alive
/// like a long-running service. Extra args appended by the stage become
/// ignored positional parameters.
pub fn mock_tool_cmd() -> Vec<String> {
    vec![
        "sh".to_owned(),
        "-c".to_owned(),
        concat!(
            r#"printf '{"channel":"/tf","payload":{"seq":1}}\n"#,
            r#"{"channel":"/slam/mapping/path","payload":{"poses":3}}\n'; "#,
            "sleep 30",
        )
        .to_owned(),
    ]
}

/// A mock replay command that succeeds immediately.
pub fn mock_replay_cmd() -> Vec<String> {
    vec!["sh".to_owned(), "-c".to_owned(), "exit 0".to_owned()]
}

/// A mock replay command that fails.
pub fn failing_replay_cmd() -> Vec<String> {
    vec![
        "sh".to_owned(),
        "-c".to_owned(),
        "echo replay broke >&2; exit 3".to_owned(),
    ]
}

/// Stage that counts invocations and writes a fresh artifact each call.
pub struct CountingStage {
    name: String,
    pub calls: Arc<AtomicUsize>,
}

impl CountingStage {
    pub fn new(name: &str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                name: name.to_owned(),
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl Stage for CountingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn primary_artifact(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(format!("{}.out", self.name))
    }

    fn run(&self, _session: &Session, output_dir: &Path) -> BpResult<Vec<PathBuf>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let artifact = self.primary_artifact(output_dir);
        fs::write(&artifact, format!("run-{call}\n"))?;
        Ok(vec![artifact])
    }
}

/// Stage that always fails with a session error.
pub struct FailingStage {
    name: String,
    message: String,
    pub calls: Arc<AtomicUsize>,
}

impl FailingStage {
    pub fn new(name: &str, message: &str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                name: name.to_owned(),
                message: message.to_owned(),
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn primary_artifact(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(format!("{}.out", self.name))
    }

    fn run(&self, _session: &Session, _output_dir: &Path) -> BpResult<Vec<PathBuf>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(BpError::Session(self.message.clone()))
    }
}

/// Stage that fails only for the session whose directory name matches.
pub struct SelectiveFailStage {
    name: String,
    fail_for: String,
    pub calls: Arc<AtomicUsize>,
}

impl SelectiveFailStage {
    pub fn new(name: &str, fail_for: &str) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                name: name.to_owned(),
                fail_for: fail_for.to_owned(),
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

impl Stage for SelectiveFailStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn primary_artifact(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(format!("{}.out", self.name))
    }

    fn run(&self, session: &Session, output_dir: &Path) -> BpResult<Vec<PathBuf>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if session.name() == self.fail_for {
            return Err(BpError::Session(format!(
                "induced failure for {}",
                self.fail_for
            )));
        }
        let artifact = self.primary_artifact(output_dir);
        fs::write(&artifact, b"ok\n")?;
        Ok(vec![artifact])
    }
}
