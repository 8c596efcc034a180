//! SLAM processing stage: supervised external tool + scoped recording +
//! session replay.
//!
//! Scope nesting is fixed: the tool process is started first, the recording
//! opens against it, the replay feeds data through, the recording closes,
//! and only then is the tool torn down. Rust drop order (locals dropped in
//! reverse declaration order) backs the same guarantee on error paths.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::cli::ShutdownController;
use crate::error::{BpError, BpResult};
use crate::process::{StderrMode, SupervisedProcess, run_command_interruptible};
use crate::recorder::Recording;
use crate::registry::Stage;
use crate::session::Session;
use crate::stages::SlamConfigStage;

const SLAM_CMD_ENV: &str = "BAGPIPE_SLAM_CMD";
const REPLAY_CMD_ENV: &str = "BAGPIPE_REPLAY_CMD";

/// Output channels captured from the tool's event stream.
const RECORDED_CHANNELS: [&str; 3] = ["/slam/mapping/path", "/odometry/imu", "/tf"];

/// Runs the external SLAM tool over a session's raw data, recording the
/// tool's outputs into the processed sink.
#[derive(Debug)]
pub struct SlamStage {
    tool_cmd: Vec<String>,
    replay_cmd: Vec<String>,
    replay_rate: f64,
    /// How long to wait for further tool output after replay ends before
    /// considering the stream quiet.
    drain_quiet: Duration,
}

impl SlamStage {
    pub const NAME: &'static str = "slam";

    /// Filename of the produced sink inside the output group.
    pub const ARTIFACT: &'static str = "slam_processed.jsonl";

    #[must_use]
    pub fn new(tool_cmd: Vec<String>, replay_cmd: Vec<String>) -> Self {
        Self {
            tool_cmd,
            replay_cmd,
            replay_rate: 5.0,
            drain_quiet: Duration::from_millis(500),
        }
    }

    /// Tool command lines from `BAGPIPE_SLAM_CMD` / `BAGPIPE_REPLAY_CMD`
    /// (whitespace-split), falling back to the conventional tool names.
    #[must_use]
    pub fn from_env() -> Self {
        let tool_cmd = split_env_cmd(SLAM_CMD_ENV)
            .unwrap_or_else(|| vec!["slam-tool".to_owned(), "--headless".to_owned()]);
        let replay_cmd =
            split_env_cmd(REPLAY_CMD_ENV).unwrap_or_else(|| vec!["session-replay".to_owned()]);
        Self::new(tool_cmd, replay_cmd)
    }

    #[must_use]
    pub fn with_drain_quiet(mut self, quiet: Duration) -> Self {
        self.drain_quiet = quiet;
        self
    }
}

fn split_env_cmd(var: &str) -> Option<Vec<String>> {
    let raw = std::env::var(var).ok()?;
    let parts: Vec<String> = raw.split_whitespace().map(str::to_owned).collect();
    (!parts.is_empty()).then_some(parts)
}

/// Tool stdout lines are NDJSON events: `{"channel": "...", "payload": ...}`.
/// Anything else is tool chatter and ignored.
fn parse_event(line: &str) -> Option<(String, Value)> {
    let value: Value = serde_json::from_str(line).ok()?;
    let channel = value.get("channel")?.as_str()?.to_owned();
    let payload = value.get("payload").cloned().unwrap_or(Value::Null);
    Some((channel, payload))
}

impl Stage for SlamStage {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn primary_artifact(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(Self::ARTIFACT)
    }

    fn run(&self, session: &Session, output_dir: &Path) -> BpResult<Vec<PathBuf>> {
        if !session.has_raw_data() {
            return Err(BpError::Session("session has no raw data".to_owned()));
        }

        // Dependency on the config stage's artifact in the same group.
        let config_path = output_dir.join(SlamConfigStage::ARTIFACT);
        if !config_path.is_file() {
            return Err(BpError::Configuration(format!(
                "config file not found: {}; run the `{}` stage first",
                config_path.display(),
                SlamConfigStage::NAME
            )));
        }

        let Some((replay_program, replay_base_args)) = self.replay_cmd.split_first() else {
            return Err(BpError::ProcessLaunch {
                command: String::new(),
                reason: "empty replay command line".to_owned(),
            });
        };

        let sink = self.primary_artifact(output_dir);

        let mut tool_cmd = self.tool_cmd.clone();
        tool_cmd.push("--params".to_owned());
        tool_cmd.push(config_path.display().to_string());

        // Tool first; recorder opens against the running tool; replay last.
        let mut tool = SupervisedProcess::spawn(&tool_cmd, StderrMode::Inherit)?;
        let channels: Vec<String> = RECORDED_CHANNELS.iter().map(|c| (*c).to_owned()).collect();
        let mut recording = Recording::begin(&mut tool, &sink, &channels)?;

        let mut replay_args: Vec<String> = replay_base_args.to_vec();
        replay_args.push("--rate".to_owned());
        replay_args.push(self.replay_rate.to_string());
        replay_args.push(session.raw_dir().display().to_string());
        run_command_interruptible(replay_program, &replay_args, None)?;

        // Replay is done; drain whatever the tool still has buffered until
        // the stream goes quiet.
        while let Some(line) = tool.next_line(self.drain_quiet) {
            if ShutdownController::is_shutting_down() {
                return Err(BpError::Interrupted);
            }
            if let Some((channel, payload)) = parse_event(&line) {
                recording.capture(&channel, payload)?;
            } else {
                tracing::debug!(line = %line, "ignoring non-event tool output");
            }
        }

        if !tool.is_running() {
            tracing::warn!(command = %tool.command(), "tool exited before teardown");
        }

        let artifact = recording.finish()?;
        tool.terminate();
        Ok(vec![artifact])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_event_accepts_channel_payload_lines() {
        let (channel, payload) =
            parse_event(r#"{"channel": "/tf", "payload": {"seq": 3}}"#).expect("event");
        assert_eq!(channel, "/tf");
        assert_eq!(payload["seq"], 3);
    }

    #[test]
    fn parse_event_rejects_chatter() {
        assert!(parse_event("loading map...").is_none());
        assert!(parse_event(r#"{"no_channel": true}"#).is_none());
        assert!(parse_event(r#"{"channel": 42}"#).is_none());
    }

    #[test]
    fn parse_event_defaults_missing_payload_to_null() {
        let (_, payload) = parse_event(r#"{"channel": "/tf"}"#).expect("event");
        assert!(payload.is_null());
    }

    #[test]
    fn artifact_name_is_fixed() {
        let stage = SlamStage::new(vec!["slam-tool".to_owned()], vec!["replay".to_owned()]);
        assert_eq!(
            stage.primary_artifact(Path::new("/out")),
            Path::new("/out/slam_processed.jsonl")
        );
    }
}
