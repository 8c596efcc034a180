//! Scoped capture of named data channels into a sink file.
//!
//! A [`Recording`] pairs acquisition and release: the sink is opened and
//! headed when the scope begins, and finalized exactly once when it ends,
//! whether through [`finish`](Recording::finish) or through `Drop` during
//! unwinding. The sink format is a JSON-lines envelope (header, records,
//! footer), so a closed sink is structurally valid and the footer doubles
//! as the finalized marker.
//!
//! Nesting contract: a recording begins against an already-running
//! [`SupervisedProcess`] and must end before that process is torn down.
//! `begin` takes the process by reference, which makes the
//! capture-inside-process ordering mandatory at the type level; capturing
//! before the source exists would yield an empty recording.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Value, json};

use crate::error::{BpError, BpResult};
use crate::process::SupervisedProcess;

/// An open recording scope. Owns the sink exclusively until finalized.
pub struct Recording {
    sink: PathBuf,
    writer: Option<BufWriter<File>>,
    channels: BTreeSet<String>,
    records: u64,
    dropped: u64,
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("sink", &self.sink)
            .field("records", &self.records)
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}

impl Recording {
    /// Open `sink` and begin capturing `channels` from the given process's
    /// data stream.
    ///
    /// The sink's parent directory must already exist (the engine creates
    /// the output directory before the stage body runs). The process is
    /// expected to be running; a source that has already exited is reported
    /// but still yields a valid (possibly empty) recording.
    pub fn begin(
        source: &mut SupervisedProcess,
        sink: &Path,
        channels: &[String],
    ) -> BpResult<Self> {
        match sink.parent() {
            Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => {}
            _ => {
                return Err(BpError::Configuration(format!(
                    "recording sink parent directory does not exist: {}",
                    sink.display()
                )));
            }
        }

        if !source.is_running() {
            tracing::warn!(
                sink = %sink.display(),
                "recording source process is not running; recording may be empty"
            );
        }

        let file = File::create(sink)?;
        let mut writer = BufWriter::new(file);
        let header = json!({
            "kind": "header",
            "channels": channels,
            "source": source.command(),
            "started_at": Utc::now().to_rfc3339(),
        });
        serde_json::to_writer(&mut writer, &header)?;
        writer.write_all(b"\n")?;

        tracing::info!(sink = %sink.display(), channels = channels.len(), "recording started");
        Ok(Self {
            sink: sink.to_path_buf(),
            writer: Some(writer),
            channels: channels.iter().cloned().collect(),
            records: 0,
            dropped: 0,
        })
    }

    /// Append one record for `channel`.
    ///
    /// A channel outside the declared set is a per-record, recoverable
    /// condition: the record is dropped and counted, the recording stays
    /// valid. Sink-level write failures are real errors.
    pub fn capture(&mut self, channel: &str, payload: Value) -> BpResult<()> {
        if !self.channels.contains(channel) {
            self.dropped += 1;
            tracing::debug!(channel = channel, "dropping record for undeclared channel");
            return Ok(());
        }

        let Some(writer) = self.writer.as_mut() else {
            return Err(BpError::Configuration(
                "capture on a finalized recording".to_owned(),
            ));
        };

        let record = json!({
            "kind": "record",
            "channel": channel,
            "payload": payload,
        });
        serde_json::to_writer(&mut *writer, &record)?;
        writer.write_all(b"\n")?;
        self.records += 1;
        Ok(())
    }

    /// Records written so far.
    #[must_use]
    pub const fn records(&self) -> u64 {
        self.records
    }

    /// Records dropped for undeclared channels.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    #[must_use]
    pub fn sink(&self) -> &Path {
        &self.sink
    }

    /// Write the footer, flush, and close the sink. Consumes the scope so
    /// finalization cannot run twice.
    pub fn finish(mut self) -> BpResult<PathBuf> {
        self.finalize_inner()?;
        Ok(self.sink.clone())
    }

    fn finalize_inner(&mut self) -> BpResult<()> {
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };
        let footer = json!({
            "kind": "footer",
            "records": self.records,
            "dropped": self.dropped,
            "closed_at": Utc::now().to_rfc3339(),
        });
        serde_json::to_writer(&mut writer, &footer)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        tracing::info!(
            sink = %self.sink.display(),
            records = self.records,
            dropped = self.dropped,
            "recording finalized"
        );
        Ok(())
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        // Finalize on every exit path, including panics in the recorded
        // scope. Errors here are logged, not propagated.
        if self.writer.is_some()
            && let Err(error) = self.finalize_inner()
        {
            tracing::warn!(sink = %self.sink.display(), "failed to finalize recording: {error}");
        }
    }
}

/// True when `path` is a recording sink that was properly finalized: a
/// header first line and a footer last line.
pub fn sink_is_finalized(path: &Path) -> BpResult<bool> {
    let file = File::open(path)?;
    let mut first: Option<Value> = None;
    let mut last: Option<Value> = None;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)?;
        if first.is_none() {
            first = Some(value.clone());
        }
        last = Some(value);
    }

    let kind = |v: &Option<Value>| -> Option<String> {
        v.as_ref()
            .and_then(|v| v.get("kind"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    };
    Ok(kind(&first).as_deref() == Some("header") && kind(&last).as_deref() == Some("footer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::StderrMode;

    fn long_running_source() -> SupervisedProcess {
        SupervisedProcess::spawn_with_grace(
            &["sleep".to_owned(), "30".to_owned()],
            StderrMode::Inherit,
            std::time::Duration::from_millis(200),
        )
        .expect("spawn sleep")
    }

    fn channels() -> Vec<String> {
        vec!["/slam/mapping/path".to_owned(), "/tf".to_owned()]
    }

    #[test]
    fn finish_produces_header_and_footer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = dir.path().join("out.jsonl");
        let mut source = long_running_source();

        let mut recording = Recording::begin(&mut source, &sink, &channels()).expect("begin");
        recording
            .capture("/tf", json!({"seq": 1}))
            .expect("capture");
        let path = recording.finish().expect("finish");

        assert_eq!(path, sink);
        assert!(sink_is_finalized(&sink).expect("validate"));
        source.terminate();
    }

    #[test]
    fn undeclared_channel_is_recoverable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = dir.path().join("out.jsonl");
        let mut source = long_running_source();

        let mut recording = Recording::begin(&mut source, &sink, &channels()).expect("begin");
        recording
            .capture("/unknown/topic", json!({}))
            .expect("dropped, not failed");
        recording.capture("/tf", json!({})).expect("captured");
        assert_eq!(recording.dropped(), 1);
        assert_eq!(recording.records(), 1);
        recording.finish().expect("finish");
        source.terminate();
    }

    #[test]
    fn drop_finalizes_sink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = dir.path().join("out.jsonl");
        let mut source = long_running_source();

        {
            let mut recording = Recording::begin(&mut source, &sink, &channels()).expect("begin");
            recording.capture("/tf", json!({"seq": 7})).expect("capture");
            // Scope ends without finish(): Drop must finalize.
        }

        assert!(
            sink_is_finalized(&sink).expect("validate"),
            "sink must be valid after implicit close"
        );
        source.terminate();
    }

    #[test]
    fn sink_valid_even_when_scope_panics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = dir.path().join("out.jsonl");
        let mut source = long_running_source();
        let mut recording = Recording::begin(&mut source, &sink, &channels()).expect("begin");
        recording.capture("/tf", json!({})).expect("capture");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _hold = recording;
            panic!("stage body exploded");
        }));
        assert!(result.is_err(), "panic propagates");
        assert!(
            sink_is_finalized(&sink).expect("validate"),
            "sink must be finalized after panic unwinding"
        );
        source.terminate();
    }

    #[test]
    fn missing_parent_directory_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = dir.path().join("no_such_dir").join("out.jsonl");
        let mut source = long_running_source();
        let err = Recording::begin(&mut source, &sink, &channels()).unwrap_err();
        assert_eq!(err.error_code(), "BP-CONFIG");
        source.terminate();
    }

    #[test]
    fn empty_recording_is_still_valid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = dir.path().join("out.jsonl");
        let mut source = long_running_source();
        let recording = Recording::begin(&mut source, &sink, &channels()).expect("begin");
        recording.finish().expect("finish");
        assert!(sink_is_finalized(&sink).expect("validate"));
        source.terminate();
    }

    #[test]
    fn unfinalized_sink_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = dir.path().join("torn.jsonl");
        std::fs::write(&sink, "{\"kind\":\"header\",\"channels\":[]}\n").expect("write");
        assert!(!sink_is_finalized(&sink).expect("validate"));
    }
}
