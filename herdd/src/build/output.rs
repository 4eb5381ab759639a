//! Numbered build output and the log artifact written after each run.

use chrono::Local;
use herd_common::{BuildKind, BuildTarget};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

fn now() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// `[n][timestamp][project]: text`.
pub fn format_line(number: u64, timestamp: &str, project: &str, text: &str) -> String {
    format!("[{number}][{timestamp}][{project}]: {text}")
}

/// In-memory transcript of one build run.
#[derive(Debug)]
pub struct BuildLog {
    project: String,
    target: BuildTarget,
    kind: BuildKind,
    started_unix: i64,
    counter: Arc<AtomicU64>,
    lines: Vec<String>,
}

impl BuildLog {
    /// `counter` is shared with the running-build handle so status
    /// snapshots can report progress.
    pub fn new(
        project: impl Into<String>,
        target: BuildTarget,
        kind: BuildKind,
        started_unix: i64,
        counter: Arc<AtomicU64>,
    ) -> Self {
        Self {
            project: project.into(),
            target,
            kind,
            started_unix,
            counter,
            lines: Vec::new(),
        }
    }

    pub fn start(&mut self, command_line: &str) {
        self.lines.push(format!(
            "=== {} {} build of {} started at {} ===",
            self.target,
            self.kind,
            self.project,
            now()
        ));
        self.lines.push(format!("Command: {command_line}"));
    }

    /// Number, timestamp and buffer one output line. Blank lines are dropped.
    pub fn record(&mut self, text: &str) -> Option<String> {
        if text.trim().is_empty() {
            return None;
        }
        let number = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let line = format_line(number, &now(), &self.project, text);
        self.lines.push(line.clone());
        Some(line)
    }

    pub fn finish(&mut self, exit_code: Option<i32>) {
        let code = exit_code.map_or_else(|| "none (terminated)".to_string(), |c| c.to_string());
        self.lines.push(format!(
            "=== Finished at {} with exit code {} ===",
            now(),
            code
        ));
    }

    pub fn line_count(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// `<project>_<target>_<PlayerBuild|HotUpdateBuild>_<unixTs>.log`.
    pub fn artifact_name(&self) -> String {
        format!(
            "{}_{}_{}_{}.log",
            self.project,
            self.target,
            self.kind.artifact_label(),
            self.started_unix
        )
    }

    /// Write the transcript under `logs_dir`, creating it if needed.
    pub async fn persist(&self, logs_dir: &Path) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(logs_dir).await?;
        let path = logs_dir.join(self.artifact_name());
        let mut contents = self.lines.join("\n");
        contents.push('\n');
        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }
}
