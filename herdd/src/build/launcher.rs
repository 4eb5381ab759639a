//! Spawning the build tool.
//!
//! The coordinator only sees [`BuildProcess`]: an id, a bounded channel of
//! output lines with stdout and stderr merged in arrival order, and the exit
//! code.

use super::command::CommandSpec;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const OUTPUT_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub source: OutputSource,
    pub text: String,
}

/// Closes once every writer of the process has closed.
pub type OutputStream = mpsc::Receiver<OutputLine>;

/// A running build tool process.
#[async_trait]
pub trait BuildProcess: Send {
    fn id(&self) -> Option<u32>;

    /// The merged output channel. Only the first call returns it.
    fn take_output(&mut self) -> Option<OutputStream>;

    /// Exit code, or `None` when terminated by a signal.
    async fn wait(&mut self) -> std::io::Result<Option<i32>>;

    async fn kill(&mut self) -> std::io::Result<()>;
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch(&self, spec: &CommandSpec) -> std::io::Result<Box<dyn BuildProcess>>;
}

/// Launches real processes with `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, spec: &CommandSpec) -> std::io::Result<Box<dyn BuildProcess>> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (tx, rx) = mpsc::channel(OUTPUT_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, OutputSource::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, OutputSource::Stderr, tx));
        }

        Ok(Box::new(TokioProcess {
            child,
            output: Some(rx),
        }))
    }
}

async fn forward_lines<R>(reader: R, source: OutputSource, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(OutputLine { source, text }).await.is_err() {
                    debug!("Output receiver dropped; stopping {:?} reader", source);
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read build output from {:?}: {}", source, e);
                break;
            }
        }
    }
}

struct TokioProcess {
    child: Child,
    output: Option<OutputStream>,
}

#[async_trait]
impl BuildProcess for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn take_output(&mut self) -> Option<OutputStream> {
        self.output.take()
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.child.wait().await?.code())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }
}
