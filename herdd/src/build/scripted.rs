//! Build tool stand-in for tests.
//!
//! Replays fixed output lines and exits with a fixed code. A held launcher
//! keeps the output channel open until `release`, so a build can be observed
//! while it is running.

use super::command::CommandSpec;
use super::launcher::{BuildProcess, OutputLine, OutputSource, OutputStream, ProcessLauncher};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

/// Process id every scripted process reports.
pub const SCRIPTED_PID: u32 = 4242;

struct Script {
    lines: Vec<String>,
    exit: Option<i32>,
    launch_error: bool,
    hold: Option<Arc<Notify>>,
    launched: Vec<CommandSpec>,
}

pub struct ScriptedLauncher {
    script: Mutex<Script>,
}

impl ScriptedLauncher {
    pub fn new(lines: &[&str], exit: i32) -> Self {
        Self {
            script: Mutex::new(Script {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                exit: Some(exit),
                launch_error: false,
                hold: None,
                launched: Vec::new(),
            }),
        }
    }

    /// Every launch fails as if the executable were missing.
    pub fn failing() -> Self {
        let launcher = Self::new(&[], 0);
        launcher.lock().launch_error = true;
        launcher
    }

    /// Keep output open after the scripted lines until `release`.
    pub fn held(self) -> Self {
        self.lock().hold = Some(Arc::new(Notify::new()));
        self
    }

    pub fn release(&self) {
        if let Some(hold) = self.lock().hold.take() {
            hold.notify_one();
        }
    }

    /// Command lines passed to `launch`, in order. Failed launches are not recorded.
    pub fn launched(&self) -> Vec<CommandSpec> {
        self.lock().launched.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(&self, spec: &CommandSpec) -> std::io::Result<Box<dyn BuildProcess>> {
        let (lines, exit, hold) = {
            let mut script = self.lock();
            if script.launch_error {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no such file",
                ));
            }
            script.launched.push(spec.clone());
            (script.lines.clone(), script.exit, script.hold.clone())
        };

        let (tx, rx) = mpsc::channel(16);
        let feeder = tokio::spawn(async move {
            for text in lines {
                let line = OutputLine {
                    source: OutputSource::Stdout,
                    text,
                };
                if tx.send(line).await.is_err() {
                    return;
                }
            }
            if let Some(hold) = hold {
                hold.notified().await;
            }
        });
        Ok(Box::new(ScriptedProcess {
            output: Some(rx),
            feeder,
            exit,
            killed: AtomicBool::new(false),
        }))
    }
}

struct ScriptedProcess {
    output: Option<OutputStream>,
    feeder: JoinHandle<()>,
    exit: Option<i32>,
    killed: AtomicBool,
}

#[async_trait]
impl BuildProcess for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        Some(SCRIPTED_PID)
    }

    fn take_output(&mut self) -> Option<OutputStream> {
        self.output.take()
    }

    async fn wait(&mut self) -> std::io::Result<Option<i32>> {
        if self.killed.load(Ordering::SeqCst) {
            Ok(None)
        } else {
            Ok(self.exit)
        }
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        self.feeder.abort();
        Ok(())
    }
}
