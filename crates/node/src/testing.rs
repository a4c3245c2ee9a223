//! In-memory process doubles for exercising the supervisor without spawning anything.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Result, bail};
use tokio::sync::mpsc;

use crate::{
    InstanceDefinition,
    process::{KillHandle, ProcessAdapter, ProcessCommand, ProcessEvent, SpawnedProcess},
};

/// A [`ProcessAdapter`] whose processes replay a fixed script and are then driven by the test.
///
/// Kills are honored by reporting a signal exit, unless the adapter was built with
/// [`ScriptedAdapter::ignoring_kills`].
#[derive(Clone, Default)]
pub struct ScriptedAdapter {
    script: Vec<ProcessEvent>,
    fail_spawn: bool,
    ignore_kills: bool,
    processes: Arc<Mutex<Vec<ScriptedProcess>>>,
}

impl ScriptedAdapter {
    pub const PROCESS_ID: u32 = 4242;

    pub fn with_script(script: impl IntoIterator<Item = ProcessEvent>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn with_stdout<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        Self::with_script(
            lines
                .into_iter()
                .map(|line| ProcessEvent::Stdout(line.to_string())),
        )
    }

    pub fn failing_to_spawn() -> Self {
        Self {
            fail_spawn: true,
            ..Default::default()
        }
    }

    pub fn ignoring_kills(mut self) -> Self {
        self.ignore_kills = true;
        self
    }

    pub fn spawned(&self) -> usize {
        self.processes.lock().unwrap().len()
    }

    pub fn process(&self, index: usize) -> ScriptedProcess {
        self.processes.lock().unwrap()[index].clone()
    }
}

impl ProcessAdapter for ScriptedAdapter {
    fn spawn(&self, command: &ProcessCommand) -> Result<SpawnedProcess> {
        if self.fail_spawn {
            bail!("No such file or directory (os error 2)");
        }

        let (events_sender, events) = mpsc::unbounded_channel();
        let process = ScriptedProcess {
            command: command.clone(),
            events: events_sender,
            exited: Default::default(),
            kills: Default::default(),
        };
        for event in self.script.iter().cloned() {
            process.send(event);
        }

        let (kill_handle, mut kill_requests) = KillHandle::new();
        let ignore_kills = self.ignore_kills;
        tokio::spawn({
            let process = process.clone();
            async move {
                while let Some(reply) = kill_requests.recv().await {
                    process.kills.fetch_add(1, Ordering::SeqCst);
                    if ignore_kills {
                        let _ = reply.send(false);
                        continue;
                    }
                    let _ = reply.send(!process.has_exited());
                    process.exit(None);
                }
            }
        });

        self.processes.lock().unwrap().push(process);
        Ok(SpawnedProcess {
            id: Some(Self::PROCESS_ID),
            events,
            kill_handle,
        })
    }
}

/// The test side of a process spawned by a [`ScriptedAdapter`].
#[derive(Clone)]
pub struct ScriptedProcess {
    pub command: ProcessCommand,
    events: mpsc::UnboundedSender<ProcessEvent>,
    exited: Arc<AtomicBool>,
    kills: Arc<AtomicUsize>,
}

impl ScriptedProcess {
    fn send(&self, event: ProcessEvent) {
        if !self.has_exited() {
            let _ = self.events.send(event);
        }
    }

    pub fn stdout(&self, line: &str) {
        self.send(ProcessEvent::Stdout(line.to_string()));
    }

    pub fn stderr(&self, line: &str) {
        self.send(ProcessEvent::Stderr(line.to_string()));
    }

    /// Ends the process. Only the first exit is reported.
    pub fn exit(&self, code: Option<i32>) {
        if !self.exited.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(ProcessEvent::Exited(code));
        }
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

/// A node definition that becomes ready on `Listening on` and rejects port `0`.
#[derive(Clone, Debug)]
pub struct TestNode {
    port: u16,
}

impl TestNode {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl InstanceDefinition for TestNode {
    fn name(&self) -> &str {
        "testnode"
    }

    fn host(&self) -> &str {
        "127.0.0.1"
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn command(&self, port: u16) -> Result<ProcessCommand> {
        if port == 0 {
            bail!("port must not be zero");
        }
        Ok(ProcessCommand::new("testnode").args(["--port".to_string(), port.to_string()]))
    }

    fn is_ready(&self, line: &str) -> bool {
        line.starts_with("Listening on")
    }
}

/// Polls the condition until it holds, panicking after five seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    let polling = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), polling)
        .await
        .expect("The condition did not hold in time");
}
