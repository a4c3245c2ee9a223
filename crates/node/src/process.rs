use std::{
    fmt::Display,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use anyhow::{Context as _, Result};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
    sync::{mpsc, oneshot},
};
use tracing::{debug, trace};

/// The program and arguments that a [`ProcessAdapter`] is asked to spawn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ProcessCommand {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl Display for ProcessCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in self.args.iter() {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Something observed on a spawned process. [`ProcessEvent::Exited`] is always the last event
/// of a process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessEvent {
    Stdout(String),
    Stderr(String),
    /// The exit code of the process, `None` when it was terminated by a signal.
    Exited(Option<i32>),
}

/// A running process as handed out by a [`ProcessAdapter`].
#[derive(Debug)]
pub struct SpawnedProcess {
    /// The OS process id, if the adapter has one.
    pub id: Option<u32>,
    /// The line delimited output of the process followed by its exit.
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
    pub kill_handle: KillHandle,
}

/// Requests the termination of a spawned process.
///
/// Every request is answered by the side owning the process with whether a signal was actually
/// delivered. Once the process has been reaped the requests go unanswered and [`KillHandle::kill`]
/// returns `false`.
#[derive(Clone, Debug)]
pub struct KillHandle {
    requests: mpsc::UnboundedSender<oneshot::Sender<bool>>,
}

impl KillHandle {
    /// Creates a handle along with the receiving end of its kill requests.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<oneshot::Sender<bool>>) {
        let (requests, receiver) = mpsc::unbounded_channel();
        (Self { requests }, receiver)
    }

    /// Sends a kill signal to the process and returns whether it was delivered.
    pub async fn kill(&self) -> bool {
        let (reply_sender, reply) = oneshot::channel();
        if self.requests.send(reply_sender).is_err() {
            return false;
        }
        reply.await.unwrap_or(false)
    }

    /// Sends a kill signal without waiting for it to be acknowledged.
    pub fn start_kill(&self) {
        let (reply_sender, _) = oneshot::channel();
        let _ = self.requests.send(reply_sender);
    }
}

/// The side-effecting boundary of the supervisor: spawns commands and reports on them.
pub trait ProcessAdapter: Send + Sync {
    fn spawn(&self, command: &ProcessCommand) -> Result<SpawnedProcess>;
}

/// A [`ProcessAdapter`] spawning real OS processes on the tokio runtime.
///
/// The stdout and stderr pipes are split into lines. Output that is still buffered in the pipes
/// when the process exits is drained for at most [`TokioProcessAdapter::OUTPUT_DRAIN_DURATION`]
/// before the exit is reported, since grandchildren may keep the pipes open.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioProcessAdapter;

impl TokioProcessAdapter {
    pub const OUTPUT_DRAIN_DURATION: Duration = Duration::from_millis(250);
}

impl ProcessAdapter for TokioProcessAdapter {
    fn spawn(&self, command: &ProcessCommand) -> Result<SpawnedProcess> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn `{command}`"))?;

        let stdout = child.stdout.take().context("stdout of the child is not piped")?;
        let stderr = child.stderr.take().context("stderr of the child is not piped")?;
        let id = child.id();

        let (events_sender, events) = mpsc::unbounded_channel();
        let (kill_handle, kill_requests) = KillHandle::new();
        tokio::spawn(watch_child(
            child,
            stdout,
            stderr,
            events_sender,
            kill_requests,
        ));

        debug!(?id, %command, "Spawned process");
        Ok(SpawnedProcess {
            id,
            events,
            kill_handle,
        })
    }
}

async fn watch_child(
    mut child: Child,
    stdout: impl AsyncRead + Unpin,
    stderr: impl AsyncRead + Unpin,
    events: mpsc::UnboundedSender<ProcessEvent>,
    mut kill_requests: mpsc::UnboundedReceiver<oneshot::Sender<bool>>,
) {
    let mut stdout = BufReader::new(stdout).split(b'\n');
    let mut stderr = BufReader::new(stderr).split(b'\n');
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut kill_requests_open = true;

    let exit_status = loop {
        tokio::select! {
            segment = stdout.next_segment(), if stdout_open => match segment {
                Ok(Some(segment)) => {
                    let _ = events.send(ProcessEvent::Stdout(decode_line(&segment)));
                }
                _ => stdout_open = false,
            },
            segment = stderr.next_segment(), if stderr_open => match segment {
                Ok(Some(segment)) => {
                    let _ = events.send(ProcessEvent::Stderr(decode_line(&segment)));
                }
                _ => stderr_open = false,
            },
            request = kill_requests.recv(), if kill_requests_open => match request {
                Some(reply) => {
                    let delivered = child.start_kill().is_ok();
                    trace!(delivered, "Handled kill request");
                    let _ = reply.send(delivered);
                }
                None => kill_requests_open = false,
            },
            exit_status = child.wait() => break exit_status,
        }
    };
    // The process is reaped, pending and future kill requests report that nothing was delivered.
    drop(kill_requests);

    let drain = async {
        while stdout_open || stderr_open {
            tokio::select! {
                segment = stdout.next_segment(), if stdout_open => match segment {
                    Ok(Some(segment)) => {
                        let _ = events.send(ProcessEvent::Stdout(decode_line(&segment)));
                    }
                    _ => stdout_open = false,
                },
                segment = stderr.next_segment(), if stderr_open => match segment {
                    Ok(Some(segment)) => {
                        let _ = events.send(ProcessEvent::Stderr(decode_line(&segment)));
                    }
                    _ => stderr_open = false,
                },
            }
        }
    };
    let _ = tokio::time::timeout(TokioProcessAdapter::OUTPUT_DRAIN_DURATION, drain).await;

    let code = match exit_status {
        Ok(exit_status) => exit_status.code(),
        Err(error) => {
            debug!(%error, "Failed to wait for the process to exit");
            None
        }
    };
    let _ = events.send(ProcessEvent::Exited(code));
}

fn decode_line(segment: &[u8]) -> String {
    let segment = segment.strip_suffix(b"\r").unwrap_or(segment);
    String::from_utf8_lossy(segment).into_owned()
}
