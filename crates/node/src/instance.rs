//! The lifecycle supervisor that wraps one node process into a start/stop state machine.
//!
//! ```text
//! idle ──► starting ──► started ──► stopping ──► stopped
//!             │            │                        ▲ │
//!             └────────────┴── crash or kill ───────┘ └──► starting (restart)
//! ```

use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use devnode_common::text::strip_colors;
use devnode_config::SupervisorConfiguration;
use strum::{AsRefStr, Display};
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::Instant,
};
use tracing::{Instrument, debug, error, info, instrument, warn};

use crate::{
    InstanceDefinition,
    error::{InstanceError, StartupFailureCause},
    events::{EventKind, InstanceEvent, ListenerId, Listeners},
    messages::MessageBuffer,
    process::{KillHandle, ProcessAdapter, ProcessEvent},
};

static INSTANCE_COUNT: AtomicU32 = AtomicU32::new(0);

/// How long to wait for an exit when the kill signal was not delivered.
const EXIT_CONFIRMATION_GRACE: Duration = Duration::from_millis(500);

/// The lifecycle state of an [`Instance`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum InstanceStatus {
    Idle,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl InstanceStatus {
    /// Whether a process is (or might still be) alive in this state.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Starting | Self::Started | Self::Stopping)
    }
}

/// Per-call overrides of [`Instance::start`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Takes precedence over the port the instance was created with.
    pub port: Option<u16>,
}

impl StartOptions {
    pub fn with_port(port: u16) -> Self {
        Self { port: Some(port) }
    }
}

/// A supervised developer node.
///
/// An instance owns at most one live process at any time. It is cheap to clone; clones share the
/// same process, listeners and message buffer. Dropping the last clone kills a live process.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

struct InstanceInner {
    id: u32,
    definition: Box<dyn InstanceDefinition>,
    process_adapter: Arc<dyn ProcessAdapter>,
    stop_timeout: Duration,
    listeners: Listeners,
    state: Mutex<InstanceState>,
}

struct InstanceState {
    status: InstanceStatus,
    port: u16,
    messages: MessageBuffer,
    process: Option<LiveProcess>,
}

struct LiveProcess {
    id: Option<u32>,
    kill_handle: KillHandle,
    /// Flips to `true` once the supervision task has handled the exit of the process.
    exited: watch::Receiver<bool>,
}

type Readiness = oneshot::Sender<Result<(), InstanceError>>;

impl Instance {
    pub fn new(
        definition: impl InstanceDefinition,
        process_adapter: Arc<dyn ProcessAdapter>,
        configuration: impl AsRef<SupervisorConfiguration>,
    ) -> Self {
        Self::from_boxed_definition(Box::new(definition), process_adapter, configuration)
    }

    pub(crate) fn from_boxed_definition(
        definition: Box<dyn InstanceDefinition>,
        process_adapter: Arc<dyn ProcessAdapter>,
        configuration: impl AsRef<SupervisorConfiguration>,
    ) -> Self {
        let configuration = configuration.as_ref();
        let port = definition.port();
        Self {
            inner: Arc::new(InstanceInner {
                id: INSTANCE_COUNT.fetch_add(1, Ordering::SeqCst),
                definition,
                process_adapter,
                stop_timeout: configuration.stop_timeout(),
                listeners: Listeners::default(),
                state: Mutex::new(InstanceState {
                    status: InstanceStatus::Idle,
                    port,
                    messages: MessageBuffer::new(configuration.message_capacity),
                    process: None,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.definition.name()
    }

    pub fn host(&self) -> &str {
        self.inner.definition.host()
    }

    /// The port of the current or last run, or the configured port if never started.
    pub fn port(&self) -> u16 {
        self.inner.lock_state().port
    }

    pub fn status(&self) -> InstanceStatus {
        self.inner.lock_state().status
    }

    /// A snapshot of the buffered output lines, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.inner.lock_state().messages.snapshot()
    }

    /// The OS process id of the live process, if any.
    pub fn process_id(&self) -> Option<u32> {
        self.inner
            .lock_state()
            .process
            .as_ref()
            .and_then(|process| process.id)
    }

    /// Subscribes to the events of the given kind.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&InstanceEvent<'_>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.listeners.subscribe(kind, Arc::new(listener))
    }

    /// Removes a subscription, returning whether it existed.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        self.inner.listeners.unsubscribe(kind, id)
    }

    /// Spawns the node and waits until it reports that it is ready.
    ///
    /// Fails with [`InstanceError::AlreadyRunning`] while a run is in progress and with
    /// [`InstanceError::StartupFailure`] if the node writes to stderr or exits before it is
    /// ready. A failed start always leaves the instance stopped with an empty message buffer.
    #[instrument(
        level = "info",
        skip_all,
        fields(instance = self.name(), instance_id = self.inner.id),
        err
    )]
    pub async fn start(&self, options: StartOptions) -> Result<(), InstanceError> {
        let readiness = InstanceInner::begin_run(&self.inner, options)?;
        match readiness.await {
            Ok(result) => result,
            // The supervision task is gone, which only happens once the process is.
            Err(_) => Err(self
                .inner
                .startup_failure(StartupFailureCause::Exited { code: None })),
        }
    }

    /// Kills the node and waits until its exit has been observed.
    ///
    /// Succeeds without doing anything when there is no live process.
    #[instrument(
        level = "info",
        skip_all,
        fields(instance = self.name(), instance_id = self.inner.id),
        err
    )]
    pub async fn stop(&self) -> Result<(), InstanceError> {
        let (kill_handle, mut exited, previous_status) = {
            let mut state = self.inner.lock_state();
            let Some(process) = state.process.as_ref() else {
                state.status = InstanceStatus::Stopped;
                state.messages.clear();
                return Ok(());
            };
            let handles = (
                process.kill_handle.clone(),
                process.exited.clone(),
                state.status,
            );
            state.status = InstanceStatus::Stopping;
            handles
        };

        let delivered = kill_handle.kill().await;
        let wait_duration = match delivered {
            true => self.inner.stop_timeout,
            false => EXIT_CONFIRMATION_GRACE,
        };
        let confirmed = matches!(
            tokio::time::timeout(wait_duration, exited.wait_for(|exited| *exited)).await,
            Ok(Ok(_))
        );
        if confirmed {
            return Ok(());
        }

        let reason = match delivered {
            true => format!("the process did not exit within {wait_duration:?}"),
            false => "the kill signal could not be delivered".to_string(),
        };
        {
            let mut state = self.inner.lock_state();
            if state.status == InstanceStatus::Stopping && state.process.is_some() {
                state.status = previous_status;
            }
        }
        let error = InstanceError::StopFailure {
            name: self.name().to_string(),
            reason,
        };
        error!(kind = error.as_label(), %error, "Failed to stop the instance");
        Err(error)
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("Instance")
            .field("id", &self.inner.id)
            .field("name", &self.name())
            .field("host", &self.host())
            .field("port", &state.port)
            .field("status", &state.status)
            .field("listeners", &self.inner.listeners)
            .finish_non_exhaustive()
    }
}

impl InstanceInner {
    fn lock_state(&self) -> MutexGuard<'_, InstanceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn startup_failure(&self, cause: StartupFailureCause) -> InstanceError {
        InstanceError::StartupFailure {
            name: self.definition.name().to_string(),
            cause,
        }
    }

    /// Spawns the process of a new run and its supervision task.
    fn begin_run(
        self: &Arc<Self>,
        options: StartOptions,
    ) -> Result<oneshot::Receiver<Result<(), InstanceError>>, InstanceError> {
        let mut state = self.lock_state();
        if state.status.is_running() {
            return Err(InstanceError::AlreadyRunning {
                name: self.definition.name().to_string(),
                status: state.status,
            });
        }

        state.messages.clear();
        let port = options.port.unwrap_or_else(|| self.definition.port());
        state.port = port;

        let command = match self.definition.command(port) {
            Ok(command) => command,
            Err(error) => {
                state.status = InstanceStatus::Stopped;
                return Err(
                    self.startup_failure(StartupFailureCause::InvalidParameters(format!(
                        "{error:#}"
                    ))),
                );
            }
        };
        let process = match self.process_adapter.spawn(&command) {
            Ok(process) => process,
            Err(error) => {
                state.status = InstanceStatus::Stopped;
                return Err(self.startup_failure(StartupFailureCause::Spawn(format!("{error:#}"))));
            }
        };
        info!(process_id = ?process.id, port, %command, "Spawned the instance process");

        let (readiness_sender, readiness) = oneshot::channel();
        let (exited_sender, exited) = watch::channel(false);
        state.status = InstanceStatus::Starting;
        state.process = Some(LiveProcess {
            id: process.id,
            kill_handle: process.kill_handle.clone(),
            exited,
        });

        let span = tracing::info_span!(
            "supervise",
            instance = self.definition.name(),
            instance_id = self.id,
            process_id = process.id,
        );
        tokio::spawn(
            supervise(
                Arc::downgrade(self),
                self.definition.name().to_string(),
                process.events,
                process.kill_handle,
                readiness_sender,
                exited_sender,
            )
            .instrument(span),
        );

        Ok(readiness)
    }

    fn record(&self, line: &str) {
        self.lock_state().messages.push(line);
    }

    fn mark_started(&self) -> bool {
        let mut state = self.lock_state();
        if state.status != InstanceStatus::Starting {
            return false;
        }
        state.status = InstanceStatus::Started;
        true
    }

    fn mark_stopping(&self) {
        let mut state = self.lock_state();
        if state.status == InstanceStatus::Starting {
            state.status = InstanceStatus::Stopping;
        }
    }

    fn finish_run(&self) {
        let mut state = self.lock_state();
        state.status = InstanceStatus::Stopped;
        state.process = None;
        state.messages.clear();
    }
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(process) = state.process.take() {
            debug!(instance_id = self.id, "Killing the process of a dropped instance");
            process.kill_handle.start_kill();
        }
    }
}

/// Consumes the events of one run until the process exits.
///
/// This task is the only place where a run ends: it moves the instance to stopped, emits the exit
/// event, releases waiting `stop` calls and finally settles a `start` call that is still pending.
///
/// After a startup fault the process gets the stop timeout to exit, or [`EXIT_CONFIRMATION_GRACE`]
/// when the kill was not delivered. A process still running after that is detached: the run ends
/// as if it had exited and its remaining output is discarded.
async fn supervise(
    instance: Weak<InstanceInner>,
    name: String,
    mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    kill_handle: KillHandle,
    readiness: Readiness,
    exited: watch::Sender<bool>,
) {
    let mut readiness = Some(readiness);
    let mut startup_fault = None::<String>;
    let mut detach_deadline = None::<Instant>;

    let exit_code = loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::time::sleep_until(detach_deadline.unwrap_or_else(Instant::now)),
                if detach_deadline.is_some() =>
            {
                error!("The instance process outlived its startup fault, detaching it");
                break None;
            }
        };
        let (line, is_stdout) = match event {
            Some(ProcessEvent::Stdout(line)) => (strip_colors(&line), true),
            Some(ProcessEvent::Stderr(line)) => (strip_colors(&line), false),
            Some(ProcessEvent::Exited(code)) => break code,
            None => break None,
        };
        // A dropped instance has already requested a kill, keep draining until the exit.
        let Some(instance) = instance.upgrade() else {
            continue;
        };

        instance.record(&line);
        instance.listeners.emit(&InstanceEvent::Message(&line));
        let awaiting_readiness = readiness.is_some() && startup_fault.is_none();
        if is_stdout {
            debug!(%line, "stdout");
            instance.listeners.emit(&InstanceEvent::Stdout(&line));
            if awaiting_readiness && instance.definition.is_ready(&line) && instance.mark_started()
            {
                info!("The instance is ready");
                if let Some(readiness) = readiness.take() {
                    let _ = readiness.send(Ok(()));
                }
            }
        } else {
            debug!(%line, "stderr");
            instance.listeners.emit(&InstanceEvent::Stderr(&line));
            if awaiting_readiness {
                warn!(%line, "The instance wrote to stderr while starting, stopping it");
                instance.mark_stopping();
                startup_fault = Some(line);
                let exit_window = match kill_handle.kill().await {
                    true => instance.stop_timeout,
                    false => EXIT_CONFIRMATION_GRACE,
                };
                detach_deadline = Some(Instant::now() + exit_window);
            }
        }
    };

    info!(?exit_code, "The instance run ended");
    if let Some(instance) = instance.upgrade() {
        instance.finish_run();
        instance.listeners.emit(&InstanceEvent::Exit(exit_code));
    }
    exited.send_replace(true);

    if let Some(readiness) = readiness.take() {
        let cause = match startup_fault {
            Some(line) => StartupFailureCause::Stderr(line),
            None => StartupFailureCause::Exited { code: exit_code },
        };
        let _ = readiness.send(Err(InstanceError::StartupFailure { name, cause }));
    }
}
