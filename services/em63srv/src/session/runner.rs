//! Per-folder session task
//!
//! Each configured folder gets one tokio task that owns its session state,
//! alarm snapshot and timers. The task waits on whichever of these fires
//! first:
//!
//! - adapter cancellation (hard stop)
//! - shutdown request (drain towards `ABORT_COMPLETE`)
//! - settle deadline of a pending request
//! - no-data watchdog
//! - init watchdog
//! - next directory poll
//!
//! File operations of one session never overlap: every step runs to
//! completion inside the loop before the next timer is considered.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{transition, Action, SessionEvent, SessionState, TransitionContext};
use crate::alert::{Alert, AlertKey, AlertSink};
use crate::config::{Euromap63Config, ServerEntry, VariableDescriptor};
use crate::delivery::ResultDelivery;
use crate::detector::{Listing, ResponseDetector};
use crate::error::Result;
use crate::protocol::{parse_alarm_log, AlarmSnapshot, CommandBuilder, ReportParser, RequestKind};
use crate::status::ConnectionStatus;
use crate::transport::{join_path, FileTransport};

/// Pause the controller needs between consuming a response and the next request
pub const SETTLE_DELAY: Duration = Duration::from_millis(3000);

/// Time allowed from (re)initialization to `WAIT_DATA` before the machine is reported down
pub const INIT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub no_data_timeout: Duration,
    pub init_timeout: Duration,
}

impl SessionTimings {
    pub fn from_config(config: &Euromap63Config) -> Self {
        Self {
            poll_interval: config.polling_interval(),
            settle_delay: SETTLE_DELAY,
            no_data_timeout: config.no_data_timeout(),
            init_timeout: INIT_TIMEOUT,
        }
    }
}

/// Read-only collaborators shared by every session of one adapter
#[derive(Clone)]
pub struct SessionShared {
    pub transport: Arc<dyn FileTransport>,
    pub commands: Arc<CommandBuilder>,
    pub report_parser: Arc<ReportParser>,
    pub alarm_variables: Arc<Vec<VariableDescriptor>>,
    pub delivery: Arc<ResultDelivery>,
    pub alerts: Arc<dyn AlertSink>,
    pub status: ConnectionStatus,
    pub timings: SessionTimings,
}

/// Request to send once the settle delay has passed
#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    at: Instant,
    request: RequestKind,
    next: SessionState,
}

#[derive(Debug, Default)]
struct Timers {
    next_poll: Option<Instant>,
    settle: Option<PendingRequest>,
    no_data: Option<Instant>,
    init: Option<Instant>,
}

impl Timers {
    fn clear(&mut self) {
        *self = Self::default();
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Adapter-side handle of a running session
#[derive(Debug)]
pub struct SessionHandle {
    folder: String,
    machine: String,
    state: watch::Receiver<SessionState>,
    shutdown: CancellationToken,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn machine(&self) -> &str {
        &self.machine
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Start draining: abort the controller jobs, then stop in `ABORT_COMPLETE`
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Stop the task wherever it is and wait for it to exit
    pub async fn terminate(self) -> Result<()> {
        self.cancel.cancel();
        self.task.await?;
        Ok(())
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    folder: String,
    machine: String,
    state: SessionState,
    shutting_down: bool,
    alarms: AlarmSnapshot,
    timers: Timers,
    detector: ResponseDetector,
    shared: SessionShared,
    state_tx: watch::Sender<SessionState>,
}

impl Session {
    /// Spawn the session task; `cancel` stops it without draining
    pub fn spawn(
        entry: ServerEntry,
        shared: SessionShared,
        cancel: CancellationToken,
    ) -> SessionHandle {
        let (state_tx, state_rx) = watch::channel(SessionState::WaitConnect);
        let shutdown = CancellationToken::new();

        let session = Session {
            detector: ResponseDetector::new(Arc::clone(&shared.transport), entry.folder.clone()),
            folder: entry.folder.clone(),
            machine: entry.machine_name.clone(),
            state: SessionState::WaitConnect,
            shutting_down: false,
            alarms: AlarmSnapshot::default(),
            timers: Timers::default(),
            shared,
            state_tx,
        };
        let task = tokio::spawn(session.run(shutdown.clone(), cancel.clone()));

        SessionHandle {
            folder: entry.folder,
            machine: entry.machine_name,
            state: state_rx,
            shutdown,
            cancel,
            task,
        }
    }

    async fn run(mut self, shutdown: CancellationToken, cancel: CancellationToken) {
        info!("Session {} ({}) starting", self.folder, self.machine);
        self.reinitialize().await;

        loop {
            let settle_at = self.timers.settle.map(|p| p.at);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = shutdown.cancelled(), if !self.shutting_down => {
                    let action = transition(
                        self.state,
                        SessionEvent::ShutdownRequested,
                        self.context(),
                    );
                    self.shutting_down = true;
                    self.apply(action).await;
                },
                _ = sleep_until_some(settle_at) => {
                    if let Some(pending) = self.timers.settle.take() {
                        self.send_pending(pending).await;
                    }
                },
                _ = sleep_until_some(self.timers.no_data) => {
                    self.timers.no_data = None;
                    self.handle(SessionEvent::NoDataTimeout).await;
                },
                _ = sleep_until_some(self.timers.init) => {
                    self.timers.init = None;
                    self.handle(SessionEvent::InitTimeout).await;
                },
                _ = sleep_until_some(self.timers.next_poll) => {
                    self.timers.next_poll = Some(Instant::now() + self.shared.timings.poll_interval);
                    self.poll().await;
                },
            }
        }

        self.timers.clear();
        debug!("Session {} stopped in {}", self.folder, self.state);
    }

    fn context(&self) -> TransitionContext {
        TransitionContext {
            has_report_variables: self.shared.commands.has_report_variables(),
            shutting_down: self.shutting_down,
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!("Session {}: {} -> {}", self.folder, self.state, next);
            self.state = next;
            self.state_tx.send_replace(next);
        }
    }

    async fn handle(&mut self, event: SessionEvent) {
        let action = transition(self.state, event, self.context());
        self.apply(action).await;
    }

    async fn apply(&mut self, action: Action) {
        match action {
            Action::Stay => {},
            Action::Advance { request, next } => {
                debug!(
                    "Session {}: {} answered, {} follows in {:?}",
                    self.folder, self.state, request, self.shared.timings.settle_delay
                );
                self.timers.next_poll = None;
                self.timers.settle = Some(PendingRequest {
                    at: Instant::now() + self.shared.timings.settle_delay,
                    request,
                    next,
                });
            },
            Action::EnterDataWait => {
                self.arm_no_data();
                self.timers.init = None;
                self.alarms.clear();
                self.set_state(SessionState::WaitData);
                self.shared.status.set(&self.machine, true);
                info!("Session {} ({}) waiting for data", self.folder, self.machine);
                self.shared
                    .delivery
                    .reset_alarms(&self.machine, &self.shared.alarm_variables)
                    .await;
            },
            Action::CompleteAbort => {
                self.timers.clear();
                self.set_state(SessionState::AbortComplete);
                info!("Session {} ({}) aborted", self.folder, self.machine);
            },
            Action::Reinitialize => {
                warn!(
                    "Session {} ({}): no data for {:?} in {}, reinitializing",
                    self.folder, self.machine, self.shared.timings.no_data_timeout, self.state
                );
                self.reinitialize().await;
            },
            Action::MarkDisconnected => {
                warn!(
                    "Session {} ({}) still in {} after {:?}",
                    self.folder, self.machine, self.state, self.shared.timings.init_timeout
                );
                self.shared.status.set(&self.machine, false);
            },
            Action::BeginAbort => self.begin_abort().await,
        }
    }

    fn arm_no_data(&mut self) {
        if !self.shutting_down {
            self.timers.no_data = Some(Instant::now() + self.shared.timings.no_data_timeout);
        }
    }

    fn resume_polling(&mut self) {
        self.timers.next_poll = Some(Instant::now() + self.shared.timings.poll_interval);
    }

    // ------------------------------------------------------------------------
    // Steps
    // ------------------------------------------------------------------------

    /// Rewrite every job file and send `CONNECT` again
    async fn reinitialize(&mut self) {
        self.timers.clear();
        self.set_state(SessionState::WaitConnect);

        let commands = Arc::clone(&self.shared.commands);
        let files = commands.files();

        for name in [&files.report_data, &files.alarm_data] {
            self.delete_quietly(&join_path(&self.folder, name)).await;
        }

        let mut written = true;
        for (name, contents) in commands.init_jobs() {
            if !self.write(name, &contents).await {
                written = false;
                break;
            }
        }

        if written {
            self.remove_session_files().await;
            if self
                .write(&files.session_request, &commands.request(RequestKind::Connect))
                .await
            {
                self.resume_polling();
            }
        }

        self.arm_no_data();
        self.timers.init = Some(Instant::now() + self.shared.timings.init_timeout);
    }

    /// Replace the request file once the settle delay has passed
    async fn send_pending(&mut self, pending: PendingRequest) {
        let commands = Arc::clone(&self.shared.commands);
        self.remove_session_files().await;

        let sent = self
            .write(
                &commands.files().session_request,
                &commands.request(pending.request),
            )
            .await;

        self.resume_polling();
        self.arm_no_data();
        if sent {
            self.set_state(pending.next);
        } else if self.shutting_down {
            self.retry_while_draining(pending.request, pending.next);
        }
    }

    /// Draining has no no-data watchdog, so a failed request retries on the poll interval
    fn retry_while_draining(&mut self, request: RequestKind, next: SessionState) {
        warn!(
            "Session {}: {} not sent, retrying in {:?}",
            self.folder, request, self.shared.timings.poll_interval
        );
        self.timers.settle = Some(PendingRequest {
            at: Instant::now() + self.shared.timings.poll_interval,
            request,
            next,
        });
    }

    async fn begin_abort(&mut self) {
        info!("Session {} ({}) aborting jobs", self.folder, self.machine);
        self.timers.clear();
        self.shared.status.set(&self.machine, false);

        let commands = Arc::clone(&self.shared.commands);
        let files = commands.files();
        self.remove_session_files().await;

        if !self
            .write(&files.abort_report_job, &commands.abort_report_job())
            .await
        {
            warn!(
                "Session {} ({}): abort job not written, jobs stay active",
                self.folder, self.machine
            );
            self.resume_polling();
            return;
        }

        self.set_state(SessionState::WaitAbortReport);
        if !self
            .write(
                &files.session_request,
                &commands.request(RequestKind::AbortReport),
            )
            .await
        {
            self.retry_while_draining(RequestKind::AbortReport, SessionState::WaitAbortReport);
        }
        self.resume_polling();
    }

    async fn poll(&mut self) {
        let listing = match self.detector.scan().await {
            Ok(listing) => {
                self.shared.alerts.clear(AlertKey::ServerError);
                listing
            },
            Err(e) => {
                debug!("Session {}: listing failed: {}", self.folder, e);
                self.shared
                    .alerts
                    .raise(Alert::server_error(&self.folder, &e));
                return;
            },
        };

        match self.state {
            SessionState::WaitData => self.collect_data(&listing).await,
            SessionState::AbortComplete => {},
            state => {
                let commands = Arc::clone(&self.shared.commands);
                if let Some(response) = listing.response_to(&commands.files().session_request) {
                    debug!(
                        "Session {}: {} found while in {}",
                        self.folder, response.name, state
                    );
                    self.handle(SessionEvent::ResponseDetected).await;
                }
            },
        }
    }

    /// Read, deliver and remove whichever data files are present
    async fn collect_data(&mut self, listing: &Listing) {
        let commands = Arc::clone(&self.shared.commands);
        let files = commands.files();

        if let Some(entry) = listing.file(&files.report_data) {
            self.arm_no_data();
            if let Some(text) = self.read(&entry.path).await {
                let values = self.shared.report_parser.parse(&text);
                self.shared
                    .delivery
                    .deliver_report(&self.machine, values, entry.modified)
                    .await;
                self.delete_quietly(&entry.path).await;
            }
        }

        if let Some(entry) = listing.file(&files.alarm_data) {
            self.arm_no_data();
            if let Some(text) = self.read(&entry.path).await {
                let delta = self.alarms.update(&parse_alarm_log(&text));
                self.shared
                    .delivery
                    .deliver_alarms(
                        &self.machine,
                        &self.shared.alarm_variables,
                        &delta,
                        entry.modified,
                    )
                    .await;
                self.delete_quietly(&entry.path).await;
            }
        }
    }

    // ------------------------------------------------------------------------
    // File helpers
    // ------------------------------------------------------------------------

    /// Remove the request and any response so the next answer is unambiguous
    async fn remove_session_files(&self) {
        let base = &self.shared.commands.files().session_base;
        match self.detector.scan().await {
            Ok(listing) => {
                for entry in listing.with_base_name(base) {
                    self.delete_quietly(&entry.path).await;
                }
            },
            Err(e) => debug!("Session {}: cannot list for cleanup: {}", self.folder, e),
        }
    }

    async fn write(&self, name: &str, contents: &str) -> bool {
        let path = join_path(&self.folder, name);
        match self.shared.transport.write_file(&path, contents).await {
            Ok(()) => {
                self.shared.alerts.clear(AlertKey::ServerWriteError);
                true
            },
            Err(e) => {
                warn!("Session {}: writing {} failed: {}", self.folder, name, e);
                self.shared.alerts.raise(Alert::write_error(&path, &e));
                false
            },
        }
    }

    async fn read(&self, path: &str) -> Option<String> {
        match self.shared.transport.read_file(path).await {
            Ok(text) => {
                self.shared.alerts.clear(AlertKey::ServerReadError);
                Some(text)
            },
            Err(e) => {
                warn!("Session {}: reading {} failed: {}", self.folder, path, e);
                self.shared.alerts.raise(Alert::read_error(path, &e));
                None
            },
        }
    }

    async fn delete_quietly(&self, path: &str) {
        if let Err(e) = self.shared.transport.delete_file(path).await {
            debug!("Session {}: delete {} skipped: {}", self.folder, path, e);
        }
    }
}
