//! EUROMAP63 adapter
//!
//! Owns one session task per configured folder. `start` validates the
//! configuration and spawns the sessions; `stop` drains every session to
//! `ABORT_COMPLETE` (bounded), then cancels whatever is left.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alert::{Alert, AlertKey, AlertSink};
use crate::config::Euromap63Config;
use crate::delivery::{ResultDelivery, ValueSink};
use crate::error::{Em63Error, Result};
use crate::protocol::value::to_set_operand;
use crate::protocol::{CommandBuilder, ReportParser, RequestKind, VariableValue};
use crate::session::{Session, SessionHandle, SessionShared, SessionState, SessionTimings};
use crate::status::ConnectionStatus;
use crate::transport::{join_path, FileTransport};

/// Interval between drain checks while stopping
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Drain checks before the remaining sessions are cancelled
pub const STOP_MAX_CHECKS: u32 = 600;

/// How a stop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every session reached `ABORT_COMPLETE`
    Drained,
    /// The bounded wait expired first
    TimedOut,
}

struct Running {
    shared: SessionShared,
    sessions: Vec<SessionHandle>,
    cancel: CancellationToken,
}

pub struct Euromap63Adapter {
    config: RwLock<Euromap63Config>,
    transport: Arc<dyn FileTransport>,
    sink: Arc<dyn ValueSink>,
    alerts: Arc<dyn AlertSink>,
    status: ConnectionStatus,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for Euromap63Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Euromap63Adapter")
            .field("transport", &self.transport)
            .field("status", &self.status)
            .finish()
    }
}

impl Euromap63Adapter {
    pub fn new(
        config: Euromap63Config,
        transport: Arc<dyn FileTransport>,
        sink: Arc<dyn ValueSink>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            transport,
            sink,
            alerts,
            status: ConnectionStatus::new(),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> Euromap63Config {
        self.config.read().clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.status.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Current state of every session as `(folder, state)`
    pub async fn session_states(&self) -> Vec<(String, SessionState)> {
        match self.running.lock().await.as_ref() {
            Some(running) => running
                .sessions
                .iter()
                .map(|s| (s.folder().to_string(), s.state()))
                .collect(),
            None => Vec::new(),
        }
    }

    pub async fn session_state(&self, folder: &str) -> Option<SessionState> {
        let running = self.running.lock().await;
        running
            .as_ref()?
            .sessions
            .iter()
            .find(|s| s.folder() == folder)
            .map(SessionHandle::state)
    }

    /// Validate the configuration and start one session per folder.
    ///
    /// Calling `start` on a running adapter does nothing.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("EUROMAP63 adapter already running");
            return Ok(());
        }

        let config = self.config();
        if !config.enable {
            info!("EUROMAP63 adapter disabled");
            return Ok(());
        }

        let servers = match config.validate() {
            Ok(servers) => {
                self.alerts.clear(AlertKey::InvalidServerList);
                servers
            },
            Err(e) => {
                error!("EUROMAP63 adapter not started: {}", e);
                self.alerts
                    .raise(Alert::new(AlertKey::InvalidServerList, e.to_string()));
                return Err(e);
            },
        };

        for server in &servers {
            self.status.set(&server.machine_name, false);
        }

        let report_variables = config.report_variables();
        let shared = SessionShared {
            transport: Arc::clone(&self.transport),
            commands: Arc::new(CommandBuilder::new(
                config.session_number,
                config.cyclic_trigger(),
                &report_variables,
            )),
            report_parser: Arc::new(ReportParser::new(report_variables)),
            alarm_variables: Arc::new(
                config
                    .variables
                    .iter()
                    .filter(|v| v.is_alarm_variable())
                    .cloned()
                    .collect(),
            ),
            delivery: Arc::new(ResultDelivery::new(
                &config,
                Arc::clone(&self.sink),
                Arc::clone(&self.alerts),
            )),
            alerts: Arc::clone(&self.alerts),
            status: self.status.clone(),
            timings: SessionTimings::from_config(&config),
        };

        let cancel = CancellationToken::new();
        let sessions: Vec<SessionHandle> = servers
            .into_iter()
            .map(|server| Session::spawn(server, shared.clone(), cancel.child_token()))
            .collect();

        info!(
            "EUROMAP63 adapter started with {} session(s), session number {:04}",
            sessions.len(),
            config.session_number
        );
        *running = Some(Running {
            shared,
            sessions,
            cancel,
        });
        Ok(())
    }

    /// Abort the controller jobs of every session and stop the tasks
    pub async fn stop(&self) -> Result<ShutdownOutcome> {
        let mut guard = self.running.lock().await;
        let Some(running) = guard.take() else {
            self.alerts.clear_all();
            return Ok(ShutdownOutcome::Drained);
        };

        info!("Stopping EUROMAP63 adapter");
        for session in &running.sessions {
            self.status.set(session.machine(), false);
            session.request_shutdown();
        }

        let outcome = wait_for_abort(&running.sessions).await;
        if outcome == ShutdownOutcome::TimedOut {
            let pending: Vec<String> = running
                .sessions
                .iter()
                .filter(|s| s.state() != SessionState::AbortComplete)
                .map(|s| format!("{} ({})", s.folder(), s.state()))
                .collect();
            warn!("Sessions did not finish aborting: {}", pending.join(", "));
        }

        running.cancel.cancel();
        let results = join_all(running.sessions.into_iter().map(SessionHandle::terminate)).await;
        for result in results {
            if let Err(e) = result {
                warn!("Session task ended abnormally: {}", e);
            }
        }

        self.alerts.clear_all();
        info!("EUROMAP63 adapter stopped ({:?})", outcome);
        Ok(outcome)
    }

    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Replace the configuration and restart with it
    pub async fn update_config(&self, config: Euromap63Config) -> Result<()> {
        self.stop().await?;
        *self.config.write() = config;
        self.start().await
    }

    /// Set a controller variable through the folder of a running session.
    ///
    /// Rejected unless the session is in `WAIT_DATA`, so an outstanding
    /// init or abort request is never overwritten.
    pub async fn write_variable(
        &self,
        folder: &str,
        name: &str,
        value: &VariableValue,
    ) -> Result<()> {
        let guard = self.running.lock().await;
        let Some(running) = guard.as_ref() else {
            return Err(Em63Error::validation("adapter is not running"));
        };
        let Some(session) = running.sessions.iter().find(|s| s.folder() == folder) else {
            return Err(self.reject_write(format!("no session for folder {}", folder)));
        };

        let variable = self.config.read().variable(name).cloned();
        let variable = match variable {
            Some(v) if v.is_writable() => v,
            Some(_) => {
                return Err(self.reject_write(format!("variable {} is not writable", name)))
            },
            None => return Err(self.reject_write(format!("unknown variable {}", name))),
        };
        // The request file is only free once initialization has finished
        let state = session.state();
        if state != SessionState::WaitData {
            return Err(self.reject_write(format!(
                "session {} is in {}, not waiting for data",
                folder, state
            )));
        }
        self.alerts.clear(AlertKey::VariableWriteError);

        let commands = &running.shared.commands;
        let files = commands.files();
        let operand = to_set_operand(variable.format, value);
        debug!(
            "{}: SET {} {} ({})",
            folder, variable.report_name, operand, variable.name
        );

        self.write_file(
            &join_path(folder, &files.set_variable_job),
            &commands.set_variable_job(&variable.report_name, &operand),
        )
        .await?;
        self.write_file(
            &join_path(folder, &files.session_request),
            &commands.request(RequestKind::SetVariable),
        )
        .await
    }

    fn reject_write(&self, reason: String) -> Em63Error {
        warn!("Variable write rejected: {}", reason);
        self.alerts
            .raise(Alert::new(AlertKey::VariableWriteError, reason.clone()));
        Em63Error::validation(reason)
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        match self.transport.write_file(path, contents).await {
            Ok(()) => {
                self.alerts.clear(AlertKey::ServerWriteError);
                Ok(())
            },
            Err(e) => {
                self.alerts.raise(Alert::write_error(path, &e));
                Err(e)
            },
        }
    }
}

async fn wait_for_abort(sessions: &[SessionHandle]) -> ShutdownOutcome {
    let mut ticker = tokio::time::interval(STOP_POLL_INTERVAL);
    for _ in 0..STOP_MAX_CHECKS {
        ticker.tick().await;
        if sessions
            .iter()
            .all(|s| s.state() == SessionState::AbortComplete)
        {
            return ShutdownOutcome::Drained;
        }
    }
    ShutdownOutcome::TimedOut
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::alert::TracingAlertSink;
    use crate::config::{Access, VariableDescriptor, VariableFormat};
    use crate::delivery::MemorySink;
    use crate::transport::MemoryTransport;

    fn adapter(list: &str) -> (Euromap63Adapter, Arc<MemoryTransport>, Arc<TracingAlertSink>) {
        let config = Euromap63Config {
            server_machine_name_list: list.to_string(),
            variables: vec![
                VariableDescriptor::new("ActCntCyc", VariableFormat::Uint32),
                VariableDescriptor::new("SetCntMld", VariableFormat::Uint32)
                    .with_report_name("@SetCntMld")
                    .with_access(Access::Write),
            ],
            ..Default::default()
        };
        let transport = Arc::new(MemoryTransport::new());
        let alerts = Arc::new(TracingAlertSink::new());
        let adapter = Euromap63Adapter::new(
            config,
            transport.clone(),
            Arc::new(MemorySink::new()),
            alerts.clone(),
        );
        (adapter, transport, alerts)
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_server_list_fails_start() {
        let (adapter, _, alerts) = adapter(" ");
        assert!(matches!(
            adapter.start().await,
            Err(Em63Error::ConfigError(_))
        ));
        assert!(!adapter.is_running().await);
        assert!(alerts.is_active(AlertKey::InvalidServerList));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let (adapter, _, _) = adapter("Folder-1:Press-1");
        adapter.start().await.unwrap();
        adapter.start().await.unwrap();
        assert_eq!(adapter.session_states().await.len(), 1);
        adapter.stop().await.unwrap();
        assert!(!adapter.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_adapter_does_not_start() {
        let (adapter, transport, _) = adapter("Folder-1");
        let mut config = adapter.config();
        config.enable = false;
        adapter.update_config(config).await.unwrap();
        assert!(!adapter.is_running().await);
        assert!(transport.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_variable_rejections() {
        let (adapter, _, alerts) = adapter("Folder-1:Press-1");
        let value = VariableValue::Integer(5);
        assert!(adapter
            .write_variable("Folder-1", "SetCntMld", &value)
            .await
            .is_err());

        adapter.start().await.unwrap();
        let err = adapter
            .write_variable("Folder-1", "ActCntCyc", &value)
            .await
            .unwrap_err();
        assert!(matches!(err, Em63Error::ValidationError(_)));
        assert!(alerts.is_active(AlertKey::VariableWriteError));

        assert!(adapter
            .write_variable("Folder-9", "SetCntMld", &value)
            .await
            .is_err());
        assert!(adapter
            .write_variable("Folder-1", "Missing", &value)
            .await
            .is_err());
        adapter.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_variable_keeps_pending_connect() {
        // No controller answers, so the session sits in WAIT_CONNECT
        let (adapter, transport, alerts) = adapter("Folder-1:Press-1");
        adapter.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            adapter.session_state("Folder-1").await,
            Some(SessionState::WaitConnect)
        );
        let request = transport.contents("Folder-1/SESS0000.REQ");
        assert_eq!(request.as_deref(), Some("00000000 CONNECT;\r\n"));

        let err = adapter
            .write_variable("Folder-1", "SetCntMld", &VariableValue::Integer(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Em63Error::ValidationError(_)));
        assert!(alerts.is_active(AlertKey::VariableWriteError));

        assert_eq!(transport.contents("Folder-1/SESS0000.REQ"), request);
        assert!(!transport.exists("Folder-1/SETVARIABLE0000.JOB"));
        assert_eq!(
            adapter.session_state("Folder-1").await,
            Some(SessionState::WaitConnect)
        );
        adapter.stop().await.unwrap();
    }
}
