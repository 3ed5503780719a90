//! Session state machine
//!
//! ```text
//! WAIT_CONNECT -> WAIT_ABORT_REPORT -> WAIT_ABORT_ALARMS -> [WAIT_REPORT_INIT] -> WAIT_ALARM_INIT -> WAIT_DATA
//!                                             |
//!                                             +-- shutting down --> ABORT_COMPLETE
//! ```
//!
//! `WAIT_REPORT_INIT` is skipped when no report variables are configured.
//! A no-data timeout sends any running session back to `WAIT_CONNECT`.
//!
//! [`transition`] is a pure table. The session runner executes the
//! returned [`Action`]; it is the only caller allowed to change state.

use std::fmt;

use crate::protocol::RequestKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    WaitConnect,
    WaitAbortReport,
    WaitAbortAlarms,
    WaitReportInit,
    WaitAlarmInit,
    WaitData,
    AbortComplete,
}

impl SessionState {
    /// Request whose response this state is waiting for
    pub fn awaited_request(self) -> Option<RequestKind> {
        match self {
            Self::WaitConnect => Some(RequestKind::Connect),
            Self::WaitAbortReport => Some(RequestKind::AbortReport),
            Self::WaitAbortAlarms => Some(RequestKind::AbortAlarms),
            Self::WaitReportInit => Some(RequestKind::Report),
            Self::WaitAlarmInit => Some(RequestKind::Alarm),
            Self::WaitData | Self::AbortComplete => None,
        }
    }

    pub fn is_connected(self) -> bool {
        self == Self::WaitData
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WaitConnect => "WAIT_CONNECT",
            Self::WaitAbortReport => "WAIT_ABORT_REPORT",
            Self::WaitAbortAlarms => "WAIT_ABORT_ALARMS",
            Self::WaitReportInit => "WAIT_REPORT_INIT",
            Self::WaitAlarmInit => "WAIT_ALARM_INIT",
            Self::WaitData => "WAIT_DATA",
            Self::AbortComplete => "ABORT_COMPLETE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A response to the outstanding request appeared
    ResponseDetected,
    NoDataTimeout,
    InitTimeout,
    ShutdownRequested,
}

/// Facts about the session the table depends on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionContext {
    pub has_report_variables: bool,
    pub shutting_down: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing to do
    Stay,
    /// Settle, replace the request file with `request`, then enter `next`
    Advance {
        request: RequestKind,
        next: SessionState,
    },
    /// Initialization finished; start watching for data files
    EnterDataWait,
    /// Shutdown drained
    CompleteAbort,
    /// Rewrite every job file and start over from `WAIT_CONNECT`
    Reinitialize,
    /// Init took too long; report the machine as disconnected
    MarkDisconnected,
    /// Abort the running jobs and drain towards `ABORT_COMPLETE`
    BeginAbort,
}

pub fn transition(state: SessionState, event: SessionEvent, ctx: TransitionContext) -> Action {
    use SessionEvent::*;
    use SessionState::*;

    match (state, event) {
        (AbortComplete, _) => Action::Stay,

        (WaitConnect, ResponseDetected) => Action::Advance {
            request: RequestKind::AbortReport,
            next: WaitAbortReport,
        },
        (WaitAbortReport, ResponseDetected) => Action::Advance {
            request: RequestKind::AbortAlarms,
            next: WaitAbortAlarms,
        },
        (WaitAbortAlarms, ResponseDetected) if ctx.shutting_down => Action::CompleteAbort,
        (WaitAbortAlarms, ResponseDetected) if ctx.has_report_variables => Action::Advance {
            request: RequestKind::Report,
            next: WaitReportInit,
        },
        (WaitAbortAlarms, ResponseDetected) | (WaitReportInit, ResponseDetected) => {
            Action::Advance {
                request: RequestKind::Alarm,
                next: WaitAlarmInit,
            }
        },
        (WaitAlarmInit, ResponseDetected) => Action::EnterDataWait,
        (WaitData, ResponseDetected) => Action::Stay,

        (_, NoDataTimeout) if ctx.shutting_down => Action::Stay,
        (_, NoDataTimeout) => Action::Reinitialize,

        (WaitData, InitTimeout) => Action::Stay,
        (_, InitTimeout) if ctx.shutting_down => Action::Stay,
        (_, InitTimeout) => Action::MarkDisconnected,

        (_, ShutdownRequested) if ctx.shutting_down => Action::Stay,
        (_, ShutdownRequested) => Action::BeginAbort,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    fn ctx(has_report_variables: bool, shutting_down: bool) -> TransitionContext {
        TransitionContext {
            has_report_variables,
            shutting_down,
        }
    }

    /// Follow response events from `WAIT_CONNECT` and record the visited states
    fn walk(context: TransitionContext) -> Vec<SessionState> {
        let mut state = SessionState::WaitConnect;
        let mut visited = vec![state];
        for _ in 0..10 {
            match transition(state, SessionEvent::ResponseDetected, context) {
                Action::Advance { next, .. } => state = next,
                Action::EnterDataWait => state = SessionState::WaitData,
                Action::CompleteAbort => state = SessionState::AbortComplete,
                _ => break,
            }
            visited.push(state);
        }
        visited
    }

    #[test]
    fn test_full_sequence_with_report_variables() {
        use SessionState::*;
        assert_eq!(
            walk(ctx(true, false)),
            vec![
                WaitConnect,
                WaitAbortReport,
                WaitAbortAlarms,
                WaitReportInit,
                WaitAlarmInit,
                WaitData
            ]
        );
    }

    #[test]
    fn test_report_init_skipped_without_report_variables() {
        use SessionState::*;
        assert_eq!(
            walk(ctx(false, false)),
            vec![
                WaitConnect,
                WaitAbortReport,
                WaitAbortAlarms,
                WaitAlarmInit,
                WaitData
            ]
        );
    }

    #[test]
    fn test_requests_follow_states() {
        let action = transition(
            SessionState::WaitAbortAlarms,
            SessionEvent::ResponseDetected,
            ctx(true, false),
        );
        assert_eq!(
            action,
            Action::Advance {
                request: RequestKind::Report,
                next: SessionState::WaitReportInit
            }
        );
        assert_eq!(
            SessionState::WaitReportInit.awaited_request(),
            Some(RequestKind::Report)
        );
        assert_eq!(SessionState::WaitData.awaited_request(), None);
    }

    #[test]
    fn test_shutdown_drains_to_abort_complete() {
        let context = ctx(true, false);
        assert_eq!(
            transition(
                SessionState::WaitReportInit,
                SessionEvent::ShutdownRequested,
                context
            ),
            Action::BeginAbort
        );

        let draining = ctx(true, true);
        let mut state = SessionState::WaitAbortReport;
        let mut visited = vec![state];
        while state != SessionState::AbortComplete {
            state = match transition(state, SessionEvent::ResponseDetected, draining) {
                Action::Advance { next, .. } => next,
                Action::CompleteAbort => SessionState::AbortComplete,
                other => panic!("unexpected {:?} in {}", other, state),
            };
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![
                SessionState::WaitAbortReport,
                SessionState::WaitAbortAlarms,
                SessionState::AbortComplete
            ]
        );
    }

    #[test]
    fn test_abort_complete_is_terminal() {
        for event in [
            SessionEvent::ResponseDetected,
            SessionEvent::NoDataTimeout,
            SessionEvent::InitTimeout,
            SessionEvent::ShutdownRequested,
        ] {
            assert_eq!(
                transition(SessionState::AbortComplete, event, ctx(true, true)),
                Action::Stay
            );
        }
    }

    #[test]
    fn test_watchdogs() {
        let running = ctx(true, false);
        assert_eq!(
            transition(SessionState::WaitData, SessionEvent::NoDataTimeout, running),
            Action::Reinitialize
        );
        assert_eq!(
            transition(SessionState::WaitAbortReport, SessionEvent::NoDataTimeout, running),
            Action::Reinitialize
        );
        assert_eq!(
            transition(SessionState::WaitConnect, SessionEvent::InitTimeout, running),
            Action::MarkDisconnected
        );
        assert_eq!(
            transition(SessionState::WaitData, SessionEvent::InitTimeout, running),
            Action::Stay
        );
        assert_eq!(
            transition(
                SessionState::WaitAbortAlarms,
                SessionEvent::NoDataTimeout,
                ctx(true, true)
            ),
            Action::Stay
        );
    }

    #[test]
    fn test_second_shutdown_request_is_ignored() {
        assert_eq!(
            transition(
                SessionState::WaitAbortReport,
                SessionEvent::ShutdownRequested,
                ctx(true, true)
            ),
            Action::Stay
        );
    }

    #[test]
    fn test_display_names() {
        assert_eq!(SessionState::WaitReportInit.to_string(), "WAIT_REPORT_INIT");
        assert_eq!(SessionState::AbortComplete.to_string(), "ABORT_COMPLETE");
        assert!(SessionState::WaitData.is_connected());
    }
}
