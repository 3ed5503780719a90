//! Per-folder EUROMAP 63 sessions

pub mod runner;
pub mod state;

pub use runner::{Session, SessionHandle, SessionShared, SessionTimings, INIT_TIMEOUT, SETTLE_DELAY};
pub use state::{transition, Action, SessionEvent, SessionState, TransitionContext};
