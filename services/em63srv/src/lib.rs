//! EUROMAP63 file-exchange adapter
//!
//! Talks to injection-molding machine controllers through a shared folder:
//! job and request files are written for the controller, response, report
//! and alarm files are picked up by polling. Every folder runs its own
//! session state machine; parsed values go to a [`ValueSink`].
//!
//! ```text
//! config ──► Euromap63Adapter ──► Session (one task per folder)
//!                                   │  CommandBuilder / ResponseDetector
//!                                   ▼
//!                      FileTransport ◄──► controller
//!                                   │
//!                  ReportParser / alarm log ──► ResultDelivery ──► ValueSink
//! ```

pub mod adapter;
pub mod alert;
pub mod config;
pub mod delivery;
pub mod detector;
pub mod error;
pub mod protocol;
pub mod session;
pub mod status;
pub mod transport;

pub use adapter::{Euromap63Adapter, ShutdownOutcome};
pub use alert::{Alert, AlertKey, AlertSink, TracingAlertSink};
pub use config::{Euromap63Config, ServerEntry, ServiceConfig, VariableDescriptor};
pub use delivery::{CombinedResult, MemorySink, ResultDelivery, TracingValueSink, ValueSink};
pub use error::{Em63Error, Result};
pub use protocol::VariableValue;
pub use session::SessionState;
pub use status::ConnectionStatus;
pub use transport::{FileTransport, FolderTransport, MemoryTransport};
