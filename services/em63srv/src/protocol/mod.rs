//! EUROMAP63 file contents: command rendering and data file parsing

pub mod alarm;
pub mod commands;
pub mod report;
pub mod value;

pub use alarm::{parse_alarm_log, AlarmDelta, AlarmEntry, AlarmSnapshot};
pub use commands::{CommandBuilder, CyclicTrigger, RequestKind, SessionFiles};
pub use report::{split_header, ReportParser, ReportRow};
pub use value::{convert_value, VariableValue};
