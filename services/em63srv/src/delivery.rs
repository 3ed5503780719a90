//! Value delivery
//!
//! Values are handed to a [`ValueSink`] either one by one or, when the
//! adapter is configured to deliver entire responses, as one
//! [`CombinedResult`] per report or alarm cycle.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alert::{Alert, AlertKey, AlertSink};
use crate::config::{AlarmCodeChanged, Euromap63Config, TimestampFields, VariableDescriptor};
use crate::error::{Em63Error, Result};
use crate::protocol::{AlarmDelta, VariableValue};

/// Key that suppresses timestamp injection when present in a combined result
const TIMESTAMP_KEY: &str = "timestamp";

/// Naive formats tried for payload timestamps, interpreted as UTC
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Receiver of converted variable values
#[async_trait]
pub trait ValueSink: Send + Sync {
    async fn deliver(
        &self,
        machine: &str,
        variable: &VariableDescriptor,
        value: VariableValue,
    ) -> Result<()>;
}

/// All values of one cycle, in delivery order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CombinedResult {
    #[serde(flatten)]
    pub values: IndexMap<String, VariableValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

// ============================================================================
// Timestamps
// ============================================================================

/// Where the timestamp of a combined result comes from
#[derive(Debug, Clone, Default)]
pub struct TimestampPolicy {
    pub fields: TimestampFields,
    pub use_file_date: bool,
    pub utc_offset_ms: i64,
}

impl TimestampPolicy {
    pub fn from_config(config: &Euromap63Config) -> Self {
        Self {
            fields: config.timestamp_fields(),
            use_file_date: config.use_filedate_for_timestamp_date,
            utc_offset_ms: config.utc_offset_ms(),
        }
    }

    /// Payload fields win over the file date; the UTC offset applies to both
    pub fn resolve(
        &self,
        values: &IndexMap<String, VariableValue>,
        file_time: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let base = match (&self.fields.primary, &self.fields.secondary) {
            (Some(date_field), Some(time_field)) => {
                let date = normalize_date(field_text(values, date_field));
                let time = field_text(values, time_field);
                if date.is_empty() || time.is_empty() {
                    None
                } else {
                    parse_datetime(&format!("{} {}", date, time))
                }
            },
            (Some(field), None) => parse_datetime(&field_text(values, field)),
            _ if self.use_file_date => file_time,
            _ => None,
        }?;
        Some(base + chrono::Duration::milliseconds(self.utc_offset_ms))
    }
}

fn field_text(values: &IndexMap<String, VariableValue>, name: &str) -> String {
    values.get(name).map(|v| v.to_string()).unwrap_or_default()
}

/// `YYYYMMDD` -> `YYYY-MM-DD`; anything else is passed through
fn normalize_date(date: String) -> String {
    if date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit()) {
        format!("{}-{}-{}", &date[..4], &date[4..6], &date[6..])
    } else {
        date
    }
}

fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Delivery
// ============================================================================

/// Routes parsed values to the value sink in the configured mode
pub struct ResultDelivery {
    sink: Arc<dyn ValueSink>,
    alerts: Arc<dyn AlertSink>,
    combined: bool,
    timestamps: TimestampPolicy,
    combined_variable: VariableDescriptor,
}

impl std::fmt::Debug for ResultDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultDelivery")
            .field("combined", &self.combined)
            .field("timestamps", &self.timestamps)
            .finish()
    }
}

impl ResultDelivery {
    pub fn new(
        config: &Euromap63Config,
        sink: Arc<dyn ValueSink>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            sink,
            alerts,
            combined: config.deliver_entire_response,
            timestamps: TimestampPolicy::from_config(config),
            combined_variable: VariableDescriptor::combined_result(),
        }
    }

    pub fn is_combined(&self) -> bool {
        self.combined
    }

    async fn emit(&self, machine: &str, variable: &VariableDescriptor, value: VariableValue) {
        match self.sink.deliver(machine, variable, value).await {
            Ok(()) => self.alerts.clear(AlertKey::DatabaseError),
            Err(e) => {
                warn!("{}: delivering {} failed: {}", machine, variable.name, e);
                self.alerts.raise(Alert::database_error(e));
            },
        }
    }

    async fn emit_combined(
        &self,
        machine: &str,
        values: IndexMap<String, VariableValue>,
        file_time: Option<DateTime<Utc>>,
    ) {
        if values.is_empty() {
            return;
        }
        let timestamp = if values.contains_key(TIMESTAMP_KEY) {
            None
        } else {
            self.timestamps.resolve(&values, file_time)
        };
        let result = CombinedResult { values, timestamp };
        self.emit(
            machine,
            &self.combined_variable,
            VariableValue::Combined(result),
        )
        .await;
    }

    /// Deliver the values of one report file
    pub async fn deliver_report(
        &self,
        machine: &str,
        values: Vec<(&VariableDescriptor, VariableValue)>,
        file_time: Option<DateTime<Utc>>,
    ) {
        debug!("{}: report with {} values", machine, values.len());
        if self.combined {
            let map = values
                .into_iter()
                .map(|(v, value)| (v.name.clone(), value))
                .collect();
            self.emit_combined(machine, map, file_time).await;
        } else {
            for (variable, value) in values {
                self.emit(machine, variable, value).await;
            }
        }
    }

    /// Deliver one alarm cycle to every alarm variable
    pub async fn deliver_alarms(
        &self,
        machine: &str,
        variables: &[VariableDescriptor],
        delta: &AlarmDelta,
        file_time: Option<DateTime<Utc>>,
    ) {
        if !delta.activated.is_empty() || !delta.deactivated.is_empty() {
            info!(
                "{}: alarms activated {:?}, deactivated {:?}",
                machine, delta.activated, delta.deactivated
            );
        }

        if self.combined {
            let mut map = IndexMap::new();
            for variable in variables {
                let value = match (variable.alarm_code, variable.alarm_code_changed) {
                    (true, _) if variable.array => Some(VariableValue::Text(
                        VariableValue::IntegerArray(delta.current.clone()).to_string(),
                    )),
                    (true, _) => Some(VariableValue::Integer(delta.last_code)),
                    (false, AlarmCodeChanged::Activated) => combined_codes(&delta.activated),
                    (false, AlarmCodeChanged::Deactivated) => combined_codes(&delta.deactivated),
                    (false, AlarmCodeChanged::None) => None,
                };
                if let Some(value) = value {
                    map.insert(variable.name.clone(), value);
                }
            }
            self.emit_combined(machine, map, file_time).await;
            return;
        }

        for variable in variables {
            match (variable.alarm_code, variable.alarm_code_changed) {
                (true, _) if variable.array => {
                    let value = VariableValue::IntegerArray(delta.current.clone());
                    self.emit(machine, variable, value).await;
                },
                (true, _) => {
                    self.emit(machine, variable, VariableValue::Integer(delta.last_code))
                        .await;
                },
                (false, AlarmCodeChanged::Activated) => {
                    for code in &delta.activated {
                        self.emit(machine, variable, VariableValue::Integer(*code))
                            .await;
                    }
                },
                (false, AlarmCodeChanged::Deactivated) => {
                    for code in &delta.deactivated {
                        self.emit(machine, variable, VariableValue::Integer(*code))
                            .await;
                    }
                },
                (false, AlarmCodeChanged::None) => {},
            }
        }
    }

    /// Clear alarm-code variables after a (re)connect
    pub async fn reset_alarms(&self, machine: &str, variables: &[VariableDescriptor]) {
        let alarm_vars = variables.iter().filter(|v| v.alarm_code);
        if self.combined {
            let map = alarm_vars
                .map(|v| {
                    let value = if v.array {
                        VariableValue::Text(String::new())
                    } else {
                        VariableValue::Integer(0)
                    };
                    (v.name.clone(), value)
                })
                .collect();
            self.emit_combined(machine, map, None).await;
        } else {
            for variable in alarm_vars {
                let value = if variable.array {
                    VariableValue::IntegerArray(Vec::new())
                } else {
                    VariableValue::Integer(0)
                };
                self.emit(machine, variable, value).await;
            }
        }
    }
}

/// Single code as a number, several as JSON text, none at all as nothing
fn combined_codes(codes: &[i64]) -> Option<VariableValue> {
    match codes {
        [] => None,
        [code] => Some(VariableValue::Integer(*code)),
        _ => Some(VariableValue::Text(
            VariableValue::IntegerArray(codes.to_vec()).to_string(),
        )),
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Logs every value; used by the service binary
#[derive(Debug, Default)]
pub struct TracingValueSink;

#[async_trait]
impl ValueSink for TracingValueSink {
    async fn deliver(
        &self,
        machine: &str,
        variable: &VariableDescriptor,
        value: VariableValue,
    ) -> Result<()> {
        info!("{} {} = {}", machine, variable.name, value);
        Ok(())
    }
}

/// One value received by a [`MemorySink`]
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub machine: String,
    pub variable: String,
    pub value: VariableValue,
}

/// Keeps delivered values in memory; can be switched to reject them
#[derive(Debug, Default)]
pub struct MemorySink {
    delivered: Mutex<Vec<Delivered>>,
    failing: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().clone()
    }

    /// Values delivered for one variable name, oldest first
    pub fn values_of(&self, variable: &str) -> Vec<VariableValue> {
        self.delivered
            .lock()
            .iter()
            .filter(|d| d.variable == variable)
            .map(|d| d.value.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.delivered.lock().clear();
    }
}

#[async_trait]
impl ValueSink for MemorySink {
    async fn deliver(
        &self,
        machine: &str,
        variable: &VariableDescriptor,
        value: VariableValue,
    ) -> Result<()> {
        if *self.failing.lock() {
            return Err(Em63Error::sink(format!("{} rejected", variable.name)));
        }
        self.delivered.lock().push(Delivered {
            machine: machine.to_string(),
            variable: variable.name.clone(),
            value,
        });
        Ok(())
    }
}
