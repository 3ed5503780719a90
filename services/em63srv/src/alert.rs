//! Alert catalog and alert sink
//!
//! Alerts are keyed; raising an already active key only updates its
//! description, and successful operations clear their key again.

use std::fmt;

use dashmap::DashMap;
use tracing::{info, warn};

/// Conditions reported to the alert sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertKey {
    InvalidServerList,
    DatabaseError,
    ServerError,
    ServerWriteError,
    ServerReadError,
    VariableWriteError,
}

impl AlertKey {
    pub const ALL: [AlertKey; 6] = [
        Self::InvalidServerList,
        Self::DatabaseError,
        Self::ServerError,
        Self::ServerWriteError,
        Self::ServerReadError,
        Self::VariableWriteError,
    ];

    /// Stable key string
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidServerList => "invalid-serverMachineNameList",
            Self::DatabaseError => "database-error",
            Self::ServerError => "server-error",
            Self::ServerWriteError => "server-write-error",
            Self::ServerReadError => "server-read-error",
            Self::VariableWriteError => "variable-write-error",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::InvalidServerList => "Euromap 63 Invalid Server / Machine Name list",
            Self::DatabaseError => "Euromap 63 Database Error",
            Self::ServerError => "Euromap 63 Server Error",
            Self::ServerWriteError => "Euromap 63 Server Write Error",
            Self::ServerReadError => "Euromap 63 Server Read Error",
            Self::VariableWriteError => "Euromap 63 Variable Write Error",
        }
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub key: AlertKey,
    pub description: String,
}

impl Alert {
    pub fn new(key: AlertKey, description: impl Into<String>) -> Self {
        Self {
            key,
            description: description.into(),
        }
    }

    pub fn server_error(folder: &str, error: impl fmt::Display) -> Self {
        Self::new(
            AlertKey::ServerError,
            format!("Error listing server folder {}: {}", folder, error),
        )
    }

    pub fn write_error(path: &str, error: impl fmt::Display) -> Self {
        Self::new(
            AlertKey::ServerWriteError,
            format!("Error writing file {} to the server: {}", path, error),
        )
    }

    pub fn read_error(path: &str, error: impl fmt::Display) -> Self {
        Self::new(
            AlertKey::ServerReadError,
            format!("Error reading file {} from the server: {}", path, error),
        )
    }

    pub fn database_error(error: impl fmt::Display) -> Self {
        Self::new(
            AlertKey::DatabaseError,
            format!("Error delivering value: {}", error),
        )
    }
}

/// Receiver of adapter alerts
pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert);

    fn clear(&self, key: AlertKey);

    fn clear_all(&self);
}

/// Alert sink that logs state changes and remembers active alerts
#[derive(Debug, Default)]
pub struct TracingAlertSink {
    active: DashMap<AlertKey, String>,
}

impl TracingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, key: AlertKey) -> bool {
        self.active.contains_key(&key)
    }

    pub fn description(&self, key: AlertKey) -> Option<String> {
        self.active.get(&key).map(|d| d.value().clone())
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl AlertSink for TracingAlertSink {
    fn raise(&self, alert: Alert) {
        let previous = self.active.insert(alert.key, alert.description.clone());
        if previous.as_deref() != Some(alert.description.as_str()) {
            warn!(
                "Alert {} ({}): {}",
                alert.key,
                alert.key.message(),
                alert.description
            );
        }
    }

    fn clear(&self, key: AlertKey) {
        if self.active.remove(&key).is_some() {
            info!("Alert {} cleared", key);
        }
    }

    fn clear_all(&self) {
        for key in AlertKey::ALL {
            self.clear(key);
        }
    }
}
