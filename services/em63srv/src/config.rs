//! Adapter configuration
//!
//! Loaded from YAML through figment with `EM63_` environment overrides
//! (nested keys split on `__`, e.g. `EM63_ADAPTER__CYCLIC_TIME=30`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Em63Error, Result};
use crate::protocol::commands::CyclicTrigger;

/// Name of the synthetic variable that carries a combined result
pub const COMBINED_RESULT_NAME: &str = "CombinedResult";

/// Highest session number that fits the 4-digit file suffix
pub const MAX_SESSION_NUMBER: u16 = 9999;

const MIN_NO_DATA_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_NO_DATA_TIMEOUT: Duration = Duration::from_secs(15 * 60);

// ============================================================================
// Variable model
// ============================================================================

/// How the report job is triggered on the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CyclicType {
    /// Every `cyclic_time` seconds
    #[default]
    Time,
    /// Every `cyclic_shot_count` machine shots
    Shot,
}

/// Primitive type of a configured variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableFormat {
    Char,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
    Bool,
}

/// Which alarm delta a variable receives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AlarmCodeChanged {
    #[default]
    #[serde(alias = "none")]
    None,
    #[serde(alias = "activated")]
    Activated,
    #[serde(alias = "deactivated")]
    Deactivated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Access {
    #[default]
    Read,
    Write,
}

/// One configured machine variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDescriptor {
    /// Internal identifier, used as the key towards the value sink
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub format: VariableFormat,
    /// Tag used on the controller side (report columns, SET statements)
    #[serde(default)]
    pub report_name: String,
    #[serde(default)]
    pub array: bool,
    /// Receives the current alarm code (scalar) or the alarm list (array)
    #[serde(default)]
    pub alarm_code: bool,
    #[serde(default)]
    pub alarm_code_changed: AlarmCodeChanged,
    #[serde(default)]
    pub access: Access,
}

impl VariableDescriptor {
    pub fn new(name: impl Into<String>, format: VariableFormat) -> Self {
        Self {
            name: name.into(),
            description: None,
            format,
            report_name: String::new(),
            array: false,
            alarm_code: false,
            alarm_code_changed: AlarmCodeChanged::None,
            access: Access::Read,
        }
    }

    pub fn with_report_name(mut self, report_name: impl Into<String>) -> Self {
        self.report_name = report_name.into();
        self
    }

    pub fn with_array(mut self, array: bool) -> Self {
        self.array = array;
        self
    }

    pub fn with_alarm_code(mut self) -> Self {
        self.alarm_code = true;
        self
    }

    pub fn with_alarm_code_changed(mut self, changed: AlarmCodeChanged) -> Self {
        self.alarm_code_changed = changed;
        self
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// The synthetic variable a combined result is delivered under
    pub fn combined_result() -> Self {
        Self::new(COMBINED_RESULT_NAME, VariableFormat::Char).with_array(true)
    }

    pub fn is_alarm_variable(&self) -> bool {
        self.alarm_code || self.alarm_code_changed != AlarmCodeChanged::None
    }

    /// Variables filled from the report data file
    pub fn is_report_variable(&self) -> bool {
        !self.is_alarm_variable() && self.name != COMBINED_RESULT_NAME && self.access == Access::Read
    }

    pub fn is_writable(&self) -> bool {
        self.access == Access::Write && !self.report_name.is_empty()
    }
}

// ============================================================================
// Server / machine list
// ============================================================================

/// One shared folder and the machine name its values are published under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub folder: String,
    pub machine_name: String,
}

/// Parse `folder:name` pairs separated by commas.
///
/// A folder listed without a name is published as `<machine_name>-<folder>`.
pub fn parse_server_machine_list(list: &str, machine_name: &str) -> Result<Vec<ServerEntry>> {
    if list.trim().is_empty() {
        return Err(Em63Error::config("server/machine name list is empty"));
    }

    let mut entries = Vec::new();
    for item in list.split(',') {
        let parts: Vec<&str> = item.split(':').map(str::trim).collect();
        let entry = match parts.as_slice() {
            [folder, name] if !folder.is_empty() && !name.is_empty() => ServerEntry {
                folder: (*folder).to_string(),
                machine_name: (*name).to_string(),
            },
            [folder] if !folder.is_empty() => ServerEntry {
                folder: (*folder).to_string(),
                machine_name: format!("{}-{}", machine_name, folder),
            },
            _ => {
                return Err(Em63Error::config(format!(
                    "invalid server/machine name entry '{}'",
                    item.trim()
                )))
            },
        };
        entries.push(entry);
    }

    Ok(entries)
}

// ============================================================================
// Timestamp fields
// ============================================================================

/// Payload fields that carry the combined-result timestamp
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimestampFields {
    /// Date, or a complete date/time when used alone
    pub primary: Option<String>,
    /// Time of day
    pub secondary: Option<String>,
}

impl TimestampFields {
    /// Only the first two non-empty names count
    pub fn parse(fields: &str) -> Self {
        let mut names = fields
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            primary: names.next(),
            secondary: names.next(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none()
    }
}

// ============================================================================
// Adapter configuration
// ============================================================================

/// Settings of one EUROMAP63 adapter instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Euromap63Config {
    /// Disabled adapters start as a no-op
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Machine definition name, prefix for folders listed without a name
    #[serde(default = "default_machine_name")]
    pub machine_name: String,
    /// `folder:name` pairs separated by commas
    #[serde(default)]
    pub server_machine_name_list: String,
    #[serde(default)]
    pub session_number: u16,
    #[serde(default)]
    pub cyclic_type: CyclicType,
    /// Report period in seconds
    #[serde(default = "default_cyclic_time")]
    pub cyclic_time: u32,
    #[serde(default = "default_cyclic_shot_count")]
    pub cyclic_shot_count: u32,
    /// Directory polling period in seconds
    #[serde(default = "default_file_polling_time")]
    pub file_polling_time: u64,
    /// Deliver one combined result per cycle instead of each variable
    #[serde(default)]
    pub deliver_entire_response: bool,
    #[serde(default)]
    pub timestamp_fields: String,
    #[serde(default)]
    pub use_filedate_for_timestamp_date: bool,
    /// Hours added to payload and file timestamps
    #[serde(default)]
    pub utc_offset: f64,
    #[serde(default)]
    pub variables: Vec<VariableDescriptor>,
}

fn default_true() -> bool {
    true
}

fn default_machine_name() -> String {
    "euromap63".to_string()
}

fn default_cyclic_time() -> u32 {
    15
}

fn default_cyclic_shot_count() -> u32 {
    1
}

fn default_file_polling_time() -> u64 {
    2
}

impl Default for Euromap63Config {
    fn default() -> Self {
        Self {
            enable: true,
            machine_name: default_machine_name(),
            server_machine_name_list: String::new(),
            session_number: 0,
            cyclic_type: CyclicType::Time,
            cyclic_time: default_cyclic_time(),
            cyclic_shot_count: default_cyclic_shot_count(),
            file_polling_time: default_file_polling_time(),
            deliver_entire_response: false,
            timestamp_fields: String::new(),
            use_filedate_for_timestamp_date: false,
            utc_offset: 0.0,
            variables: Vec::new(),
        }
    }
}

impl Euromap63Config {
    /// Check the settings and return the parsed server list
    pub fn validate(&self) -> Result<Vec<ServerEntry>> {
        if self.session_number > MAX_SESSION_NUMBER {
            return Err(Em63Error::config(format!(
                "session number {} exceeds {}",
                self.session_number, MAX_SESSION_NUMBER
            )));
        }
        match self.cyclic_type {
            CyclicType::Time if self.cyclic_time == 0 => {
                return Err(Em63Error::config("cyclic time must be positive"))
            },
            CyclicType::Shot if self.cyclic_shot_count == 0 => {
                return Err(Em63Error::config("cyclic shot count must be positive"))
            },
            _ => {},
        }
        self.servers()
    }

    pub fn servers(&self) -> Result<Vec<ServerEntry>> {
        parse_server_machine_list(&self.server_machine_name_list, &self.machine_name)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.file_polling_time.max(1))
    }

    /// Ten report periods bounded to [60 s, 15 min]; shot mode always 15 min
    pub fn no_data_timeout(&self) -> Duration {
        match self.cyclic_type {
            CyclicType::Time => Duration::from_secs(10 * u64::from(self.cyclic_time))
                .clamp(MIN_NO_DATA_TIMEOUT, MAX_NO_DATA_TIMEOUT),
            CyclicType::Shot => MAX_NO_DATA_TIMEOUT,
        }
    }

    pub fn cyclic_trigger(&self) -> CyclicTrigger {
        match self.cyclic_type {
            CyclicType::Time => CyclicTrigger::Time(self.cyclic_time),
            CyclicType::Shot => CyclicTrigger::Shot(self.cyclic_shot_count),
        }
    }

    pub fn utc_offset_ms(&self) -> i64 {
        (self.utc_offset * 3_600_000.0).round() as i64
    }

    pub fn timestamp_fields(&self) -> TimestampFields {
        TimestampFields::parse(&self.timestamp_fields)
    }

    /// Variables requested in the report job, in configuration order
    pub fn report_variables(&self) -> Vec<VariableDescriptor> {
        self.variables
            .iter()
            .filter(|v| v.is_report_variable())
            .cloned()
            .collect()
    }

    pub fn variable(&self, name: &str) -> Option<&VariableDescriptor> {
        self.variables.iter().find(|v| v.name == name)
    }
}

// ============================================================================
// Service configuration file
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Rolling log file directory; console only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub json_logs: bool,
}

fn default_service_name() -> String {
    "em63srv".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_dir: None,
            json_logs: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSection {
    /// Mounted exchange share; session folders are relative to it
    #[serde(default = "default_transport_root")]
    pub root: PathBuf,
}

fn default_transport_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            root: default_transport_root(),
        }
    }
}

/// Top-level `em63srv.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub adapter: Euromap63Config,
}

impl ServiceConfig {
    /// Load from a YAML file, then apply `EM63_` environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Em63Error::config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        let config: Self = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("EM63_").split("__"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_server_list_with_names() {
        let entries =
            parse_server_machine_list("Folder-1:Machine-1, Folder-2:Machine-2", "press").unwrap();
        assert_eq!(
            entries,
            vec![
                ServerEntry {
                    folder: "Folder-1".into(),
                    machine_name: "Machine-1".into()
                },
                ServerEntry {
                    folder: "Folder-2".into(),
                    machine_name: "Machine-2".into()
                },
            ]
        );
    }

    #[test]
    fn test_server_list_synthesizes_missing_name() {
        let entries = parse_server_machine_list("Folder-1", "press").unwrap();
        assert_eq!(entries[0].machine_name, "press-Folder-1");
    }

    #[test]
    fn test_server_list_rejects_malformed_entries() {
        assert!(parse_server_machine_list("", "press").is_err());
        assert!(parse_server_machine_list("  ", "press").is_err());
        assert!(parse_server_machine_list("a:b:c", "press").is_err());
        assert!(parse_server_machine_list("Folder-1,,Folder-2", "press").is_err());
        assert!(parse_server_machine_list(":name", "press").is_err());
    }

    #[test]
    fn test_no_data_timeout_bounds() {
        let mut config = Euromap63Config::default();
        config.cyclic_time = 1;
        assert_eq!(config.no_data_timeout(), Duration::from_secs(60));
        config.cyclic_time = 15;
        assert_eq!(config.no_data_timeout(), Duration::from_secs(150));
        config.cyclic_time = 3600;
        assert_eq!(config.no_data_timeout(), Duration::from_secs(900));

        config.cyclic_type = CyclicType::Shot;
        config.cyclic_shot_count = 1;
        assert_eq!(config.no_data_timeout(), Duration::from_secs(900));
    }

    #[test]
    fn test_polling_interval_minimum() {
        let mut config = Euromap63Config::default();
        assert_eq!(config.polling_interval(), Duration::from_secs(2));
        config.file_polling_time = 0;
        assert_eq!(config.polling_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_timestamp_fields_parse() {
        let fields = TimestampFields::parse("Date, Time");
        assert_eq!(fields.primary.as_deref(), Some("Date"));
        assert_eq!(fields.secondary.as_deref(), Some("Time"));

        let fields = TimestampFields::parse("Count,Date,Time");
        assert_eq!(fields.primary.as_deref(), Some("Count"));
        assert_eq!(fields.secondary.as_deref(), Some("Date"));

        assert!(TimestampFields::parse("").is_empty());
        assert!(TimestampFields::parse(" , ").is_empty());
    }

    #[test]
    fn test_report_variables_exclude_alarm_and_write() {
        let mut config = Euromap63Config::default();
        config.variables = vec![
            VariableDescriptor::new("Count", VariableFormat::Uint32).with_report_name("COUNT"),
            VariableDescriptor::new("Alarm", VariableFormat::Int32).with_alarm_code(),
            VariableDescriptor::new("Raised", VariableFormat::Int32)
                .with_alarm_code_changed(AlarmCodeChanged::Activated),
            VariableDescriptor::new("Setpoint", VariableFormat::Float)
                .with_report_name("SetTmp")
                .with_access(Access::Write),
            VariableDescriptor::combined_result(),
        ];
        let names: Vec<_> = config
            .report_variables()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["Count"]);
    }

    #[test]
    fn test_validate_session_number_and_cycle() {
        let mut config = Euromap63Config {
            server_machine_name_list: "Folder-1".into(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.session_number = 10_000;
        assert!(config.validate().is_err());

        config.session_number = 1;
        config.cyclic_time = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_utc_offset_ms() {
        let config = Euromap63Config {
            utc_offset: -5.5,
            ..Default::default()
        };
        assert_eq!(config.utc_offset_ms(), -19_800_000);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
service:
  log_level: debug
transport:
  root: /mnt/euromap
adapter:
  server_machine_name_list: "Folder-1:Press-1"
  cyclic_type: shot
  cyclic_shot_count: 5
  deliver_entire_response: true
  variables:
    - name: Count
      format: uint32
      report_name: COUNT
    - name: Raised
      format: int32
      alarm_code_changed: Activated
"#
        )
        .unwrap();

        let config = ServiceConfig::load(file.path()).unwrap();
        assert_eq!(config.service.log_level, "debug");
        assert_eq!(config.transport.root, PathBuf::from("/mnt/euromap"));
        assert_eq!(config.adapter.cyclic_trigger(), CyclicTrigger::Shot(5));
        assert!(config.adapter.deliver_entire_response);
        assert_eq!(config.adapter.variables.len(), 2);
        assert_eq!(
            config.adapter.variables[1].alarm_code_changed,
            AlarmCodeChanged::Activated
        );
        assert_eq!(config.adapter.file_polling_time, 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ServiceConfig::load(Path::new("/nonexistent/em63srv.yaml")).unwrap_err();
        assert!(err.is_fatal());
    }
}
