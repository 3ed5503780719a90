//! Alarm data file parsing and alarm snapshot tracking
//!
//! Alarm rows look like `1,20171110,17:16:56,147797,1,6169,"Alarm Test 1"`:
//! field 1 is the date, 2 the time, 4 the set flag and 5 the alarm code.

use tracing::debug;

const DATE_FIELD: usize = 1;
const TIME_FIELD: usize = 2;
const SET_FIELD: usize = 4;
const CODE_FIELD: usize = 5;

/// One active alarm taken from the alarm file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmEntry {
    /// Date and time concatenated, sortable because both are fixed width
    pub datetime: String,
    pub code: i64,
}

/// Active alarms, newest first
pub fn parse_alarm_log(text: &str) -> Vec<AlarmEntry> {
    let mut entries = Vec::new();
    for line in text.lines().rev() {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() <= CODE_FIELD || fields[SET_FIELD] == "0" {
            continue;
        }
        match fields[CODE_FIELD].parse::<i64>() {
            Ok(code) => entries.push(AlarmEntry {
                datetime: format!("{}{}", fields[DATE_FIELD], fields[TIME_FIELD]),
                code,
            }),
            Err(_) => debug!("Skipping alarm row with code '{}'", fields[CODE_FIELD]),
        }
    }
    // Stable, so equal timestamps keep the bottom-up scan order
    entries.sort_by(|a, b| b.datetime.cmp(&a.datetime));
    entries
}

/// Change between two alarm snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmDelta {
    /// Full new snapshot, newest first
    pub current: Vec<i64>,
    /// Newest alarm code, 0 when no alarm is active
    pub last_code: i64,
    /// Codes not in the previous snapshot, newest first
    pub activated: Vec<i64>,
    /// Codes that disappeared, in previous-snapshot order
    pub deactivated: Vec<i64>,
}

/// Alarm codes seen in the last alarm cycle of one session
#[derive(Debug, Clone, Default)]
pub struct AlarmSnapshot {
    codes: Vec<i64>,
}

impl AlarmSnapshot {
    pub fn codes(&self) -> &[i64] {
        &self.codes
    }

    pub fn clear(&mut self) {
        self.codes.clear();
    }

    /// Compare against the previous snapshot, then replace it
    pub fn update(&mut self, entries: &[AlarmEntry]) -> AlarmDelta {
        let current: Vec<i64> = entries.iter().map(|e| e.code).collect();
        let activated = current
            .iter()
            .filter(|c| !self.codes.contains(c))
            .copied()
            .collect();
        let deactivated = self
            .codes
            .iter()
            .filter(|c| !current.contains(c))
            .copied()
            .collect();
        let last_code = current.first().copied().unwrap_or(0);

        self.codes = current.clone();

        AlarmDelta {
            current,
            last_code,
            activated,
            deactivated,
        }
    }
}
