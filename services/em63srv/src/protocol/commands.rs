//! EUROMAP63 command file rendering
//!
//! Everything here is a pure function of the session number, the cyclic
//! trigger and the report tags. All lines end in CR LF.

use std::fmt;

use crate::config::VariableDescriptor;

pub const LINE_END: &str = "\r\n";

/// Trigger clause of the report job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclicTrigger {
    /// Period in seconds, rendered as `hh:mm:ss`
    Time(u32),
    /// Number of machine shots
    Shot(u32),
}

/// Kinds of request a session can place in its `.REQ` file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Connect,
    AbortReport,
    AbortAlarms,
    Report,
    Alarm,
    SetVariable,
}

impl RequestKind {
    /// 8-digit tag at the start of the request line
    pub fn sequence_tag(self) -> &'static str {
        match self {
            Self::Connect => "00000000",
            Self::AbortReport => "00000001",
            Self::AbortAlarms => "00000002",
            Self::Report => "00000003",
            Self::Alarm => "00000004",
            Self::SetVariable => "00000005",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "CONNECT",
            Self::AbortReport => "ABORTREPORT",
            Self::AbortAlarms => "ABORTALARMS",
            Self::Report => "REPORT",
            Self::Alarm => "GETALARMS",
            Self::SetVariable => "SETVARIABLE",
        };
        f.write_str(name)
    }
}

/// File names derived from one session number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFiles {
    /// Zero-padded session number, e.g. `0000`
    pub session: String,
    /// `SESS0000`, shared by the request and its response
    pub session_base: String,
    pub session_request: String,
    pub report_job: String,
    pub report_data: String,
    pub report_log: String,
    pub alarm_job: String,
    pub alarm_data: String,
    pub alarm_log: String,
    pub abort_report_job: String,
    pub abort_report_log: String,
    pub abort_alarms_job: String,
    pub abort_alarms_log: String,
    pub set_variable_job: String,
    pub set_variable_log: String,
}

impl SessionFiles {
    pub fn new(session_number: u16) -> Self {
        let s = format!("{:04}", session_number);
        Self {
            session_base: format!("SESS{s}"),
            session_request: format!("SESS{s}.REQ"),
            report_job: format!("REPORT{s}.JOB"),
            report_data: format!("REPORT{s}.DAT"),
            report_log: format!("REPORT{s}.LOG"),
            alarm_job: format!("GETALARMS{s}.JOB"),
            alarm_data: format!("GETALARMS{s}.DAT"),
            alarm_log: format!("GETALARMS{s}.LOG"),
            abort_report_job: format!("ABORTREPORT{s}.JOB"),
            abort_report_log: format!("ABORTREPORT{s}.LOG"),
            abort_alarms_job: format!("ABORTALARMS{s}.JOB"),
            abort_alarms_log: format!("ABORTALARMS{s}.LOG"),
            set_variable_job: format!("SETVARIABLE{s}.JOB"),
            set_variable_log: format!("SETVARIABLE{s}.LOG"),
            session: s,
        }
    }

    /// Job file a request executes; `None` for `CONNECT`
    pub fn job_for(&self, kind: RequestKind) -> Option<&str> {
        match kind {
            RequestKind::Connect => None,
            RequestKind::AbortReport => Some(&self.abort_report_job),
            RequestKind::AbortAlarms => Some(&self.abort_alarms_job),
            RequestKind::Report => Some(&self.report_job),
            RequestKind::Alarm => Some(&self.alarm_job),
            RequestKind::SetVariable => Some(&self.set_variable_job),
        }
    }
}

/// Renders the text of every command file for one session number
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    files: SessionFiles,
    trigger: CyclicTrigger,
    report_tags: Vec<String>,
}

impl CommandBuilder {
    /// `report_variables` must already be filtered to readable report variables
    pub fn new(
        session_number: u16,
        trigger: CyclicTrigger,
        report_variables: &[VariableDescriptor],
    ) -> Self {
        Self {
            files: SessionFiles::new(session_number),
            trigger,
            report_tags: report_variables
                .iter()
                .map(|v| v.report_name.clone())
                .collect(),
        }
    }

    pub fn files(&self) -> &SessionFiles {
        &self.files
    }

    pub fn has_report_variables(&self) -> bool {
        !self.report_tags.is_empty()
    }

    /// Contents of the session `.REQ` file
    pub fn request(&self, kind: RequestKind) -> String {
        match self.files.job_for(kind) {
            None => format!("{} CONNECT;{LINE_END}", kind.sequence_tag()),
            Some(job) => format!("{} EXECUTE \"{}\";{LINE_END}", kind.sequence_tag(), job),
        }
    }

    pub fn abort_report_job(&self) -> String {
        let s = &self.files.session;
        format!(
            "JOB AbortReport{s} RESPONSE \"{}\";{LINE_END}ABORT JOB Report{s};{LINE_END}",
            self.files.abort_report_log
        )
    }

    pub fn abort_alarms_job(&self) -> String {
        let s = &self.files.session;
        format!(
            "JOB AbortAlarms{s} RESPONSE \"{}\";{LINE_END}ABORT JOB GetAlarms{s};{LINE_END}",
            self.files.abort_alarms_log
        )
    }

    pub fn alarm_job(&self) -> String {
        let s = &self.files.session;
        let mut job = format!(
            "JOB GetAlarms{s} RESPONSE \"{}\";{LINE_END}",
            self.files.alarm_log
        );
        job.push_str(&format!(
            "EVENT GetAlarms{s} CURRENT_ALARMS REWRITE \"{}\"{LINE_END}",
            self.files.alarm_data
        ));
        job.push_str(&format!("START IMMEDIATE{LINE_END}STOP NEVER{LINE_END};{LINE_END}"));
        job
    }

    pub fn report_job(&self) -> String {
        let s = &self.files.session;
        let mut job = format!(
            "JOB Report{s} RESPONSE \"{}\";{LINE_END}",
            self.files.report_log
        );
        job.push_str(&format!(
            "REPORT Report{s} REWRITE \"{}\"{LINE_END}",
            self.files.report_data
        ));
        job.push_str(&format!("START IMMEDIATE{LINE_END}STOP NEVER{LINE_END}"));
        match self.trigger {
            CyclicTrigger::Time(secs) => {
                job.push_str(&format!("CYCLIC TIME {}{LINE_END}", hhmmss(secs)))
            },
            CyclicTrigger::Shot(count) => job.push_str(&format!("CYCLIC SHOT {count}{LINE_END}")),
        }
        job.push_str(&format!("PARAMETERS{LINE_END}"));
        let last = self.report_tags.len().saturating_sub(1);
        for (i, tag) in self.report_tags.iter().enumerate() {
            let sep = if i < last { "," } else { "" };
            job.push_str(&format!("{tag}{sep}{LINE_END}"));
        }
        job.push_str(&format!(";{LINE_END}"));
        job
    }

    /// Job that writes a single controller variable
    pub fn set_variable_job(&self, report_name: &str, operand: &str) -> String {
        format!(
            "JOB SetVariable RESPONSE \"{}\";{LINE_END}SET {report_name} {operand};{LINE_END}",
            self.files.set_variable_log
        )
    }

    /// Job files written on (re)initialization, in write order
    pub fn init_jobs(&self) -> [(&str, String); 4] {
        [
            (self.files.abort_report_job.as_str(), self.abort_report_job()),
            (self.files.abort_alarms_job.as_str(), self.abort_alarms_job()),
            (self.files.report_job.as_str(), self.report_job()),
            (self.files.alarm_job.as_str(), self.alarm_job()),
        ]
    }
}

fn hhmmss(total_secs: u32) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}
