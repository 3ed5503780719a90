//! Report data file parsing
//!
//! A report file holds two lines: the header of report tags and one row of
//! values. Tags may carry array indexes such as `ActVolCsh[1,1]`, so the
//! header is split only on commas outside brackets.

use tracing::{debug, warn};

use crate::config::VariableDescriptor;
use crate::protocol::value::{convert_value, VariableValue};

/// Split a header line on commas that are not inside `[...]`
pub fn split_header(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                fields.push(&line[start..i]);
                start = i + 1;
            },
            _ => {},
        }
    }
    fields.push(&line[start..]);
    fields
}

/// Header and value row of one report
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow<'a> {
    header: Vec<&'a str>,
    values: Vec<&'a str>,
}

impl<'a> ReportRow<'a> {
    /// `None` when the text has fewer than two lines or the value row is short
    pub fn parse(text: &'a str) -> Option<Self> {
        let mut lines = text.lines();
        let header = split_header(lines.next()?);
        let values: Vec<&str> = lines.next()?.split(',').collect();
        if values.len() < header.len() {
            debug!(
                "Report row has {} values for {} tags, skipping",
                values.len(),
                header.len()
            );
            return None;
        }
        Some(Self { header, values })
    }

    /// Trimmed value under the first column named `tag`
    pub fn field(&self, tag: &str) -> Option<&'a str> {
        let index = self.header.iter().position(|h| *h == tag)?;
        self.values.get(index).map(|v| v.trim())
    }

    pub fn column_count(&self) -> usize {
        self.header.len()
    }
}

/// Converts report rows into values for the configured report variables
#[derive(Debug, Clone)]
pub struct ReportParser {
    variables: Vec<VariableDescriptor>,
}

impl ReportParser {
    pub fn new(variables: Vec<VariableDescriptor>) -> Self {
        Self {
            variables: variables
                .into_iter()
                .filter(|v| v.is_report_variable())
                .collect(),
        }
    }

    pub fn variables(&self) -> &[VariableDescriptor] {
        &self.variables
    }

    /// Values in variable order. Missing, empty and unconvertible fields are left out.
    pub fn parse<'v>(&'v self, text: &str) -> Vec<(&'v VariableDescriptor, VariableValue)> {
        let Some(row) = ReportRow::parse(text) else {
            return Vec::new();
        };

        let mut out = Vec::with_capacity(self.variables.len());
        for variable in &self.variables {
            let Some(raw) = row.field(&variable.report_name) else {
                continue;
            };
            if raw.is_empty() {
                continue;
            }
            match convert_value(variable.format, raw) {
                Some(value) => out.push((variable, value)),
                None => warn!(
                    "Cannot convert '{}' for {} ({:?})",
                    raw, variable.name, variable.format
                ),
            }
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::config::{AlarmCodeChanged, VariableFormat};

    fn machine_variables() -> Vec<VariableDescriptor> {
        use VariableFormat::*;
        [
            ("Date", Char, "DATE"),
            ("Time", Char, "TIME"),
            ("Count", Uint32, "COUNT"),
            ("ActTimCyc", Float, "ActTimCyc"),
            ("ActVolCsh", Int8, "ActVolCsh[1,1]"),
            ("ActTimFill", Uint8, "ActTimFill[1]"),
            ("ActTimPlst", Int16, "ActTimPlst[1]"),
            ("ActPrsMachSpecMax", Uint16, "ActPrsMachSpecMax"),
            ("ActPrsXfrSpec", Uint32, "ActPrsXfrSpec[1]"),
            ("ActVolXfr", Bool, "ActVolXfr[1]"),
            ("ActTimCycDouble", Double, "ActTimCyc"),
            ("ActStrRef", Int32, "ActStrRef"),
        ]
        .into_iter()
        .map(|(name, format, tag)| VariableDescriptor::new(name, format).with_report_name(tag))
        .collect()
    }

    const REPORT: &str = "DATE,TIME,COUNT,ActTimCyc,ActVolCsh[1,1],ActTimFill[1],ActTimPlst[1],\
ActPrsMachSpecMax,ActPrsXfrSpec[1],ActVolXfr[1],ActStrRef\r\n\
20170920,18:49:17,18402,29.0,10,1,13,1195,1194,1,412\r\n";

    #[test]
    fn test_split_header_ignores_bracketed_commas() {
        assert_eq!(
            split_header("DATE,ActVolCsh[1,1],TIME"),
            vec!["DATE", "ActVolCsh[1,1]", "TIME"]
        );
        assert_eq!(split_header("A[1,2,3],B[4]"), vec!["A[1,2,3]", "B[4]"]);
        assert_eq!(split_header("SINGLE"), vec!["SINGLE"]);
    }

    #[test]
    fn test_parse_every_format() {
        let parser = ReportParser::new(machine_variables());
        let values = parser.parse(REPORT);
        let by_name: Vec<(&str, VariableValue)> = values
            .into_iter()
            .map(|(v, value)| (v.name.as_str(), value))
            .collect();

        assert_eq!(
            by_name,
            vec![
                ("Date", VariableValue::Text("20170920".into())),
                ("Time", VariableValue::Text("18:49:17".into())),
                ("Count", VariableValue::Integer(18402)),
                ("ActTimCyc", VariableValue::Float(29.0)),
                ("ActVolCsh", VariableValue::Integer(10)),
                ("ActTimFill", VariableValue::Integer(1)),
                ("ActTimPlst", VariableValue::Integer(13)),
                ("ActPrsMachSpecMax", VariableValue::Integer(1195)),
                ("ActPrsXfrSpec", VariableValue::Integer(1194)),
                ("ActVolXfr", VariableValue::Bool(true)),
                ("ActTimCycDouble", VariableValue::Float(29.0)),
                ("ActStrRef", VariableValue::Integer(412)),
            ]
        );
    }

    #[test]
    fn test_short_payload_is_empty() {
        let parser = ReportParser::new(machine_variables());
        assert!(parser.parse("").is_empty());
        assert!(parser.parse("DATE,TIME\r\n").is_empty());
        assert!(parser.parse("DATE,TIME,COUNT\r\n20170920,18:49:17\r\n").is_empty());
    }

    #[test]
    fn test_failed_conversion_is_omitted() {
        let parser = ReportParser::new(machine_variables());
        let values = parser.parse("COUNT,ActTimCyc\r\n-5,29.5\r\n");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].0.name, "ActTimCyc");
        assert_eq!(values[0].1, VariableValue::Float(29.5));
    }

    #[test]
    fn test_values_are_trimmed_and_empty_skipped() {
        let parser = ReportParser::new(machine_variables());
        let values = parser.parse("DATE,COUNT\n \"20170920\" , \n");
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].1, VariableValue::Text("20170920".into()));
    }

    #[test]
    fn test_alarm_variables_never_read_from_report() {
        let variables = vec![
            VariableDescriptor::new("Alarm", VariableFormat::Int32)
                .with_report_name("COUNT")
                .with_alarm_code(),
            VariableDescriptor::new("Raised", VariableFormat::Int32)
                .with_report_name("COUNT")
                .with_alarm_code_changed(AlarmCodeChanged::Activated),
        ];
        let parser = ReportParser::new(variables);
        assert!(parser.variables().is_empty());
        assert!(parser.parse("COUNT\r\n5\r\n").is_empty());
    }

    #[test]
    fn test_first_matching_column_wins() {
        let row = ReportRow::parse("A,B,A\n1,2,3\n").unwrap();
        assert_eq!(row.field("A"), Some("1"));
        assert_eq!(row.column_count(), 3);
    }
}
