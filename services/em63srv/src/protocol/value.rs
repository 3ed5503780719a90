//! Variable values and the text conversion table

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::config::VariableFormat;
use crate::delivery::CombinedResult;

// Both patterns are constant; `None` would only mean a typo here
static INTEGER_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[0-9]+$").ok());
static DECIMAL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[-+]?[0-9]*\.?[0-9]+([eE][-+]?[0-9]+)?$").ok());

fn matches(re: &Lazy<Option<Regex>>, text: &str) -> bool {
    match Lazy::force(re) {
        Some(re) => re.is_match(text),
        None => false,
    }
}

/// A converted value as handed to the value sink
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum VariableValue {
    Integer(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    IntegerArray(Vec<i64>),
    Combined(CombinedResult),
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
            Self::IntegerArray(_) | Self::Combined(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            },
        }
    }
}

/// Storage class shared by several wire formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Text,
    Integer,
    Decimal,
    Boolean,
}

impl VariableFormat {
    pub fn kind(self) -> ValueKind {
        match self {
            Self::Char => ValueKind::Text,
            Self::Int8
            | Self::Int16
            | Self::Int32
            | Self::Int64
            | Self::Uint8
            | Self::Uint16
            | Self::Uint32
            | Self::Uint64 => ValueKind::Integer,
            Self::Float | Self::Double => ValueKind::Decimal,
            Self::Bool => ValueKind::Boolean,
        }
    }
}

/// Convert one trimmed payload field. `None` means the text does not fit the format.
pub fn convert_value(format: VariableFormat, raw: &str) -> Option<VariableValue> {
    match format.kind() {
        ValueKind::Text => Some(VariableValue::Text(strip_quotes(raw).to_string())),
        ValueKind::Integer => {
            if !matches(&INTEGER_RE, raw) {
                return None;
            }
            raw.parse::<i64>()
                .ok()
                .filter(|v| fits_width(format, *v))
                .map(VariableValue::Integer)
        },
        ValueKind::Decimal => {
            if !matches(&DECIMAL_RE, raw) {
                return None;
            }
            raw.parse::<f64>().ok().map(VariableValue::Float)
        },
        ValueKind::Boolean => Some(VariableValue::Bool(raw == "true" || raw == "1")),
    }
}

/// Whether an integer is representable in the declared wire width
fn fits_width(format: VariableFormat, value: i64) -> bool {
    match format {
        VariableFormat::Int8 => i8::try_from(value).is_ok(),
        VariableFormat::Int16 => i16::try_from(value).is_ok(),
        VariableFormat::Int32 => i32::try_from(value).is_ok(),
        VariableFormat::Uint8 => u8::try_from(value).is_ok(),
        VariableFormat::Uint16 => u16::try_from(value).is_ok(),
        VariableFormat::Uint32 => u32::try_from(value).is_ok(),
        _ => true,
    }
}

/// Remove one pair of surrounding double quotes
fn strip_quotes(raw: &str) -> &str {
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw)
}

/// Render a value as the operand of a `SET` statement
pub fn to_set_operand(format: VariableFormat, value: &VariableValue) -> String {
    match (format.kind(), value) {
        (ValueKind::Text, v) => format!("\"{}\"", v),
        (ValueKind::Boolean, VariableValue::Bool(b)) => u8::from(*b).to_string(),
        (ValueKind::Boolean, VariableValue::Integer(i)) => u8::from(*i != 0).to_string(),
        (_, v) => v.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_conversion() {
        assert_eq!(
            convert_value(VariableFormat::Uint32, "18402"),
            Some(VariableValue::Integer(18402))
        );
        assert_eq!(convert_value(VariableFormat::Int16, "-13"), None);
        assert_eq!(convert_value(VariableFormat::Int8, "1.5"), None);
        assert_eq!(convert_value(VariableFormat::Uint8, ""), None);
    }

    #[test]
    fn test_integer_width_is_checked() {
        assert_eq!(convert_value(VariableFormat::Uint8, "300"), None);
        assert_eq!(
            convert_value(VariableFormat::Uint8, "255"),
            Some(VariableValue::Integer(255))
        );
        assert_eq!(convert_value(VariableFormat::Int16, "40000"), None);
        assert_eq!(convert_value(VariableFormat::Uint32, "4294967296"), None);
        assert_eq!(
            convert_value(VariableFormat::Int64, "4294967296"),
            Some(VariableValue::Integer(4_294_967_296))
        );
    }

    #[test]
    fn test_decimal_conversion() {
        assert_eq!(
            convert_value(VariableFormat::Float, "29.0"),
            Some(VariableValue::Float(29.0))
        );
        assert_eq!(
            convert_value(VariableFormat::Double, "-1.5e3"),
            Some(VariableValue::Float(-1500.0))
        );
        assert_eq!(
            convert_value(VariableFormat::Double, ".5"),
            Some(VariableValue::Float(0.5))
        );
        assert_eq!(convert_value(VariableFormat::Float, "abc"), None);
        assert_eq!(convert_value(VariableFormat::Float, "1."), None);
    }

    #[test]
    fn test_bool_conversion() {
        assert_eq!(
            convert_value(VariableFormat::Bool, "1"),
            Some(VariableValue::Bool(true))
        );
        assert_eq!(
            convert_value(VariableFormat::Bool, "true"),
            Some(VariableValue::Bool(true))
        );
        assert_eq!(
            convert_value(VariableFormat::Bool, "0"),
            Some(VariableValue::Bool(false))
        );
        assert_eq!(
            convert_value(VariableFormat::Bool, "yes"),
            Some(VariableValue::Bool(false))
        );
    }

    #[test]
    fn test_char_strips_one_quote_pair() {
        assert_eq!(
            convert_value(VariableFormat::Char, "\"20170920\""),
            Some(VariableValue::Text("20170920".into()))
        );
        assert_eq!(
            convert_value(VariableFormat::Char, "18:49:17"),
            Some(VariableValue::Text("18:49:17".into()))
        );
        assert_eq!(
            convert_value(VariableFormat::Char, "\"\"x\"\""),
            Some(VariableValue::Text("\"x\"".into()))
        );
        assert_eq!(
            convert_value(VariableFormat::Char, "\"open"),
            Some(VariableValue::Text("\"open".into()))
        );
    }

    #[test]
    fn test_set_operand_rendering() {
        assert_eq!(
            to_set_operand(VariableFormat::Char, &VariableValue::Text("abc".into())),
            "\"abc\""
        );
        assert_eq!(
            to_set_operand(VariableFormat::Bool, &VariableValue::Bool(true)),
            "1"
        );
        assert_eq!(
            to_set_operand(VariableFormat::Bool, &VariableValue::Integer(0)),
            "0"
        );
        assert_eq!(
            to_set_operand(VariableFormat::Float, &VariableValue::Float(12.5)),
            "12.5"
        );
    }

    #[test]
    fn test_display_array_as_json() {
        let value = VariableValue::IntegerArray(vec![6169, 7956]);
        assert_eq!(value.to_string(), "[6169,7956]");
    }
}
