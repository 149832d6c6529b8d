//! Decoded FIT frames and the adapter over the `fitparser` decoder.

use std::collections::BTreeSet;
use std::fmt;
use std::panic;

use chrono::{DateTime, Utc};
use fitparser::profile::MesgNum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure raised by the binary decoder before any frame reaches the extractor.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Fit(#[from] fitparser::Error),
    #[error("decoder panicked: {0}")]
    Panicked(String),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum MessageKind {
    /// Per-timestamp sensor sample.
    Record,
    /// Ride-level summary. Not consumed yet.
    Session,
    Other,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FrameKind {
    Header,
    Definition,
    Data(MessageKind),
    Checksum,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Column representation: numbers as-is, timestamps as Unix seconds.
    pub fn as_f64(&self) -> f64 {
        match self {
            FieldValue::Number(v) => *v,
            FieldValue::Timestamp(ts) => {
                ts.timestamp() as f64 + ts.timestamp_subsec_micros() as f64 / 1_000_000.0
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Option<FieldValue>,
    pub unit: Option<String>,
}

impl Field {
    pub fn new(name: impl Into<String>, value: Option<FieldValue>, unit: Option<&str>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.map(str::to_string),
        }
    }

    pub fn number(name: impl Into<String>, value: f64, unit: &str) -> Self {
        let unit = if unit.is_empty() { None } else { Some(unit) };
        Self::new(name, Some(FieldValue::Number(value)), unit)
    }

    pub fn timestamp(value: DateTime<Utc>) -> Self {
        Self::new("timestamp", Some(FieldValue::Timestamp(value)), Some("s"))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub kind: FrameKind,
    pub fields: Vec<Field>,
}

impl Frame {
    pub fn record(fields: Vec<Field>) -> Self {
        Self {
            kind: FrameKind::Data(MessageKind::Record),
            fields,
        }
    }

    pub fn is_sample_record(&self) -> bool {
        self.kind == FrameKind::Data(MessageKind::Record)
    }

    pub fn is_session_summary(&self) -> bool {
        self.kind == FrameKind::Data(MessageKind::Session)
    }

    pub fn schema_key(&self) -> SchemaKey {
        SchemaKey(
            self.fields
                .iter()
                .filter(|f| f.value.is_some())
                .map(|f| f.name.clone())
                .collect(),
        )
    }

    /// Fields carrying a value, in frame order.
    pub fn present_fields(&self) -> impl Iterator<Item = (&Field, FieldValue)> {
        self.fields
            .iter()
            .filter_map(|f| f.value.map(|value| (f, value)))
    }
}

/// Set of field names with a non-null value in one frame.
///
/// Ordered so that comparisons (and the majority tie-break built on them) are
/// deterministic.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaKey(BTreeSet<String>);

impl SchemaKey {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for SchemaKey {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        SchemaKey(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.names().collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

/// Decode a FIT byte stream into frames.
///
/// The decoder is treated as untrusted: both its errors and its panics come
/// back as a [`DecodeError`].
pub fn decode_fit(input: &[u8]) -> Result<Vec<Frame>, DecodeError> {
    let records = panic::catch_unwind(|| fitparser::from_bytes(input))
        .map_err(|payload| DecodeError::Panicked(panic_message(payload)))??;
    Ok(records.iter().map(frame_from_record).collect())
}

fn frame_from_record(record: &fitparser::FitDataRecord) -> Frame {
    let kind = match record.kind() {
        MesgNum::Record => MessageKind::Record,
        MesgNum::Session => MessageKind::Session,
        _ => MessageKind::Other,
    };
    let fields = record
        .fields()
        .iter()
        .map(|field| {
            let units = field.units();
            Field::new(
                field.name(),
                fit_value_to_field(field.value()),
                if units.is_empty() { None } else { Some(units) },
            )
        })
        .collect();
    Frame {
        kind: FrameKind::Data(kind),
        fields: fold_enhanced_fields(fields),
    }
}

/// Enhanced-resolution fields and the base field they extend.
const ENHANCED_ALIASES: [(&str, &str); 2] = [
    ("enhanced_altitude", "altitude"),
    ("enhanced_speed", "speed"),
];

/// The decoder expands `altitude` and `speed` into their `enhanced_*`
/// counterparts. Rename those back to the base name unless the frame already
/// carries a base value.
fn fold_enhanced_fields(mut fields: Vec<Field>) -> Vec<Field> {
    for (enhanced, base) in ENHANCED_ALIASES {
        let has_base = fields.iter().any(|f| f.name == base && f.value.is_some());
        if has_base {
            continue;
        }
        fields.retain(|f| f.name != base);
        if let Some(field) = fields.iter_mut().find(|f| f.name == enhanced) {
            field.name = base.to_string();
        }
    }
    fields
}

fn fit_value_to_field(value: &fitparser::Value) -> Option<FieldValue> {
    match value {
        fitparser::Value::Timestamp(ts) => Some(FieldValue::Timestamp(ts.with_timezone(&Utc))),
        other => fit_value_to_f64(other).map(FieldValue::Number),
    }
}

fn fit_value_to_f64(value: &fitparser::Value) -> Option<f64> {
    match value {
        fitparser::Value::Float32(v) => Some(*v as f64),
        fitparser::Value::Float64(v) => Some(*v),
        fitparser::Value::SInt16(v) => Some(*v as f64),
        fitparser::Value::UInt16(v) => Some(*v as f64),
        fitparser::Value::SInt32(v) => Some(*v as f64),
        fitparser::Value::UInt32(v) => Some(*v as f64),
        fitparser::Value::SInt64(v) => Some(*v as f64),
        fitparser::Value::UInt64(v) => Some(*v as f64),
        fitparser::Value::UInt16z(v) => Some(*v as f64),
        fitparser::Value::UInt32z(v) => Some(*v as f64),
        fitparser::Value::UInt64z(v) => Some(*v as f64),
        fitparser::Value::Byte(v) => Some(*v as f64),
        fitparser::Value::Enum(v) => Some(*v as f64),
        fitparser::Value::UInt8(v) => Some(*v as f64),
        fitparser::Value::UInt8z(v) => Some(*v as f64),
        fitparser::Value::SInt8(v) => Some(*v as f64),
        fitparser::Value::Array(values) => values.iter().find_map(fit_value_to_f64),
        _ => None,
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_key_skips_null_fields() {
        let frame = Frame::record(vec![
            Field::number("power", 200.0, "watts"),
            Field::new("cadence", None, Some("rpm")),
            Field::number("heart_rate", 140.0, "bpm"),
        ]);
        let key = frame.schema_key();
        assert_eq!(key.len(), 2);
        assert!(key.contains("power"));
        assert!(!key.contains("cadence"));
        assert_eq!(key.to_string(), "{heart_rate, power}");
    }

    #[test]
    fn schema_key_ignores_field_order() {
        let a = Frame::record(vec![
            Field::number("power", 1.0, ""),
            Field::number("speed", 2.0, ""),
        ]);
        let b = Frame::record(vec![
            Field::number("speed", 2.0, ""),
            Field::number("power", 1.0, ""),
        ]);
        assert_eq!(a.schema_key(), b.schema_key());
    }

    #[test]
    fn timestamp_value_maps_to_unix_seconds() {
        let ts = DateTime::<Utc>::from_timestamp(1_000_000_000, 500_000_000).unwrap();
        assert!((FieldValue::Timestamp(ts).as_f64() - 1_000_000_000.5).abs() < 1e-9);
    }

    #[test]
    fn array_values_take_first_numeric_element() {
        let value = fitparser::Value::Array(vec![
            fitparser::Value::String("x".into()),
            fitparser::Value::UInt16(42),
        ]);
        assert_eq!(fit_value_to_field(&value), Some(FieldValue::Number(42.0)));
        assert_eq!(fit_value_to_field(&fitparser::Value::String("a".into())), None);
    }

    #[test]
    fn enhanced_fields_take_the_base_name() {
        let fields = fold_enhanced_fields(vec![
            Field::new("altitude", None, Some("m")),
            Field::number("enhanced_altitude", 278.2, "m"),
            Field::number("enhanced_speed", 4.5, "m/s"),
        ]);
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["altitude", "speed"]);
        assert_eq!(fields[0].value, Some(FieldValue::Number(278.2)));
    }

    #[test]
    fn base_fields_win_over_enhanced() {
        let fields = fold_enhanced_fields(vec![
            Field::number("speed", 4.0, "m/s"),
            Field::number("enhanced_speed", 4.5, "m/s"),
        ]);
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["speed", "enhanced_speed"]);
    }

    #[test]
    fn decodes_activity_fixture() {
        let bytes = std::fs::read(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/tests/fixtures/Activity.fit"
        ))
        .unwrap();
        let frames = decode_fit(&bytes).unwrap();

        let records: Vec<&Frame> = frames.iter().filter(|f| f.is_sample_record()).collect();
        assert_eq!(records.len(), 14);
        assert_eq!(frames.iter().filter(|f| f.is_session_summary()).count(), 1);
        assert!(frames.iter().all(|f| matches!(f.kind, FrameKind::Data(_))));

        let key = records[0].schema_key();
        for name in ["timestamp", "altitude", "speed", "position_lat", "position_long"] {
            assert!(key.contains(name), "missing {name} in {key}");
        }
        assert!(!key.contains("enhanced_speed"));
        assert!(!key.contains("enhanced_altitude"));

        let fields = frames.iter().flat_map(|f| f.fields.iter());
        let mut saw_unitless = false;
        for field in fields {
            match &field.unit {
                Some(unit) => assert!(!unit.is_empty(), "empty unit on {}", field.name),
                None => saw_unitless = true,
            }
        }
        assert!(saw_unitless);
    }

    #[test]
    fn garbage_input_is_a_decode_error() {
        let err = decode_fit(b"definitely not a fit file").unwrap_err();
        assert!(matches!(err, DecodeError::Fit(_) | DecodeError::Panicked(_)));
    }
}
