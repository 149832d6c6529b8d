use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::FitboardError;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Column {
    pub unit: Option<String>,
    pub values: Vec<f64>,
}

/// Columnar samples keyed by series name.
///
/// Values and units live in the same map entry, so every series always has a
/// unit slot. All columns share one length; [`Dataset::push_column`] enforces
/// it for columns added after the first, and deserialization goes through
/// [`Dataset::from_columns`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawDataset")]
pub struct Dataset {
    columns: BTreeMap<String, Column>,
}

#[derive(Deserialize)]
struct RawDataset {
    columns: BTreeMap<String, Column>,
}

impl TryFrom<RawDataset> for Dataset {
    type Error = FitboardError;

    fn try_from(raw: RawDataset) -> Result<Self, Self::Error> {
        Dataset::from_columns(raw.columns)
    }
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a dataset from prepared columns, rejecting unequal lengths.
    pub fn from_columns(columns: BTreeMap<String, Column>) -> Result<Self, FitboardError> {
        let mut lengths = columns.iter().map(|(name, c)| (name, c.values.len()));
        if let Some((_, expected)) = lengths.next() {
            if let Some((name, found)) = lengths.find(|(_, len)| *len != expected) {
                return Err(FitboardError::RaggedDataset {
                    series: name.clone(),
                    expected,
                    found,
                });
            }
        }
        Ok(Self { columns })
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Number of samples per column (0 for an empty dataset).
    pub fn len(&self) -> usize {
        self.columns.values().next().map_or(0, |c| c.values.len())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn values(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(|c| c.values.as_slice())
    }

    pub fn unit(&self, name: &str) -> Option<&str> {
        self.columns.get(name).and_then(|c| c.unit.as_deref())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Add or replace a column. Returns `false` (and leaves the dataset
    /// untouched) when the length disagrees with the existing columns.
    pub(crate) fn push_column(
        &mut self,
        name: impl Into<String>,
        unit: Option<String>,
        values: Vec<f64>,
    ) -> bool {
        let name = name.into();
        let others = self.columns.iter().find(|(k, _)| **k != name);
        if let Some((_, existing)) = others {
            if existing.values.len() != values.len() {
                return false;
            }
        }
        self.columns.insert(name, Column { unit, values });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_column_length() {
        let mut ds = Dataset::new();
        assert!(ds.push_column("power", Some("watts".into()), vec![1.0, 2.0]));
        assert!(!ds.push_column("cadence", None, vec![1.0]));
        assert!(!ds.contains("cadence"));
        assert_eq!(ds.len(), 2);
    }

    #[test]
    fn replacing_a_column_keeps_its_slot() {
        let mut ds = Dataset::new();
        assert!(ds.push_column("power", None, vec![1.0, 2.0]));
        assert!(ds.push_column("power", Some("watts".into()), vec![3.0, 4.0]));
        assert_eq!(ds.unit("power"), Some("watts"));
        assert_eq!(ds.values("power"), Some(&[3.0, 4.0][..]));
    }

    #[test]
    fn ragged_json_is_rejected() {
        let json = r#"{"columns": {
            "power": {"unit": "watts", "values": [100.0, 110.0, 120.0]},
            "time_norm": {"unit": "s", "values": [0.0]}
        }}"#;
        let err = serde_json::from_str::<Dataset>(json).unwrap_err();
        assert!(err.to_string().contains("column time_norm has 1 samples, expected 3"));
    }

    #[test]
    fn serialized_dataset_reads_back() {
        let mut ds = Dataset::new();
        assert!(ds.push_column("power", Some("watts".into()), vec![100.0, 110.0]));
        assert!(ds.push_column("time_norm", Some("s".into()), vec![0.0, 1.0]));
        let json = serde_json::to_string(&ds).unwrap();
        assert_eq!(serde_json::from_str::<Dataset>(&json).unwrap(), ds);
    }

    #[test]
    fn from_columns_checks_lengths() {
        let mut columns = BTreeMap::new();
        columns.insert("cadence".to_string(), Column { unit: None, values: vec![1.0, 2.0] });
        columns.insert("power".to_string(), Column { unit: None, values: vec![1.0] });
        assert!(matches!(
            Dataset::from_columns(columns),
            Err(FitboardError::RaggedDataset { expected: 2, found: 1, .. })
        ));
    }

    #[test]
    fn empty_dataset_has_no_samples() {
        let ds = Dataset::new();
        assert!(ds.is_empty());
        assert_eq!(ds.len(), 0);
        assert_eq!(ds.names().count(), 0);
    }
}
