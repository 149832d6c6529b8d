//! Record extraction: reconcile sample-record frames into a [`Dataset`].
//!
//! Sample streams are not guaranteed to be schema-uniform, so extraction runs
//! two passes. The first tallies how often each [`SchemaKey`] occurs, the
//! second keeps only the frames matching the most common one.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, trace};

use crate::dataset::{Column, Dataset};
use crate::frame::{decode_fit, DecodeError, Frame, SchemaKey};
use crate::FitboardError;

/// Semicircle to degree factor: 2^31 semicircles span 180 degrees.
pub const SEMICIRCLES_TO_DEGREES: f64 = 180.0 / 2_147_483_648.0;

const MPS_TO_KMH: f64 = 3.6;
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct Census {
    /// Occurrence count per schema, in key order.
    pub counts: Vec<(SchemaKey, usize)>,
    pub selected: Option<SchemaKey>,
    pub sample_frames: usize,
    pub accepted: usize,
    pub dropped: usize,
    pub session_frames: usize,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct Extraction {
    pub dataset: Dataset,
    pub census: Census,
}

/// Read and decode the FIT file at `path` and extract its sample records.
pub fn extract(path: impl AsRef<Path>) -> Result<Dataset, FitboardError> {
    extract_with_census(path).map(|e| e.dataset)
}

pub fn extract_with_census(path: impl AsRef<Path>) -> Result<Extraction, FitboardError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| {
        FitboardError::InvalidFitFile(DecodeError::Io {
            path: path.display().to_string(),
            source,
        })
    })?;
    let frames = decode_fit(&bytes).map_err(FitboardError::InvalidFitFile)?;
    debug!("decoded {} frames from {}", frames.len(), path.display());
    let extraction = extract_frames_with_census(&frames)?;
    info!(
        "extracted {} samples x {} series from {}",
        extraction.dataset.len(),
        extraction.dataset.names().count(),
        path.display()
    );
    Ok(extraction)
}

pub fn extract_frames(frames: &[Frame]) -> Result<Dataset, FitboardError> {
    extract_frames_with_census(frames).map(|e| e.dataset)
}

pub fn extract_frames_with_census(frames: &[Frame]) -> Result<Extraction, FitboardError> {
    let (table, session_frames) = schema_census(frames);
    let sample_frames: usize = table.values().sum();
    let selected = select_majority(&table);

    let mut census = Census {
        counts: table.into_iter().collect(),
        selected: selected.clone(),
        sample_frames,
        accepted: 0,
        dropped: 0,
        session_frames,
    };

    let Some(key) = selected else {
        debug!("no sample records found");
        return Ok(Extraction {
            dataset: Dataset::new(),
            census,
        });
    };
    debug!("most common set of record fields: {}", key);

    let (columns, accepted) = assemble_columns(frames, &key)?;
    census.accepted = accepted;
    census.dropped = sample_frames - accepted;
    if census.dropped > 0 {
        debug!("dropped {} incompatible sample records", census.dropped);
    }

    let mut dataset = Dataset::new();
    for (name, column) in columns {
        dataset.push_column(name, column.unit, column.values);
    }
    add_derived_fields(&mut dataset);

    Ok(Extraction { dataset, census })
}

/// First pass: tally schema occurrences over sample records and count the
/// session summaries that are skipped.
fn schema_census(frames: &[Frame]) -> (BTreeMap<SchemaKey, usize>, usize) {
    let mut table: BTreeMap<SchemaKey, usize> = BTreeMap::new();
    let mut sessions = 0usize;
    for frame in frames {
        if frame.is_sample_record() {
            *table.entry(frame.schema_key()).or_insert(0) += 1;
        } else if frame.is_session_summary() {
            sessions += 1;
        }
    }
    (table, sessions)
}

/// Highest count wins; ties go to the smallest key in `SchemaKey` order.
fn select_majority(table: &BTreeMap<SchemaKey, usize>) -> Option<SchemaKey> {
    let mut best: Option<(&SchemaKey, usize)> = None;
    for (key, &count) in table {
        match best {
            Some((_, best_count)) if count <= best_count => {}
            _ => best = Some((key, count)),
        }
    }
    best.map(|(key, _)| key.clone())
}

/// Second pass: append values of the frames matching `key`.
fn assemble_columns(
    frames: &[Frame],
    key: &SchemaKey,
) -> Result<(BTreeMap<String, Column>, usize), FitboardError> {
    let mut columns: BTreeMap<String, Column> = BTreeMap::new();
    let mut expected: Option<SchemaKey> = None;
    let mut accepted = 0usize;

    for (idx, frame) in frames.iter().enumerate() {
        if !frame.is_sample_record() {
            continue;
        }
        let found = frame.schema_key();
        if &found != key {
            trace!("ignoring frame {} with fields {}", idx, found);
            continue;
        }

        if expected.is_none() {
            for (field, _) in frame.present_fields() {
                columns.insert(
                    field.name.clone(),
                    Column {
                        unit: field.unit.clone(),
                        values: Vec::new(),
                    },
                );
            }
            expected = Some(found.clone());
        }

        let present = frame.present_fields().count();
        let consistent = present == columns.len()
            && frame
                .present_fields()
                .all(|(field, _)| columns.contains_key(&field.name));
        if !consistent {
            return Err(FitboardError::SchemaInconsistency {
                frame: idx,
                expected: expected.unwrap_or_default(),
                found,
            });
        }

        for (field, value) in frame.present_fields() {
            if let Some(column) = columns.get_mut(&field.name) {
                column.values.push(value.as_f64());
            }
        }
        accepted += 1;
    }

    Ok((columns, accepted))
}

fn add_derived_fields(dataset: &mut Dataset) {
    derive(dataset, "altitude", "altitude_norm", None, |values| {
        let base = values[0];
        values.iter().map(|v| v - base).collect()
    });
    derive(dataset, "timestamp", "time_norm", Some("s"), |values| {
        let base = values[0];
        values
            .iter()
            .map(|t| elapsed_seconds_within_day(base, *t))
            .collect()
    });
    derive(dataset, "speed", "speed_kmh", Some("km/h"), |values| {
        values.iter().map(|v| v * MPS_TO_KMH).collect()
    });
    derive(dataset, "position_long", "pos_lon_deg", Some("degree"), |values| {
        values.iter().map(|v| v * SEMICIRCLES_TO_DEGREES).collect()
    });
    derive(dataset, "position_lat", "pos_lat_deg", Some("degree"), |values| {
        values.iter().map(|v| v * SEMICIRCLES_TO_DEGREES).collect()
    });
}

/// Add `target` computed from `source` when the source column exists and is
/// non-empty. `unit` of `None` inherits the source unit.
fn derive<F>(dataset: &mut Dataset, source: &str, target: &str, unit: Option<&str>, f: F)
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let Some(column) = dataset.column(source) else {
        return;
    };
    if column.values.is_empty() {
        return;
    }
    let values = f(&column.values);
    let unit = match unit {
        Some(u) => Some(u.to_string()),
        None => column.unit.clone(),
    };
    let added = dataset.push_column(target, unit, values);
    debug_assert!(added, "derived column {target} must match {source}");
}

/// Whole seconds between two Unix timestamps, keeping only the part within a
/// day. Spans of 24 h or more wrap around; negative spans wrap from the top of
/// the day.
fn elapsed_seconds_within_day(start: f64, end: f64) -> f64 {
    let whole = (end - start).floor() as i64;
    whole.rem_euclid(SECONDS_PER_DAY) as f64
}
