//! Reconcile FIT activity sample records into a columnar dataset and lay out
//! selected series on a shared time axis with stacked value axes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod dataset;
pub mod extract;
pub mod frame;
pub mod layout;
pub mod plotly;

pub use dataset::{Column, Dataset};
pub use extract::{
    extract, extract_frames, extract_frames_with_census, extract_with_census, Census, Extraction,
};
pub use frame::{decode_fit, DecodeError, Field, FieldValue, Frame, FrameKind, MessageKind, SchemaKey};
pub use layout::{
    layout, layout_with, series_color, Anchor, AxisAssignment, Chart, ChartSpec, KnownSeries,
    MeanMarker, NoDataReason, Side, TimeWindow, Trace,
};

#[derive(Error, Debug)]
pub enum FitboardError {
    #[error("invalid FIT file entries: {0}")]
    InvalidFitFile(#[source] DecodeError),
    #[error("inconsistent columns in FIT records: frame {frame} has {found}, expected {expected}")]
    SchemaInconsistency {
        frame: usize,
        expected: SchemaKey,
        found: SchemaKey,
    },
    #[error("column {series} has {found} samples, expected {expected}")]
    RaggedDataset {
        series: String,
        expected: usize,
        found: usize,
    },
    #[error("unknown series: {0}")]
    UnknownSeries(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutParams {
    /// Figure-width fraction reserved per additional value axis.
    pub axis_increment: f64,
    /// Figure width when only the primary axis is shown.
    pub base_width_px: u32,
    pub height_px: u32,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            axis_increment: 0.1,
            base_width_px: 1000,
            height_px: 450,
        }
    }
}

impl LayoutParams {
    pub fn validate(&self) -> Result<(), FitboardError> {
        if !(0.0..1.0).contains(&self.axis_increment) {
            return Err(FitboardError::InvalidParameter(format!(
                "axis_increment must be in [0, 1), got {}",
                self.axis_increment
            )));
        }
        if self.base_width_px == 0 || self.height_px == 0 {
            return Err(FitboardError::InvalidParameter(
                "figure dimensions must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        assert!(LayoutParams::default().validate().is_ok());
    }

    #[test]
    fn partial_params_fill_defaults() {
        let params: LayoutParams = serde_json::from_str(r#"{"axis_increment": 0.05}"#).unwrap();
        assert_eq!(params.axis_increment, 0.05);
        assert_eq!(params.base_width_px, 1000);
    }

    #[test]
    fn error_messages() {
        let err = FitboardError::UnknownSeries("watts".into());
        assert_eq!(err.to_string(), "unknown series: watts");
        let err = FitboardError::InvalidFitFile(DecodeError::Panicked("boom".into()));
        assert_eq!(err.to_string(), "invalid FIT file entries: decoder panicked: boom");
    }
}
