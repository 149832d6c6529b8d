//! Chart layout: place selected series on one time axis with stacked value
//! axes.
//!
//! The first series owns the left axis. Every further series gets a right-hand
//! axis: the second sits on the plot edge, later ones float outward by a fixed
//! fraction of the figure width each. The plot domain shrinks to leave room
//! for them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::Dataset;
use crate::{FitboardError, LayoutParams};

/// Color for dataset series that have no palette entry.
pub const FALLBACK_COLOR: &str = "#444444";

/// Series the viewer offers by default, each with a fixed display color.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum KnownSeries {
    Power,
    SpeedKmh,
    Cadence,
    AltitudeNorm,
    HeartRate,
}

impl KnownSeries {
    pub const ALL: [KnownSeries; 5] = [
        KnownSeries::Power,
        KnownSeries::SpeedKmh,
        KnownSeries::Cadence,
        KnownSeries::AltitudeNorm,
        KnownSeries::HeartRate,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.name() == name)
    }

    /// Column name in the extracted dataset.
    pub fn name(self) -> &'static str {
        match self {
            KnownSeries::Power => "power",
            KnownSeries::SpeedKmh => "speed_kmh",
            KnownSeries::Cadence => "cadence",
            KnownSeries::AltitudeNorm => "altitude_norm",
            KnownSeries::HeartRate => "heart_rate",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            KnownSeries::Power => "Power",
            KnownSeries::SpeedKmh => "Speed",
            KnownSeries::Cadence => "Cadence",
            KnownSeries::AltitudeNorm => "Altitude",
            KnownSeries::HeartRate => "Heart Rate",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            KnownSeries::Power => "#353132",
            KnownSeries::SpeedKmh => "#2ca02c",
            KnownSeries::Cadence => "#1f77b4",
            KnownSeries::AltitudeNorm => "#7f7f7f",
            KnownSeries::HeartRate => "#2ca02c",
        }
    }
}

pub fn series_color(name: &str) -> &'static str {
    KnownSeries::from_name(name).map_or(FALLBACK_COLOR, KnownSeries::color)
}

/// Visible time range in minutes. Missing bounds are open-ended.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeWindow {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

impl TimeWindow {
    pub fn new(lower: Option<f64>, upper: Option<f64>) -> Self {
        Self { lower, upper }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Inclusive index range of `times` inside the window, `None` when no
    /// sample qualifies.
    pub fn slice_bounds(&self, times: &[f64]) -> Option<(usize, usize)> {
        let start = match self.lower {
            Some(lower) => times.iter().position(|&t| t > lower)?,
            None => 0,
        };
        let end = match self.upper {
            Some(upper) => times.iter().rposition(|&t| t < upper)?,
            None => times.len().checked_sub(1)?,
        };
        (start <= end).then_some((start, end))
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Anchor {
    /// Attached to the plot area edge.
    Primary,
    /// Floating at `offset` in figure coordinates.
    Free,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AxisAssignment {
    pub series: String,
    pub axis_id: String,
    pub side: Side,
    pub anchor: Anchor,
    /// Horizontal position as a fraction of the figure width.
    pub offset: f64,
    pub color: String,
    pub title: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Trace {
    pub series: String,
    pub axis_id: String,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub color: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MeanMarker {
    pub series: String,
    pub axis_id: String,
    pub mean: f64,
    /// Visible time range the reference line spans.
    pub x: [f64; 2],
    pub color: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Chart {
    pub traces: Vec<Trace>,
    pub axes: Vec<AxisAssignment>,
    pub means: Vec<MeanMarker>,
    /// Right edge of the plot area in figure coordinates; the left edge is 0.
    pub domain_width: f64,
    pub x_title: String,
    pub x_range: TimeWindow,
    pub title: Option<String>,
    pub width_px: u32,
    pub height_px: u32,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoDataReason {
    EmptyDataset,
    MissingTimeAxis,
    EmptyWindow,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChartSpec {
    Chart(Chart),
    NoData { reason: NoDataReason },
}

impl ChartSpec {
    pub fn no_data(reason: NoDataReason) -> Self {
        ChartSpec::NoData { reason }
    }

    pub fn chart(&self) -> Option<&Chart> {
        match self {
            ChartSpec::Chart(chart) => Some(chart),
            ChartSpec::NoData { .. } => None,
        }
    }
}

/// Width of the plot area for `n_axes` stacked axes, never negative.
pub fn plot_domain_width(n_axes: usize, increment: f64) -> f64 {
    let cut = (n_axes.saturating_sub(1) as f64 * increment).max(0.0);
    (1.0 - cut).max(0.0)
}

/// Side, anchor and horizontal offset for each of `n_axes` axes.
pub fn stack_axes(n_axes: usize, increment: f64) -> Vec<(Side, Anchor, f64)> {
    let domain_end = plot_domain_width(n_axes, increment);
    (0..n_axes)
        .map(|i| match i {
            0 => (Side::Left, Anchor::Primary, 0.0),
            1 => (Side::Right, Anchor::Primary, domain_end),
            _ => (
                Side::Right,
                Anchor::Free,
                (domain_end + (i - 1) as f64 * increment).min(1.0),
            ),
        })
        .collect()
}

pub fn axis_id(index: usize) -> String {
    if index == 0 {
        "y".to_string()
    } else {
        format!("y{}", index + 1)
    }
}

/// Lay out `series` with default parameters.
pub fn layout<S: AsRef<str>>(
    dataset: &Dataset,
    series: &[S],
    window: TimeWindow,
    show_mean: bool,
) -> Result<ChartSpec, FitboardError> {
    layout_with(dataset, series, window, show_mean, &LayoutParams::default())
}

pub fn layout_with<S: AsRef<str>>(
    dataset: &Dataset,
    series: &[S],
    window: TimeWindow,
    show_mean: bool,
    params: &LayoutParams,
) -> Result<ChartSpec, FitboardError> {
    if dataset.is_empty() {
        return Ok(ChartSpec::no_data(NoDataReason::EmptyDataset));
    }
    let names: Vec<&str> = series.iter().map(|s| s.as_ref()).collect();
    if let Some(unknown) = names.iter().find(|name| !dataset.contains(name)) {
        return Err(FitboardError::UnknownSeries(unknown.to_string()));
    }
    params.validate()?;

    let Some(seconds) = dataset.values("time_norm") else {
        return Ok(ChartSpec::no_data(NoDataReason::MissingTimeAxis));
    };
    let minutes: Vec<f64> = seconds.iter().map(|s| s / 60.0).collect();
    let Some((start, end)) = window.slice_bounds(&minutes) else {
        debug!("window {:?} selects no samples", window);
        return Ok(ChartSpec::no_data(NoDataReason::EmptyWindow));
    };
    let times = &minutes[start..=end];

    let domain_width = plot_domain_width(names.len(), params.axis_increment);
    let placement = stack_axes(names.len(), params.axis_increment);

    let mut traces = Vec::with_capacity(names.len());
    let mut axes = Vec::with_capacity(names.len());
    let mut means = Vec::new();
    let mut summary = Vec::new();

    for (i, (&name, (side, anchor, offset))) in names.iter().zip(placement).enumerate() {
        let id = axis_id(i);
        let color = series_color(name).to_string();
        // Presence checked above.
        let values = dataset.values(name).unwrap_or_default();
        let visible = &values[start..=end];
        debug!("plot {} on axis {} ({:?}, {:?})", name, id, side, anchor);

        traces.push(Trace {
            series: name.to_string(),
            axis_id: id.clone(),
            x: times.to_vec(),
            y: visible.to_vec(),
            color: color.clone(),
        });

        if show_mean {
            let mean = visible.iter().sum::<f64>() / visible.len() as f64;
            summary.push(format!("{}={:.1}", name, mean));
            means.push(MeanMarker {
                series: name.to_string(),
                axis_id: id.clone(),
                mean,
                x: [times[0], times[times.len() - 1]],
                color: color.clone(),
            });
        }

        let title = match dataset.unit(name) {
            Some(unit) => format!("{} in {}", name, unit),
            None => name.to_string(),
        };
        axes.push(AxisAssignment {
            series: name.to_string(),
            axis_id: id,
            side,
            anchor,
            offset,
            color,
            title,
        });
    }

    let title = if summary.is_empty() {
        None
    } else {
        Some(format!("Mean values: {}", summary.join(", ")))
    };
    let width_px = (params.base_width_px as f64
        / domain_width.max(params.axis_increment).max(f64::EPSILON))
    .round() as u32;

    Ok(ChartSpec::Chart(Chart {
        traces,
        axes,
        means,
        domain_width,
        x_title: "Time in min".to_string(),
        x_range: window,
        title,
        width_px,
        height_px: params.height_px,
    }))
}
