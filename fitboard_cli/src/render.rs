use std::panic;
use std::path::Path;

use anyhow::Result;
use fitboard::{Chart, ChartSpec};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};

const NO_DATA_SIZE: (u32, u32) = (1000, 450);
const AXIS_TICKS: usize = 5;

#[derive(Clone, Copy, Debug)]
pub enum ImageKind {
    Png,
    Svg,
}

/// Render `spec` to `path`; backend panics come back as errors.
pub fn render_chart_guard(spec: &ChartSpec, path: &Path, kind: ImageKind) -> Result<(), String> {
    let render = || render_chart(spec, path, kind).map_err(|e| format!("plotting error: {}", e));
    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_chart(spec: &ChartSpec, path: &Path, kind: ImageKind) -> Result<()> {
    let size = spec
        .chart()
        .map_or(NO_DATA_SIZE, |chart| (chart.width_px, chart.height_px));
    match kind {
        ImageKind::Png => {
            let root = BitMapBackend::new(path, size).into_drawing_area();
            draw_spec(root, spec)
        }
        ImageKind::Svg => {
            let root = SVGBackend::new(path, size).into_drawing_area();
            draw_spec(root, spec)
        }
    }
}

fn draw_spec<DB>(root: DrawingArea<DB, Shift>, spec: &ChartSpec) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    match spec {
        ChartSpec::Chart(chart) => draw_chart(&root, chart)?,
        ChartSpec::NoData { .. } => {
            let (w, h) = root.dim_in_pixel();
            let font = FontDesc::new(FontFamily::SansSerif, 24.0, FontStyle::Normal);
            root.draw(&Text::new(
                "No data to plot",
                (w as i32 / 2 - 90, h as i32 / 2),
                font.color(&BLACK.mix(0.7)),
            ))?;
        }
    }
    root.present()?;
    Ok(())
}

/// Value range of one axis; flat series get a unit-wide band.
#[derive(Clone, Copy, Debug, PartialEq)]
struct AxisRange {
    lo: f64,
    hi: f64,
}

impl AxisRange {
    fn of(values: &[f64]) -> Self {
        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !lo.is_finite() || !hi.is_finite() {
            return AxisRange { lo: 0.0, hi: 1.0 };
        }
        if (hi - lo).abs() < f64::EPSILON {
            return AxisRange {
                lo: lo - 0.5,
                hi: hi + 0.5,
            };
        }
        AxisRange { lo, hi }
    }

    fn normalize(&self, v: f64) -> f64 {
        (v - self.lo) / (self.hi - self.lo)
    }

    fn denormalize(&self, v: f64) -> f64 {
        self.lo + v * (self.hi - self.lo)
    }
}

fn draw_chart<DB>(root: &DrawingArea<DB, Shift>, chart: &Chart) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (width, _) = root.dim_in_pixel();
    let plot_px = ((width as f64 * chart.domain_width).round() as u32).clamp(1, width.max(1));
    let (plot_area, _) = root.split_horizontally(plot_px as i32);

    // Every value axis is drawn on a shared 0..1 scale and relabelled per axis.
    let ranges: Vec<AxisRange> = chart.traces.iter().map(|t| AxisRange::of(&t.y)).collect();
    let x_range = chart
        .traces
        .first()
        .map(|t| AxisRange::of(&t.x))
        .unwrap_or(AxisRange { lo: 0.0, hi: 1.0 });

    let title_font = FontDesc::new(FontFamily::SansSerif, 20.0, FontStyle::Normal);
    let axis_font = FontDesc::new(FontFamily::SansSerif, 14.0, FontStyle::Normal);

    let mut builder = ChartBuilder::on(&plot_area);
    builder
        .margin(20)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 45)
        .set_label_area_size(
            LabelAreaPosition::Right,
            if chart.axes.len() > 1 { 70 } else { 0 },
        );
    if let Some(title) = &chart.title {
        builder.caption(title, title_font.clone());
    }
    let mut ctx = builder
        .build_cartesian_2d(x_range.lo..x_range.hi, 0.0..1.0)?
        .set_secondary_coord(x_range.lo..x_range.hi, 0.0..1.0);

    let primary = ranges.first().copied().unwrap_or(AxisRange { lo: 0.0, hi: 1.0 });
    let primary_fmt = move |v: &f64| format!("{:.0}", primary.denormalize(*v));
    let primary_color = chart
        .axes
        .first()
        .map_or(BLACK, |axis| parse_hex_color(&axis.color));
    ctx.configure_mesh()
        .light_line_style(&TRANSPARENT)
        .x_desc(chart.x_title.as_str())
        .y_desc(chart.axes.first().map_or("", |a| a.title.as_str()))
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&primary_fmt)
        .label_style(axis_font.clone().color(&primary_color))
        .draw()?;

    if let (Some(axis), Some(range)) = (chart.axes.get(1), ranges.get(1).copied()) {
        let secondary_fmt = move |v: &f64| format!("{:.0}", range.denormalize(*v));
        ctx.configure_secondary_axes()
            .y_desc(axis.title.as_str())
            .y_label_formatter(&secondary_fmt)
            .label_style(axis_font.clone().color(&parse_hex_color(&axis.color)))
            .draw()?;
    }

    for (trace, range) in chart.traces.iter().zip(&ranges) {
        let color = parse_hex_color(&trace.color);
        ctx.draw_series(LineSeries::new(
            trace
                .x
                .iter()
                .copied()
                .zip(trace.y.iter().map(|v| range.normalize(*v))),
            color.stroke_width(2),
        ))?;
    }
    for (mean, range) in chart.means.iter().zip(&ranges) {
        let level = range.normalize(mean.mean);
        ctx.draw_series(DashedLineSeries::new(
            vec![(mean.x[0], level), (mean.x[1], level)],
            8,
            6,
            parse_hex_color(&mean.color).stroke_width(1),
        ))?;
    }

    let (_, y_px) = ctx.plotting_area().get_pixel_range();
    drop(ctx);

    for (axis, range) in chart.axes.iter().zip(&ranges).skip(2) {
        let x = (axis.offset * width as f64).round() as i32;
        let color = parse_hex_color(&axis.color);
        root.draw(&PathElement::new(
            vec![(x, y_px.start), (x, y_px.end)],
            color.stroke_width(1),
        ))?;
        for tick in 0..=AXIS_TICKS {
            let frac = tick as f64 / AXIS_TICKS as f64;
            let y = y_px.end - ((y_px.end - y_px.start) as f64 * frac).round() as i32;
            root.draw(&PathElement::new(vec![(x, y), (x + 5, y)], color.stroke_width(1)))?;
            root.draw(&Text::new(
                format!("{:.0}", range.denormalize(frac)),
                (x + 8, y - 7),
                axis_font.clone().color(&color),
            ))?;
        }
        root.draw(&Text::new(
            axis.title.clone(),
            (x + 4, (y_px.start - 18).max(0)),
            axis_font.clone().color(&color),
        ))?;
    }

    Ok(())
}

fn parse_hex_color(hex: &str) -> RGBColor {
    let digits = hex.trim_start_matches('#');
    let channel = |i: usize| {
        digits
            .get(i..i + 2)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
    };
    match (digits.len(), channel(0), channel(2), channel(4)) {
        (6, Some(r), Some(g), Some(b)) => RGBColor(r, g, b),
        _ => RGBColor(68, 68, 68),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use fitboard::{extract_frames, layout, Dataset, Field, Frame, NoDataReason, TimeWindow};

    #[test]
    fn parses_palette_colors() {
        assert_eq!(parse_hex_color("#1f77b4"), RGBColor(0x1f, 0x77, 0xb4));
        assert_eq!(parse_hex_color("bogus"), RGBColor(68, 68, 68));
    }

    #[test]
    fn flat_range_is_widened() {
        let range = AxisRange::of(&[5.0, 5.0]);
        assert_eq!(range, AxisRange { lo: 4.5, hi: 5.5 });
        assert!((range.normalize(5.0) - 0.5).abs() < 1e-9);
        assert_eq!(AxisRange::of(&[]), AxisRange { lo: 0.0, hi: 1.0 });
    }

    fn ride(samples: i64) -> Dataset {
        let frames: Vec<Frame> = (0..samples)
            .map(|i| {
                let ts = DateTime::<Utc>::from_timestamp(1_700_000_000 + i * 10, 0).unwrap();
                Frame::record(vec![
                    Field::timestamp(ts),
                    Field::number("power", 150.0 + i as f64, "watts"),
                    Field::number("cadence", 85.0, "rpm"),
                    Field::number("heart_rate", 120.0 + i as f64 / 2.0, "bpm"),
                    Field::number("altitude", 20.0 + i as f64, "m"),
                ])
            })
            .collect();
        extract_frames(&frames).unwrap()
    }

    #[test]
    fn renders_svg_with_free_axes() {
        let spec = layout(
            &ride(30),
            &["power", "cadence", "heart_rate", "altitude_norm"],
            TimeWindow::unbounded(),
            true,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chart.svg");
        render_chart_guard(&spec, &path, ImageKind::Svg).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("Mean values"));
        assert!(svg.contains("altitude_norm in m"));
    }

    #[test]
    fn renders_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.svg");
        let spec = ChartSpec::no_data(NoDataReason::EmptyDataset);
        render_chart_guard(&spec, &path, ImageKind::Svg).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("No data to plot"));
    }
}
