//! Plotly figure JSON for a [`ChartSpec`].

use serde_json::{json, Map, Value};

use crate::layout::{Anchor, Chart, ChartSpec, Side};

impl ChartSpec {
    /// Figure object (`data` and `layout`) ready for `Plotly.react`.
    pub fn to_plotly(&self) -> Value {
        match self {
            ChartSpec::Chart(chart) => chart_figure(chart),
            ChartSpec::NoData { .. } => json!({
                "data": [],
                "layout": {
                    "annotations": [{
                        "x": 0,
                        "y": 0,
                        "text": "No data to plot",
                        "showarrow": false
                    }]
                }
            }),
        }
    }
}

fn chart_figure(chart: &Chart) -> Value {
    let mut data = Vec::with_capacity(chart.traces.len() + chart.means.len());
    for (trace, mean) in chart.traces.iter().zip(
        chart
            .means
            .iter()
            .map(Some)
            .chain(std::iter::repeat(None)),
    ) {
        data.push(json!({
            "type": "scatter",
            "mode": "lines",
            "name": trace.series,
            "x": trace.x,
            "y": trace.y,
            "yaxis": trace.axis_id,
            "line": { "color": trace.color },
            "showlegend": false
        }));
        if let Some(mean) = mean {
            data.push(json!({
                "type": "scatter",
                "mode": "lines",
                "name": mean.series,
                "x": mean.x,
                "y": [mean.mean, mean.mean],
                "yaxis": mean.axis_id,
                "line": { "color": mean.color, "dash": "dash" },
                "showlegend": false
            }));
        }
    }

    let mut layout = Map::new();
    layout.insert(
        "xaxis".into(),
        json!({
            "title": chart.x_title,
            "domain": [0.0, chart.domain_width],
            "range": [chart.x_range.lower, chart.x_range.upper]
        }),
    );
    for axis in &chart.axes {
        let mut props = json!({
            "title": axis.title,
            "titlefont": { "color": axis.color },
            "tickfont": { "color": axis.color }
        });
        if axis.side == Side::Right {
            props["overlaying"] = json!("y");
            props["side"] = json!("right");
            props["showgrid"] = json!(false);
            match axis.anchor {
                Anchor::Primary => props["anchor"] = json!("x"),
                Anchor::Free => {
                    props["anchor"] = json!("free");
                    props["position"] = json!(axis.offset);
                }
            }
        }
        layout.insert(layout_axis_key(&axis.axis_id), props);
    }
    layout.insert("width".into(), json!(chart.width_px));
    layout.insert("height".into(), json!(chart.height_px));
    if let Some(title) = &chart.title {
        layout.insert("title".into(), json!({ "text": title }));
    }

    json!({ "data": data, "layout": Value::Object(layout) })
}

/// `y` -> `yaxis`, `y3` -> `yaxis3`.
fn layout_axis_key(axis_id: &str) -> String {
    format!("yaxis{}", axis_id.trim_start_matches('y'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{layout, NoDataReason, TimeWindow};
    use crate::Dataset;

    fn dataset() -> Dataset {
        let mut ds = Dataset::new();
        assert!(ds.push_column("time_norm", Some("s".into()), vec![0.0, 60.0, 120.0]));
        assert!(ds.push_column("power", Some("watts".into()), vec![100.0, 200.0, 300.0]));
        assert!(ds.push_column("cadence", Some("rpm".into()), vec![80.0, 90.0, 100.0]));
        assert!(ds.push_column("heart_rate", Some("bpm".into()), vec![120.0, 130.0, 140.0]));
        ds
    }

    #[test]
    fn placeholder_is_an_annotation() {
        let fig = ChartSpec::no_data(NoDataReason::EmptyWindow).to_plotly();
        assert_eq!(fig["data"].as_array().map(Vec::len), Some(0));
        assert_eq!(fig["layout"]["annotations"][0]["text"], "No data to plot");
    }

    #[test]
    fn stacked_axes_become_layout_entries() {
        let spec = layout(
            &dataset(),
            &["power", "cadence", "heart_rate"],
            TimeWindow::new(None, Some(10.0)),
            true,
        )
        .unwrap();
        let fig = spec.to_plotly();

        let data = fig["data"].as_array().unwrap();
        assert_eq!(data.len(), 6);
        assert_eq!(data[0]["yaxis"], "y");
        assert_eq!(data[1]["line"]["dash"], "dash");
        assert_eq!(data[2]["yaxis"], "y2");

        let layout = &fig["layout"];
        assert_eq!(layout["yaxis"]["title"], "power in watts");
        assert!(layout["yaxis"].get("overlaying").is_none());
        assert_eq!(layout["yaxis2"]["anchor"], "x");
        assert_eq!(layout["yaxis3"]["anchor"], "free");
        assert_eq!(layout["yaxis3"]["overlaying"], "y");
        assert!((layout["xaxis"]["domain"][1].as_f64().unwrap() - 0.8).abs() < 1e-9);
        assert!(layout["xaxis"]["range"][0].is_null());
        assert_eq!(layout["xaxis"]["range"][1], 10.0);
        assert_eq!(
            layout["title"]["text"],
            "Mean values: power=200.0, cadence=90.0, heart_rate=130.0"
        );
    }

    #[test]
    fn no_title_without_means() {
        let spec = layout(&dataset(), &["power"], TimeWindow::unbounded(), false).unwrap();
        let fig = spec.to_plotly();
        assert!(fig["layout"].get("title").is_none());
        assert_eq!(fig["data"].as_array().map(Vec::len), Some(1));
    }
}
