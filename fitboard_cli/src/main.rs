use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use fitboard::{
    extract, extract_with_census, layout_with, ChartSpec, Dataset, Extraction, FitboardError,
    KnownSeries, LayoutParams, TimeWindow,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod render;
mod scan;

use render::{render_chart_guard, ImageKind};
use scan::{default_activity_dir, scan_activity_dir, ScanParams};

#[derive(Parser, Debug)]
#[command(author, version, about = "Viewer for FIT activity data", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    /// Optional JSON file with `layout` (used by plot) and `scan` (used by list) settings
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List activity files in a folder
    List(ListArgs),
    /// Report the record schemas found in FIT files
    Inspect(InspectArgs),
    /// Write the extracted dataset as CSV
    Export(ExportArgs),
    /// Lay out selected series and write the chart
    Plot(PlotArgs),
}

#[derive(Parser, Debug)]
struct ListArgs {
    /// Activity folder (defaults to ~/Documents/Zwift/Activities)
    #[arg(value_hint = ValueHint::DirPath)]
    dir: Option<PathBuf>,

    /// Include empty activity files
    #[arg(long, action = ArgAction::SetTrue)]
    all: bool,
}

#[derive(Parser, Debug)]
struct InspectArgs {
    /// FIT files to inspect
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    /// Output report path (stdout when omitted)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// FIT file to export
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct PlotArgs {
    /// FIT file to plot
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Series to show, comma separated; the first one owns the left axis
    #[arg(short, long, default_value = "power")]
    series: String,

    /// Window start in minutes
    #[arg(long)]
    from: Option<f64>,

    /// Window end in minutes
    #[arg(long)]
    to: Option<f64>,

    /// Hide the mean value overlay
    #[arg(long, action = ArgAction::SetTrue)]
    no_mean: bool,

    /// Plotly figure JSON output (`-` for stdout)
    #[arg(long, value_hint = ValueHint::FilePath)]
    json: Option<PathBuf>,

    /// Output SVG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Output PNG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct CliConfig {
    layout: LayoutParams,
    scan: ScanParams,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => CliConfig::default(),
    };

    match cli.command {
        Command::List(args) => handle_list(args, &config),
        Command::Inspect(args) => handle_inspect(args),
        Command::Export(args) => handle_export(args),
        Command::Plot(args) => handle_plot(args, &config),
    }
}

fn load_config(path: &Path) -> Result<CliConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: CliConfig = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid config", path.display()))?;
    config.layout.validate()?;
    debug!("loaded config {:?}", config);
    Ok(config)
}

fn handle_list(args: ListArgs, config: &CliConfig) -> Result<()> {
    let dir = match args.dir {
        Some(dir) => dir,
        None => default_activity_dir().ok_or_else(|| anyhow!("no home directory; pass a folder"))?,
    };
    let mut params = config.scan.clone();
    params.include_empty |= args.all;

    let files = scan_activity_dir(&dir, &params)?;
    info!(
        "found {} {}FIT files in {}",
        files.len(),
        if params.include_empty { "" } else { "non-empty " },
        dir.display()
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for file in &files {
        writeln!(out, "{:>10}  {}", file.size_bytes, file.file_name())?;
    }
    Ok(())
}

fn handle_inspect(args: InspectArgs) -> Result<()> {
    let results: Vec<(PathBuf, Result<Extraction, FitboardError>)> = args
        .inputs
        .par_iter()
        .map(|path| (path.clone(), extract_with_census(path)))
        .collect();

    let mut report = String::new();
    for (path, result) in results {
        match result {
            Ok(extraction) => report.push_str(&census_report(&path, &extraction)),
            Err(err) => {
                warn!("{}: {}", path.display(), err);
                report.push_str(&format!("FILE: {}\n  error: {}\n\n", path.display(), err));
            }
        }
    }

    match &args.output {
        Some(output) => {
            fs::write(output, report)
                .with_context(|| format!("failed to write {}", output.display()))?;
            info!("Inspection report written: {}", output.display());
        }
        None => io::stdout().lock().write_all(report.as_bytes())?,
    }
    Ok(())
}

fn census_report(path: &Path, extraction: &Extraction) -> String {
    let census = &extraction.census;
    let mut report = String::new();
    report.push_str(&format!("FILE: {}\n", path.display()));
    report.push_str(&format!("  sample_records: {}\n", census.sample_frames));
    report.push_str(&format!(
        "  accepted: {}, dropped: {}\n",
        census.accepted, census.dropped
    ));
    report.push_str(&format!("  session_records: {}\n", census.session_frames));
    if let Some(selected) = &census.selected {
        report.push_str(&format!("  selected_schema: {}\n", selected));
    }

    if !census.counts.is_empty() {
        report.push_str("  schemas:\n");
        let mut counts = census.counts.clone();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        for (key, count) in counts {
            report.push_str(&format!("    - count={} {}\n", count, key));
        }
    }

    let dataset = &extraction.dataset;
    if !dataset.is_empty() {
        report.push_str("  series:\n");
        for (name, column) in dataset.columns() {
            report.push_str(&format!(
                "    - {} [{}]\n",
                name,
                column.unit.as_deref().unwrap_or("-")
            ));
        }
    }
    report.push('\n');
    report
}

fn handle_export(args: ExportArgs) -> Result<()> {
    let dataset = extract(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    if dataset.is_empty() {
        warn!("{} holds no sample records", args.input.display());
    }

    if args.output == Path::new("-") {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_dataset_rows(&dataset, &mut writer)
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_dataset_rows(&dataset, &mut writer)?;
        info!("CSV written: {}", args.output.display());
        Ok(())
    }
}

fn write_dataset_rows<W: Write>(dataset: &Dataset, writer: &mut csv::Writer<W>) -> Result<()> {
    let columns: Vec<(&str, &[f64])> = dataset
        .columns()
        .map(|(name, column)| (name, column.values.as_slice()))
        .collect();
    if columns.is_empty() {
        writer.flush()?;
        return Ok(());
    }
    writer.write_record(columns.iter().map(|(name, _)| *name))?;
    for row in 0..dataset.len() {
        writer.write_record(columns.iter().map(|(_, values)| values[row].to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

fn handle_plot(args: PlotArgs, config: &CliConfig) -> Result<()> {
    let dataset = extract(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    let series = parse_series_list(&args.series);
    let window = TimeWindow::new(args.from, args.to);

    let spec = match layout_with(&dataset, &series, window, !args.no_mean, &config.layout) {
        Ok(spec) => spec,
        Err(FitboardError::UnknownSeries(name)) => {
            return Err(anyhow!(
                "series '{}' not found; available: {}",
                name,
                available_series(&dataset)
            ));
        }
        Err(err) => return Err(err.into()),
    };
    if let ChartSpec::NoData { reason } = &spec {
        warn!("nothing to plot ({:?})", reason);
    }

    let json_target = match (&args.json, &args.svg, &args.png) {
        (None, None, None) => Some(PathBuf::from("-")),
        (json, _, _) => json.clone(),
    };
    if let Some(target) = json_target {
        write_figure_json(&spec, &target)?;
    }
    if let Some(path) = &args.svg {
        render_chart_guard(&spec, path, ImageKind::Svg).map_err(|e| anyhow!(e))?;
        info!("SVG written: {}", path.display());
    }
    if let Some(path) = &args.png {
        render_chart_guard(&spec, path, ImageKind::Png).map_err(|e| anyhow!(e))?;
        info!("PNG written: {}", path.display());
    }
    Ok(())
}

fn write_figure_json(spec: &ChartSpec, target: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(&spec.to_plotly())?;
    if target == Path::new("-") {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "{}", text)?;
    } else {
        fs::write(target, text)
            .with_context(|| format!("failed to write {}", target.display()))?;
        info!("Figure JSON written: {}", target.display());
    }
    Ok(())
}

/// Dataset columns, with the display label of palette series.
fn available_series(dataset: &Dataset) -> String {
    dataset
        .names()
        .map(|name| match KnownSeries::from_name(name) {
            Some(known) => format!("{} ({})", name, known.label()),
            None => name.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_series_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
