use std::fs::{self, File};
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use cellcast::presenter::{format_capacity_tick, X_AXIS_LABEL, Y_AXIS_LABEL};
use cellcast::transport::DEFAULT_BASE_URL;
use cellcast::{
    ChartPoint, ClientConfig, Controller, DashboardView, HttpTransport, PredictionResult,
    SelectedFile, DEFAULT_FUTURE_CYCLES,
};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const PREDICTION_COLOR: RGBColor = RGBColor(0, 122, 255);
const GRID_COLOR: RGBColor = RGBColor(224, 232, 243);

#[derive(Parser, Debug)]
#[command(author, version, about = "Battery capacity prediction client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a .csv/.xlsx cycle log and show the predicted capacity curve
    Predict(PredictArgs),
    /// Re-render a saved prediction response without contacting the server
    Render(RenderArgs),
}

#[derive(Parser, Debug)]
struct PredictArgs {
    /// Battery cycle data (.csv or .xlsx)
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Number of future cycles to predict (1-500)
    #[arg(short = 'n', long, default_value_t = DEFAULT_FUTURE_CYCLES, allow_negative_numbers = true)]
    future_cycles: i64,

    /// Inference server base URL
    #[arg(long, default_value = DEFAULT_BASE_URL, value_hint = ValueHint::Url)]
    server: String,

    /// Save the decoded prediction result as JSON (predictions and insights
    /// only; fields the client does not use are not kept)
    #[arg(long, value_hint = ValueHint::FilePath)]
    save_response: Option<PathBuf>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Prediction JSON, either a server response or a file saved with
    /// `predict --save-response`
    #[arg(value_hint = ValueHint::FilePath)]
    response: PathBuf,

    /// File name shown in the dashboard title (defaults to the response file name)
    #[arg(long)]
    file_name: Option<String>,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug, Clone)]
struct OutputArgs {
    /// Output CSV of chart points (`-` for stdout)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    csv: Option<PathBuf>,

    /// Output PNG chart path (defaults next to the CSV)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG chart path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Disable chart generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Predict(args) => args.output.verbose,
        Command::Render(args) => args.output.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Predict(args) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(handle_predict(args))
        }
        Command::Render(args) => handle_render(args),
    }
}

async fn handle_predict(args: PredictArgs) -> Result<()> {
    let config = ClientConfig::new(args.server.clone());
    let transport = HttpTransport::new(&config);
    debug!("Using endpoint {}", transport.endpoint());
    let mut controller = Controller::new(transport);

    let file = SelectedFile::from_path(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    controller.select_file(file);
    controller.set_future_cycles(args.future_cycles);

    let t_request = Instant::now();
    if let Err(err) = controller.submit().await {
        return Err(anyhow!(err.user_message()));
    }
    info!(
        "Prediction received in {:.1} ms",
        t_request.elapsed().as_secs_f64() * 1000.0
    );

    let dashboard = controller
        .state()
        .dashboard()
        .ok_or_else(|| anyhow!("prediction did not produce a dashboard"))?;

    if let Some(path) = args.save_response.as_ref() {
        write_response_json(dashboard.result(), path)?;
        info!("Wrote prediction result: {}", path.display());
    }

    present(&dashboard.view(), &args.output)
}

fn handle_render(args: RenderArgs) -> Result<()> {
    let result = PredictionResult::from_json_file(&args.response)
        .with_context(|| format!("failed to load {}", args.response.display()))?;
    let file_name = args.file_name.clone().unwrap_or_else(|| {
        args.response
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| args.response.display().to_string())
    });
    let view = DashboardView::from_result(&file_name, &result);
    present(&view, &args.output)
}

fn present(view: &DashboardView, opts: &OutputArgs) -> Result<()> {
    let csv_to_stdout = opts.csv.as_ref().is_some_and(|p| p.as_os_str() == "-");
    if !csv_to_stdout {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(view.render_text().as_bytes())?;
        handle.flush()?;
    }

    if let Some(csv_path) = opts.csv.as_ref() {
        if csv_to_stdout {
            write_points_stdout(&view.points)?;
        } else {
            write_points_csv(&view.points, csv_path)?;
            info!("Wrote chart points: {}", csv_path.display());
        }
    }

    if opts.no_plot {
        return Ok(());
    }

    let png_path = opts.png.clone().or_else(|| {
        opts.csv
            .as_ref()
            .filter(|_| !csv_to_stdout)
            .map(|p| p.with_extension("png"))
    });
    if let Some(path) = png_path.as_ref() {
        report_chart(render_chart_guard(view, path, ChartKind::Png), path);
    }
    if let Some(path) = opts.svg.as_ref() {
        report_chart(render_chart_guard(view, path, ChartKind::Svg), path);
    }
    Ok(())
}

fn report_chart(outcome: Result<bool, String>, path: &Path) {
    match outcome {
        Ok(true) => info!("Wrote chart: {}", path.display()),
        Ok(false) => info!("No predicted points; skipped chart {}", path.display()),
        Err(err) => warn!("Skipping chart render ({}): {}", path.display(), err),
    }
}

/// Writes the result as decoded, not the server's original bytes.
fn write_response_json(result: &PredictionResult, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(result)?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn write_points_stdout(points: &[ChartPoint]) -> Result<()> {
    let stdout = io::stdout();
    let handle = stdout.lock();
    let mut writer = csv::Writer::from_writer(handle);
    write_point_rows(points, &mut writer)
}

fn write_points_csv(points: &[ChartPoint], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_point_rows(points, &mut writer)
}

fn write_point_rows<W: Write>(points: &[ChartPoint], writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record(["cycle", "capacity_mah"])?;
    for point in points {
        writer.write_record([point.cycle.to_string(), format!("{:.4}", point.capacity)])?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Clone, Copy, Debug)]
enum ChartKind {
    Png,
    Svg,
}

/// Render one chart, turning backend panics (missing fonts and the like)
/// into errors. `Ok(false)` means there was nothing to draw.
fn render_chart_guard(view: &DashboardView, path: &Path, kind: ChartKind) -> Result<bool, String> {
    let render = || -> Result<bool> { render_chart(view, path, kind) };
    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
        .map_err(|err| format!("plotting error: {err}"))
}

fn render_chart(view: &DashboardView, path: &Path, kind: ChartKind) -> Result<bool> {
    if view.points.is_empty() {
        return Ok(false);
    }
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
            draw_chart(root, view)?;
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, (1280, 720)).into_drawing_area();
            draw_chart(root, view)?;
        }
    }
    Ok(true)
}

fn draw_chart<DB>(root: DrawingArea<DB, plotters::coord::Shift>, view: &DashboardView) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    let (x_lo, x_hi) = view
        .x_range()
        .ok_or_else(|| anyhow!("no points to draw"))?;
    let (y_lo, y_hi) = view.y_domain.bounds().unwrap_or((0.0, 1.0));
    let series: Vec<(f64, f64)> = view
        .points
        .iter()
        .map(|p| (p.cycle as f64, p.capacity))
        .collect();

    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Prediction for: {}", view.file_name),
            FontDesc::new(FontFamily::SansSerif, 24.0, FontStyle::Normal),
        )
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 80)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(x_lo as f64..x_hi as f64, y_lo..y_hi)?;

    chart
        .configure_mesh()
        .x_desc(X_AXIS_LABEL)
        .y_desc(Y_AXIS_LABEL)
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format_capacity_tick(*v))
        .bold_line_style(&GRID_COLOR)
        .light_line_style(&TRANSPARENT)
        .label_style(FontDesc::new(
            FontFamily::SansSerif,
            16.0,
            FontStyle::Normal,
        ))
        .draw()?;

    chart
        .draw_series(LineSeries::new(
            series.iter().copied(),
            PREDICTION_COLOR.stroke_width(3),
        ))?
        .label("Predicted")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], PREDICTION_COLOR));

    chart.draw_series(
        series
            .iter()
            .map(|&(x, y)| Circle::new((x, y), 3, PREDICTION_COLOR.filled())),
    )?;

    if let Some(card) = view.summary.card() {
        let label = format!("{:.2} mAh at cycle {}", card.capacity, card.cycle);
        chart.draw_series(std::iter::once(Text::new(
            label,
            (card.cycle as f64, card.capacity),
            FontDesc::new(FontFamily::SansSerif, 14.0, FontStyle::Normal).color(&BLACK),
        )))?;
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .label_font(FontDesc::new(
            FontFamily::SansSerif,
            16.0,
            FontStyle::Normal,
        ))
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;

    root.present()?;
    Ok(())
}
