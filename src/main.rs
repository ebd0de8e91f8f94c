//! spectrum-ingest CLI - parse local or remote tabular spectra

use clap::Parser;
use serde::Serialize;
use spectrum_ingest::{
    CancellationHandle, ContextConfig, DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_MAX_POINTS,
    DatasetContext, ParsedSpectrum, ReqwestTransport, TabularParser, derive_label, is_allowed_url,
    is_utf8,
};
use std::path::Path;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Turn delimited spectral data into normalized, plot-ready series.
///
/// Inputs may be local files or http(s) URLs. The delimiter, header row and
/// X column are detected automatically; long series are downsampled with
/// LTTB.
#[derive(Parser, Debug)]
#[command(name = "spectrum-ingest")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input files or http(s) URLs
    #[arg(required = true)]
    inputs: Vec<String>,

    /// MIME type to declare (default: inferred from the file extension)
    #[arg(short = 'm', long)]
    mime: Option<String>,

    /// Dataset label (default: file name or last URL path segment)
    #[arg(short = 'l', long)]
    label: Option<String>,

    /// Maximum points per series; 0 disables downsampling
    #[arg(short = 'n', long, default_value_t = DEFAULT_MAX_POINTS)]
    max_points: usize,

    /// Maximum payload size in bytes for remote inputs
    #[arg(short = 'b', long, default_value_t = DEFAULT_MAX_PAYLOAD_BYTES)]
    max_bytes: u64,

    /// Output format: text (default), json, or csv
    #[arg(short = 'f', long, default_value = "text")]
    format: OutputFormat,

    /// Include every point in the output
    #[arg(short = 'v', long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Csv,
}

/// One output record per input.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary<'a> {
    input: &'a str,
    label: &'a str,
    mime_type: &'a str,
    x_label: &'a str,
    points: usize,
    x_min: Option<f64>,
    x_max: Option<f64>,
    series: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    spectrum: Option<&'a ParsedSpectrum>,
}

impl<'a> Summary<'a> {
    fn new(input: &'a str, spectrum: &'a ParsedSpectrum, verbose: bool) -> Self {
        let range = spectrum.x_range();
        Self {
            input,
            label: &spectrum.label,
            mime_type: &spectrum.mime_type,
            x_label: &spectrum.x_label,
            points: spectrum.len(),
            x_min: range.map(|(min, _)| min),
            x_max: range.map(|(_, max)| max),
            series: spectrum.series_labels(),
            spectrum: verbose.then_some(spectrum),
        }
    }
}

fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("spectrum_ingest=info"));

    // Logs go to stderr so stdout stays machine-readable.
    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let mut config = ContextConfig::new();
    config
        .max_points(args.max_points)
        .max_payload_bytes(args.max_bytes)
        .sweep_interval(None);

    let cancel = CancellationHandle::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received - cancelling fetches");
                cancel.cancel();
            }
        }
    });

    let mut context = None;
    let mut printer = Printer::new(args.format, args.verbose);
    let mut exit_code = ExitCode::SUCCESS;

    for input in &args.inputs {
        let result = if is_allowed_url(input) {
            fetch_remote(input, &args, &config, &mut context, &cancel).await
        } else {
            parse_file(Path::new(input), &args)
        };

        match result {
            Ok(spectrum) => printer.print(input, &spectrum),
            Err(e) => {
                eprintln!("Error processing {input}: {e}");
                exit_code = ExitCode::FAILURE;
            }
        }
    }

    exit_code
}

async fn fetch_remote(
    url: &str,
    args: &Args,
    config: &ContextConfig,
    context: &mut Option<DatasetContext<ReqwestTransport>>,
    cancel: &CancellationHandle,
) -> Result<std::sync::Arc<ParsedSpectrum>, Box<dyn std::error::Error>> {
    let context = match context {
        Some(context) => context,
        slot => slot.insert(DatasetContext::init(ReqwestTransport::new()?, config)),
    };
    let mime = args.mime.as_deref().unwrap_or_else(|| mime_for_url(url));
    let label = args.label.as_deref().unwrap_or("");

    Ok(context
        .fetch_dataset_with(url, mime, label, cancel.clone())
        .await?)
}

fn parse_file(
    path: &Path,
    args: &Args,
) -> Result<std::sync::Arc<ParsedSpectrum>, Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    let text = if is_utf8(&bytes) {
        String::from_utf8(bytes)?
    } else {
        warn!(path = %path.display(), "input is not valid UTF-8; replacing invalid sequences");
        String::from_utf8_lossy(&bytes).into_owned()
    };

    let mime = args.mime.as_deref().unwrap_or_else(|| mime_for_path(path));
    let id = path.display().to_string();
    let label = match &args.label {
        Some(label) => label.clone(),
        None => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| derive_label(&id)),
    };

    let mut parser = TabularParser::new();
    parser.max_points(args.max_points);

    Ok(std::sync::Arc::new(parser.parse(&text, &id, &label, mime)?))
}

/// MIME type implied by the extension of a URL's path.
fn mime_for_url(url: &str) -> &'static str {
    match url::Url::parse(url) {
        Ok(parsed) => mime_for_path(Path::new(parsed.path())),
        Err(_) => "text/plain",
    }
}

/// MIME type implied by a file extension.
fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("tsv" | "tab") => "text/tab-separated-values",
        Some("csv") => "text/csv",
        _ => "text/plain",
    }
}

struct Printer {
    format: OutputFormat,
    verbose: bool,
    csv_header_printed: bool,
}

impl Printer {
    fn new(format: OutputFormat, verbose: bool) -> Self {
        Self {
            format,
            verbose,
            csv_header_printed: false,
        }
    }

    fn print(&mut self, input: &str, spectrum: &ParsedSpectrum) {
        match self.format {
            OutputFormat::Text => print_text_output(input, spectrum, self.verbose),
            OutputFormat::Json => print_json_output(input, spectrum, self.verbose),
            OutputFormat::Csv => {
                if !self.csv_header_printed {
                    println!("input,label,mime_type,x_label,points,x_min,x_max,series");
                    self.csv_header_printed = true;
                }
                print_csv_output(input, spectrum);
            }
        }
    }
}

fn print_text_output(input: &str, spectrum: &ParsedSpectrum, verbose: bool) {
    println!("Input: {input}");
    println!("  Label: {}", spectrum.label);
    println!("  MIME type: {}", spectrum.mime_type);
    println!("  X axis: {}", spectrum.x_label);
    println!("  Points: {}", spectrum.len());
    if let Some((min, max)) = spectrum.x_range() {
        println!("  X range: {min} .. {max}");
    }
    println!("  Series ({}):", spectrum.series.len());
    for (i, series) in spectrum.series.iter().enumerate() {
        let valid = series.y_values.iter().filter(|v| !v.is_nan()).count();
        println!("    {}: {} ({} valid)", i + 1, series.label, valid);
    }

    if verbose {
        println!("  Data:");
        for (i, x) in spectrum.x_values.iter().enumerate() {
            let ys: Vec<String> = spectrum
                .series
                .iter()
                .map(|s| s.y_values[i].to_string())
                .collect();
            println!("    {x}\t{}", ys.join("\t"));
        }
    }

    println!();
}

fn print_json_output(input: &str, spectrum: &ParsedSpectrum, verbose: bool) {
    match serde_json::to_string(&Summary::new(input, spectrum, verbose)) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error serializing {input}: {e}"),
    }
}

fn print_csv_output(input: &str, spectrum: &ParsedSpectrum) {
    let (x_min, x_max) = spectrum
        .x_range()
        .map(|(min, max)| (min.to_string(), max.to_string()))
        .unwrap_or_default();

    println!(
        "{},{},{},{},{},{},{},{}",
        csv_field(input),
        csv_field(&spectrum.label),
        spectrum.mime_type,
        csv_field(&spectrum.x_label),
        spectrum.len(),
        x_min,
        x_max,
        csv_field(&spectrum.series_labels().join(";"))
    );
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
