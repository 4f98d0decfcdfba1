use clap::Parser;
use lite_graph::WeightPrecision;
use std::path::PathBuf;
use std::process::ExitCode;
use tflite_forge::config::{DEFAULT_INPUT, DEFAULT_OUTPUT};
use tflite_forge::{ConversionReport, ConvertConfig, OutputFormat};
use tracing_subscriber::EnvFilter;

/// Converts a trained Keras model into a TensorFlow Lite flatbuffer.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Keras `.h5` file, tfjs `model.json`, or a directory holding Keras `config.json` and
    /// safetensors weights
    #[arg(default_value = DEFAULT_INPUT)]
    input: PathBuf,
    #[arg(default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
    #[arg(long, default_value_t = OutputFormat::Tflite)]
    format: OutputFormat,
    /// Storage precision for float weights
    #[arg(long, default_value_t = WeightPrecision::F32)]
    weights: WeightPrecision,
    /// Compare the converted model against the source model before writing it
    #[arg(long)]
    verify: bool,
    /// Largest accepted absolute difference when verifying
    #[arg(long, requires = "verify")]
    tolerance: Option<f32>,
    /// Print one line per layer after converting
    #[arg(long)]
    summary: bool,
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn config(&self) -> ConvertConfig {
        ConvertConfig {
            input: self.input.clone(),
            output: self.output.clone(),
            format: self.format,
            weight_precision: self.weights,
            verify: self.verify,
            tolerance: self.tolerance,
        }
    }
}

fn init_logging(args: &Args) {
    let level = if args.verbose {
        "debug"
    } else if args.quiet {
        "error"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_summary(report: &ConversionReport) {
    let width = report
        .layers
        .iter()
        .map(|x| x.name.len() + x.class_name.len() + 3)
        .max()
        .unwrap_or(0);
    let mut total = 0;
    for layer in &report.layers {
        let label = format!("{} ({})", layer.name, layer.class_name);
        println!(
            "{:<width$}  {:<24} {:>10}",
            label,
            layer.output_shape,
            layer.params,
            width = width
        );
        total += layer.params;
    }
    println!("Total params: {}", total);
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match tflite_forge::run(&args.config()) {
        Ok(report) => {
            tracing::info!(
                "Wrote {} ({} bytes, {} operators)",
                report.output.display(),
                report.bytes,
                report.operators
            );
            if args.summary {
                print_summary(&report);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            let err = anyhow::Error::from(err);
            tracing::error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}
