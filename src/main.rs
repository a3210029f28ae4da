mod analyser;
mod ui;

use analyser::core::{Engine, EngineConfig};
use analyser::smtp::DEFAULT_BUFFER_LIMIT;
use clap::{ArgAction, Parser};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::path::PathBuf;
use std::process::ExitCode;
use ui::output;

/// Exit code for failures after the report was built (encoding, writing).
const EXIT_OUTPUT_FAILURE: u8 = 2;

/// pcapsummary summarises hosts, flows and application traffic in a pcap capture
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// pcap file to analyze
    #[arg(value_parser)]
    file: PathBuf,

    /// Pretty-print the JSON report
    #[arg(short, long, action = ArgAction::SetTrue)]
    pretty: bool,

    /// Write the JSON report to this file instead of stdout
    #[arg(short = 'o', long, value_parser)]
    output: Option<PathBuf>,

    /// Print a human-readable summary instead of JSON
    #[arg(short, long, action = ArgAction::SetTrue, conflicts_with = "output")]
    summary: bool,

    /// Maximum bytes buffered per SMTP destination
    #[arg(long, default_value_t = DEFAULT_BUFFER_LIMIT, value_parser)]
    smtp_limit: usize,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn log_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = SimpleLogger::new().with_level(log_level(args.verbose)).env().init() {
        eprintln!("Failed to initialise logging: {e}");
    }

    let config = EngineConfig { smtp_buffer_limit: args.smtp_limit };
    let report = match Engine::open(&args.file, config).and_then(Engine::run) {
        Ok(report) => report,
        Err(err) => {
            log::error!("{err}");
            return ExitCode::from(err.exit_code());
        }
    };

    // ---- Output ----
    if args.summary {
        output::print_results(&report);
        return ExitCode::SUCCESS;
    }

    let json = match output::data_as_json(&report, args.pretty) {
        Ok(json) => json,
        Err(e) => {
            log::error!("Failed to encode report: {e}");
            return ExitCode::from(EXIT_OUTPUT_FAILURE);
        }
    };

    match args.output.as_deref() {
        Some(path) => {
            if let Err(e) = output::data_to_file(&json, path) {
                log::error!("Failed to write {}: {e}", path.display());
                return ExitCode::from(EXIT_OUTPUT_FAILURE);
            }
            log::info!("Report written to {}", path.display());
        }
        None => println!("{json}"),
    }

    ExitCode::SUCCESS
}
