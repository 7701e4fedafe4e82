use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::{LevelFilter, info};
use micstream::app::{
    AnalysisReport, DecodeReport, StreamOptions, StreamReport, run_analyze, run_decode, run_stream,
};
use micstream::cli::{Cli, Commands, ConfigAction};
use micstream::config::Config;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Stream {
            duration,
            input,
            tone,
            output,
            transcribe,
            json,
        } => {
            let config = load_config(cli.config.as_deref())?;
            info!("micstream {}", micstream::version_string());
            let options = StreamOptions {
                duration,
                input,
                tone,
                output,
                transcribe,
            };
            let report = run_stream(config, options).await?;
            if json {
                print_json(&report)?;
            } else {
                print_stream_report(&report);
            }
        }
        Commands::Analyze { file, json } => {
            let config = load_config(cli.config.as_deref())?;
            let report = run_analyze(&config, &file)
                .with_context(|| format!("Failed to analyze {}", file.display()))?;
            if json {
                print_json(&report)?;
            } else {
                print_analysis(&report);
            }
        }
        Commands::Decode { input, output } => {
            let config = load_config(cli.config.as_deref())?;
            let report = run_decode(&config, &input, &output)
                .with_context(|| format!("Failed to decode {}", input.display()))?;
            print_decode(&report);
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "micstream",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// Default filter from the verbosity flags; `RUST_LOG` still wins.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Warn,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/micstream/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(Path::to_path_buf)
                .or_else(Config::default_path);
            match path {
                Some(path) => println!("{}", path.display()),
                None => {
                    eprintln!("Error: no configuration directory on this system");
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_stream_report(report: &StreamReport) {
    let device = &report.device;
    let host = &report.host;

    println!("{}", "Device".bold());
    println!(
        "  {}      {} ({:.1}% ok)",
        "Sent:".dimmed(),
        device.chunks_sent,
        device.success_rate()
    );
    println!("  {}    {}", "Errors:".dimmed(), device.send_errors);
    println!("  {} {}", "Underruns:".dimmed(), device.underruns);
    println!(
        "  {}  {} samples dropped",
        "Overflow:".dimmed(),
        device.overflow_samples
    );

    println!("{}", "Host".bold());
    println!(
        "  {}  {} of {}",
        "Accepted:".dimmed(),
        host.chunks_accepted,
        host.payloads_received
    );
    let framing = format!("{}", host.framing_errors);
    if host.framing_errors > 0 {
        println!("  {}   {}", "Framing:".dimmed(), framing.yellow());
    } else {
        println!("  {}   {}", "Framing:".dimmed(), framing);
    }
    println!("  {}   {}", "Dropped:".dimmed(), host.decode_queue_drops);
    for consumer in &host.consumers {
        println!(
            "  {:<10} delivered={} dropped={}",
            consumer.name, consumer.delivered, consumer.dropped
        );
    }

    println!("{}", "Quality".bold());
    println!("  {}", report.quality);

    for sink in &report.sinks {
        match &sink.summary {
            Some(summary) => println!("{} {}", "✓".green(), summary),
            None => println!("{} {}: no summary", "✗".red(), sink.name),
        }
    }
    println!("Recording: {}", report.output.display());
}

fn print_analysis(report: &AnalysisReport) {
    let overall = &report.overall;
    println!(
        "{} ({} Hz, {:.2}s)",
        report.file.display().bold(),
        report.sample_rate,
        report.duration_secs
    );
    println!(
        "  {}  min={} max={} mean={:.1} rms={:.1}",
        "Levels:".dimmed(),
        overall.min,
        overall.max,
        overall.mean,
        overall.rms
    );
    println!(
        "  {}  {} chunks, {} silent, {} clipping",
        "Chunks:".dimmed(),
        report.chunks.chunks,
        report.chunks.silent_chunks,
        report.chunks.clipping_chunks
    );
    if overall.is_silent {
        println!("  {}", "Silent: check the microphone connection".yellow());
    }
    if overall.is_clipping {
        println!("  {}", "Clipping: reduce the input gain".yellow());
    }
}

fn print_decode(report: &DecodeReport) {
    println!(
        "{} {} chunks, {} samples -> {}",
        "✓".green(),
        report.chunks,
        report.samples,
        report.output.display()
    );
    if report.framing_errors > 0 {
        println!(
            "  {} {} framing error(s), {} trailing byte(s)",
            "!".yellow(),
            report.framing_errors,
            report.trailing_bytes
        );
    }
}
