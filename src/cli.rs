//! Command-line interface for micstream
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Real-time microphone streaming over a notification link
#[derive(Parser, Debug)]
#[command(
    name = "micstream",
    version,
    about = "Real-time microphone streaming over a notification link"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stream a microphone source through the device and host pipeline
    Stream {
        /// How long to stream (e.g., 10s, 2m). Defaults to the input file
        /// length with --input, otherwise 10s
        #[arg(long, short = 'd', value_name = "DURATION", value_parser = parse_duration)]
        duration: Option<Duration>,

        /// Replay a WAV file instead of the synthetic tone
        #[arg(long, short = 'i', value_name = "FILE", conflicts_with = "tone")]
        input: Option<PathBuf>,

        /// Synthetic tone frequency in Hz
        #[arg(long, value_name = "HZ", default_value_t = 440.0)]
        tone: f64,

        /// Write the recording here
        #[arg(long, short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,

        /// Forward raw PCM to a transcription endpoint (host:port)
        #[arg(long, value_name = "ADDR")]
        transcribe: Option<String>,

        /// Print final statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report audio quality of a WAV file
    Analyze {
        /// WAV file to analyze
        file: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Convert a raw capture of notification payloads into a WAV file
    Decode {
        /// Concatenated payloads as captured from the link
        input: PathBuf,

        /// WAV file to write
        output: PathBuf,
    },

    /// Manage configuration
    Config {
        /// Action to perform
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["micstream"]).is_err());
    }

    #[test]
    fn test_parse_stream_defaults() {
        let cli = Cli::try_parse_from(["micstream", "stream"]).unwrap();
        match cli.command {
            Commands::Stream {
                duration,
                input,
                tone,
                output,
                transcribe,
                json,
            } => {
                assert!(duration.is_none());
                assert!(input.is_none());
                assert_eq!(tone, 440.0);
                assert!(output.is_none());
                assert!(transcribe.is_none());
                assert!(!json);
            }
            _ => panic!("Expected Stream command"),
        }
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_stream_with_options() {
        let cli = Cli::try_parse_from([
            "micstream",
            "stream",
            "--duration",
            "1m30s",
            "--output",
            "/tmp/take.wav",
            "--transcribe",
            "127.0.0.1:9000",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Stream {
                duration,
                output,
                transcribe,
                json,
                ..
            } => {
                assert_eq!(duration, Some(Duration::from_secs(90)));
                assert_eq!(output, Some(PathBuf::from("/tmp/take.wav")));
                assert_eq!(transcribe.as_deref(), Some("127.0.0.1:9000"));
                assert!(json);
            }
            _ => panic!("Expected Stream command"),
        }
    }

    #[test]
    fn test_bare_number_duration_is_seconds() {
        let cli = Cli::try_parse_from(["micstream", "stream", "-d", "5"]).unwrap();
        match cli.command {
            Commands::Stream { duration, .. } => {
                assert_eq!(duration, Some(Duration::from_secs(5)));
            }
            _ => panic!("Expected Stream command"),
        }
    }

    #[test]
    fn test_invalid_duration_rejected() {
        assert!(Cli::try_parse_from(["micstream", "stream", "-d", "soon"]).is_err());
    }

    #[test]
    fn test_input_conflicts_with_tone() {
        let result = Cli::try_parse_from([
            "micstream", "stream", "--input", "a.wav", "--tone", "1000",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_verbose_double_global() {
        let cli = Cli::try_parse_from(["micstream", "analyze", "take.wav", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Analyze { file, json } => {
                assert_eq!(file, PathBuf::from("take.wav"));
                assert!(!json);
            }
            _ => panic!("Expected Analyze command"),
        }
    }

    #[test]
    fn test_parse_decode() {
        let cli = Cli::try_parse_from(["micstream", "decode", "in.raw", "out.wav"]).unwrap();
        match cli.command {
            Commands::Decode { input, output } => {
                assert_eq!(input, PathBuf::from("in.raw"));
                assert_eq!(output, PathBuf::from("out.wav"));
            }
            _ => panic!("Expected Decode command"),
        }
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["micstream", "--config", "/etc/m.toml", "config", "show"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/m.toml")));
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        ));
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["micstream", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }
}
