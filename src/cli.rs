//! Command-line interface for voxprep
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Voice capture and transcription for interview practice
#[derive(Parser, Debug)]
#[command(
    name = "voxprep",
    version,
    about = "Voice capture and transcription for interview practice"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: live events, -vv: full diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Language tag for recognition and voice selection (e.g. en-US, es-ES)
    #[arg(long, global = true, value_name = "LANG")]
    pub language: Option<String>,

    /// Audio input device (e.g. pipewire, hw:0)
    #[arg(long, global = true, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Embedded model for fallback transcription (e.g. base, base.en, small)
    #[arg(long, global = true, value_name = "MODEL")]
    pub model: Option<String>,
}

/// Parse a duration string into seconds.
///
/// Supports any format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`), and compound (`1m30s`).
fn parse_secs(s: &str) -> Result<u64, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(secs);
    }
    humantime::parse_duration(s)
        .map(|d| d.as_secs())
        .map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record from the microphone and print the transcription
    Record {
        /// Stop automatically after this duration (e.g. 30, 30s, 1m30s).
        /// Without it, recording runs until Enter is pressed.
        #[arg(long, short = 's', value_name = "DURATION", value_parser = parse_secs)]
        seconds: Option<u64>,
    },

    /// Transcribe a WAV file with the embedded engine
    Transcribe {
        /// 16-bit PCM WAV file, or "-" to read from stdin
        file: PathBuf,
    },

    /// Speak text through the configured synthesis engine
    Speak {
        /// Text to speak (omit together with --test for the built-in phrase)
        text: Option<String>,

        /// Run the language test phrase and report whether playback completed
        #[arg(long)]
        test: bool,

        /// Voice identifier override (see `voxprep doctor` for detected voices)
        #[arg(long, value_name = "VOICE")]
        voice: Option<String>,
    },

    /// List available audio input devices
    Devices,

    /// Probe the host and print a capability report
    Doctor,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration inspection actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (file + environment overrides) as TOML
    Show,
    /// Print the configuration file path in use
    Path,
    /// Dump a default configuration template
    Dump,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["voxprep"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
        assert!(cli.language.is_none());
        assert!(cli.device.is_none());
        assert!(cli.model.is_none());
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_parse_verbose_single() {
        let cli = Cli::try_parse_from(["voxprep", "-v"]).unwrap();
        assert_eq!(cli.verbose, 1);
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["voxprep", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_verbose_repeated_flags() {
        let cli = Cli::try_parse_from(["voxprep", "-v", "-v"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_with_global_options() {
        let cli = Cli::try_parse_from([
            "voxprep",
            "--device",
            "pipewire",
            "--model",
            "base.en",
            "--language",
            "en-US",
        ])
        .unwrap();

        assert_eq!(cli.device.as_deref(), Some("pipewire"));
        assert_eq!(cli.model.as_deref(), Some("base.en"));
        assert_eq!(cli.language.as_deref(), Some("en-US"));
    }

    #[test]
    fn test_parse_global_config() {
        let cli = Cli::try_parse_from(["voxprep", "--config", "/path/to/config.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.toml")));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_global_quiet() {
        let cli = Cli::try_parse_from(["voxprep", "--quiet", "devices"]).unwrap();
        assert!(cli.quiet);
        match cli.command {
            Some(Commands::Devices) => {}
            _ => panic!("Expected Devices command"),
        }
    }

    #[test]
    fn test_global_options_after_command() {
        // Global options should work before or after the command
        let cli =
            Cli::try_parse_from(["voxprep", "devices", "--config", "/tmp/config.toml"]).unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/config.toml")));
    }

    #[test]
    fn test_invalid_command_returns_error() {
        let result = Cli::try_parse_from(["voxprep", "invalid"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidSubcommand);
    }

    #[test]
    fn test_help_flag() {
        let result = Cli::try_parse_from(["voxprep", "--help"]);
        // Clap returns an error for --help but with DisplayHelp kind
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_version_flag() {
        let result = Cli::try_parse_from(["voxprep", "--version"]);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_parse_devices() {
        let cli = Cli::try_parse_from(["voxprep", "devices"]).unwrap();
        match cli.command {
            Some(Commands::Devices) => {}
            _ => panic!("Expected Devices command"),
        }
    }

    #[test]
    fn test_parse_doctor() {
        let cli = Cli::try_parse_from(["voxprep", "doctor"]).unwrap();
        match cli.command {
            Some(Commands::Doctor) => {}
            _ => panic!("Expected Doctor command"),
        }
    }

    #[test]
    fn test_parse_record_defaults() {
        let cli = Cli::try_parse_from(["voxprep", "record"]).unwrap();
        match cli.command {
            Some(Commands::Record { seconds }) => {
                assert!(seconds.is_none());
            }
            _ => panic!("Expected Record command"),
        }
    }

    #[test]
    fn test_parse_record_with_seconds() {
        let cli = Cli::try_parse_from(["voxprep", "record", "--seconds", "30"]).unwrap();
        match cli.command {
            Some(Commands::Record { seconds }) => {
                assert_eq!(seconds, Some(30));
            }
            _ => panic!("Expected Record command"),
        }
    }

    #[test]
    fn test_parse_record_seconds_short_with_unit() {
        let cli = Cli::try_parse_from(["voxprep", "record", "-s", "1m30s"]).unwrap();
        match cli.command {
            Some(Commands::Record { seconds }) => {
                assert_eq!(seconds, Some(90));
            }
            _ => panic!("Expected Record command"),
        }
    }

    #[test]
    fn test_parse_transcribe() {
        let cli = Cli::try_parse_from(["voxprep", "transcribe", "answer.wav"]).unwrap();
        match cli.command {
            Some(Commands::Transcribe { file }) => {
                assert_eq!(file, PathBuf::from("answer.wav"));
            }
            _ => panic!("Expected Transcribe command"),
        }
    }

    #[test]
    fn test_transcribe_requires_file() {
        let result = Cli::try_parse_from(["voxprep", "transcribe"]);
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_parse_speak_with_text() {
        let cli = Cli::try_parse_from(["voxprep", "speak", "tell me about yourself"]).unwrap();
        match cli.command {
            Some(Commands::Speak { text, test, voice }) => {
                assert_eq!(text.as_deref(), Some("tell me about yourself"));
                assert!(!test);
                assert!(voice.is_none());
            }
            _ => panic!("Expected Speak command"),
        }
    }

    #[test]
    fn test_parse_speak_test_mode() {
        let cli = Cli::try_parse_from(["voxprep", "speak", "--test"]).unwrap();
        match cli.command {
            Some(Commands::Speak { text, test, .. }) => {
                assert!(text.is_none());
                assert!(test);
            }
            _ => panic!("Expected Speak command"),
        }
    }

    #[test]
    fn test_parse_speak_with_voice() {
        let cli =
            Cli::try_parse_from(["voxprep", "speak", "hello", "--voice", "en+f3"]).unwrap();
        match cli.command {
            Some(Commands::Speak { text, voice, .. }) => {
                assert_eq!(text.as_deref(), Some("hello"));
                assert_eq!(voice.as_deref(), Some("en+f3"));
            }
            _ => panic!("Expected Speak command"),
        }
    }

    #[test]
    fn test_parse_config_show() {
        let cli = Cli::try_parse_from(["voxprep", "config", "show"]).unwrap();
        match cli.command {
            Some(Commands::Config { action }) => match action {
                ConfigAction::Show => {}
                _ => panic!("Expected Show action"),
            },
            _ => panic!("Expected Config command"),
        }
    }

    #[test]
    fn test_parse_config_path() {
        let cli = Cli::try_parse_from(["voxprep", "config", "path"]).unwrap();
        match cli.command {
            Some(Commands::Config { action }) => match action {
                ConfigAction::Path => {}
                _ => panic!("Expected Path action"),
            },
            _ => panic!("Expected Config command"),
        }
    }

    #[test]
    fn test_parse_config_dump() {
        let cli = Cli::try_parse_from(["voxprep", "config", "dump"]).unwrap();
        match cli.command {
            Some(Commands::Config { action }) => match action {
                ConfigAction::Dump => {}
                _ => panic!("Expected Dump action"),
            },
            _ => panic!("Expected Config command"),
        }
    }

    #[test]
    fn test_config_requires_subcommand() {
        let result = Cli::try_parse_from(["voxprep", "config"]);
        let err = result.unwrap_err();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    // ── Duration parsing tests ───────────────────────────────────────────

    #[test]
    fn test_parse_secs_bare_number() {
        assert_eq!(parse_secs("10").unwrap(), 10);
        assert_eq!(parse_secs("0").unwrap(), 0);
        assert_eq!(parse_secs("300").unwrap(), 300);
    }

    #[test]
    fn test_parse_secs_with_units() {
        assert_eq!(parse_secs("10s").unwrap(), 10);
        assert_eq!(parse_secs("5m").unwrap(), 300);
        assert_eq!(parse_secs("1m30s").unwrap(), 90);
        assert_eq!(parse_secs("2minutes").unwrap(), 120);
    }

    #[test]
    fn test_parse_secs_invalid() {
        let err = parse_secs("abc").unwrap_err();
        assert!(
            err.contains("invalid") || err.contains("expected") || err.contains("unknown"),
            "Expected parse error for 'abc', got: {err}"
        );
        let err = parse_secs("-5").unwrap_err();
        assert!(
            err.contains("invalid") || err.contains("expected") || err.contains("unknown"),
            "Expected parse error for '-5', got: {err}"
        );
    }
}
