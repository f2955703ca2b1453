//! CLI argument definitions for `streamgo`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "streamgo",
    version,
    about = "StreamGo updates and companion service control",
    long_about = "Check for and install StreamGo updates, and manage the companion\n\
                  streaming service the player depends on."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Settings file (default: settings.toml in the user config directory).
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check whether a newer release is available.
    Check,

    /// Download and install the latest release.
    Update(UpdateArgs),

    /// Manage the companion service.
    #[command(subcommand)]
    Service(ServiceCommand),
}

#[derive(Parser)]
pub struct UpdateArgs {
    /// Download and verify only; print the artifact path.
    #[arg(long = "download-only")]
    pub download_only: bool,

    /// Install without asking for confirmation.
    #[arg(long = "yes", short = 'y')]
    pub yes: bool,

    /// Directory to keep the download in (default: a private temp directory).
    #[arg(long = "dest", value_name = "DIR")]
    pub dest: Option<PathBuf>,
}

#[derive(Subcommand, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceCommand {
    /// Show whether the companion is running.
    Status,
    /// Start the companion unless it already runs.
    Start,
    /// Stop the companion if this process started it.
    Stop,
    /// Restart the companion and verify it came back.
    Restart,
    /// Kill every companion process, whoever started it.
    KillAll,
    /// Start the companion and keep it running until Ctrl-C.
    Watch,
    /// Download and install the companion if it is missing, then start it.
    Install {
        /// Install without asking for confirmation.
        #[arg(long = "yes", short = 'y')]
        yes: bool,
    },
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_update_flags() {
        let cli = Cli::try_parse_from([
            "streamgo",
            "update",
            "--download-only",
            "--dest",
            "/tmp/dl",
        ])
        .unwrap();
        let Command::Update(args) = cli.command else {
            panic!("expected update");
        };
        assert!(args.download_only);
        assert!(!args.yes);
        assert_eq!(args.dest, Some(PathBuf::from("/tmp/dl")));
    }

    #[test]
    fn test_parse_service_subcommands() {
        let cli = Cli::try_parse_from(["streamgo", "service", "kill-all"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Service(ServiceCommand::KillAll)
        ));

        let cli =
            Cli::try_parse_from(["streamgo", "--config", "/etc/sg.toml", "service", "watch"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/sg.toml")));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["streamgo", "check", "--log-format", "json", "--log-level", "debug"])
                .unwrap();
        assert!(matches!(cli.log_format, LogFormatArg::Json));
        assert!(matches!(cli.log_level, Some(LogLevelArg::Debug)));
    }

    #[test]
    fn test_parse_service_install() {
        let cli = Cli::try_parse_from(["streamgo", "service", "install", "-y"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Service(ServiceCommand::Install { yes: true })
        ));

        let cli = Cli::try_parse_from(["streamgo", "service", "install"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Service(ServiceCommand::Install { yes: false })
        ));
    }

    #[test]
    fn test_service_requires_action() {
        assert!(Cli::try_parse_from(["streamgo", "service"]).is_err());
    }
}
