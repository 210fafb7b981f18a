use clap::{Parser, Subcommand};
use infrastructure::config::{LogFormat, LogLevel};
use infrastructure::constants::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(
    name = "ctsweeper",
    about = "Userspace conntrack lifecycle manager for an eBPF dataplane",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "CTSWEEPER_CONFIG")]
    pub config: String,

    /// Log level override (takes precedence over config file)
    #[arg(short, long)]
    pub log_level: Option<LogLevel>,

    /// Log format: json (default, production) or text (development)
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    /// Expire every conntrack entry in one sweep, then exit
    #[arg(long)]
    pub drain: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Display version and build information
    Version,

    /// Validate the configuration file and exit
    CheckConfig,
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_default_config_path() {
        let cli = Cli::try_parse_from(["ctsweeper"]).unwrap();
        assert_eq!(cli.config, DEFAULT_CONFIG_PATH);
        assert!(cli.log_level.is_none());
        assert!(!cli.drain);
        assert!(cli.command.is_none());
    }

    #[test]
    fn cli_custom_config_path() {
        let cli = Cli::try_parse_from(["ctsweeper", "--config", "/tmp/test.yaml"]).unwrap();
        assert_eq!(cli.config, "/tmp/test.yaml");
    }

    #[test]
    fn cli_log_overrides() {
        let cli = Cli::try_parse_from([
            "ctsweeper",
            "--log-level",
            "debug",
            "--log-format",
            "text",
        ])
        .unwrap();
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert_eq!(cli.log_format, Some(LogFormat::Text));
    }

    #[test]
    fn cli_rejects_unknown_log_level() {
        assert!(Cli::try_parse_from(["ctsweeper", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn cli_drain_flag() {
        let cli = Cli::try_parse_from(["ctsweeper", "--drain"]).unwrap();
        assert!(cli.drain);
    }

    #[test]
    fn cli_subcommands() {
        let cli = Cli::try_parse_from(["ctsweeper", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Version)));
        let cli = Cli::try_parse_from(["ctsweeper", "-c", "/x.yaml", "check-config"]).unwrap();
        assert!(matches!(cli.command, Some(Command::CheckConfig)));
        assert_eq!(cli.config, "/x.yaml");
    }
}
