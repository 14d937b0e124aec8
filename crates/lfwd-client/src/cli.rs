//! Client CLI implementation.
//!
//! Provides command-line argument parsing using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};

use lfwd_core::SessionConfig;
use lfwd_core::constants::DEFAULT_CONNECT_TIMEOUT;
use lfwd_core::forward::LocalForwardSpec;
use lfwd_server::ServerConfig;

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for lfwd_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => lfwd_core::LogFormat::Text,
            CliLogFormat::Json => lfwd_core::LogFormat::Json,
        }
    }
}

/// SSH-style local port forwarding.
#[derive(Debug, Parser)]
#[command(name = "lfwd", version, about = "SSH-style local port forwarding")]
pub struct Cli {
    /// Local port forward: [bind_addr:]port:host:hostport
    #[arg(
        short = 'L',
        long = "local",
        action = ArgAction::Append,
        value_name = "SPEC",
        required = true
    )]
    pub local_forward: Vec<LocalForwardSpec>,

    /// Receive window granted per channel, in bytes
    #[arg(long = "window-size", value_name = "BYTES")]
    pub window_size: Option<u32>,

    /// Largest data message, in bytes
    #[arg(long = "max-packet-size", value_name = "BYTES")]
    pub max_packet_size: Option<u32>,

    /// Most bytes held for a slow local reader, per channel
    #[arg(long = "max-buffered", value_name = "BYTES")]
    pub max_buffered: Option<usize>,

    /// Seconds to wait when connecting to a target
    #[arg(
        long = "connect-timeout",
        value_name = "SECS",
        default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs()
    )]
    pub connect_timeout: u64,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// Session settings from the flow-control flags.
    ///
    /// Unset flags keep their defaults; the result is not validated here.
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new();
        if let Some(window_size) = self.window_size {
            config = config.with_window_size(window_size);
        }
        if let Some(max_packet_size) = self.max_packet_size {
            config = config.with_max_packet_size(max_packet_size);
        }
        if let Some(max_buffered) = self.max_buffered {
            config = config.with_max_buffered(max_buffered);
        }
        config
    }

    /// Target-side settings.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig::new().with_connect_timeout(Duration::from_secs(self.connect_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_single_forward() {
        let cli = Cli::try_parse_from(["lfwd", "-L", "8080:localhost:80"]).unwrap();
        assert_eq!(cli.local_forward.len(), 1);
        let spec = &cli.local_forward[0];
        assert_eq!(spec.bind_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(spec.target_host, "localhost");
        assert_eq!(spec.target_port, 80);
    }

    #[test]
    fn parse_multiple_forwards() {
        let cli = Cli::try_parse_from([
            "lfwd",
            "-L",
            "8080:localhost:80",
            "--local",
            "0.0.0.0:5432:db.internal:5432",
        ])
        .unwrap();
        assert_eq!(cli.local_forward.len(), 2);
        assert_eq!(cli.local_forward[1].target(), "db.internal:5432");
    }

    #[test]
    fn forward_is_required() {
        assert!(Cli::try_parse_from(["lfwd"]).is_err());
    }

    #[test]
    fn invalid_forward_rejected() {
        assert!(Cli::try_parse_from(["lfwd", "-L", "not-a-spec"]).is_err());
        assert!(Cli::try_parse_from(["lfwd", "-L", "8080:host:99999"]).is_err());
    }

    #[test]
    fn defaults() {
        let cli = Cli::try_parse_from(["lfwd", "-L", "8080:localhost:80"]).unwrap();
        assert_eq!(cli.verbose, 0);
        assert!(cli.log_file.is_none());
        assert_eq!(cli.log_format, CliLogFormat::Text);
        assert_eq!(cli.connect_timeout, DEFAULT_CONNECT_TIMEOUT.as_secs());
        assert_eq!(cli.session_config(), SessionConfig::default());
    }

    #[test]
    fn parse_flow_control_flags() {
        let cli = Cli::try_parse_from([
            "lfwd",
            "-L",
            "8080:localhost:80",
            "--window-size",
            "65536",
            "--max-packet-size",
            "16384",
            "--max-buffered",
            "262144",
        ])
        .unwrap();

        let config = cli.session_config();
        assert_eq!(config.window_size, 65536);
        assert_eq!(config.max_packet_size, 16384);
        assert_eq!(config.max_buffered, 262144);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn connect_timeout_flag() {
        let cli =
            Cli::try_parse_from(["lfwd", "-L", "8080:localhost:80", "--connect-timeout", "3"])
                .unwrap();
        assert_eq!(cli.server_config().connect_timeout, Duration::from_secs(3));
    }

    #[test]
    fn parse_logging_flags() {
        let cli = Cli::try_parse_from([
            "lfwd",
            "-vvv",
            "--log-file",
            "/tmp/lfwd.log",
            "--log-format",
            "json",
            "-L",
            "8080:localhost:80",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 3);
        assert_eq!(cli.log_file, Some(PathBuf::from("/tmp/lfwd.log")));
        assert_eq!(cli.log_format, CliLogFormat::Json);
        assert_eq!(
            lfwd_core::LogFormat::from(cli.log_format),
            lfwd_core::LogFormat::Json
        );
    }
}
