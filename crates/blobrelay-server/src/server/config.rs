use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `blobrelay-server` binary.
///
/// These settings control where the server listens, how much buffering each
/// call gets between its stages, transport limits, and how long a graceful
/// shutdown may take before in-flight calls are abandoned. All values are
/// parsed from CLI arguments or environment variables (a `.env` file is loaded
/// first when present).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "blobrelay-server",
    version,
    about = "A gRPC service relaying streamed payloads to and from a record store"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix
    /// socket).
    ///
    /// Example: "0.0.0.0:50052" or "/tmp/blobrelay.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50052"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a
    /// file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Seconds a graceful shutdown may spend draining in-flight calls before
    /// they are forcibly abandoned.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,

    /// Capacity of the handoff channel between a call's receive stage and its
    /// store stage.
    ///
    /// A capacity of 1 keeps at most one decoded frame waiting on the store,
    /// so a slow store throttles the receive stage almost immediately.
    ///
    /// Environment variable: `HANDOFF_CAPACITY`
    #[arg(long, env = "HANDOFF_CAPACITY", default_value_t = 1)]
    pub handoff_capacity: usize,

    /// Capacity of the response buffer between a call's store stage and the
    /// gRPC response stream.
    ///
    /// Environment variable: `RESPONSE_BUFFER_SIZE`
    #[arg(long, env = "RESPONSE_BUFFER_SIZE", default_value_t = 8)]
    pub response_buffer_size: usize,

    /// Maximum size in bytes of a single encoded request or response message.
    ///
    /// Environment variable: `MAX_MESSAGE_BYTES`
    #[arg(long, env = "MAX_MESSAGE_BYTES", default_value_t = 4 * 1024 * 1024)]
    pub max_message_bytes: usize,

    /// Maximum number of concurrent HTTP/2 streams per connection. Unlimited
    /// when unset.
    ///
    /// Environment variable: `MAX_CONCURRENT_STREAMS`
    #[arg(long, env = "MAX_CONCURRENT_STREAMS")]
    pub max_concurrent_streams: Option<u32>,

    /// Default log filter, used when `RUST_LOG` is not set.
    ///
    /// Environment variable: `LOG_LEVEL`
    #[arg(long, env = "LOG_LEVEL", default_value_t = String::from("info"))]
    pub log_level: String,

    /// Also write JSON-formatted logs to this file.
    ///
    /// Environment variable: `LOG_FILE`
    #[arg(long, env = "LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub shutdown_timeout: Duration,
    pub handoff_capacity: usize,
    pub response_buffer_size: usize,
    pub max_message_bytes: usize,
    pub max_concurrent_streams: Option<u32>,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("0.0.0.0:50052"),
            uds: false,
            shutdown_timeout: Duration::from_secs(10),
            handoff_capacity: 1,
            response_buffer_size: 8,
            max_message_bytes: 4 * 1024 * 1024,
            max_concurrent_streams: None,
            log_level: String::from("info"),
            log_file: None,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.handoff_capacity == 0 {
            bail!("HANDOFF_CAPACITY must be greater than 0");
        }

        if args.response_buffer_size == 0 {
            bail!("RESPONSE_BUFFER_SIZE must be greater than 0");
        }

        if args.max_message_bytes == 0 {
            bail!("MAX_MESSAGE_BYTES must be greater than 0");
        }

        if args.max_concurrent_streams == Some(0) {
            bail!("MAX_CONCURRENT_STREAMS must be greater than 0 when set");
        }

        if args.server_addr.is_empty() {
            bail!("SERVER_ADDR must not be empty");
        }

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
            handoff_capacity: args.handoff_capacity,
            response_buffer_size: args.response_buffer_size,
            max_message_bytes: args.max_message_bytes,
            max_concurrent_streams: args.max_concurrent_streams,
            log_level: args.log_level,
            log_file: args.log_file,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["blobrelay-server"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        let config = ServerConfig::try_from(parse(&[])).unwrap();
        assert_eq!(config.handoff_capacity, 1);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        assert!(!config.uds);
    }

    #[test]
    fn zero_handoff_capacity_is_rejected() {
        let err = ServerConfig::try_from(parse(&["--handoff-capacity", "0"])).unwrap_err();
        assert!(err.to_string().contains("HANDOFF_CAPACITY"));
    }

    #[test]
    fn zero_concurrent_streams_is_rejected() {
        let err = ServerConfig::try_from(parse(&["--max-concurrent-streams", "0"])).unwrap_err();
        assert!(err.to_string().contains("MAX_CONCURRENT_STREAMS"));
    }

    #[test]
    fn flags_override_defaults() {
        let config = ServerConfig::try_from(parse(&[
            "--server-addr",
            "127.0.0.1:6000",
            "--shutdown-timeout-secs",
            "3",
            "--response-buffer-size",
            "2",
        ]))
        .unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:6000");
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
        assert_eq!(config.response_buffer_size, 2);
    }
}
