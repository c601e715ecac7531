use clap::{ArgAction, Parser};
use std::time::Duration;

/// Idle read deadline applied to every connection unless overridden.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Echo server settings, fixed once the process has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: String,
    pub debug: bool,
    pub idle_timeout: Duration,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: impl Into<String>, debug: bool) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
            debug,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// `host:port`, bracketing bare IPv6 literals so the result resolves.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", "19999", true)
    }
}

#[derive(Parser, Debug)]
#[command(name = "echo-server", about = "TCP echo server for proxy benchmarks")]
pub struct Args {
    /// Server hostname
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port
    #[arg(long, default_value = "19999")]
    pub port: String,

    /// Dump debug info (1/0, true/false, t/f)
    #[arg(long, default_value = "1", value_parser = parse_bool, action = ArgAction::Set)]
    pub debug: bool,

    /// Idle read timeout in seconds
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT.as_secs(), value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig::new(args.host, args.port, args.debug)
            .with_idle_timeout(Duration::from_secs(args.timeout))
    }
}

/// Boolean spellings accepted by Go's `strconv.ParseBool`.
pub fn parse_bool(s: &str) -> Result<bool, String> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
        other => Err(format!("invalid boolean value `{other}`")),
    }
}
