//! Operator facing CLI flags. Mirrors the flag set of the original Go
//! `cmd/main.go`, renamed to the more conventional long-flag style `clap`'s
//! derive API encourages while preserving every short flag the original
//! exposed.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "mmin", about = "HTTP/1.x load generator")]
pub struct Cli {
    /// YAML or JSON run configuration; when set, every other flag below is
    /// ignored.
    #[arg(long = "conf", short = 'f')]
    pub conf: Option<String>,

    /// run as a remote worker, listening for a posted config on --port.
    #[arg(long = "remote", short = 'S')]
    pub is_remote: bool,

    /// run the embedded web control server instead of a one-shot load run.
    #[arg(long = "web")]
    pub web: bool,

    /// port the control/remote server listens on.
    #[arg(long = "port", short = 'P', visible_short_alias = 'p', default_value_t = 8888)]
    pub port: u16,

    /// target URL, e.g. http://host:port/path
    #[arg(long = "url", short = 'u')]
    pub url: Option<String>,

    /// worker (concurrency) count per group.
    #[arg(long = "conns", short = 'c', default_value_t = 100)]
    pub req_thread: usize,

    /// run time in seconds.
    #[arg(long = "time", short = 't', default_value_t = 10)]
    pub run_time: u64,

    /// requests per second cap, 0 = unbounded.
    #[arg(long = "rate", short = 'R', visible_short_alias = 'r', default_value_t = 0)]
    pub max_qps: u32,

    /// request body.
    #[arg(long = "data", short = 'd', default_value = "")]
    pub body: String,

    /// HTTP method.
    #[arg(long = "method", short = 'm', visible_short_alias = 'X', default_value = "GET")]
    pub method: String,

    /// max requests per TCP connection before it is cycled.
    #[arg(long = "keepalive", short = 'k', default_value_t = 100)]
    pub max_request: u64,

    /// repeatable `Name: value` header.
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,

    /// verbose / debug logging.
    #[arg(long = "debug", short = 'v')]
    pub debug: bool,
}

pub fn parse_headers(raw: &[String]) -> std::collections::HashMap<String, String> {
    raw.iter()
        .filter_map(|h| h.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}
