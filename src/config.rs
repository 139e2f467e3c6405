use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;

use crate::page::{DEFAULT_ASSET_FIELDS, DEFAULT_STATUS_FIELDS, Page, PageLayout};
use crate::push::PushChannelConfig;
use crate::session::Mode;

#[derive(Parser, Clone, Debug)]
#[clap(name = "elephant-monitor", about = "大象策略运行监控终端")]
pub struct CliParams {
    /// Base URL of the strategy web server
    #[clap(
        long = "server",
        env = "MONITOR_SERVER",
        default_value = "http://localhost:8088"
    )]
    pub server: String,

    /// How updates arrive: a persistent push channel or interval polling
    #[clap(long = "mode", value_enum, env = "MONITOR_MODE", default_value = "poll")]
    pub mode: Mode,

    /// Page to open first (/, /logs, /trades, /stats)
    #[clap(long = "page", default_value = "/")]
    pub page: String,

    /// Path the push server listens on
    #[clap(long = "socket-path", default_value = "/socket.io/")]
    pub socket_path: String,

    /// Time allowed for the push handshake (e.g., 20s)
    #[clap(long = "handshake-timeout", value_name = "DURATION", default_value = "20s")]
    pub handshake_timeout: DurationSpec,

    /// Reconnect attempts before the push channel gives up
    #[clap(long = "reconnect-attempts", default_value_t = 10)]
    pub reconnect_attempts: u32,

    /// Initial delay between reconnect attempts
    #[clap(long = "reconnect-delay", value_name = "DURATION", default_value = "1s")]
    pub reconnect_delay: DurationSpec,

    /// Upper bound for the reconnect delay
    #[clap(
        long = "reconnect-delay-max",
        value_name = "DURATION",
        default_value = "5s"
    )]
    pub reconnect_delay_max: DurationSpec,

    /// How long a toast stays on screen
    #[clap(long = "toast-ttl", value_name = "DURATION", default_value = "5s")]
    pub toast_ttl: DurationSpec,

    /// Status card fields; comma separated or pass multiple times
    #[clap(
        long = "status-field",
        value_delimiter = ',',
        num_args = 1..,
        default_values_t = DEFAULT_STATUS_FIELDS.iter().map(|s| s.to_string()).collect::<Vec<_>>()
    )]
    pub status_fields: Vec<String>,

    /// Assets card fields on the stats page
    #[clap(
        long = "asset-field",
        value_delimiter = ',',
        num_args = 1..,
        default_values_t = DEFAULT_ASSET_FIELDS.iter().map(|s| s.to_string()).collect::<Vec<_>>()
    )]
    pub asset_fields: Vec<String>,

    /// File that receives the tracing output
    #[clap(long = "log-file", default_value = "elephant-monitor.log")]
    pub log_file: PathBuf,

    /// JSONL file that records errors shown to the user
    #[clap(long = "error-log", default_value = "monitor_errors.jsonl")]
    pub error_log: PathBuf,
}

impl CliParams {
    pub fn start_page(&self) -> Page {
        Page::from_path(&self.page)
    }

    pub fn page_layout(&self) -> PageLayout {
        PageLayout {
            status_fields: self.status_fields.clone(),
            asset_fields: self.asset_fields.clone(),
        }
    }

    pub fn server_url(&self) -> String {
        self.server.trim().trim_end_matches('/').to_string()
    }

    pub fn push_config(&self) -> PushChannelConfig {
        let reconnection_delay = self.reconnect_delay.as_duration();
        PushChannelConfig {
            server: self.server_url(),
            path: self.socket_path.clone(),
            reconnection_attempts: self.reconnect_attempts,
            reconnection_delay,
            reconnection_delay_max: self.reconnect_delay_max.as_duration().max(reconnection_delay),
            timeout: self.handshake_timeout.as_duration(),
            ..PushChannelConfig::default()
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DurationSpec(Duration);

impl DurationSpec {
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for DurationSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let duration = parse_duration_spec(s)?;
        Ok(DurationSpec(duration))
    }
}

const DURATION_UNITS: &[(&[&str], f64)] = &[
    (&["ms", "msec", "millis"], 0.001),
    (&["s", "sec", "secs", "second", "seconds"], 1.0),
    (&["m", "min", "mins", "minute", "minutes"], 60.0),
    (&["h", "hr", "hrs", "hour", "hours"], 3600.0),
];

/// `<amount><unit>`, e.g. `500ms`, `1.5m` or `2 h`.
fn parse_duration_spec(input: &str) -> Result<Duration, String> {
    let spec = input.trim();
    let amount = spec.trim_end_matches(|c: char| c.is_ascii_alphabetic() || c.is_whitespace());
    let unit = spec[amount.len()..].trim().to_ascii_lowercase();
    if amount.is_empty() {
        return Err(format!("`{spec}` has no amount; try 500ms, 5s or 1m"));
    }
    if unit.is_empty() {
        return Err(format!("`{spec}` has no unit; add ms, s, m or h"));
    }
    let scale = DURATION_UNITS
        .iter()
        .find(|(names, _)| names.contains(&unit.as_str()))
        .map(|(_, scale)| *scale)
        .ok_or_else(|| format!("unknown unit `{unit}` in `{spec}`; use ms, s, m or h"))?;
    let amount: f64 = amount
        .parse()
        .map_err(|_| format!("`{amount}` in `{spec}` is not a number"))?;
    match Duration::try_from_secs_f64(amount * scale) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        Ok(_) => Err(format!("`{spec}` must be longer than zero")),
        Err(_) => Err(format!("`{spec}` is out of range")),
    }
}
