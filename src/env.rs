use anyhow::Context;
use std::time::Duration;

use crate::util::{read_env, read_env_transformed, try_read_env};

/// Mode under which the authorization/CORS middleware runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    /// No authorization or CORS is applied; every route (other than health) is open.
    Noop,
    /// Capability-based authorization is enforced and CORS is restricted to the fixed origins.
    Enforced,
}

impl From<String> for AuthMode {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("noop") {
            AuthMode::Noop
        } else {
            AuthMode::Enforced
        }
    }
}

/// Process-level configuration resolved from environment variables (and, where noted, CLI
/// overrides via [`clap`]).
#[derive(Clone, Debug)]
pub struct Env {
    /// Port the HTTP server binds to.
    pub server_port: u16,
    /// Location of the dataset catalog: `file://`, `http(s)://`, or any other value to fall back
    /// to the embedded default.
    pub config_location: String,
    /// Comma-separated list of Kafka bootstrap servers.
    pub bootstrap_servers: String,
    /// Log level passed to the `EnvFilter`.
    pub log_level: String,
    /// Authorization/CORS mode.
    pub auth_mode: AuthMode,
    /// Name of this service, used in logs and as the consumer client id prefix.
    pub service_name: String,
    /// Optional Datadog agent host; read through but not acted on (see DESIGN.md).
    pub dd_agent_host: Option<String>,
    /// Interval on which the dataset catalog is reloaded.
    pub refresh_interval: Duration,
}

/// Default HTTP port when `SERVER_PORT` is unset.
const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default catalog reload cadence when `REFRESH_INTERVAL` is unset.
const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

impl Env {
    /// Reads all configuration values from the process environment.
    pub fn from_environment() -> anyhow::Result<Self> {
        let server_port = read_env_transformed(
            "SERVER_PORT",
            |v| v.parse::<u16>().unwrap_or(DEFAULT_SERVER_PORT),
            || DEFAULT_SERVER_PORT,
        );

        let config_location = read_env("CONFIG_LOCATION", || String::from("default"));

        let bootstrap_servers =
            read_env("BOOTSTRAP_SERVERS", || String::from("localhost:9092"));

        let log_level = read_env("LOG_LEVEL", || String::from("info"));

        let auth_mode = read_env_transformed(
            "AUTHORIZATION_MIDDLEWARE",
            AuthMode::from,
            || AuthMode::Enforced,
        );

        let service_name = read_env("SERVICE_NAME", || String::from("entity-gateway"));

        let dd_agent_host = try_read_env("DD_AGENT_HOST");

        let refresh_interval = match try_read_env("REFRESH_INTERVAL") {
            Some(raw) => parse_duration(&raw).context("parse REFRESH_INTERVAL")?,
            None => DEFAULT_REFRESH_INTERVAL,
        };

        Ok(Self {
            server_port,
            config_location,
            bootstrap_servers,
            log_level,
            auth_mode,
            service_name,
            dd_agent_host,
            refresh_interval,
        })
    }
}

/// Parses a duration written as an integer followed by one of `s`, `m`, `h` (e.g. `30s`, `5m`,
/// `1h`). A bare integer is interpreted as seconds.
fn parse_duration(raw: &str) -> anyhow::Result<Duration> {
    let raw = raw.trim();

    let (digits, unit) = match raw.strip_suffix(['s', 'm', 'h']) {
        Some(digits) => (digits, raw.chars().last().unwrap()),
        None => (raw, 's'),
    };

    let value: u64 = digits.parse().context("parse numeric duration component")?;

    let secs = match unit {
        's' => value,
        'm' => value * 60,
        'h' => value * 3600,
        _ => unreachable!(),
    };

    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn parses_minutes_and_hours() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn auth_mode_from_noop_is_case_insensitive() {
        assert_eq!(AuthMode::from(String::from("NoOp")), AuthMode::Noop);
        assert_eq!(AuthMode::from(String::from("enabled")), AuthMode::Enforced);
    }
}
