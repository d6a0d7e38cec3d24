//! Agent configuration: defaults, overridden by PULSETOP_AGENT_* env vars, overridden by argv.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 8_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0}")]
    Help(String),
    #[error("missing value for {0}")]
    MissingValue(String),
    #[error("invalid value '{value}' for {flag}")]
    InvalidValue { flag: String, value: String },
    #[error("unexpected argument '{0}'")]
    Unexpected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Broadcast tick period.
    pub interval: Duration,
    /// Process rows pushed per tick.
    pub top_n: usize,
    /// Upper bound for each external listing command.
    pub command_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            top_n: DEFAULT_TOP_N,
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
        }
    }
}

fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--port PORT|-p PORT] [--bind ADDR] [--interval-ms MS] [--top N] [--command-timeout-ms MS]"
    )
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))?;
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

fn positive_ms(flag: &str, ms: u64) -> Result<Duration, ConfigError> {
    if ms == 0 {
        return Err(ConfigError::InvalidValue {
            flag: flag.to_string(),
            value: ms.to_string(),
        });
    }
    Ok(Duration::from_millis(ms))
}

impl AgentConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    /// Build from the process environment and argv.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_sources(std::env::args(), |k| std::env::var(k).ok())
    }

    /// `env` is a lookup so tests don't have to mutate the process environment.
    pub fn from_sources<I, F>(args: I, env: F) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = AgentConfig::default();
        cfg.apply("PULSETOP_AGENT_BIND", env("PULSETOP_AGENT_BIND"))?;
        cfg.apply("PULSETOP_AGENT_PORT", env("PULSETOP_AGENT_PORT"))?;
        cfg.apply("PULSETOP_AGENT_INTERVAL_MS", env("PULSETOP_AGENT_INTERVAL_MS"))?;
        cfg.apply("PULSETOP_AGENT_TOP", env("PULSETOP_AGENT_TOP"))?;
        cfg.apply(
            "PULSETOP_AGENT_COMMAND_TIMEOUT_MS",
            env("PULSETOP_AGENT_COMMAND_TIMEOUT_MS"),
        )?;

        let mut it = args.into_iter();
        let prog = it.next().unwrap_or_else(|| "pulsetop_agent".into());
        while let Some(arg) = it.next() {
            // --flag=value
            if let Some((flag, v)) = arg.split_once('=').filter(|(f, _)| f.starts_with("--")) {
                cfg.set(flag, Some(v.to_string()))?;
                continue;
            }
            match arg.as_str() {
                "-h" | "--help" => return Err(ConfigError::Help(usage(&prog))),
                "--port" | "-p" | "--bind" | "--interval-ms" | "--top" | "--command-timeout-ms" => {
                    cfg.set(&arg, it.next())?
                }
                _ => return Err(ConfigError::Unexpected(arg)),
            }
        }
        Ok(cfg)
    }

    fn apply(&mut self, key: &str, value: Option<String>) -> Result<(), ConfigError> {
        match value {
            Some(v) if !v.trim().is_empty() => self.set(key, Some(v)),
            _ => Ok(()),
        }
    }

    fn set(&mut self, flag: &str, value: Option<String>) -> Result<(), ConfigError> {
        match flag {
            "--port" | "-p" | "PULSETOP_AGENT_PORT" => self.port = parse_value(flag, value)?,
            "--bind" | "PULSETOP_AGENT_BIND" => self.bind = parse_value(flag, value)?,
            "--interval-ms" | "PULSETOP_AGENT_INTERVAL_MS" => {
                self.interval = positive_ms(flag, parse_value(flag, value)?)?
            }
            "--top" | "PULSETOP_AGENT_TOP" => self.top_n = parse_value(flag, value)?,
            "--command-timeout-ms" | "PULSETOP_AGENT_COMMAND_TIMEOUT_MS" => {
                self.command_timeout = positive_ms(flag, parse_value(flag, value)?)?
            }
            other => return Err(ConfigError::Unexpected(other.to_string())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(v: &[&str]) -> Vec<String> {
        std::iter::once("agent")
            .chain(v.iter().copied())
            .map(String::from)
            .collect()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn defaults() {
        let c = AgentConfig::from_sources(args(&[]), no_env).unwrap();
        assert_eq!(c, AgentConfig::default());
        assert_eq!(c.interval, Duration::from_millis(5000));
        assert_eq!(c.top_n, 10);
        assert_eq!(c.addr().port(), 3000);
    }

    #[test]
    fn port_long_short_and_assign() {
        let p = |v: &[&str]| AgentConfig::from_sources(args(v), no_env).unwrap().port;
        assert_eq!(p(&["--port", "9001"]), 9001);
        assert_eq!(p(&["-p", "9002"]), 9002);
        assert_eq!(p(&["--port=9003"]), 9003);
    }

    #[test]
    fn argv_overrides_env() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PULSETOP_AGENT_PORT", "4000"),
            ("PULSETOP_AGENT_INTERVAL_MS", "1000"),
            ("PULSETOP_AGENT_TOP", "25"),
        ]);
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());
        let c = AgentConfig::from_sources(args(&["--port", "4100"]), lookup).unwrap();
        assert_eq!(c.port, 4100);
        assert_eq!(c.interval, Duration::from_millis(1000));
        assert_eq!(c.top_n, 25);
    }

    #[test]
    fn bad_values_are_errors() {
        let e = AgentConfig::from_sources(args(&["--port", "http"]), no_env).unwrap_err();
        assert_eq!(
            e,
            ConfigError::InvalidValue {
                flag: "--port".into(),
                value: "http".into()
            }
        );
        assert_eq!(
            AgentConfig::from_sources(args(&["--top"]), no_env).unwrap_err(),
            ConfigError::MissingValue("--top".into())
        );
        assert!(matches!(
            AgentConfig::from_sources(args(&["--interval-ms=0"]), no_env),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            AgentConfig::from_sources(args(&["--enableSSL"]), no_env),
            Err(ConfigError::Unexpected(_))
        ));
    }

    #[test]
    fn help_carries_usage() {
        match AgentConfig::from_sources(args(&["--help"]), no_env) {
            Err(ConfigError::Help(text)) => assert!(text.contains("--interval-ms")),
            other => panic!("expected help, got {other:?}"),
        }
    }
}
