//! Client configuration: defaults, then PULSETOP_URL, then argv.

use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::reconnect::{ReconnectConfig, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};

pub const DEFAULT_URL: &str = "ws://127.0.0.1:3000/ws";

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
pub struct ClientConfig {
    pub url: String,
    pub reconnect: ReconnectConfig,
    /// Print raw snapshot JSON instead of the summary line.
    pub json: bool,
    pub once: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            reconnect: ReconnectConfig {
                max_retries: DEFAULT_MAX_RETRIES,
                retry_delay: DEFAULT_RETRY_DELAY,
            },
            json: false,
            once: false,
        }
    }
}

fn usage(prog: &str) -> String {
    format!(
        "Usage: {prog} [--max-retries N] [--retry-delay-ms MS] [--json] [--once] [ws://HOST:PORT/ws]"
    )
}

fn parse_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))?;
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

fn ws_url(flag: &str, raw: String) -> Result<String, ConfigError> {
    match Url::parse(&raw) {
        Ok(u) if matches!(u.scheme(), "ws" | "wss") => Ok(raw),
        _ => Err(ConfigError::InvalidValue {
            flag: flag.to_string(),
            value: raw,
        }),
    }
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_sources(std::env::args(), |k| std::env::var(k).ok())
    }

    pub fn from_sources<I, F>(args: I, env: F) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = String>,
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = ClientConfig::default();
        if let Some(u) = env("PULSETOP_URL").filter(|u| !u.trim().is_empty()) {
            cfg.url = ws_url("PULSETOP_URL", u)?;
        }

        let mut it = args.into_iter();
        let prog = it.next().unwrap_or_else(|| "pulsetop".into());
        let mut positional: Option<String> = None;
        while let Some(arg) = it.next() {
            if let Some((flag, v)) = arg.split_once('=').filter(|(f, _)| f.starts_with("--")) {
                cfg.set(flag, Some(v.to_string()))?;
                continue;
            }
            match arg.as_str() {
                "-h" | "--help" => return Err(ConfigError::Help(usage(&prog))),
                "--json" => cfg.json = true,
                "--once" => cfg.once = true,
                "--max-retries" | "--retry-delay-ms" => cfg.set(&arg, it.next())?,
                _ if arg.starts_with('-') => return Err(ConfigError::Unexpected(arg)),
                _ if positional.is_none() => positional = Some(arg),
                _ => return Err(ConfigError::Unexpected(arg)),
            }
        }
        if let Some(u) = positional {
            cfg.url = ws_url("URL", u)?;
        }
        Ok(cfg)
    }

    fn set(&mut self, flag: &str, value: Option<String>) -> Result<(), ConfigError> {
        match flag {
            "--max-retries" => self.reconnect.max_retries = parse_value(flag, value)?,
            "--retry-delay-ms" => {
                self.reconnect.retry_delay = Duration::from_millis(parse_value(flag, value)?)
            }
            other => return Err(ConfigError::Unexpected(other.to_string())),
        }
        Ok(())
    }
}
