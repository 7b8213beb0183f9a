//! Agent configuration.
//!
//! Values come from, in order of precedence:
//! - the process environment
//! - a dotenv file (`.env` in the working directory unless another path is
//!   given)
//! - built-in defaults
//!
//! Unknown keys are ignored.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::NodeError;

/// Default broker host.
pub const DEFAULT_BROKER_HOST: &str = "bemfa.com";

/// Default broker TCP port.
pub const DEFAULT_BROKER_PORT: u16 = 8344;

/// Default heartbeat period in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Dotenv file read when no explicit path is given.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Broker address and device identity. Immutable once the agent starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Broker host name or IP address.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// Device UID (the broker's private key for the account).
    #[serde(serialize_with = "serialize_masked")]
    pub uid: String,
    /// Topic to subscribe to.
    pub topic: String,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            uid: String::new(),
            topic: String::new(),
        }
    }
}

impl Endpoint {
    /// Create an endpoint.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        uid: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            uid: uid.into(),
            topic: topic.into(),
        }
    }

    /// Validate the endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is empty, the port is zero, or the UID or
    /// topic contain characters that would corrupt the subscribe frame.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.host.is_empty() {
            return Err(NodeError::Config("broker host cannot be empty".to_string()));
        }

        if self.host.chars().any(char::is_whitespace) {
            return Err(NodeError::Config(format!(
                "broker host {:?} must not contain whitespace",
                self.host
            )));
        }

        if self.port == 0 {
            return Err(NodeError::Config("broker port must be non-zero".to_string()));
        }

        for (name, value) in [("uid", &self.uid), ("topic", &self.topic)] {
            if value.contains(['&', '=', '\r', '\n']) {
                return Err(NodeError::Config(format!(
                    "{name} must not contain '&', '=' or line breaks"
                )));
            }
        }

        Ok(())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (topic {:?})", self.host, self.port, self.topic)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(NodeError::Config(format!(
                "LOG_FORMAT must be 'text' or 'json', got {other:?}"
            ))),
        }
    }
}

/// Logging settings. `RUST_LOG` takes precedence over `level` at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogConfig {
    /// Default filter directive level, e.g. `info` or `debug`.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Shell commands run when a command arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionConfig {
    /// Command line for `msg=on`.
    pub on_command: Option<String>,
    /// Command line for `msg=off`.
    pub off_command: Option<String>,
}

/// Main agent configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentConfig {
    /// Broker endpoint and device identity.
    pub endpoint: Endpoint,
    /// Heartbeat period in seconds.
    pub heartbeat_interval_secs: u64,
    /// Side-effect commands.
    pub actions: ActionConfig,
    /// Bind address of the liveness endpoint, if enabled.
    pub health_addr: Option<SocketAddr>,
    /// Logging settings.
    pub log: LogConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            actions: ActionConfig::default(),
            health_addr: None,
            log: LogConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the environment layered over a dotenv file.
    ///
    /// With `env_file` of `None`, `.env` in the working directory is used if
    /// it exists. An explicitly named file must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or any value is invalid.
    pub fn load(env_file: Option<&Path>) -> Result<Self, NodeError> {
        let file_values = match env_file {
            Some(path) => read_env_file(path)?,
            None => {
                let default = Path::new(DEFAULT_ENV_FILE);
                if default.is_file() {
                    read_env_file(default)?
                } else {
                    HashMap::new()
                }
            }
        };

        Self::from_lookup(|key| {
            std::env::var(key)
                .ok()
                .or_else(|| file_values.get(key).cloned())
        })
    }

    /// Build configuration from a key lookup, applying defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, NodeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string());
        let non_empty = |key: &str| get(key).filter(|v| !v.is_empty());

        let port = match get("BEMFA_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                NodeError::Config(format!("BEMFA_PORT must be a port number, got {raw:?}"))
            })?,
            None => defaults.endpoint.port,
        };

        let heartbeat_interval_secs = match non_empty("QIKO_HEARTBEAT_INTERVAL_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                NodeError::Config(format!(
                    "QIKO_HEARTBEAT_INTERVAL_SECS must be a whole number of seconds, got {raw:?}"
                ))
            })?,
            None => defaults.heartbeat_interval_secs,
        };

        let health_addr = non_empty("QIKO_HEALTH_ADDR")
            .map(|raw| {
                raw.parse::<SocketAddr>().map_err(|_| {
                    NodeError::Config(format!("QIKO_HEALTH_ADDR must be host:port, got {raw:?}"))
                })
            })
            .transpose()?;

        let config = Self {
            endpoint: Endpoint {
                host: get("BEMFA_URL").unwrap_or(defaults.endpoint.host),
                port,
                uid: get("BEMFA_UID").unwrap_or_default(),
                topic: get("BEMFA_TOPIC").unwrap_or_default(),
            },
            heartbeat_interval_secs,
            actions: ActionConfig {
                on_command: non_empty("QIKO_ON_COMMAND"),
                off_command: non_empty("QIKO_OFF_COMMAND"),
            },
            health_addr,
            log: LogConfig {
                level: non_empty("LOG_LEVEL").unwrap_or(defaults.log.level),
                format: get("LOG_FORMAT").as_deref().unwrap_or("text").parse()?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), NodeError> {
        self.endpoint.validate()?;

        if self.heartbeat_interval_secs == 0 {
            return Err(NodeError::Config(
                "heartbeat interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Heartbeat period.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Read and parse a dotenv file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn read_env_file(path: impl AsRef<Path>) -> Result<HashMap<String, String>, NodeError> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        NodeError::Config(format!(
            "failed to read env file '{}': {}",
            path.as_ref().display(),
            e
        ))
    })?;

    Ok(parse_env_file(&content))
}

/// Parse dotenv content into key/value pairs.
///
/// Supports `#` comments, an optional `export ` prefix, and trailing ` #`
/// comments on unquoted values. Single-quoted values are literal.
/// Double-quoted values decode `\"`, `\\`, `\n` and `\t` and may span
/// several lines up to the closing quote. Lines without `=` are skipped.
/// Later assignments win.
#[must_use]
pub fn parse_env_file(content: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        let value = value.trim_start();
        let value = if let Some(rest) = value.strip_prefix('"') {
            double_quoted(rest, &mut lines)
        } else if let Some(rest) = value.strip_prefix('\'') {
            match rest.find('\'') {
                Some(end) => rest[..end].to_string(),
                None => value.to_string(),
            }
        } else {
            unquoted(value)
        };

        values.insert(key.to_string(), value);
    }

    values
}

/// Decode a double-quoted value starting after the opening quote, pulling
/// further lines until the closing quote. Anything after it is ignored.
fn double_quoted<'a>(first: &'a str, rest: &mut impl Iterator<Item = &'a str>) -> String {
    let mut value = String::new();
    let mut line = first;

    loop {
        let mut chars = line.chars();
        while let Some(c) = chars.next() {
            match c {
                '"' => return value,
                '\\' => match chars.next() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(escaped) => value.push(escaped),
                    None => value.push('\\'),
                },
                c => value.push(c),
            }
        }

        // Unterminated at end of input: keep what was read.
        let Some(next) = rest.next() else {
            return value;
        };
        value.push('\n');
        line = next;
    }
}

fn unquoted(value: &str) -> String {
    match value.find(" #") {
        Some(comment) => value[..comment].trim_end().to_string(),
        None => value.trim_end().to_string(),
    }
}

fn serialize_masked<S: Serializer>(value: &str, serializer: S) -> Result<S::Ok, S::Error> {
    if value.is_empty() {
        return serializer.serialize_str("");
    }
    let visible: String = value.chars().take(4).collect();
    serializer.serialize_str(&format!("{visible}****"))
}
