use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:50051";
pub const DEFAULT_INGEST_URL: &str = "tcp://127.0.0.1:50051";
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 300; // 5 minutes
pub const DEFAULT_MAX_AGE_SECS: u64 = 7 * 24 * 3600; // 7 days
pub const DEFAULT_RENDER_THRESHOLD_SECS: u64 = 60;
pub const DEFAULT_RENDER_OUTPUT: &str = "sensor_data.json";
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_ALIASES_FILE: &str = "ruuvi_aliases.conf";
pub const DEFAULT_TRANSMIT_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Ingestion endpoint, scheduler and renderer
    Server,
    /// Aggregate driver samples and transmit them to a server
    Client,
    /// Render once from an archive file
    Render,
}

/// Store maintenance settings
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Period between prune/archive ticks
    pub tick_interval: Duration,
    /// Readings older than this are pruned
    pub max_age: Duration,
    /// Base name for archive snapshots; archiving is off when unset
    pub archive_file: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_interval: Duration::from_secs(DEFAULT_TICK_INTERVAL_SECS),
            max_age: Duration::from_secs(DEFAULT_MAX_AGE_SECS),
            archive_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub scheduler: SchedulerConfig,
    /// Minimum time between render requests
    pub render_threshold: Duration,
    pub render_output: PathBuf,
    /// How long in-flight streams may take to finish on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            scheduler: SchedulerConfig::default(),
            render_threshold: Duration::from_secs(DEFAULT_RENDER_THRESHOLD_SECS),
            render_output: PathBuf::from(DEFAULT_RENDER_OUTPUT),
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub ingest_url: Url,
    pub aliases_file: PathBuf,
    pub transmit_interval: Duration,
    /// Only accept samples from MAC addresses listed in the alias file
    pub strict_aliases: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            ingest_url: Url::parse(DEFAULT_INGEST_URL).expect("default ingest url is valid"),
            aliases_file: PathBuf::from(DEFAULT_ALIASES_FILE),
            transmit_interval: Duration::from_secs(DEFAULT_TRANSMIT_INTERVAL_SECS),
            strict_aliases: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    pub archive: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineConfig {
    Server(ServerConfig),
    Client(ClientConfig),
    Render(RenderConfig),
}

impl PipelineConfig {
    /// Load configuration from the environment (and a `.env` file if present)
    pub fn new() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup, applying defaults and validation
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let config = match vars.mode()? {
            Mode::Server => PipelineConfig::Server(ServerConfig {
                listen_addr: vars.string("LISTEN_ADDR", DEFAULT_LISTEN_ADDR),
                scheduler: SchedulerConfig {
                    tick_interval: vars.secs("TICK_INTERVAL_SECS", DEFAULT_TICK_INTERVAL_SECS)?,
                    max_age: vars.secs("MAX_AGE_SECS", DEFAULT_MAX_AGE_SECS)?,
                    archive_file: vars.optional("ARCHIVE_FILE").map(PathBuf::from),
                },
                render_threshold: vars
                    .secs("RENDER_THRESHOLD_SECS", DEFAULT_RENDER_THRESHOLD_SECS)?,
                render_output: PathBuf::from(vars.string("RENDER_OUTPUT", DEFAULT_RENDER_OUTPUT)),
                shutdown_timeout: vars
                    .secs("SHUTDOWN_TIMEOUT_SECS", DEFAULT_SHUTDOWN_TIMEOUT_SECS)?,
            }),
            Mode::Client => {
                let raw_url = vars.string("INGEST_URL", DEFAULT_INGEST_URL);
                let ingest_url = Url::parse(&raw_url).map_err(|source| ConfigError::Url {
                    url: raw_url.clone(),
                    source,
                })?;
                PipelineConfig::Client(ClientConfig {
                    ingest_url,
                    aliases_file: PathBuf::from(vars.string("ALIASES_FILE", DEFAULT_ALIASES_FILE)),
                    transmit_interval: vars
                        .secs("TRANSMIT_INTERVAL_SECS", DEFAULT_TRANSMIT_INTERVAL_SECS)?,
                    strict_aliases: vars.flag("STRICT_ALIASES", true)?,
                })
            }
            Mode::Render => PipelineConfig::Render(RenderConfig {
                archive: vars
                    .optional("RENDER_FROM")
                    .map(PathBuf::from)
                    .ok_or(ConfigError::Missing { key: "RENDER_FROM" })?,
                output: PathBuf::from(vars.string("RENDER_OUTPUT", DEFAULT_RENDER_OUTPUT)),
            }),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            PipelineConfig::Server(server) => {
                if server.listen_addr.trim().is_empty() {
                    return Err(invalid("LISTEN_ADDR", "", "must not be empty"));
                }
                nonzero("TICK_INTERVAL_SECS", server.scheduler.tick_interval)?;
                nonzero("MAX_AGE_SECS", server.scheduler.max_age)?;
                Ok(())
            }
            PipelineConfig::Client(client) => {
                if client.ingest_url.scheme() != "tcp" {
                    return Err(invalid(
                        "INGEST_URL",
                        client.ingest_url.as_str(),
                        "scheme must be tcp",
                    ));
                }
                if client.ingest_url.port().is_none() {
                    return Err(invalid(
                        "INGEST_URL",
                        client.ingest_url.as_str(),
                        "port is required",
                    ));
                }
                nonzero("TRANSMIT_INTERVAL_SECS", client.transmit_interval)
            }
            PipelineConfig::Render(_) => Ok(()),
        }
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn secs(&self, key: &'static str, default: u64) -> Result<Duration, ConfigError> {
        match self.optional(key) {
            None => Ok(Duration::from_secs(default)),
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| invalid(key, &raw, &e.to_string())),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key).map(|v| v.to_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(invalid(key, &v, "expected true or false")),
        }
    }

    fn mode(&self) -> Result<Mode, ConfigError> {
        match self.string("PIPELINE_MODE", "server").to_lowercase().as_str() {
            "server" => Ok(Mode::Server),
            "client" => Ok(Mode::Client),
            "render" => Ok(Mode::Render),
            other => Err(invalid(
                "PIPELINE_MODE",
                other,
                "expected server, client or render",
            )),
        }
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn nonzero(key: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(invalid(key, "0", "must be greater than zero"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<PipelineConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_server_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, PipelineConfig::Server(ServerConfig::default()));
    }

    #[test]
    fn test_server_overrides() {
        let config = load(&[
            ("LISTEN_ADDR", "0.0.0.0:6000"),
            ("TICK_INTERVAL_SECS", "10"),
            ("MAX_AGE_SECS", "2"),
            ("ARCHIVE_FILE", "archive/ruuvi.json"),
        ])
        .unwrap();

        let PipelineConfig::Server(server) = config else {
            panic!("expected server config");
        };
        assert_eq!(server.listen_addr, "0.0.0.0:6000");
        assert_eq!(server.scheduler.tick_interval, Duration::from_secs(10));
        assert_eq!(server.scheduler.max_age, Duration::from_secs(2));
        assert_eq!(
            server.scheduler.archive_file,
            Some(PathBuf::from("archive/ruuvi.json"))
        );
    }

    #[test]
    fn test_zero_interval_rejected() {
        let result = load(&[("TICK_INTERVAL_SECS", "0")]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key: "TICK_INTERVAL_SECS", .. })
        ));
    }

    #[test]
    fn test_unparsable_number_rejected() {
        assert!(load(&[("MAX_AGE_SECS", "a week")]).is_err());
    }

    #[test]
    fn test_client_config() {
        let config = load(&[
            ("PIPELINE_MODE", "client"),
            ("INGEST_URL", "tcp://10.0.0.2:7000"),
            ("STRICT_ALIASES", "false"),
        ])
        .unwrap();

        let PipelineConfig::Client(client) = config else {
            panic!("expected client config");
        };
        assert_eq!(client.ingest_url.port(), Some(7000));
        assert!(!client.strict_aliases);
        assert_eq!(client.transmit_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_client_rejects_non_tcp_url() {
        let result = load(&[("PIPELINE_MODE", "client"), ("INGEST_URL", "http://host:80")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_render_requires_archive() {
        let result = load(&[("PIPELINE_MODE", "render")]);
        assert!(matches!(result, Err(ConfigError::Missing { key: "RENDER_FROM" })));
    }

    #[test]
    fn test_unknown_mode() {
        assert!(load(&[("PIPELINE_MODE", "proxy")]).is_err());
    }
}
