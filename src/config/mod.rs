//! Configuration: JSON config file plus CLI overrides
//!
//! The file schema follows the keys the proxy has always recognized:
//! `mode`, `pool{host,port,user,pass}`, `node{host,port,coinbase}`,
//! `local{host,port,statsPort}` and `vardiff{...}`. Unset sections fall back
//! to their defaults; CLI flags override file values.

use crate::error::{ConfigError, Error, Result};
use crate::stratum::vardiff::VardiffConfig;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Which upstream the proxy drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Relay shares to a remote Stratum pool
    Pool,
    /// Validate shares locally and submit blocks to a CKB node
    Solo,
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pool" => Ok(Mode::Pool),
            "solo" => Ok(Mode::Solo),
            other => Err(Error::config_invalid_value("mode", other, "pool or solo")),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Pool => write!(f, "pool"),
            Mode::Solo => write!(f, "solo"),
        }
    }
}

/// Remote pool endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Pool hostname
    pub host: String,
    /// Pool Stratum port
    pub port: u16,
    /// Username substituted into every forwarded share
    pub user: String,
    /// Password for `mining.authorize`
    #[serde(default = "default_pool_pass")]
    pub pass: String,
}

fn default_pool_pass() -> String {
    "x".to_string()
}

/// Local CKB node endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    /// Node RPC host
    pub host: String,
    /// Node RPC port
    pub port: u16,
    /// Reward address, informational only; the node's block assembler must
    /// be configured to match
    pub coinbase: Option<String>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8114,
            coinbase: None,
        }
    }
}

/// Miner-facing listener and stats surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocalSettings {
    /// Listen address for miner connections
    pub host: String,
    /// Listen port for miner connections
    pub port: u16,
    /// Port for the read-only HTTP stats surface
    pub stats_port: u16,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3333,
            stats_port: 8080,
        }
    }
}

/// Full proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Upstream mode
    pub mode: Mode,
    /// Pool settings, required in pool mode
    #[serde(default)]
    pub pool: Option<PoolSettings>,
    /// Node settings, defaulted in solo mode
    #[serde(default)]
    pub node: Option<NodeSettings>,
    /// Listener settings
    #[serde(default)]
    pub local: LocalSettings,
    /// Per-miner difficulty controller settings
    #[serde(default)]
    pub vardiff: VardiffConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Solo,
            pool: None,
            node: Some(NodeSettings::default()),
            local: LocalSettings::default(),
            vardiff: VardiffConfig::default(),
        }
    }
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(
    name = "ckb-stratum-proxy",
    about = "Stratum v1 proxy for Nervos CKB miners",
    version
)]
pub struct Args {
    /// Configuration file in JSON format
    #[clap(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Upstream mode
    #[clap(short = 'm', long = "mode", value_name = "pool|solo")]
    pub mode: Option<String>,

    /// Miner-facing listen address
    #[clap(long = "listen", value_name = "HOST:PORT")]
    pub listen: Option<String>,

    /// Stats surface port
    #[clap(long = "stats-port", value_name = "PORT")]
    pub stats_port: Option<u16>,

    /// Level at which log messages are written to the console
    #[clap(
        short = 'l',
        long = "log-level",
        value_name = "error|warn|info|debug",
        default_value = "info"
    )]
    pub log_level: String,

    /// Console log format
    #[clap(long = "log-format", value_name = "plain|json", default_value = "plain")]
    pub log_format: String,

    /// Print the effective configuration and exit
    #[clap(long = "print-config")]
    pub print_config: bool,
}

impl Config {
    /// Load the file named by the args (if any) and apply CLI overrides.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };

        if let Some(mode) = &args.mode {
            config.mode = mode.parse()?;
        }
        if let Some(listen) = &args.listen {
            let (host, port) = parse_listen(listen)?;
            config.local.host = host;
            config.local.port = port;
        }
        if let Some(port) = args.stats_port {
            config.local.stats_port = port;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON config file.
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|_| {
            Error::Config(ConfigError::FileNotFound {
                path: path.display().to_string(),
            })
        })?;
        serde_json::from_str(&text).map_err(|e| {
            Error::Config(ConfigError::ParseError {
                file: path.display().to_string(),
                message: e.to_string(),
            })
        })
    }

    /// Check mode-specific requirements and fill solo-mode defaults.
    pub fn validate(&mut self) -> Result<()> {
        match self.mode {
            Mode::Pool => {
                let pool = self.pool.as_ref().ok_or(Error::Config(
                    ConfigError::MissingField {
                        field: "pool".to_string(),
                    },
                ))?;
                if pool.host.is_empty() {
                    return Err(Error::Config(ConfigError::MissingField {
                        field: "pool.host".to_string(),
                    }));
                }
                if pool.user.is_empty() {
                    return Err(Error::Config(ConfigError::MissingField {
                        field: "pool.user".to_string(),
                    }));
                }
            }
            Mode::Solo => {
                if self.node.is_none() {
                    self.node = Some(NodeSettings::default());
                }
            }
        }

        if self.vardiff.min_diff <= 0.0 || self.vardiff.min_diff > self.vardiff.max_diff {
            return Err(Error::config_invalid_value(
                "vardiff.minDiff",
                self.vardiff.min_diff.to_string(),
                "positive and below maxDiff",
            ));
        }
        Ok(())
    }
}

fn parse_listen(value: &str) -> Result<(String, u16)> {
    let (host, port) = value.rsplit_once(':').ok_or_else(|| {
        Error::config_invalid_value("listen", value, "HOST:PORT")
    })?;
    let port = port
        .parse::<u16>()
        .map_err(|_| Error::config_invalid_value("listen", value, "HOST:PORT"))?;
    Ok((host.to_string(), port))
}
