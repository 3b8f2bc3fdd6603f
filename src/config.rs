//! Runtime configuration for ollama-relay.
//!
//! Configuration is loaded from an optional JSON file and then overridden by
//! command-line flags and environment variables. It is resolved once at
//! startup and shared read-only with the upstreams and the router.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// Daemon address used when neither the flag, the environment nor the
/// config file provide one.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "ollama-relay", about = "HTTP relay in front of a local Ollama daemon")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "relay.json")]
    pub config: PathBuf,

    /// Ollama API URL.
    #[arg(long, env = "OLLAMA_API_URL")]
    pub ollama_url: Option<String>,

    /// How to reach the daemon.
    #[arg(long, value_enum)]
    pub transport: Option<Transport>,

    /// Path to the ollama executable (process transport).
    #[arg(long, env = "OLLAMA_BIN")]
    pub ollama_bin: Option<PathBuf>,

    /// Fragment boundary for the process transport.
    #[arg(long, value_enum)]
    pub granularity: Option<Granularity>,

    /// HTTP listen address.
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

/// Transport used to talk to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// The daemon's native HTTP API.
    #[default]
    Http,
    /// The daemon's command-line tool.
    Process,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Http => write!(f, "http"),
            Transport::Process => write!(f, "process"),
        }
    }
}

/// Where the process bridge cuts stdout into fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One fragment per character.
    #[default]
    Char,
    /// One fragment per word, cut after each space or newline.
    Word,
    /// One fragment per line.
    Line,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which upstream variant serves the routes.
    pub transport: Transport,

    /// Server configuration.
    pub server: ServerConfig,

    /// HTTP upstream configuration.
    pub upstream: UpstreamConfig,

    /// Process upstream configuration.
    pub process: ProcessConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,

    /// Allowed CORS origins. Empty means any origin.
    pub cors_allow_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            cors_allow_origins: Vec::new(),
        }
    }
}

/// Settings for the daemon's HTTP API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the daemon, without a trailing slash.
    pub base_url: String,

    /// Timeout profile shared by the lister and the bridge.
    pub timeouts: TimeoutConfig,

    /// Largest partial JSON line buffered across chunks before it is dropped.
    pub max_line_bytes: usize,

    /// Model reported when the daemon lists none.
    pub fallback_model: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeouts: TimeoutConfig::default(),
            max_line_bytes: 1024 * 1024, // 1 MiB
            fallback_model: "llama3.2".to_string(),
        }
    }
}

/// Upstream timeouts in seconds.
///
/// reqwest has no per-write deadline; request bodies here are a few bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub connect_secs: u64,
    pub read_secs: u64,
    pub pool_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            read_secs: 120,
            pool_secs: 10,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn pool(&self) -> Duration {
        Duration::from_secs(self.pool_secs)
    }
}

/// Settings for the daemon's command-line tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Executable to invoke (`<binary> list`, `<binary> run <model> <prompt>`).
    pub binary: PathBuf,

    /// Fragment boundary.
    pub granularity: Granularity,

    /// Capacity of the channel between the reader thread and the response.
    pub channel_capacity: usize,

    /// Model reported when listing fails or finds nothing.
    pub fallback_model: String,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ollama"),
            granularity: Granularity::Char,
            channel_capacity: 64,
            fallback_model: "deepseek-r1:14b".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults if it is absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Load the file named on the command line and apply the CLI overrides.
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        let mut config = Self::load(&cli.config)?;
        config.apply_cli(cli);
        Ok(config)
    }

    /// Apply command-line (and environment, via clap) overrides.
    ///
    /// Base URL precedence is flag, then `OLLAMA_API_URL`, then the config
    /// file, then [`DEFAULT_BASE_URL`].
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.ollama_url {
            self.upstream.base_url = url.clone();
        }
        self.upstream.base_url = self.upstream.base_url.trim_end_matches('/').to_string();
        if self.upstream.base_url.is_empty() {
            self.upstream.base_url = DEFAULT_BASE_URL.to_string();
        }

        if let Some(transport) = cli.transport {
            self.transport = transport;
        }
        if let Some(bin) = &cli.ollama_bin {
            self.process.binary = bin.clone();
        }
        if let Some(granularity) = cli.granularity {
            self.process.granularity = granularity;
        }
        if let Some(listen) = &cli.listen {
            self.server.listen = listen.clone();
        }
    }
}
