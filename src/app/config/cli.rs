use super::serde_helpers::{
    load_env_flag, load_env_path_opt, load_env_string, load_env_string_opt, load_env_var,
};
use super::{ConfigError, LogFormat, LogLevel};
use crate::sender::{
    ClientConfig, DEFAULT_ENDPOINT, DEFAULT_SESSION_BUFFER, DEFAULT_SESSION_STREAMS,
    PER_STREAM_QUEUE_CAPACITY,
};
use crate::transport::Credential;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Clone, Serialize, Deserialize)]
#[command(author, version, about = "Stream NDJSON events to a Rask ingestion endpoint", long_about = None)]
#[serde(default)]
pub struct Config {
    /// Ingestion endpoint (host:port or URL)
    #[arg(long, env = "RASK_INGEST_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// API key attached to every stream
    #[arg(long, env = "RASK_API_KEY", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Number of parallel streams
    #[arg(long, env = "NUM_STREAMS", default_value_t = DEFAULT_SESSION_STREAMS)]
    pub num_streams: usize,

    /// Dial timeout in seconds
    #[arg(long, env = "TIMEOUT_SECS", default_value = "30")]
    pub timeout_secs: u64,

    /// Never use TLS, even on the secure port
    #[arg(long, env = "INSECURE")]
    pub insecure: bool,

    /// Capacity of the session buffer
    #[arg(long, env = "BUFFER_CAPACITY", default_value_t = DEFAULT_SESSION_BUFFER)]
    pub buffer_capacity: usize,

    /// Capacity of each per-stream queue
    #[arg(long, env = "STREAM_QUEUE_CAPACITY", default_value_t = PER_STREAM_QUEUE_CAPACITY)]
    pub stream_queue_capacity: usize,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// NDJSON event file; stdin when omitted
    #[arg(long, short)]
    pub input: Option<PathBuf>,

    /// Configuration file path (optional)
    #[arg(long, env = "CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Stream into the in-process loopback transport instead of the network
    #[arg(long)]
    pub dry_run: bool,

    /// Submit without waiting; events are dropped while the buffer is full
    #[arg(long)]
    pub non_blocking: bool,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    pub print_metrics: bool,

    /// Derived fields (not CLI arguments)
    #[serde(skip)]
    #[arg(skip)]
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            num_streams: DEFAULT_SESSION_STREAMS,
            timeout_secs: 30,
            insecure: false,
            buffer_capacity: DEFAULT_SESSION_BUFFER,
            stream_queue_capacity: PER_STREAM_QUEUE_CAPACITY,
            log_level: LogLevel::Info,
            log_format: LogFormat::Compact,
            input: None,
            config_file: None,
            dry_run: false,
            non_blocking: false,
            print_metrics: false,
            timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("num_streams", &self.num_streams)
            .field("timeout_secs", &self.timeout_secs)
            .field("insecure", &self.insecure)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("stream_queue_capacity", &self.stream_queue_capacity)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("input", &self.input)
            .field("dry_run", &self.dry_run)
            .field("non_blocking", &self.non_blocking)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let mut config = Config::parse_from(args);
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        // An inline TOML document takes precedence over individual variables
        if let Ok(rask_config) = std::env::var("RASK_CONFIG") {
            return Self::from_rask_config_env(&rask_config);
        }

        let mut config = Config::default();

        load_env_string("RASK_INGEST_ENDPOINT", &mut config.endpoint);
        load_env_string_opt("RASK_API_KEY", &mut config.api_key);
        load_env_var("NUM_STREAMS", &mut config.num_streams)?;
        load_env_var("TIMEOUT_SECS", &mut config.timeout_secs)?;
        load_env_flag("INSECURE", &mut config.insecure)?;
        load_env_var("BUFFER_CAPACITY", &mut config.buffer_capacity)?;
        load_env_var("STREAM_QUEUE_CAPACITY", &mut config.stream_queue_capacity)?;

        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            config.log_level = LogLevel::parse_lenient(&log_level)
                .ok_or_else(|| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {log_level}")))?;
        }

        if let Ok(log_format) = std::env::var("LOG_FORMAT") {
            config.log_format = match log_format.to_lowercase().as_str() {
                "compact" => LogFormat::Compact,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::EnvError(format!(
                        "Invalid LOG_FORMAT: {log_format}. Valid values: compact, json"
                    )));
                }
            };
        }

        load_env_path_opt("CONFIG_FILE", &mut config.config_file);

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_args_and_env<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        // Start with RASK_CONFIG if available, then override with CLI args
        let base_config = if let Ok(rask_config) = std::env::var("RASK_CONFIG") {
            Self::from_rask_config_env(&rask_config)?
        } else {
            Config::default()
        };

        // clap already folds individual env vars into the parsed args
        let mut config = Config::parse_from(args);
        let defaults = Config::default();

        if config.endpoint == defaults.endpoint && base_config.endpoint != defaults.endpoint {
            config.endpoint = base_config.endpoint;
        }
        if config.api_key.is_none() && base_config.api_key.is_some() {
            config.api_key = base_config.api_key;
        }
        if config.num_streams == defaults.num_streams
            && base_config.num_streams != defaults.num_streams
        {
            config.num_streams = base_config.num_streams;
        }
        if config.timeout_secs == defaults.timeout_secs
            && base_config.timeout_secs != defaults.timeout_secs
        {
            config.timeout_secs = base_config.timeout_secs;
        }
        if config.buffer_capacity == defaults.buffer_capacity
            && base_config.buffer_capacity != defaults.buffer_capacity
        {
            config.buffer_capacity = base_config.buffer_capacity;
        }
        if config.stream_queue_capacity == defaults.stream_queue_capacity
            && base_config.stream_queue_capacity != defaults.stream_queue_capacity
        {
            config.stream_queue_capacity = base_config.stream_queue_capacity;
        }
        config.insecure |= base_config.insecure;

        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_rask_config_env(rask_config: &str) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(rask_config)?;
        config.post_process()?;
        config.validate()?;
        Ok(config)
    }

    pub fn post_process(&mut self) -> Result<(), ConfigError> {
        self.timeout = Duration::from_secs(self.timeout_secs);
        self.endpoint = self.endpoint.trim().to_string();
        if self
            .api_key
            .as_deref()
            .is_some_and(|key| key.trim().is_empty())
        {
            self.api_key = None;
        }
        Ok(())
    }

    /// Engine configuration derived from this application config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.endpoint.clone(),
            timeout: self.timeout,
            tls: !self.insecure,
            num_streams: self.num_streams,
            session_buffer: self.buffer_capacity,
            stream_queue_capacity: self.stream_queue_capacity,
        }
    }

    /// The API key as a credential. Dry runs never leave the process and
    /// need no key.
    pub fn credential(&self) -> Result<Credential, ConfigError> {
        match (&self.api_key, self.dry_run) {
            (Some(key), _) => Ok(Credential::new(key.clone())),
            (None, true) => Ok(Credential::new("dry-run")),
            (None, false) => Err(ConfigError::MissingApiKey),
        }
    }
}
