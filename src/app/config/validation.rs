use super::{Config, ConfigError};
use url::Url;

/// Parses an endpoint given as `host:port` or as a full http(s) URL.
pub fn parse_endpoint(endpoint: &str) -> Result<Url, ConfigError> {
    let candidate = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    };

    let url = Url::parse(&candidate)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid endpoint '{endpoint}': {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl(format!(
            "Unsupported scheme '{}' in endpoint '{endpoint}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ConfigError::InvalidUrl(format!(
            "Endpoint '{endpoint}' has no host"
        )));
    }

    Ok(url)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        parse_endpoint(&self.endpoint)?;

        if self.num_streams == 0 {
            return Err(ConfigError::InvalidConfig(
                "Number of streams must be greater than 0".to_string(),
            ));
        }

        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "Buffer capacity must be greater than 0".to_string(),
            ));
        }

        if self.stream_queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "Stream queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(input) = &self.input
            && !input.exists()
        {
            return Err(ConfigError::InvalidConfig(format!(
                "Input file does not exist: {}",
                input.display()
            )));
        }

        Ok(())
    }
}
