use std::path::Path;

use crate::config::schema::MonitorConfig;
use crate::error::ConfigError;
use crate::steps::StepRegistry;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MonitorConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<MonitorConfig, ConfigError> {
    let config: MonitorConfig = serde_json::from_str(content)?;

    validate_config(&config, &StepRegistry::pipeline())?;

    Ok(config)
}

pub fn validate_config(config: &MonitorConfig, registry: &StepRegistry) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(invalid(format!(
            "Unsupported config version: {}",
            config.version
        )));
    }

    match reqwest::Url::parse(&config.base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => {
            return Err(invalid(format!(
                "base_url must use http or https, got '{}'",
                url.scheme()
            )))
        }
        Err(e) => return Err(invalid(format!("Invalid base_url '{}': {}", config.base_url, e))),
    }

    if config.poll_interval_ms == 0 {
        return Err(invalid("poll_interval_ms must be > 0".to_string()));
    }

    if config.max_backoff_ms < config.poll_interval_ms {
        return Err(invalid(format!(
            "max_backoff_ms ({}) must be >= poll_interval_ms ({})",
            config.max_backoff_ms, config.poll_interval_ms
        )));
    }

    if !(config.estimate_cap_percent > 0.0 && config.estimate_cap_percent < 100.0) {
        return Err(invalid(format!(
            "estimate_cap_percent must be between 0 and 100 (exclusive), got {}",
            config.estimate_cap_percent
        )));
    }

    if config.expected_step_durations_secs.len() != registry.len() {
        return Err(invalid(format!(
            "expected_step_durations_secs has {} entries, pipeline has {} steps",
            config.expected_step_durations_secs.len(),
            registry.len()
        )));
    }

    if let Some(index) = config
        .expected_step_durations_secs
        .iter()
        .position(|secs| *secs == 0)
    {
        return Err(invalid(format!(
            "expected duration for step '{}' must be > 0",
            registry.label_for(index)
        )));
    }

    if config.request_timeout_secs == 0 {
        return Err(invalid("request_timeout_secs must be > 0".to_string()));
    }

    Ok(())
}

fn invalid(message: String) -> ConfigError {
    ConfigError::Validation { message }
}
