use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_services(config)?;
    validate_relay_config(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.max_request_body_bytes == 0 {
        return Err(validation_err(
            "server.max_request_body_bytes must be greater than 0",
        ));
    }
    if server.connect_timeout_secs == 0 {
        return Err(validation_err(
            "server.connect_timeout_secs must be greater than 0",
        ));
    }
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if let Some(listener_count) = server.tcp_reuse_port_listener_count {
        if listener_count == 0 {
            return Err(validation_err(
                "server.tcp_reuse_port_listener_count must be greater than 0 when set",
            ));
        }
    }
    Ok(())
}

fn validate_services(config: &AppConfig) -> Result<(), ConfigError> {
    for (alias, base_url) in &config.services {
        if alias.trim().is_empty() {
            return Err(validation_err("services: alias name cannot be empty"));
        }
        if alias.contains('/') {
            return Err(validation_err(format!(
                "services: alias '{alias}' must not contain '/'"
            )));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(validation_err(format!(
                "Service '{alias}': base URL must start with http:// or https://"
            )));
        }
        let parsed = url::Url::parse(base_url).map_err(|err| {
            validation_err(format!(
                "Service '{alias}': base URL is not a valid URL: {err}"
            ))
        })?;
        if parsed.host_str().is_none() {
            return Err(validation_err(format!(
                "Service '{alias}': base URL has no host"
            )));
        }
    }
    Ok(())
}

fn validate_relay_config(config: &AppConfig) -> Result<(), ConfigError> {
    let relay = &config.relay;
    if relay.sentinel.is_empty() {
        return Err(validation_err("relay.sentinel cannot be empty"));
    }
    if relay.inactivity_timeout_ms == 0 {
        return Err(validation_err(
            "relay.inactivity_timeout_ms must be greater than 0",
        ));
    }
    if relay.first_chunk_timeout_ms == 0 {
        return Err(validation_err(
            "relay.first_chunk_timeout_ms must be greater than 0",
        ));
    }
    if relay.upstream_timeout_secs == 0 {
        return Err(validation_err(
            "relay.upstream_timeout_secs must be greater than 0",
        ));
    }
    if http::HeaderValue::from_str(&relay.default_user_agent).is_err() {
        return Err(validation_err(
            "relay.default_user_agent is not a valid header value",
        ));
    }
    if http::HeaderValue::from_str(&relay.default_accept).is_err() {
        return Err(validation_err(
            "relay.default_accept is not a valid header value",
        ));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = [
        "DEBUG", "INFO", "WARN", "WARNING", "ERROR", "CRITICAL", "DISABLED",
    ];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}
