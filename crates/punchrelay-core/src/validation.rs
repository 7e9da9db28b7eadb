//! Validation of administrator-supplied device settings.

use std::net::IpAddr;

use crate::error::ValidationError;
use crate::types::{
    DeviceConfig, DEFAULT_DEVICE_PORT, DEFAULT_DEVICE_TIMEOUT_MS, DEFAULT_DEVICE_UDP_PORT,
};

/// Longest hostname accepted for the terminal address.
pub const MAX_HOST_LEN: usize = 253;

/// Validates a terminal address.
///
/// Accepts IPv4/IPv6 literals and plain hostnames.
pub fn validate_device_ip(ip: &str) -> Result<(), ValidationError> {
    let ip = ip.trim();
    if ip.is_empty() {
        return Err(ValidationError::required("ip"));
    }
    if ip.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    if ip.len() > MAX_HOST_LEN {
        return Err(ValidationError::TooLong {
            field: "ip".to_string(),
            max: MAX_HOST_LEN,
        });
    }

    let valid_host = ip.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });

    // Dotted all-numeric strings that failed IpAddr parsing are bad IPv4.
    let looks_numeric = ip.chars().all(|c| c.is_ascii_digit() || c == '.');

    if valid_host && !looks_numeric {
        Ok(())
    } else {
        Err(ValidationError::invalid("ip", format!("'{}' is not a valid address", ip)))
    }
}

/// Trims and validates a device config before it is persisted.
///
/// The IP is required. Zero ports or timeout fall back to the defaults.
pub fn normalize_device_config(mut config: DeviceConfig) -> Result<DeviceConfig, ValidationError> {
    let ip = config
        .ip
        .as_deref()
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .ok_or_else(|| ValidationError::required("ip"))?;
    validate_device_ip(ip)?;
    config.ip = Some(ip.to_string());

    if config.port == 0 {
        config.port = DEFAULT_DEVICE_PORT;
    }
    if config.udp_port == 0 {
        config.udp_port = DEFAULT_DEVICE_UDP_PORT;
    }
    if config.timeout_ms == 0 {
        config.timeout_ms = DEFAULT_DEVICE_TIMEOUT_MS;
    }

    Ok(config)
}
