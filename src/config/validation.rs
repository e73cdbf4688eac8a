//! Configuration validation.
//!
//! Serde handles the syntax; this module checks value ranges. All problems
//! are reported together rather than stopping at the first one.

use std::fmt;

use crate::config::schema::{ServerConfig, TransportMode};

/// A single semantic problem in a [`ServerConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Throttle rate must be a positive number of bytes per second.
    ZeroRate,
    /// Bind host is empty.
    EmptyHost,
    /// Plain mode needs a positive idle keep-alive timeout.
    ZeroKeepAlive,
    /// TLS material was supplied but one half is empty.
    EmptyTlsMaterial,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ZeroRate => write!(f, "rate must be greater than 0 bytes/sec"),
            ValidationError::EmptyHost => write!(f, "host must not be empty"),
            ValidationError::ZeroKeepAlive => {
                write!(f, "keep_alive_ms must be greater than 0 in plain mode")
            }
            ValidationError::EmptyTlsMaterial => write!(f, "TLS key and certificate must not be empty"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check `config` and return every problem found.
pub fn validate(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.rate == Some(0) {
        errors.push(ValidationError::ZeroRate);
    }

    if config.host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost);
    }

    if config.mode == TransportMode::Plain && config.keep_alive_ms == 0 {
        errors.push(ValidationError::ZeroKeepAlive);
    }

    if let Some(material) = &config.tls {
        if material.key.is_empty() || material.cert.is_empty() {
            errors.push(ValidationError::EmptyTlsMaterial);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TlsMaterial;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(validate(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn reports_all_errors() {
        let mut config = ServerConfig::default().rate(0).host("  ");
        config.keep_alive_ms = 0;

        let errors = validate(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::ZeroRate,
                ValidationError::EmptyHost,
                ValidationError::ZeroKeepAlive,
            ]
        );
    }

    #[test]
    fn keep_alive_is_ignored_in_secure_mode() {
        let mut config = ServerConfig::default().secure(None);
        config.keep_alive_ms = 0;
        assert_eq!(validate(&config), Ok(()));
    }

    #[test]
    fn rejects_half_empty_tls_material() {
        let config = ServerConfig::default().secure(Some(TlsMaterial::new(Vec::new(), "cert")));
        assert_eq!(validate(&config), Err(vec![ValidationError::EmptyTlsMaterial]));
    }
}
