//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::{HarnessConfig, TlsMaterial};
use crate::config::validation::{validate, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
///
/// TLS files named in the `[tls]` section are read into the server config.
pub fn load_config(path: &Path) -> Result<HarnessConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut config: HarnessConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    if let Some(tls) = &config.tls {
        config.server.tls = Some(read_tls_material(
            Path::new(&tls.key_path),
            Path::new(&tls.cert_path),
        )?);
    }

    validate(&config.server).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Read a PEM key and certificate from disk.
pub fn read_tls_material(key_path: &Path, cert_path: &Path) -> Result<TlsMaterial, ConfigError> {
    let key = fs::read(key_path).map_err(ConfigError::Io)?;
    let cert = fs::read(cert_path).map_err(ConfigError::Io)?;
    Ok(TlsMaterial { key, cert })
}
