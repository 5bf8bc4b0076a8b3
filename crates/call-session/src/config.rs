//! Call session configuration.
//!
//! Configuration is loaded from environment variables. The encryption key
//! is redacted in Debug output.

use crate::session::EncryptionKey;
use crate::worker::{DEFAULT_MEDIA_THREAD_NAME, DEFAULT_NETWORK_THREAD_NAME};

use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default name of the thread that owns sessions in the binary.
pub const DEFAULT_OWNER_THREAD_NAME: &str = "call-control";

/// Default run time of the loopback call in the binary.
pub const DEFAULT_DEMO_DURATION_SECONDS: u64 = 5;

/// Minimum decoded key length in bytes.
pub const MIN_ENCRYPTION_KEY_BYTES: usize = 32;

/// Call session configuration.
#[derive(Clone)]
pub struct Config {
    /// Key material shared with the peer (base64-encoded).
    /// Protected by `SecretString` to prevent accidental logging.
    pub encryption_key: SecretString,

    /// Whether this side placed the call (default: true).
    pub is_outgoing: bool,

    /// Allow direct peer-to-peer transport (default: false).
    pub enable_p2p: bool,

    /// Name of the network worker thread (default: "call-network").
    pub network_thread_name: String,

    /// Name of the media worker thread (default: "call-media").
    pub media_thread_name: String,

    /// Name of the thread that owns the session (default: "call-control").
    pub owner_thread_name: String,

    /// How long the binary keeps the loopback call up (default: 5).
    pub demo_duration_seconds: u64,
}

/// Custom Debug implementation that redacts the key.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("encryption_key", &"[REDACTED]")
            .field("is_outgoing", &self.is_outgoing)
            .field("enable_p2p", &self.enable_p2p)
            .field("network_thread_name", &self.network_thread_name)
            .field("media_thread_name", &self.media_thread_name)
            .field("owner_thread_name", &self.owner_thread_name)
            .field("demo_duration_seconds", &self.demo_duration_seconds)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// cannot be parsed.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let encryption_key = SecretString::from(
            vars.get("CALL_ENCRYPTION_KEY")
                .ok_or_else(|| ConfigError::MissingEnvVar("CALL_ENCRYPTION_KEY".to_string()))?
                .clone(),
        );

        let is_outgoing = parse_or(vars, "CALL_IS_OUTGOING", true)?;
        let enable_p2p = parse_or(vars, "CALL_ENABLE_P2P", false)?;

        let network_thread_name = vars
            .get("CALL_NETWORK_THREAD_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_NETWORK_THREAD_NAME.to_string());

        let media_thread_name = vars
            .get("CALL_MEDIA_THREAD_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_MEDIA_THREAD_NAME.to_string());

        let owner_thread_name = vars
            .get("CALL_OWNER_THREAD_NAME")
            .cloned()
            .unwrap_or_else(|| DEFAULT_OWNER_THREAD_NAME.to_string());

        let demo_duration_seconds = parse_or(
            vars,
            "CALL_DEMO_DURATION_SECONDS",
            DEFAULT_DEMO_DURATION_SECONDS,
        )?;

        Ok(Config {
            encryption_key,
            is_outgoing,
            enable_p2p,
            network_thread_name,
            media_thread_name,
            owner_thread_name,
            demo_duration_seconds,
        })
    }

    /// Decode and validate the configured key.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if the key is not valid base64
    /// or decodes to fewer than 32 bytes.
    pub fn encryption_key(&self) -> Result<EncryptionKey, ConfigError> {
        let material = base64::engine::general_purpose::STANDARD
            .decode(self.encryption_key.expose_secret())
            .map_err(|e| {
                ConfigError::InvalidValue(format!("CALL_ENCRYPTION_KEY is not valid base64: {e}"))
            })?;

        if material.len() < MIN_ENCRYPTION_KEY_BYTES {
            return Err(ConfigError::InvalidValue(format!(
                "CALL_ENCRYPTION_KEY must decode to at least {MIN_ENCRYPTION_KEY_BYTES} bytes, got {}",
                material.len()
            )));
        }

        Ok(EncryptionKey::new(material, self.is_outgoing))
    }

    #[must_use]
    pub fn demo_duration(&self) -> Duration {
        Duration::from_secs(self.demo_duration_seconds)
    }
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
        None => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // base64("0123456789abcdef0123456789abcdef")
    const TEST_KEY_B64: &str = "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=";

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "CALL_ENCRYPTION_KEY".to_string(),
            TEST_KEY_B64.to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.encryption_key.expose_secret(), TEST_KEY_B64);
        assert!(config.is_outgoing);
        assert!(!config.enable_p2p);
        assert_eq!(config.network_thread_name, DEFAULT_NETWORK_THREAD_NAME);
        assert_eq!(config.media_thread_name, DEFAULT_MEDIA_THREAD_NAME);
        assert_eq!(config.owner_thread_name, DEFAULT_OWNER_THREAD_NAME);
        assert_eq!(config.demo_duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("CALL_IS_OUTGOING".to_string(), "false".to_string());
        vars.insert("CALL_ENABLE_P2P".to_string(), "true".to_string());
        vars.insert("CALL_NETWORK_THREAD_NAME".to_string(), "net".to_string());
        vars.insert("CALL_MEDIA_THREAD_NAME".to_string(), "av".to_string());
        vars.insert("CALL_OWNER_THREAD_NAME".to_string(), "ui".to_string());
        vars.insert("CALL_DEMO_DURATION_SECONDS".to_string(), "1".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert!(!config.is_outgoing);
        assert!(config.enable_p2p);
        assert_eq!(config.network_thread_name, "net");
        assert_eq!(config.media_thread_name, "av");
        assert_eq!(config.owner_thread_name, "ui");
        assert_eq!(config.demo_duration_seconds, 1);
    }

    #[test]
    fn test_from_vars_missing_encryption_key() {
        let result = Config::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "CALL_ENCRYPTION_KEY"));
    }

    #[test]
    fn test_from_vars_invalid_flag() {
        let mut vars = base_vars();
        vars.insert("CALL_ENABLE_P2P".to_string(), "yes".to_string());

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(v)) if v == "CALL_ENABLE_P2P=yes"));
    }

    #[test]
    fn test_encryption_key_decodes_with_role() {
        let mut vars = base_vars();
        vars.insert("CALL_IS_OUTGOING".to_string(), "false".to_string());
        let config = Config::from_vars(&vars).unwrap();

        let key = config.encryption_key().unwrap();
        assert_eq!(
            key.material().expose_secret().as_slice(),
            b"0123456789abcdef0123456789abcdef"
        );
        assert!(!key.is_outgoing());
    }

    #[test]
    fn test_encryption_key_rejects_bad_material() {
        let mut vars = base_vars();
        vars.insert("CALL_ENCRYPTION_KEY".to_string(), "not base64!".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert!(matches!(
            config.encryption_key(),
            Err(ConfigError::InvalidValue(msg)) if msg.contains("base64")
        ));

        // base64("short-key")
        vars.insert("CALL_ENCRYPTION_KEY".to_string(), "c2hvcnQta2V5".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert!(matches!(
            config.encryption_key(),
            Err(ConfigError::InvalidValue(msg)) if msg.contains("at least 32 bytes")
        ));
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let config = Config::from_vars(&base_vars()).unwrap();
        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("MDEyMzQ1"));
    }
}
