use crate::errors::{WalletError, WalletResult};
use crate::lockout::LockoutPolicy;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const KEY_PIN_LENGTH: &str = "PIN_LENGTH";
const KEY_LOCKOUT_SCHEDULE: &str = "LOCKOUT_SCHEDULE";
const KEY_VERIFY_MNEMONIC_CHECKSUM: &str = "VERIFY_MNEMONIC_CHECKSUM";

const DEFAULT_PIN_LENGTH: u32 = 4;
const DEFAULT_LOCKOUT_SCHEDULE: &str = "3:30,6:300,9:1800";
const MIN_PIN_LENGTH: u32 = 4;
const MAX_PIN_LENGTH: u32 = 12;

/// Environment types for different security configurations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

/// Security configuration manager
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    environment: Environment,
    config_map: HashMap<String, String>,
}

impl SecurityConfig {
    /// Create a new security configuration
    pub fn new(environment: Environment) -> Self {
        let mut config = SecurityConfig {
            environment,
            config_map: HashMap::new(),
        };

        config.load_defaults();
        config
    }

    /// Load configuration from environment variables
    pub fn from_env() -> WalletResult<Self> {
        let env_str =
            std::env::var("PINVAULT_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let environment = match env_str.to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" | "testing" => Environment::Test,
            _ => Environment::Development,
        };

        Self::from_environment(environment)
    }

    /// Construct a configuration for the provided environment and apply overrides.
    pub fn from_environment(environment: Environment) -> WalletResult<Self> {
        let mut config = Self::new(environment);
        assert!(
            !config.config_map.is_empty(),
            "default security configuration must not be empty"
        );

        config.load_from_env_vars()?;
        Ok(config)
    }

    /// Get a configuration value
    pub fn get(&self, key: &str) -> Option<&String> {
        self.config_map.get(key)
    }

    /// Get a required configuration value
    pub fn get_required(&self, key: &str) -> WalletResult<&String> {
        self.config_map.get(key).ok_or_else(|| {
            WalletError::ValidationError(format!("Required config key '{}' not found", key))
        })
    }

    /// Retrieve a boolean flag with a default fallback when the key is absent.
    pub fn get_bool_with_default(&self, key: &str, default: bool) -> WalletResult<bool> {
        assert!(!key.is_empty(), "configuration key must not be empty");
        match self.config_map.get(key) {
            Some(value) => parse_bool_flag(value, key),
            None => Ok(default),
        }
    }

    /// Retrieve an unsigned 32-bit value with a default fallback.
    pub fn get_u32_with_default(&self, key: &str, default: u32) -> WalletResult<u32> {
        assert!(!key.is_empty(), "configuration key must not be empty");
        match self.config_map.get(key) {
            Some(value) => parse_u32_value(value, key),
            None => Ok(default),
        }
    }

    /// Set a configuration value (for testing purposes)
    pub fn set(&mut self, key: String, value: String) {
        self.config_map.insert(key, value);
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Number of digits a PIN must have.
    pub fn pin_length(&self) -> WalletResult<usize> {
        let length = self.get_u32_with_default(KEY_PIN_LENGTH, DEFAULT_PIN_LENGTH)?;
        if !(MIN_PIN_LENGTH..=MAX_PIN_LENGTH).contains(&length) {
            return Err(WalletError::ValidationError(format!(
                "PIN length must be between {} and {} digits",
                MIN_PIN_LENGTH, MAX_PIN_LENGTH
            )));
        }
        Ok(length as usize)
    }

    /// Lockout schedule parsed from `threshold:seconds` pairs.
    pub fn lockout_policy(&self) -> WalletResult<LockoutPolicy> {
        let schedule = self
            .get(KEY_LOCKOUT_SCHEDULE)
            .map(String::as_str)
            .unwrap_or(DEFAULT_LOCKOUT_SCHEDULE);
        parse_lockout_schedule(schedule)
    }

    pub fn verify_mnemonic_checksum(&self) -> WalletResult<bool> {
        self.get_bool_with_default(KEY_VERIFY_MNEMONIC_CHECKSUM, false)
    }

    /// Validate that all required keys are present and parse.
    pub fn validate_required_configs(&self) -> WalletResult<()> {
        let required_keys = [
            KEY_PIN_LENGTH,
            KEY_LOCKOUT_SCHEDULE,
            KEY_VERIFY_MNEMONIC_CHECKSUM,
        ];

        for key in required_keys {
            if !self.config_map.contains_key(key) {
                return Err(WalletError::ValidationError(format!(
                    "Required configuration key '{}' is missing for {} environment",
                    key,
                    self.environment.as_str()
                )));
            }
        }

        self.pin_length()?;
        self.lockout_policy()?;
        self.verify_mnemonic_checksum()?;
        Ok(())
    }

    fn load_defaults(&mut self) {
        self.config_map
            .insert(KEY_PIN_LENGTH.to_string(), DEFAULT_PIN_LENGTH.to_string());
        self.config_map.insert(
            KEY_LOCKOUT_SCHEDULE.to_string(),
            DEFAULT_LOCKOUT_SCHEDULE.to_string(),
        );

        // Checksums are enforced only where real phrases are entered.
        let verify_checksum = match self.environment {
            Environment::Production => "true",
            Environment::Development | Environment::Test => "false",
        };
        self.config_map.insert(
            KEY_VERIFY_MNEMONIC_CHECKSUM.to_string(),
            verify_checksum.to_string(),
        );
    }

    fn load_from_env_vars(&mut self) -> WalletResult<()> {
        let env_mappings = [
            ("PINVAULT_PIN_LENGTH", KEY_PIN_LENGTH),
            ("PINVAULT_LOCKOUT_SCHEDULE", KEY_LOCKOUT_SCHEDULE),
            ("PINVAULT_VERIFY_MNEMONIC_CHECKSUM", KEY_VERIFY_MNEMONIC_CHECKSUM),
        ];

        for (env_var, config_key) in &env_mappings {
            if let Ok(value) = std::env::var(env_var) {
                if value.trim().is_empty() {
                    log::warn!("Environment variable {} is empty", env_var);
                    continue;
                }

                // No newlines or control characters
                if value.chars().any(|c| c.is_control()) {
                    log::warn!(
                        "Environment variable {} contains control characters, ignoring",
                        env_var
                    );
                    continue;
                }

                self.config_map.insert(config_key.to_string(), value);
                log::debug!(
                    "Loaded configuration {} from environment variable {}",
                    config_key,
                    env_var
                );
            }
        }

        Ok(())
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self::new(Environment::Development)
    }
}

/// Parse `3:30,6:300,9:1800` into a [`LockoutPolicy`].
pub fn parse_lockout_schedule(schedule: &str) -> WalletResult<LockoutPolicy> {
    let mut tiers = Vec::new();
    for entry in schedule.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((threshold, seconds)) = entry.split_once(':') else {
            return Err(WalletError::ValidationError(format!(
                "Lockout tier '{}' must be 'attempts:seconds'",
                entry
            )));
        };
        let threshold = parse_u32_value(threshold, KEY_LOCKOUT_SCHEDULE)?;
        let seconds = parse_u32_value(seconds, KEY_LOCKOUT_SCHEDULE)?;
        tiers.push((threshold, Duration::from_secs(u64::from(seconds))));
    }

    if tiers.is_empty() {
        return Err(WalletError::ValidationError(
            "Lockout schedule cannot be empty".to_string(),
        ));
    }
    LockoutPolicy::new(tiers)
}

fn parse_bool_flag(value: &str, key: &str) -> WalletResult<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(WalletError::ValidationError(format!(
            "Configuration key '{}' cannot be empty",
            key
        )));
    }

    match normalized.as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(WalletError::ValidationError(format!(
            "Invalid boolean value '{}' for key '{}'",
            value, key
        ))),
    }
}

fn parse_u32_value(value: &str, key: &str) -> WalletResult<u32> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WalletError::ValidationError(format!(
            "Configuration key '{}' cannot be empty",
            key
        )));
    }

    trimmed.parse::<u32>().map_err(|_| {
        WalletError::ValidationError(format!(
            "Invalid numeric value '{}' for key '{}'",
            value, key
        ))
    })
}

/// Global security configuration instance
static SECURITY_CONFIG: OnceCell<SecurityConfig> = OnceCell::new();

/// Initialize the process-wide configuration from `PINVAULT_*` variables.
/// Later calls return the first instance.
pub fn init_security_config_from_env() -> WalletResult<&'static SecurityConfig> {
    SECURITY_CONFIG.get_or_try_init(|| {
        let config = SecurityConfig::from_env()?;
        config.validate_required_configs()?;
        log::info!(
            "Security configuration initialized for {:?} environment",
            config.environment
        );
        Ok(config)
    })
}
