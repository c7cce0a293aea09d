use crate::errors::{WalletError, WalletResult};
use bip39::{Language, Mnemonic};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};

/// Word counts a recovery phrase may have.
pub const MNEMONIC_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];
pub const DEFAULT_PIN_LENGTH: usize = 4;

/// Input validation for wallet setup and unlock
#[derive(Debug, Clone)]
pub struct InputValidator {
    address_pattern: Regex,
    pin_length: usize,
}

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        Self::with_pin_length(DEFAULT_PIN_LENGTH)
    }

    pub fn with_pin_length(pin_length: usize) -> WalletResult<Self> {
        if pin_length == 0 {
            return Err(WalletError::ValidationError(
                "PIN length must be positive".to_string(),
            ));
        }

        let address_pattern = Regex::new(r"^0x[a-fA-F0-9]{40}$")
            .map_err(|e| WalletError::ValidationError(format!("Invalid address regex: {}", e)))?;

        Ok(InputValidator {
            address_pattern,
            pin_length,
        })
    }

    pub fn pin_length(&self) -> usize {
        self.pin_length
    }

    /// A PIN is exactly `pin_length` ASCII digits.
    pub fn validate_pin(&self, pin: &SecretString) -> WalletResult<()> {
        let pin = pin.expose_secret();
        if pin.len() != self.pin_length || !pin.bytes().all(|b| b.is_ascii_digit()) {
            return Err(WalletError::ValidationError(format!(
                "PIN must be exactly {} digits",
                self.pin_length
            )));
        }
        Ok(())
    }

    /// Validate a PIN together with its confirmation entry.
    pub fn validate_new_pin(&self, pin: &SecretString, confirm: &SecretString) -> WalletResult<()> {
        self.validate_pin(pin)?;
        if pin.expose_secret() != confirm.expose_secret() {
            return Err(WalletError::ValidationError(
                "PIN entries do not match".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate an account address
    pub fn validate_address(&self, address: &str) -> WalletResult<()> {
        if address.is_empty() {
            return Err(WalletError::ValidationError(
                "Address cannot be empty".to_string(),
            ));
        }

        if !self.address_pattern.is_match(address) {
            return Err(WalletError::ValidationError(
                "Address format is invalid".to_string(),
            ));
        }

        Ok(())
    }

    /// Check the word count of a recovery phrase.
    pub fn validate_mnemonic(&self, mnemonic: &SecretString) -> WalletResult<()> {
        let words = mnemonic.expose_secret().split_whitespace().count();
        if !MNEMONIC_WORD_COUNTS.contains(&words) {
            return Err(WalletError::ValidationError(format!(
                "Recovery phrase must have 12, 15, 18, 21 or 24 words, found {}",
                words
            )));
        }
        Ok(())
    }

    /// Check the phrase against the BIP-39 English wordlist and its checksum.
    pub fn validate_mnemonic_checksum(&self, mnemonic: &SecretString) -> WalletResult<()> {
        self.validate_mnemonic(mnemonic)?;
        Mnemonic::parse_in_normalized(Language::English, mnemonic.expose_secret())
            .map(|_| ())
            .map_err(|_| {
                WalletError::ValidationError("Recovery phrase failed checksum validation".to_string())
            })
    }
}
