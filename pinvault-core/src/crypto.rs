//! Key stretching and envelope encryption for the recovery phrase.
//!
//! Keys are stretched with PBKDF2-HMAC-SHA256 and payloads sealed with
//! AES-256-GCM. Every failure to open an envelope collapses into
//! [`WalletError::AuthenticationFailed`] so callers cannot tell a wrong
//! secret from corrupted data.

use std::fmt;
use std::num::NonZeroU32;

use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::pbkdf2;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::errors::{WalletError, WalletResult};

pub const PBKDF2_ITERATIONS: u32 = 100_000;
pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = aead::NONCE_LEN;
pub const KEY_LEN: usize = 32;
const PIN_HASH_SEPARATOR: char = ':';

const ITERATIONS: NonZeroU32 = match NonZeroU32::new(PBKDF2_ITERATIONS) {
    Some(iterations) => iterations,
    None => panic!("PBKDF2 iteration count must be non-zero"),
};

/// 256-bit key stretched from a low-entropy secret.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl SymmetricKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

/// Sealed payload. Each field is hex-encoded on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub ciphertext: String,
    pub nonce: String,
    pub salt: String,
}

/// Derive a symmetric key from `secret` and `salt`. Deterministic for fixed inputs.
pub fn derive_key(secret: &SecretString, salt: &[u8]) -> WalletResult<SymmetricKey> {
    if salt.is_empty() {
        return Err(WalletError::ValidationError(
            "Key derivation salt cannot be empty".to_string(),
        ));
    }

    let mut key = SymmetricKey([0u8; KEY_LEN]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        ITERATIONS,
        salt,
        secret.expose_secret().as_bytes(),
        &mut key.0,
    );
    Ok(key)
}

/// Seal `plaintext` under a key stretched from `secret`, with a fresh salt and nonce.
pub fn encrypt(plaintext: &[u8], secret: &SecretString) -> WalletResult<EncryptedSecret> {
    let salt = random_bytes::<SALT_LEN>()?;
    let nonce_bytes = random_bytes::<NONCE_LEN>()?;

    let key = derive_key(secret, &salt)?;
    let sealing_key = less_safe_key(key.as_bytes())?;
    let ciphertext = seal_with(&sealing_key, nonce_bytes, plaintext)?;

    Ok(EncryptedSecret {
        ciphertext: hex::encode(ciphertext),
        nonce: hex::encode(nonce_bytes),
        salt: hex::encode(salt),
    })
}

/// Open an envelope produced by [`encrypt`].
pub fn decrypt(
    envelope: &EncryptedSecret,
    secret: &SecretString,
) -> WalletResult<Zeroizing<Vec<u8>>> {
    let ciphertext =
        hex::decode(&envelope.ciphertext).map_err(|_| WalletError::AuthenticationFailed)?;
    let nonce_bytes = decode_nonce(&envelope.nonce)?;
    let salt = hex::decode(&envelope.salt).map_err(|_| WalletError::AuthenticationFailed)?;
    if salt.is_empty() {
        return Err(WalletError::AuthenticationFailed);
    }

    let key = derive_key(secret, &salt)?;
    let opening_key = less_safe_key(key.as_bytes())?;
    open_with(&opening_key, nonce_bytes, &ciphertext)
}

/// [`derive_key`] on the blocking pool.
pub async fn derive_key_async(secret: SecretString, salt: Vec<u8>) -> WalletResult<SymmetricKey> {
    tokio::task::spawn_blocking(move || derive_key(&secret, &salt)).await?
}

/// [`encrypt`] on the blocking pool.
pub async fn encrypt_async(
    plaintext: Zeroizing<Vec<u8>>,
    secret: SecretString,
) -> WalletResult<EncryptedSecret> {
    tokio::task::spawn_blocking(move || encrypt(&plaintext, &secret)).await?
}

/// [`decrypt`] on the blocking pool.
pub async fn decrypt_async(
    envelope: EncryptedSecret,
    secret: SecretString,
) -> WalletResult<Zeroizing<Vec<u8>>> {
    tokio::task::spawn_blocking(move || decrypt(&envelope, &secret)).await?
}

/// Produce a salted PIN verification hash in `salt:hash` form (both hex).
pub fn hash_pin(pin: &SecretString) -> WalletResult<String> {
    let salt = random_bytes::<SALT_LEN>()?;
    let mut hash = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        ITERATIONS,
        &salt,
        pin.expose_secret().as_bytes(),
        &mut hash[..],
    );

    Ok(format!(
        "{}{}{}",
        hex::encode(salt),
        PIN_HASH_SEPARATOR,
        hex::encode(&hash[..])
    ))
}

/// Check `pin` against a stored `salt:hash`. Malformed hashes never verify.
pub fn verify_pin(pin: &SecretString, stored_hash: &str) -> bool {
    let Some((salt_hex, hash_hex)) = stored_hash.split_once(PIN_HASH_SEPARATOR) else {
        log::warn!("Stored PIN hash is missing its separator");
        return false;
    };

    let (salt, expected) = match (hex::decode(salt_hex), hex::decode(hash_hex)) {
        (Ok(salt), Ok(expected)) => (salt, expected),
        _ => {
            log::warn!("Stored PIN hash is not valid hex");
            return false;
        }
    };

    if salt.is_empty() || expected.len() != KEY_LEN {
        log::warn!("Stored PIN hash has an unexpected layout");
        return false;
    }

    pbkdf2::verify(
        pbkdf2::PBKDF2_HMAC_SHA256,
        ITERATIONS,
        &salt,
        pin.expose_secret().as_bytes(),
        &expected,
    )
    .is_ok()
}

/// [`verify_pin`] on the blocking pool.
pub async fn verify_pin_async(pin: SecretString, stored_hash: String) -> WalletResult<bool> {
    Ok(tokio::task::spawn_blocking(move || verify_pin(&pin, &stored_hash)).await?)
}

pub(crate) fn random_bytes<const N: usize>() -> WalletResult<[u8; N]> {
    let mut bytes = [0u8; N];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| WalletError::CryptoError("Failed to gather entropy".to_string()))?;
    Ok(bytes)
}

pub(crate) fn less_safe_key(key_bytes: &[u8]) -> WalletResult<LessSafeKey> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key_bytes)
        .map_err(|_| WalletError::CryptoError("Invalid encryption key".to_string()))?;
    Ok(LessSafeKey::new(unbound_key))
}

pub(crate) fn seal_with(
    key: &LessSafeKey,
    nonce_bytes: [u8; NONCE_LEN],
    plaintext: &[u8],
) -> WalletResult<Vec<u8>> {
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::CryptoError("Encryption failure".to_string()))?;
    Ok(in_out)
}

pub(crate) fn open_with(
    key: &LessSafeKey,
    nonce_bytes: [u8; NONCE_LEN],
    ciphertext: &[u8],
) -> WalletResult<Zeroizing<Vec<u8>>> {
    if ciphertext.len() < aead::AES_256_GCM.tag_len() {
        return Err(WalletError::AuthenticationFailed);
    }

    let nonce = Nonce::assume_unique_for_key(nonce_bytes);
    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = key
        .open_in_place(nonce, Aad::empty(), in_out.as_mut_slice())
        .map_err(|_| WalletError::AuthenticationFailed)?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

fn decode_nonce(encoded: &str) -> WalletResult<[u8; NONCE_LEN]> {
    let bytes = hex::decode(encoded).map_err(|_| WalletError::AuthenticationFailed)?;
    bytes
        .try_into()
        .map_err(|_| WalletError::AuthenticationFailed)
}
