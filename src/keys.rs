//! Key derivation, key wrapping and the on-disk header
//!
//! Every file carries a random 64-byte key that never touches the disk in
//! the clear. It is sealed ("wrapped") with AES-256-GCM under a key derived
//! from the passphrase with scrypt. The header layout is:
//! - salt: 32 bytes, also the source of every nonce in the file
//! - wrapped key: 64 + 16 bytes (sealed key plus GCM tag)
//!
//! There is no separate passphrase check. A wrong passphrase shows up as an
//! authentication failure while unwrapping.

use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use scrypt::{Params, scrypt};
use zeroize::Zeroizing;

use crate::cipher::{self, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{EncFileError, ErrorCategory, ErrorKind, Result};
use crate::options::ScryptCost;

/// Length of the raw file key in bytes
pub const RAW_KEY_SIZE: usize = 64;

/// Length of salt in bytes
pub const SALT_SIZE: usize = 32;

/// Length of the wrapped (sealed) file key in bytes
pub const WRAPPED_KEY_SIZE: usize = RAW_KEY_SIZE + TAG_SIZE;

/// Length of the header preceding sector 0
pub const HEADER_SIZE: usize = SALT_SIZE + WRAPPED_KEY_SIZE;

pub type RawKey = Zeroizing<[u8; RAW_KEY_SIZE]>;

/// Fill `buf` from the operating system's secure random source.
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng.try_fill_bytes(buf).map_err(|e| {
        EncFileError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "secure random source failed",
            e,
        )
    })
}

/// Derive the key that wraps the file key.
///
/// A passphrase of exactly [`RAW_KEY_SIZE`] bytes is taken to be a
/// machine-generated key and used as is.
pub fn derive_wrapping_key(
    passphrase: &[u8],
    salt: &[u8; SALT_SIZE],
    cost: &ScryptCost,
) -> Result<RawKey> {
    let mut key = Zeroizing::new([0u8; RAW_KEY_SIZE]);
    if passphrase.len() == RAW_KEY_SIZE {
        key.copy_from_slice(passphrase);
        return Ok(key);
    }

    let params = Params::new(cost.log_n, cost.r, cost.p, RAW_KEY_SIZE).map_err(|e| {
        EncFileError::with_kind(
            ErrorCategory::User,
            ErrorKind::KeyDerivation,
            format!("invalid scrypt parameters: {}", e),
        )
    })?;
    scrypt(passphrase, salt, &params, &mut key[..]).map_err(|e| {
        EncFileError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::KeyDerivation,
            format!("scrypt key derivation failed: {}", e),
        )
    })?;
    Ok(key)
}

/// Seal `real_key` under the first half of `wrapping_key`.
pub fn wrap(
    wrapping_key: &[u8; RAW_KEY_SIZE],
    salt: &[u8; SALT_SIZE],
    real_key: &[u8; RAW_KEY_SIZE],
) -> Result<[u8; WRAPPED_KEY_SIZE]> {
    let sealed = cipher::encrypt_sector(&lower_half(wrapping_key), &nonce_base(salt), real_key)?;
    let mut wrapped = [0u8; WRAPPED_KEY_SIZE];
    if sealed.len() != WRAPPED_KEY_SIZE {
        return Err(EncFileError::new(
            ErrorCategory::Internal,
            format!("wrapped key has unexpected length {}", sealed.len()),
        ));
    }
    wrapped.copy_from_slice(&sealed);
    Ok(wrapped)
}

/// Open a wrapped key. Fails with `AuthenticationFailed` on a wrong
/// passphrase or a damaged header.
pub fn unwrap(
    wrapping_key: &[u8; RAW_KEY_SIZE],
    salt: &[u8; SALT_SIZE],
    wrapped: &[u8; WRAPPED_KEY_SIZE],
) -> Result<RawKey> {
    let opened = Zeroizing::new(
        cipher::decrypt_sector(&lower_half(wrapping_key), &nonce_base(salt), wrapped)
            .map_err(|_| EncFileError::authentication("wrong passphrase or corrupt header"))?,
    );
    if opened.len() != RAW_KEY_SIZE {
        return Err(EncFileError::authentication("wrong passphrase or corrupt header"));
    }
    let mut real_key = Zeroizing::new([0u8; RAW_KEY_SIZE]);
    real_key.copy_from_slice(&opened);
    Ok(real_key)
}

/// The nonce prefix taken from a salt.
pub fn nonce_base(salt: &[u8; SALT_SIZE]) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&salt[..NONCE_SIZE]);
    nonce
}

fn lower_half(key: &[u8; RAW_KEY_SIZE]) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut half = Zeroizing::new([0u8; KEY_SIZE]);
    half.copy_from_slice(&key[..KEY_SIZE]);
    half
}

fn upper_half(key: &[u8; RAW_KEY_SIZE]) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut half = Zeroizing::new([0u8; KEY_SIZE]);
    half.copy_from_slice(&key[KEY_SIZE..]);
    half
}

/// The persisted header: salt followed by the wrapped key.
#[derive(Clone, PartialEq, Eq)]
pub struct Header {
    pub salt: [u8; SALT_SIZE],
    pub wrapped_key: [u8; WRAPPED_KEY_SIZE],
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..SALT_SIZE].copy_from_slice(&self.salt);
        out[SALT_SIZE..].copy_from_slice(&self.wrapped_key);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(EncFileError::with_kind(
                ErrorCategory::User,
                ErrorKind::TruncatedInput,
                format!(
                    "header truncated: {} bytes, expected {}",
                    bytes.len(),
                    HEADER_SIZE
                ),
            ));
        }
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[..SALT_SIZE]);
        let mut wrapped_key = [0u8; WRAPPED_KEY_SIZE];
        wrapped_key.copy_from_slice(&bytes[SALT_SIZE..HEADER_SIZE]);
        Ok(Self { salt, wrapped_key })
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("salt", &self.salt)
            .field("wrapped_key", &"[..]")
            .finish()
    }
}

/// Header plus the unwrapped file key of an open file.
pub struct KeyMaterial {
    header: Header,
    real_key: RawKey,
    sector_key: Zeroizing<[u8; KEY_SIZE]>,
}

impl KeyMaterial {
    /// Fresh salt and fresh file key, wrapped under `passphrase`.
    pub fn generate(passphrase: &[u8], cost: &ScryptCost) -> Result<Self> {
        let mut salt = [0u8; SALT_SIZE];
        fill_random(&mut salt)?;
        let mut real_key = Zeroizing::new([0u8; RAW_KEY_SIZE]);
        fill_random(&mut real_key[..])?;
        Self::from_parts(salt, real_key, passphrase, cost)
    }

    /// Build key material from a caller-chosen salt and file key.
    ///
    /// This is meant for reproducible test output. Real files should always
    /// go through [`KeyMaterial::generate`].
    pub fn from_parts(
        salt: [u8; SALT_SIZE],
        real_key: RawKey,
        passphrase: &[u8],
        cost: &ScryptCost,
    ) -> Result<Self> {
        let wrapping_key = derive_wrapping_key(passphrase, &salt, cost)?;
        let wrapped_key = wrap(&wrapping_key, &salt, &real_key)?;
        let sector_key = upper_half(&real_key);
        Ok(Self {
            header: Header { salt, wrapped_key },
            real_key,
            sector_key,
        })
    }

    /// Unwrap the file key stored in `header`.
    pub fn unlock(header: Header, passphrase: &[u8], cost: &ScryptCost) -> Result<Self> {
        let wrapping_key = derive_wrapping_key(passphrase, &header.salt, cost)?;
        let real_key = unwrap(&wrapping_key, &header.salt, &header.wrapped_key)?;
        let sector_key = upper_half(&real_key);
        Ok(Self {
            header,
            real_key,
            sector_key,
        })
    }

    /// Re-wrap the same file key under a new passphrase. The salt is kept.
    pub fn rewrap(&mut self, new_passphrase: &[u8], cost: &ScryptCost) -> Result<()> {
        let wrapping_key = derive_wrapping_key(new_passphrase, &self.header.salt, cost)?;
        self.header.wrapped_key = wrap(&wrapping_key, &self.header.salt, &self.real_key)?;
        Ok(())
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Key used for sector encryption (second half of the file key).
    pub fn sector_key(&self) -> &[u8; KEY_SIZE] {
        &self.sector_key
    }

    pub fn nonce_base(&self) -> [u8; NONCE_SIZE] {
        nonce_base(&self.header.salt)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("header", &self.header)
            .field("real_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_cost() -> ScryptCost {
        ScryptCost {
            log_n: 4,
            r: 8,
            p: 1,
        }
    }

    #[test]
    fn test_sizes() {
        assert_eq!(WRAPPED_KEY_SIZE, 80);
        assert_eq!(HEADER_SIZE, 112);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let salt = [1u8; SALT_SIZE];
        let k1 = derive_wrapping_key(b"passphrase", &salt, &fast_cost()).unwrap();
        let k2 = derive_wrapping_key(b"passphrase", &salt, &fast_cost()).unwrap();
        let k3 = derive_wrapping_key(b"passphrase", &[2u8; SALT_SIZE], &fast_cost()).unwrap();
        assert_eq!(*k1, *k2);
        assert_ne!(*k1, *k3);
    }

    #[test]
    fn test_raw_key_passphrase_used_directly() {
        let raw = [0xabu8; RAW_KEY_SIZE];
        let key = derive_wrapping_key(&raw, &[1u8; SALT_SIZE], &fast_cost()).unwrap();
        assert_eq!(*key, raw);
    }

    #[test]
    fn test_invalid_cost_rejected() {
        let cost = ScryptCost {
            log_n: 64,
            r: 8,
            p: 1,
        };
        let err = derive_wrapping_key(b"pw", &[0u8; SALT_SIZE], &cost)
            .expect_err("expected derivation failure");
        assert_eq!(err.kind, Some(ErrorKind::KeyDerivation));
    }

    #[test]
    fn test_wrap_unwrap() {
        let salt = [3u8; SALT_SIZE];
        let wrapping = derive_wrapping_key(b"right", &salt, &fast_cost()).unwrap();
        let real = [0x42u8; RAW_KEY_SIZE];
        let wrapped = wrap(&wrapping, &salt, &real).unwrap();
        assert_eq!(*unwrap(&wrapping, &salt, &wrapped).unwrap(), real);

        let wrong = derive_wrapping_key(b"wrong", &salt, &fast_cost()).unwrap();
        let err = unwrap(&wrong, &salt, &wrapped).expect_err("expected auth failure");
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn test_header_codec() {
        let material = KeyMaterial::generate(b"pw", &fast_cost()).unwrap();
        let encoded = material.header().encode();
        assert_eq!(Header::decode(&encoded).unwrap(), *material.header());

        let err = Header::decode(&encoded[..HEADER_SIZE - 1]).expect_err("expected truncation");
        assert_eq!(err.kind, Some(ErrorKind::TruncatedInput));
    }

    #[test]
    fn test_unlock_and_rewrap() {
        let mut material = KeyMaterial::generate(b"old", &fast_cost()).unwrap();
        let sector_key = *material.sector_key();

        material.rewrap(b"new", &fast_cost()).unwrap();
        let header = material.header().clone();

        let reopened = KeyMaterial::unlock(header.clone(), b"new", &fast_cost()).unwrap();
        assert_eq!(*reopened.sector_key(), sector_key);
        assert_eq!(reopened.header().salt, material.header().salt);

        let err = KeyMaterial::unlock(header, b"old", &fast_cost()).expect_err("old passphrase");
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn test_debug_redacts_key() {
        let material = KeyMaterial::generate(b"pw", &fast_cost()).unwrap();
        let rendered = format!("{:?}", material);
        assert!(rendered.contains("[REDACTED]"));
    }
}
