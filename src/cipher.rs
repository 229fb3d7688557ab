//! Per-sector authenticated encryption using AES-256-GCM
//!
//! Each sector is sealed on its own, without associated data. The output is
//! the ciphertext followed by the 16-byte GCM tag. Decryption either returns
//! the full plaintext or fails; partial plaintext is never released.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::error::{EncFileError, ErrorCategory, Result};
use crate::options::NonceScheme;

/// Length of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Length of a GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Length of the GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;

/// Seal `plaintext` under `key` and `nonce`.
///
/// Returns `plaintext.len() + TAG_SIZE` bytes.
pub fn encrypt_sector(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(&(*key).into());
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| EncFileError::new(ErrorCategory::Internal, format!("encryption failed: {}", e)))
}

/// Open `ciphertext` (data followed by tag) under `key` and `nonce`.
pub fn decrypt_sector(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(&(*key).into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| EncFileError::authentication("corrupt, tampered-with or unwritten sector"))
}

/// Nonce used for sector `index` of a file with salt prefix `base`.
pub fn sector_nonce(scheme: NonceScheme, base: &[u8; NONCE_SIZE], index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = *base;
    if scheme == NonceScheme::PerSector {
        for (byte, idx) in nonce[NONCE_SIZE - 8..].iter_mut().zip(index.to_be_bytes()) {
            *byte ^= idx;
        }
    }
    nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_roundtrip() {
        let msg = b"Secret message129389898123";
        let mut key = [0u8; KEY_SIZE];
        key[..3].copy_from_slice(&[0xff, 0x01, 0x02]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce[..3].copy_from_slice(&[0x01, 0x01, 0xaa]);

        let sealed = encrypt_sector(&key, &nonce, msg).unwrap();
        assert_eq!(sealed.len(), msg.len() + TAG_SIZE);
        let opened = decrypt_sector(&key, &nonce, &sealed).unwrap();
        assert_eq!(&opened[..], msg);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [7u8; KEY_SIZE];
        let nonce = [9u8; NONCE_SIZE];
        let mut sealed = encrypt_sector(&key, &nonce, &[0u8; 64]).unwrap();
        sealed[10] ^= 0x01;

        let err = decrypt_sector(&key, &nonce, &sealed).expect_err("expected auth failure");
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = [7u8; KEY_SIZE];
        let nonce = [9u8; NONCE_SIZE];
        let sealed = encrypt_sector(&key, &nonce, &[1u8; 32]).unwrap();

        assert!(decrypt_sector(&key, &nonce, &sealed[..sealed.len() - 1]).is_err());
        assert!(decrypt_sector(&key, &nonce, &[]).is_err());
    }

    #[test]
    fn test_wrong_nonce_fails() {
        let key = [7u8; KEY_SIZE];
        let sealed = encrypt_sector(&key, &[1u8; NONCE_SIZE], b"data").unwrap();
        assert!(decrypt_sector(&key, &[2u8; NONCE_SIZE], &sealed).is_err());
    }

    #[test]
    fn test_zero_bytes_never_authenticate() {
        let key = [7u8; KEY_SIZE];
        let nonce = [9u8; NONCE_SIZE];
        assert!(decrypt_sector(&key, &nonce, &[0u8; 512 + TAG_SIZE]).is_err());
    }

    #[test]
    fn test_fixed_nonce_ignores_index() {
        let base = [0x5au8; NONCE_SIZE];
        assert_eq!(sector_nonce(NonceScheme::Fixed, &base, 0), base);
        assert_eq!(sector_nonce(NonceScheme::Fixed, &base, 1000), base);
    }

    #[test]
    fn test_per_sector_nonce_is_distinct() {
        let base = [0x5au8; NONCE_SIZE];
        let n0 = sector_nonce(NonceScheme::PerSector, &base, 0);
        let n1 = sector_nonce(NonceScheme::PerSector, &base, 1);
        let big = sector_nonce(NonceScheme::PerSector, &base, u64::MAX);

        assert_eq!(n0, base);
        assert_ne!(n0, n1);
        assert_ne!(n1, big);
        // The first four bytes never carry the index.
        assert_eq!(&big[..4], &base[..4]);
        assert_eq!(n1[NONCE_SIZE - 1], 0x5a ^ 0x01);
    }
}
