//! Per-handle configuration
//!
//! Sector geometry, scrypt work factor and nonce selection are not stored in
//! the file header. A file must be reopened with the same `Options` it was
//! created with.

use crate::error::{EncFileError, ErrorCategory, ErrorKind, Result};

/// Cipher block size; every sector size must be a multiple of it.
pub const BLOCK_SIZE: usize = 16;

/// Sector size used when none is configured.
pub const DEFAULT_SECTOR_SIZE: usize = 512;

/// scrypt log2(N) parameter (CPU/memory cost), N = 16384
const SCRYPT_LOG_N: u8 = 14;

/// scrypt r parameter (block size)
const SCRYPT_R: u32 = 8;

/// scrypt p parameter (parallelization)
const SCRYPT_P: u32 = 1;

/// scrypt cost parameters for deriving the wrapping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScryptCost {
    pub log_n: u8,
    pub r: u32,
    pub p: u32,
}

impl Default for ScryptCost {
    fn default() -> Self {
        Self {
            log_n: SCRYPT_LOG_N,
            r: SCRYPT_R,
            p: SCRYPT_P,
        }
    }
}

/// How the AEAD nonce for a sector is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NonceScheme {
    /// The salt prefix is the nonce for every sector. This is the file
    /// format's native layout; it repeats a nonce under one key.
    #[default]
    Fixed,
    /// The sector index is mixed into the salt prefix, giving every sector
    /// index its own nonce. Rewrites of the same sector still reuse that
    /// sector's nonce. Files written this way can only be read with it.
    PerSector,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub sector_size: usize,
    pub cost: ScryptCost,
    pub nonce_scheme: NonceScheme,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            sector_size: DEFAULT_SECTOR_SIZE,
            cost: ScryptCost::default(),
            nonce_scheme: NonceScheme::default(),
        }
    }
}

impl Options {
    pub fn with_sector_size(mut self, sector_size: usize) -> Self {
        self.sector_size = sector_size;
        self
    }

    pub fn with_cost(mut self, cost: ScryptCost) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_nonce_scheme(mut self, nonce_scheme: NonceScheme) -> Self {
        self.nonce_scheme = nonce_scheme;
        self
    }

    /// Checks that the sector size is a nonzero multiple of [`BLOCK_SIZE`].
    pub fn validate(&self) -> Result<()> {
        if self.sector_size == 0 || self.sector_size % BLOCK_SIZE != 0 {
            return Err(EncFileError::with_kind(
                ErrorCategory::User,
                ErrorKind::Validation,
                format!(
                    "sector size {} is not a nonzero multiple of the block size {}",
                    self.sector_size, BLOCK_SIZE
                ),
            ));
        }
        Ok(())
    }
}
