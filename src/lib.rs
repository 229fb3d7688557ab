//! encfile - passphrase-protected, randomly addressable encrypted files
//!
//! A file is split into fixed-size sectors, each sealed with AES-256-GCM
//! under a random file key. The file key is stored wrapped under a key
//! derived from the passphrase with scrypt, so the passphrase can change
//! without touching the sectors.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod commands;
pub mod encfile;
pub mod error;
pub mod keys;
pub mod options;
pub mod passphrase;
pub mod shared;
pub mod storage;

pub use crate::encfile::{EncryptedFile, OpenMode};
pub use crate::error::{EncFileError, ErrorCategory, ErrorKind, Result};
pub use crate::options::{NonceScheme, Options, ScryptCost};
pub use crate::shared::SharedFile;
pub use crate::storage::Storage;
