//! Whole-file operations behind the `encfile` command
//!
//! Each function opens the encrypted file in the narrowest mode it needs,
//! reads the passphrase from the given reader, and closes the file again.

use std::io::{Read, Write};
use std::path::Path;

use crate::encfile::{self, EncryptedFile};
use crate::error::{EncFileError, ErrorCategory, ErrorKind, Result};
use crate::options::Options;
use crate::passphrase::PassphraseReader;
use crate::storage;

/// Sectors moved per chunk when streaming.
const CHUNK_SECTORS: usize = 16;

/// Summary printed by `encfile info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Size of the file on disk, header included.
    pub stored_bytes: u64,
    pub sector_size: usize,
    pub sectors: u64,
}

impl FileInfo {
    /// Plaintext capacity of the stored sectors.
    pub fn capacity(&self) -> u64 {
        self.sectors * self.sector_size as u64
    }
}

/// Create an empty encrypted file.
pub fn create_file(
    path: &Path,
    options: &Options,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let passphrase = passphrase_reader.read_passphrase()?;
    let mut file = EncryptedFile::create(path, &passphrase, options)?;
    file.close()
}

/// Copy everything from `input` into the file starting at `offset`.
///
/// Returns the number of bytes written. The file is synced before closing.
pub fn put(
    path: &Path,
    offset: u64,
    input: &mut dyn Read,
    options: &Options,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<u64> {
    let passphrase = passphrase_reader.read_passphrase()?;
    let mut file = EncryptedFile::open(path, &passphrase, options)?;

    let mut chunk = vec![0u8; file.sector_size() * CHUNK_SECTORS];
    let mut written = 0u64;
    loop {
        let n = storage::read_full(input, &mut chunk).map_err(|e| {
            EncFileError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to read input",
                e,
            )
        })?;
        if n == 0 {
            break;
        }
        file.write_at(&chunk[..n], offset + written)
            .map_err(|e| e.with_context(format!("failed to write at offset {}", offset + written)))?;
        written += n as u64;
    }

    file.sync()?;
    file.close()?;
    Ok(written)
}

/// Copy plaintext from `offset` to `output`.
///
/// With no `length`, copies up to the end of the last stored sector.
/// Returns the number of bytes copied.
pub fn get(
    path: &Path,
    offset: u64,
    length: Option<u64>,
    output: &mut dyn Write,
    options: &Options,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<u64> {
    let passphrase = passphrase_reader.read_passphrase()?;
    let mut file = EncryptedFile::open_view_only(path, &passphrase, options)?;

    let end = match length {
        Some(length) => offset.saturating_add(length),
        None => file.count_sectors()? * file.sector_size() as u64,
    };
    let mut chunk = vec![0u8; file.sector_size() * CHUNK_SECTORS];
    let mut pos = offset;
    while pos < end {
        let want = chunk_len(end - pos, chunk.len());
        let n = file.read_at(&mut chunk[..want], pos)?;
        output.write_all(&chunk[..n]).map_err(|e| {
            EncFileError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to write output",
                e,
            )
        })?;
        pos += n as u64;
    }

    file.close()?;
    Ok(pos.saturating_sub(offset))
}

/// Bytes to move next: `remaining`, capped at `chunk`.
fn chunk_len(remaining: u64, chunk: usize) -> usize {
    usize::try_from(remaining).map_or(chunk, |r| r.min(chunk))
}

/// Describe an encrypted file. Also proves the passphrase is right.
pub fn info(
    path: &Path,
    options: &Options,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<FileInfo> {
    let passphrase = passphrase_reader.read_passphrase()?;
    let mut file = EncryptedFile::open_view_only(path, &passphrase, options)?;
    let info = FileInfo {
        stored_bytes: file.stat()?.len(),
        sector_size: file.sector_size(),
        sectors: file.count_sectors()?,
    };
    file.close()?;
    Ok(info)
}

/// Re-wrap the file key under a new passphrase.
pub fn passwd(
    path: &Path,
    options: &Options,
    old_reader: &mut dyn PassphraseReader,
    new_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let old = old_reader.read_passphrase()?;
    let new = new_reader.read_passphrase()?;
    encfile::change_passphrase(path, &old, &new, options)
}

/// Wipe and remove an encrypted file.
pub fn shred(
    path: &Path,
    options: &Options,
    passphrase_reader: &mut dyn PassphraseReader,
) -> Result<()> {
    let passphrase = passphrase_reader.read_passphrase()?;
    let mut file = EncryptedFile::open(path, &passphrase, options)?;
    file.delete()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ScryptCost;
    use crate::passphrase::ConstantPassphraseReader;
    use tempfile::TempDir;

    fn test_options() -> Options {
        Options::default().with_cost(ScryptCost {
            log_n: 4,
            r: 8,
            p: 1,
        })
    }

    fn reader(passphrase: &[u8]) -> ConstantPassphraseReader {
        ConstantPassphraseReader::new(passphrase.to_vec())
    }

    #[test]
    fn test_put_get_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.enc");
        let options = test_options();

        create_file(&path, &options, &mut reader(b"pw")).unwrap();
        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let written = put(&path, 300, &mut &payload[..], &options, &mut reader(b"pw")).unwrap();
        assert_eq!(written, payload.len() as u64);

        let mut out = Vec::new();
        let copied = get(
            &path,
            300,
            Some(payload.len() as u64),
            &mut out,
            &options,
            &mut reader(b"pw"),
        )
        .unwrap();
        assert_eq!(copied, payload.len() as u64);
        assert_eq!(out, payload);
    }

    #[test]
    fn test_get_to_end_of_sectors() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.enc");
        let options = test_options();

        create_file(&path, &options, &mut reader(b"pw")).unwrap();
        put(&path, 0, &mut &b"short"[..], &options, &mut reader(b"pw")).unwrap();

        let mut out = Vec::new();
        get(&path, 0, None, &mut out, &options, &mut reader(b"pw")).unwrap();
        assert_eq!(out.len(), 512);
        assert_eq!(&out[..5], b"short");
    }

    #[test]
    fn test_chunk_len_caps_wide_remainders() {
        assert_eq!(chunk_len(10, 8192), 10);
        assert_eq!(chunk_len(8192, 8192), 8192);
        assert_eq!(chunk_len(u64::MAX, 8192), 8192);
        assert_eq!(chunk_len(u64::from(u32::MAX) + 7, 8192), 8192);
    }

    #[test]
    fn test_info() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.enc");
        let options = test_options();

        create_file(&path, &options, &mut reader(b"pw")).unwrap();
        put(&path, 1000, &mut &b"x"[..], &options, &mut reader(b"pw")).unwrap();

        let info = info(&path, &options, &mut reader(b"pw")).unwrap();
        assert_eq!(info.sectors, 2);
        assert_eq!(info.capacity(), 1024);
        assert_eq!(info.stored_bytes, 112 + 2 * (512 + 16));
    }

    #[test]
    fn test_passwd() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.enc");
        let options = test_options();

        create_file(&path, &options, &mut reader(b"old")).unwrap();
        passwd(&path, &options, &mut reader(b"old"), &mut reader(b"new")).unwrap();

        let err = info(&path, &options, &mut reader(b"old")).expect_err("old passphrase");
        assert_eq!(err.kind, Some(ErrorKind::AuthenticationFailed));
        assert!(info(&path, &options, &mut reader(b"new")).is_ok());
    }

    #[test]
    fn test_shred() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.enc");
        let options = test_options();

        create_file(&path, &options, &mut reader(b"pw")).unwrap();
        put(&path, 0, &mut &[1u8; 4096][..], &options, &mut reader(b"pw")).unwrap();
        shred(&path, &options, &mut reader(b"pw")).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_create_refuses_existing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data.enc");
        let options = test_options();

        create_file(&path, &options, &mut reader(b"pw")).unwrap();
        let err = create_file(&path, &options, &mut reader(b"pw")).expect_err("exists");
        assert_eq!(err.kind, Some(ErrorKind::AlreadyExists));
    }
}
