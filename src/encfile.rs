//! Encrypted, randomly addressable paged files
//!
//! A file is a header followed by fixed-size sectors:
//! - header: salt (32 bytes) and wrapped file key (80 bytes)
//! - sector `i`: `sector_size + 16` bytes of AES-256-GCM output at
//!   `HEADER_SIZE + i * (sector_size + 16)`
//!
//! Sectors are the unit of encryption. Byte-granular access (`read_at`,
//! `write_at` and the cursor operations) is layered on top: a write that
//! covers a whole sector at a sector boundary is sealed directly, anything
//! smaller decrypts the sector first and writes the merged plaintext back.
//!
//! Sectors below the highest written one that were never written ("holes")
//! read back as zero bytes from the store, which never authenticate. A hole
//! is therefore indistinguishable from a damaged sector.
//!
//! Every operation seeks the store and then reads or writes at its single
//! position. A handle must not be used from more than one place at a time;
//! see [`crate::shared::SharedFile`] for a locking wrapper.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};
use zeroize::Zeroizing;

use crate::cipher::{self, TAG_SIZE};
use crate::error::{EncFileError, ErrorCategory, ErrorKind, Result};
use crate::keys::{self, HEADER_SIZE, Header, KeyMaterial};
use crate::options::Options;
use crate::storage::{self, Storage};

/// How an existing or new file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Make a new file; fails if the path exists.
    Create,
    /// Read and write an existing file.
    ReadWrite,
    /// Write-only, every write lands at the end of the store.
    Append,
    /// Read-only.
    ViewOnly,
}

impl OpenMode {
    fn must_exist(self) -> bool {
        self != OpenMode::Create
    }

    /// Whether writes land where the handle seeks. Append writes go to the
    /// end of the store and view-only handles cannot write at all.
    fn writes_in_place(self) -> bool {
        matches!(self, OpenMode::Create | OpenMode::ReadWrite)
    }

    fn open_options(self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        match self {
            OpenMode::Create => {
                opts.read(true).write(true).create_new(true);
                #[cfg(unix)]
                {
                    use std::os::unix::fs::OpenOptionsExt;
                    opts.mode(0o600);
                }
            }
            OpenMode::ReadWrite => {
                opts.read(true).write(true);
            }
            OpenMode::Append => {
                opts.append(true);
            }
            OpenMode::ViewOnly => {
                opts.read(true);
            }
        }
        opts
    }
}

/// Returns true if something exists at `path`.
pub fn exists(path: impl AsRef<Path>) -> bool {
    fs::metadata(path).is_ok()
}

/// Change the passphrase of the file at `path` from `old` to `new`.
pub fn change_passphrase(
    path: impl AsRef<Path>,
    old: &[u8],
    new: &[u8],
    options: &Options,
) -> Result<()> {
    let mut file = EncryptedFile::open(path, old, options)?;
    file.change_passphrase(new)?;
    file.close()
}

/// Handle on one open encrypted file.
pub struct EncryptedFile<S: Storage = File> {
    storage: Option<S>,
    path: Option<PathBuf>,
    mode: OpenMode,
    keys: KeyMaterial,
    options: Options,
    cursor: Option<u64>,
}

impl<S: Storage> fmt::Debug for EncryptedFile<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedFile")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("options", &self.options)
            .field("cursor", &self.cursor)
            .field("closed", &self.storage.is_none())
            .field("keys", &self.keys)
            .finish()
    }
}

impl EncryptedFile<File> {
    /// Create a new encrypted file. Fails with `AlreadyExists` if `path` exists.
    pub fn create(path: impl AsRef<Path>, passphrase: &[u8], options: &Options) -> Result<Self> {
        Self::open_with_mode(path, passphrase, options, OpenMode::Create)
    }

    /// Open an existing file for reading and writing.
    pub fn open(path: impl AsRef<Path>, passphrase: &[u8], options: &Options) -> Result<Self> {
        Self::open_with_mode(path, passphrase, options, OpenMode::ReadWrite)
    }

    /// Open an existing file write-only in append mode.
    pub fn open_append(
        path: impl AsRef<Path>,
        passphrase: &[u8],
        options: &Options,
    ) -> Result<Self> {
        Self::open_with_mode(path, passphrase, options, OpenMode::Append)
    }

    /// Open an existing file read-only.
    pub fn open_view_only(
        path: impl AsRef<Path>,
        passphrase: &[u8],
        options: &Options,
    ) -> Result<Self> {
        Self::open_with_mode(path, passphrase, options, OpenMode::ViewOnly)
    }

    /// Create or open `path` in the given mode.
    pub fn open_with_mode(
        path: impl AsRef<Path>,
        passphrase: &[u8],
        options: &Options,
        mode: OpenMode,
    ) -> Result<Self> {
        let path = path.as_ref();
        options.validate()?;

        let present = exists(path);
        if mode.must_exist() && !present {
            return Err(EncFileError::with_kind(
                ErrorCategory::User,
                ErrorKind::NotFound,
                format!("{} does not exist", path.display()),
            ));
        }
        if !mode.must_exist() && present {
            return Err(EncFileError::with_kind(
                ErrorCategory::User,
                ErrorKind::AlreadyExists,
                format!("{} already exists", path.display()),
            ));
        }

        let keys = if mode == OpenMode::Create {
            KeyMaterial::generate(passphrase, &options.cost)?
        } else {
            let header = read_header_at(path)?;
            KeyMaterial::unlock(header, passphrase, &options.cost)
                .map_err(|e| e.with_context(format!("failed to unlock {}", path.display())))?
        };

        let file = mode
            .open_options()
            .open(path)
            .map_err(|e| open_error(path, e))?;
        let mut ef = Self {
            storage: Some(file),
            path: Some(path.to_path_buf()),
            mode,
            keys,
            options: options.clone(),
            cursor: None,
        };
        if mode == OpenMode::Create {
            ef.write_header()?;
            ef.sync()?;
        }
        debug!(
            path = %path.display(),
            ?mode,
            sector_size = options.sector_size,
            "opened encrypted file"
        );
        Ok(ef)
    }

    /// Metadata of the underlying file.
    pub fn stat(&self) -> Result<fs::Metadata> {
        let file = self.storage.as_ref().ok_or_else(EncFileError::closed)?;
        file.metadata()
            .map_err(|e| EncFileError::io("failed to stat encrypted file", e))
    }
}

impl<S: Storage> EncryptedFile<S> {
    /// Start a new encrypted file in an empty store.
    pub fn create_in(storage: S, passphrase: &[u8], options: &Options) -> Result<Self> {
        options.validate()?;
        let keys = KeyMaterial::generate(passphrase, &options.cost)?;
        let mut ef = Self {
            storage: Some(storage),
            path: None,
            mode: OpenMode::ReadWrite,
            keys,
            options: options.clone(),
            cursor: None,
        };
        ef.write_header()?;
        ef.sync()?;
        Ok(ef)
    }

    /// Open an encrypted file held in `storage`.
    pub fn open_in(mut storage: S, passphrase: &[u8], options: &Options) -> Result<Self> {
        options.validate()?;
        seek_to(&mut storage, 0)?;
        let header = read_header(&mut storage)?;
        let keys = KeyMaterial::unlock(header, passphrase, &options.cost)?;
        Ok(Self {
            storage: Some(storage),
            path: None,
            mode: OpenMode::ReadWrite,
            keys,
            options: options.clone(),
            cursor: None,
        })
    }

    pub fn sector_size(&self) -> usize {
        self.options.sector_size
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.storage.is_none()
    }

    /// Release the handle and hand back the store.
    pub fn into_storage(mut self) -> Result<S> {
        self.storage.take().ok_or_else(EncFileError::closed)
    }

    /// Re-wrap the file key under `new_passphrase` and rewrite the header.
    ///
    /// The handle is already unlocked, so the current passphrase has been
    /// verified. Sector data is untouched.
    pub fn change_passphrase(&mut self, new_passphrase: &[u8]) -> Result<()> {
        self.store()?;
        self.require_in_place("change the passphrase")?;
        self.keys.rewrap(new_passphrase, &self.options.cost)?;
        self.write_header()?;
        self.sync()?;
        debug!("passphrase changed");
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.store()?
            .sync()
            .map_err(|e| EncFileError::io("failed to sync encrypted file", e))
    }

    /// Close the handle. Every later call fails with `InvalidState`.
    pub fn close(&mut self) -> Result<()> {
        let mut store = self.storage.take().ok_or_else(EncFileError::closed)?;
        store
            .flush()
            .map_err(|e| EncFileError::io("failed to flush encrypted file", e))
    }

    /// Read and decrypt one sector.
    pub fn read_sector(&mut self, index: u64) -> Result<Vec<u8>> {
        self.cursor = None;
        self.load_sector(index).map(|plain| plain.to_vec())
    }

    /// Encrypt and write one sector. `data` must be exactly one sector long.
    pub fn write_sector(&mut self, index: u64, data: &[u8]) -> Result<()> {
        self.cursor = None;
        self.store_sector(index, data)
    }

    /// Like [`write_sector`](Self::write_sector), followed by a sync.
    pub fn write_sector_sync(&mut self, index: u64, data: &[u8]) -> Result<()> {
        self.write_sector(index, data)?;
        self.sync()
    }

    /// Write `data` cut or zero-padded to one sector.
    pub fn write_sector_padded(&mut self, index: u64, data: &[u8]) -> Result<()> {
        let padded = self.pad_sector(data);
        self.write_sector(index, &padded)
    }

    /// Cut or zero-extend `data` to exactly one sector.
    pub fn pad_sector(&self, data: &[u8]) -> Vec<u8> {
        let mut padded = vec![0u8; self.sector_size()];
        let n = data.len().min(padded.len());
        padded[..n].copy_from_slice(&data[..n]);
        padded
    }

    /// Number of whole sectors physically present.
    pub fn count_sectors(&mut self) -> Result<u64> {
        let span = self.sector_span() as u64;
        let size = self
            .store()?
            .size()
            .map_err(|e| EncFileError::io("failed to stat encrypted file", e))?;
        Ok(size.saturating_sub(HEADER_SIZE as u64) / span)
    }

    /// Overwrite a sector with random bytes. It will never authenticate again.
    ///
    /// Needs a handle whose writes land in place; append and view-only
    /// handles fail with `InvalidState`.
    pub fn zero_sector(&mut self, index: u64) -> Result<()> {
        self.cursor = None;
        self.require_in_place("wipe a sector")?;
        let mut noise = vec![0u8; self.sector_span()];
        keys::fill_random(&mut noise)?;
        let pos = self.sector_offset(index)?;
        let store = self.store()?;
        seek_to(store, pos)?;
        store
            .write_all(&noise)
            .map_err(|e| EncFileError::io(format!("failed to wipe sector {}", index), e))
    }

    /// Wipe every sector and the header, then remove the file.
    ///
    /// Sectors `0..=count_sectors()` are overwritten with random bytes. A
    /// failure at the last index (one past the stored sectors) is ignored;
    /// every other failure, including the final removal, is returned. The
    /// handle is closed afterwards. Handles not backed by a path are wiped
    /// and truncated but there is nothing to remove. Append and view-only
    /// handles fail with `InvalidState` before touching anything.
    pub fn delete(&mut self) -> Result<()> {
        self.require_in_place("delete the file")?;
        let total = self.count_sectors()?;
        for index in 0..=total {
            if let Err(e) = self.zero_sector(index) {
                if index != total {
                    return Err(e.with_context("failed to wipe encrypted file"));
                }
                warn!(index, error = %e, "ignoring wipe failure past the last sector");
            }
        }

        let mut noise = [0u8; HEADER_SIZE];
        keys::fill_random(&mut noise)?;
        let store = self.store()?;
        seek_to(store, 0)?;
        store
            .write_all(&noise)
            .map_err(|e| EncFileError::io("failed to wipe header", e))?;
        store
            .sync()
            .map_err(|e| EncFileError::io("failed to sync wiped file", e))?;
        store
            .truncate(0)
            .map_err(|e| EncFileError::io("failed to truncate wiped file", e))?;
        store
            .sync()
            .map_err(|e| EncFileError::io("failed to sync truncated file", e))?;
        self.close()?;

        if let Some(path) = self.path.take() {
            fs::remove_file(&path).map_err(|e| {
                EncFileError::io(format!("failed to remove {}", path.display()), e)
            })?;
            debug!(path = %path.display(), sectors = total, "deleted encrypted file");
        }
        Ok(())
    }

    /// Set the cursor used by [`read`](Self::read) and [`write`](Self::write).
    ///
    /// There is no bounds check; the offset may lie past the stored data.
    pub fn seek(&mut self, offset: u64) -> u64 {
        self.cursor = Some(offset);
        offset
    }

    /// Fill `buf` from plaintext offset `offset`.
    ///
    /// On failure the error's [`transferred`](EncFileError::transferred)
    /// tells how much of `buf` was filled before the failing sector.
    pub fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let (mut sector, mut skip) = self.locate(offset);
        let mut done = 0;
        while done < buf.len() {
            let plain = self
                .load_sector(sector)
                .map_err(|e| e.with_transferred(done))?;
            done += copy_prefix(&mut buf[done..], &plain[skip..]);
            sector += 1;
            skip = 0;
        }
        Ok(done)
    }

    /// Write `buf` at plaintext offset `offset`.
    ///
    /// Sectors are written front to back. On failure the earlier sectors
    /// stay written and the error's [`transferred`](EncFileError::transferred)
    /// tells how many bytes of `buf` they hold.
    pub fn write_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let (mut sector, mut skip) = self.locate(offset);
        let mut done = 0;
        while done < buf.len() {
            done += self
                .write_partial(sector, &buf[done..], skip)
                .map_err(|e| e.with_transferred(done))?;
            sector += 1;
            skip = 0;
        }
        Ok(done)
    }

    /// Read at the cursor and advance it by the bytes read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let pos = self.cursor.ok_or_else(no_cursor)?;
        let result = self.read_at(buf, pos);
        self.advance(pos, &result);
        result
    }

    /// Write at the cursor and advance it by the bytes written.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let pos = self.cursor.ok_or_else(no_cursor)?;
        let result = self.write_at(buf, pos);
        self.advance(pos, &result);
        result
    }

    fn advance(&mut self, pos: u64, result: &Result<usize>) {
        let moved = match result {
            Ok(n) => *n,
            Err(e) => e.transferred(),
        };
        self.cursor = Some(pos + moved as u64);
    }

    /// Write the part of `data` that falls into `sector`, starting `skip`
    /// bytes into it. Returns how many bytes of `data` were used.
    fn write_partial(&mut self, sector: u64, data: &[u8], skip: usize) -> Result<usize> {
        let sector_size = self.sector_size();
        if skip == 0 && data.len() >= sector_size {
            self.store_sector(sector, &data[..sector_size])?;
            return Ok(sector_size);
        }

        let mut plain = match self.load_sector(sector) {
            Ok(plain) => plain,
            Err(e) if e.is(ErrorKind::NotFound) => Zeroizing::new(vec![0u8; sector_size]),
            Err(e) => return Err(e),
        };
        let n = copy_prefix(&mut plain[skip..], data);
        self.store_sector(sector, &plain)?;
        Ok(n)
    }

    fn load_sector(&mut self, index: u64) -> Result<Zeroizing<Vec<u8>>> {
        let span = self.sector_span();
        let pos = self.sector_offset(index)?;
        let nonce = cipher::sector_nonce(self.options.nonce_scheme, &self.keys.nonce_base(), index);

        let store = self.store()?;
        seek_to(store, pos)?;
        let mut sealed = vec![0u8; span];
        let n = storage::read_full(store, &mut sealed)
            .map_err(|e| EncFileError::io(format!("failed to read sector {}", index), e))?;
        if n < span {
            return Err(EncFileError::with_kind(
                ErrorCategory::User,
                ErrorKind::NotFound,
                format!("sector {} is not stored ({} of {} bytes)", index, n, span),
            ));
        }
        trace!(index, "read sector");

        cipher::decrypt_sector(self.keys.sector_key(), &nonce, &sealed)
            .map(Zeroizing::new)
            .map_err(|e| e.with_context(format!("sector {} failed authentication", index)))
    }

    fn store_sector(&mut self, index: u64, data: &[u8]) -> Result<()> {
        if data.len() != self.sector_size() {
            return Err(EncFileError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidArgument,
                format!(
                    "sector data is {} bytes, expected {}",
                    data.len(),
                    self.sector_size()
                ),
            ));
        }
        let pos = self.sector_offset(index)?;
        let nonce = cipher::sector_nonce(self.options.nonce_scheme, &self.keys.nonce_base(), index);
        let sealed = cipher::encrypt_sector(self.keys.sector_key(), &nonce, data)?;

        let store = self.store()?;
        seek_to(store, pos)?;
        store
            .write_all(&sealed)
            .map_err(|e| EncFileError::io(format!("failed to write sector {}", index), e))?;
        trace!(index, "wrote sector");
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        self.require_in_place("write the header")?;
        let header = self.keys.header().encode();
        let store = self.store()?;
        seek_to(store, 0)?;
        store
            .write_all(&header)
            .map_err(|e| EncFileError::io("failed to write header", e))
    }

    fn require_in_place(&self, what: &str) -> Result<()> {
        if self.mode.writes_in_place() {
            return Ok(());
        }
        Err(EncFileError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidState,
            format!("cannot {} on a handle opened {:?}", what, self.mode),
        ))
    }

    fn store(&mut self) -> Result<&mut S> {
        self.storage.as_mut().ok_or_else(EncFileError::closed)
    }

    /// Bytes one sector occupies in the store.
    fn sector_span(&self) -> usize {
        self.sector_size() + TAG_SIZE
    }

    fn sector_offset(&self, index: u64) -> Result<u64> {
        index
            .checked_mul(self.sector_span() as u64)
            .and_then(|off| off.checked_add(HEADER_SIZE as u64))
            .ok_or_else(|| {
                EncFileError::with_kind(
                    ErrorCategory::User,
                    ErrorKind::Validation,
                    format!("sector {} is beyond the addressable range", index),
                )
            })
    }

    /// Sector holding plaintext byte `offset`, and the offset within it.
    fn locate(&self, offset: u64) -> (u64, usize) {
        let sector_size = self.sector_size() as u64;
        (offset / sector_size, (offset % sector_size) as usize)
    }
}

impl<S: Storage> Read for EncryptedFile<S> {
    /// Reads at the cursor. Running into a missing sector ends the stream;
    /// a failure after some bytes were read is reported on the next call.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match EncryptedFile::read(self, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.transferred() > 0 => Ok(e.transferred()),
            Err(e) if e.is(ErrorKind::NotFound) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl<S: Storage> Write for EncryptedFile<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match EncryptedFile::write(self, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.transferred() > 0 => Ok(e.transferred()),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.store()?.flush()
    }
}

/// Only absolute positions and moves relative to a set cursor are supported.
impl<S: Storage> Seek for EncryptedFile<S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self
                .cursor
                .ok_or_else(|| io::Error::from(no_cursor()))?
                .checked_add_signed(delta),
            SeekFrom::End(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "encrypted files have no plaintext length to seek from",
                ));
            }
        };
        let offset = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative or overflowing position")
        })?;
        Ok(EncryptedFile::seek(self, offset))
    }
}

fn no_cursor() -> EncFileError {
    EncFileError::with_kind(
        ErrorCategory::User,
        ErrorKind::InvalidState,
        "no position set; seek before reading or writing",
    )
}

fn copy_prefix(dst: &mut [u8], src: &[u8]) -> usize {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}

fn seek_to<S: Seek + ?Sized>(store: &mut S, pos: u64) -> Result<()> {
    let reached = store
        .seek(SeekFrom::Start(pos))
        .map_err(|e| EncFileError::io(format!("failed to seek to {}", pos), e))?;
    if reached != pos {
        return Err(EncFileError::with_kind(
            ErrorCategory::Internal,
            ErrorKind::NotFound,
            format!("seek to {} ended at {}", pos, reached),
        ));
    }
    Ok(())
}

fn read_header<R: Read + ?Sized>(store: &mut R) -> Result<Header> {
    let mut buf = [0u8; HEADER_SIZE];
    let n = storage::read_full(store, &mut buf)
        .map_err(|e| EncFileError::io("failed to read header", e))?;
    Header::decode(&buf[..n])
}

fn read_header_at(path: &Path) -> Result<Header> {
    let mut file = File::open(path).map_err(|e| open_error(path, e))?;
    read_header(&mut file)
}

fn open_error(path: &Path, err: io::Error) -> EncFileError {
    let (category, kind) = match err.kind() {
        io::ErrorKind::NotFound => (ErrorCategory::User, ErrorKind::NotFound),
        io::ErrorKind::AlreadyExists => (ErrorCategory::User, ErrorKind::AlreadyExists),
        _ => (ErrorCategory::Internal, ErrorKind::Io),
    };
    EncFileError::with_kind_and_source(
        category,
        kind,
        format!("failed to open {}", path.display()),
        err,
    )
}
