//! Backing store for encrypted files
//!
//! The engine only needs a byte store with a single shared position: seek,
//! then read or write. Anything that adds size, sync and truncate on top of
//! `Read + Write + Seek` can carry an encrypted file.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, Write};

pub trait Storage: Read + Write + Seek {
    /// Current length of the store in bytes.
    fn size(&mut self) -> io::Result<u64>;

    /// Force buffered writes to stable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Cut (or zero-extend) the store to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Storage for File {
    fn size(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// In-memory store. Writing past the end zero-fills the gap, like a sparse file.
impl Storage for Cursor<Vec<u8>> {
    fn size(&mut self) -> io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "length exceeds memory"))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }
}

/// Read until `buf` is full or the store is exhausted. Returns bytes read.
pub(crate) fn read_full<S: Read + ?Sized>(store: &mut S, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match store.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
