//! Serialized access to one encrypted file from several threads
//!
//! An [`EncryptedFile`] moves a single store position for every sector it
//! touches, so two interleaved calls corrupt each other. `SharedFile` puts
//! the handle behind a mutex; each call holds the lock for its whole
//! seek/read/write sequence.

use std::fs::File;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::encfile::EncryptedFile;
use crate::error::Result;
use crate::storage::Storage;

pub struct SharedFile<S: Storage = File> {
    inner: Arc<Mutex<EncryptedFile<S>>>,
}

impl<S: Storage> Clone for SharedFile<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Storage> SharedFile<S> {
    pub fn new(file: EncryptedFile<S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(file)),
        }
    }

    /// Run `f` with exclusive access, for sequences that must not interleave
    /// with other callers (cursor reads, read-then-write).
    pub fn with<R>(&self, f: impl FnOnce(&mut EncryptedFile<S>) -> R) -> R {
        let mut file = self.inner.lock();
        f(&mut file)
    }

    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.inner.lock().read_at(buf, offset)
    }

    pub fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        self.inner.lock().write_at(buf, offset)
    }

    pub fn read_sector(&self, index: u64) -> Result<Vec<u8>> {
        self.inner.lock().read_sector(index)
    }

    pub fn write_sector(&self, index: u64, data: &[u8]) -> Result<()> {
        self.inner.lock().write_sector(index, data)
    }

    pub fn count_sectors(&self) -> Result<u64> {
        self.inner.lock().count_sectors()
    }

    pub fn sync(&self) -> Result<()> {
        self.inner.lock().sync()
    }

    /// Unwrap the handle if this is the last clone.
    pub fn try_unwrap(self) -> std::result::Result<EncryptedFile<S>, Self> {
        Arc::try_unwrap(self.inner)
            .map(|mutex| mutex.into_inner())
            .map_err(|inner| Self { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Options, ScryptCost};
    use std::io::Cursor;
    use std::thread;

    #[test]
    fn test_concurrent_writers_do_not_interleave() {
        let options = Options::default()
            .with_sector_size(64)
            .with_cost(ScryptCost {
                log_n: 4,
                r: 8,
                p: 1,
            });
        let file = EncryptedFile::create_in(Cursor::new(Vec::new()), b"pw", &options).unwrap();
        let shared = SharedFile::new(file);

        let handles: Vec<_> = (0u8..8)
            .map(|worker| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for round in 0..20u64 {
                        let index = round * 8 + u64::from(worker);
                        shared.write_sector(index, &[worker; 64]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(shared.count_sectors().unwrap(), 160);
        for index in 0..160u64 {
            let expected = (index % 8) as u8;
            assert_eq!(shared.read_sector(index).unwrap(), vec![expected; 64]);
        }

        let file = shared.try_unwrap().ok().expect("last clone");
        assert_eq!(file.sector_size(), 64);
    }

    #[test]
    fn test_with_runs_cursor_sequence() {
        let options = Options::default().with_cost(ScryptCost {
            log_n: 4,
            r: 8,
            p: 1,
        });
        let file = EncryptedFile::create_in(Cursor::new(Vec::new()), b"pw", &options).unwrap();
        let shared = SharedFile::new(file);

        let n = shared
            .with(|file| {
                file.seek(10);
                file.write(b"locked")
            })
            .unwrap();
        assert_eq!(n, 6);

        let mut buf = [0u8; 6];
        shared.read_at(&mut buf, 10).unwrap();
        assert_eq!(&buf, b"locked");
    }
}
