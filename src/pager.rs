use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::consts::PAGE_SIZE;
use crate::error::StoreResult;

/// Owns the data file and performs page-aligned reads and writes. Pages
/// past the current end of file read back as all-zero; `write_page`
/// extends the file as needed.
pub struct Pager {
    file: File,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn read_page(&mut self, page: u64) -> StoreResult<[u8; PAGE_SIZE]> {
        let offset = page * PAGE_SIZE as u64;
        let len = self.length()?;

        let mut buf = [0u8; PAGE_SIZE];
        if offset >= len {
            return Ok(buf);
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let remaining = (len - offset).min(PAGE_SIZE as u64) as usize;
        self.file.read_exact(&mut buf[..remaining])?;
        Ok(buf)
    }

    pub fn write_page(&mut self, page: u64, bytes: &[u8; PAGE_SIZE]) -> StoreResult {
        let offset = page * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(bytes)?;
        Ok(())
    }

    pub fn length(&self) -> StoreResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Truncate or extend the file to exactly `len` bytes. Extension
    /// zero-fills, matching the contract of `std::fs::File::set_len`.
    pub fn set_length(&self, len: u64) -> StoreResult {
        self.file.set_len(len)?;
        Ok(())
    }
}
