//! Raw byte access to the image file.

use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// The image file backing the filesystem, addressed by absolute byte
/// offsets. The store does not interpret content.
pub struct Image {
    file: File,
}

impl Image {
    /// Opens the image at `path` for read/write, creating it when absent.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Number of bytes currently in the image.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Fills `buf` exactly from the bytes at `off`.
    pub fn read_at(&mut self, off: i32, buf: &mut [u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(off as u64))?;
        self.file.read_exact(buf)
    }

    /// Writes `bytes` at `off`.
    pub fn write_at(&mut self, off: i32, bytes: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(off as u64))?;
        self.file.write_all(bytes)
    }

    /// Durability barrier: forces all written data to disk.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }
}
