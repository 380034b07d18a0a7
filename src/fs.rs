//! The log-structured filesystem engine.
//!
//! Every mutating operation appends new versions of blocks, inodes and
//! inode-map shards at the log tail, then rewrites the checkpoint region
//! in place and syncs the image before returning. Inodes, shards and
//! directory blocks already in the log are updated in place at their prior
//! offsets; superseded versions stay behind as unreachable log garbage.

use crate::image::Image;
use crate::layout::{
    CheckpointRegion, DirBlock, DirEntry, ImapShard, Inode, BLOCK_SIZE, CR_SIZE, NAME_MAX,
    NDIRECT, NINODES, NONE, NSHARDS, ROOT_INUM, SHARD_INODES, T_DIR, T_FILE,
};
use crate::proto::Stat;
use log::{debug, info};
use std::io;
use std::path::Path;
use thiserror::Error;
use zerocopy::{FromZeros, IntoBytes};

/// Errors reported at the engine boundary.
///
/// Everything but [`FsError::Io`] maps to a failed reply on the wire; I/O
/// errors on the image are fatal to the server.
#[derive(Debug, Error)]
pub enum FsError {
    /// Inum or block index out of range, name too long, or bad type.
    #[error("invalid argument")]
    InvalidArgument,
    /// Missing shard, inode or name.
    #[error("not found")]
    NotFound,
    /// The operation requires a directory but found a file, or vice versa.
    #[error("type mismatch")]
    TypeMismatch,
    /// The parent directory, or the inode table, has no free slot.
    #[error("out of capacity")]
    Capacity,
    /// Unlink of a directory that still has entries.
    #[error("directory not empty")]
    NotEmpty,
    #[error("image error: {0}")]
    Io(#[from] io::Error),
}

impl From<FsError> for io::Error {
    fn from(err: FsError) -> io::Error {
        match err {
            FsError::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, FsError>;

/// The filesystem over one image file: the image handle and the in-memory
/// checkpoint region, held together so the dispatcher can borrow a single
/// engine value mutably.
pub struct FileSystem {
    image: Image,
    cr: CheckpointRegion,
}

impl FileSystem {
    /// Opens the image at `path`, bootstrapping a fresh filesystem when the
    /// file is missing or too short to hold a checkpoint region.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut image = Image::open(&path)?;
        if (image.len()? as usize) < CR_SIZE {
            let mut fs = Self {
                image,
                cr: CheckpointRegion::new(),
            };
            fs.bootstrap()?;
            info!("initialized fresh image at {}", path.as_ref().display());
            Ok(fs)
        } else {
            let mut cr = CheckpointRegion::new();
            image.read_at(0, cr.as_mut_bytes())?;
            debug!("recovered checkpoint region, end_of_log={}", cr.end_of_log);
            Ok(Self { image, cr })
        }
    }

    /// Writes the initial checkpoint region, then the root directory block,
    /// the root inode and shard 0, in that order, and commits.
    fn bootstrap(&mut self) -> Result<()> {
        // Reserve the region; end_of_log already points past it.
        self.image.write_at(0, self.cr.as_bytes())?;

        let block = DirBlock::new_dir(ROOT_INUM, ROOT_INUM);
        let block_off = self.append(block.as_bytes())?;

        let mut inode = Inode::new(T_DIR);
        inode.size = BLOCK_SIZE as i32;
        inode.data[0] = block_off;
        let inode_off = self.append(inode.as_bytes())?;

        let mut shard = ImapShard::new();
        shard.inodes[0] = inode_off;
        let shard_off = self.append(shard.as_bytes())?;
        self.cr.imap[0] = shard_off;

        self.commit()
    }

    /// The current log tail.
    pub fn end_of_log(&self) -> i32 {
        self.cr.end_of_log
    }

    /// Flushes the image; used by the dispatcher on shutdown.
    pub fn sync(&mut self) -> io::Result<()> {
        self.image.sync()
    }

    /// Appends `bytes` at the log tail and returns the offset written.
    fn append(&mut self, bytes: &[u8]) -> io::Result<i32> {
        let off = self.cr.end_of_log;
        self.image.write_at(off, bytes)?;
        self.cr.end_of_log += bytes.len() as i32;
        Ok(off)
    }

    /// Rewrites the checkpoint region in place and syncs, publishing every
    /// append made since the previous commit.
    fn commit(&mut self) -> Result<()> {
        self.image.write_at(0, self.cr.as_bytes())?;
        self.image.sync()?;
        Ok(())
    }

    fn read_shard(&mut self, off: i32) -> io::Result<ImapShard> {
        let mut shard = ImapShard::new_zeroed();
        self.image.read_at(off, shard.as_mut_bytes())?;
        Ok(shard)
    }

    fn read_inode(&mut self, off: i32) -> io::Result<Inode> {
        let mut inode = Inode::new_zeroed();
        self.image.read_at(off, inode.as_mut_bytes())?;
        Ok(inode)
    }

    fn read_dir_block(&mut self, off: i32) -> io::Result<DirBlock> {
        let mut block = DirBlock::new_zeroed();
        self.image.read_at(off, block.as_mut_bytes())?;
        Ok(block)
    }

    /// Resolves `inum` to the offset and contents of its current inode
    /// version, via the shard named by the checkpoint region.
    fn locate(&mut self, inum: i32) -> Result<(i32, Inode)> {
        if inum < 0 || inum >= NINODES as i32 {
            return Err(FsError::InvalidArgument);
        }
        let shard_off = self.cr.imap[inum as usize / SHARD_INODES];
        if shard_off == NONE {
            return Err(FsError::NotFound);
        }
        let shard = self.read_shard(shard_off)?;
        let inode_off = shard.inodes[inum as usize % SHARD_INODES];
        if inode_off == NONE {
            return Err(FsError::NotFound);
        }
        let inode = self.read_inode(inode_off)?;
        Ok((inode_off, inode))
    }

    /// Looks `name` up in the directory `pinum` and returns its inum.
    ///
    /// The scan terminates at the first unused direct slot; entries hidden
    /// behind a hole in the block table are not reachable.
    pub fn lookup(&mut self, pinum: i32, name: &[u8]) -> Result<i32> {
        let (_, pinode) = self.locate(pinum)?;
        if pinode.itype != T_DIR {
            return Err(FsError::TypeMismatch);
        }
        for &block_off in &pinode.data {
            if block_off == NONE {
                break;
            }
            let block = self.read_dir_block(block_off)?;
            for entry in &block.entries {
                if !entry.is_free() && entry.name() == name {
                    return Ok(entry.inum);
                }
            }
        }
        Err(FsError::NotFound)
    }

    /// Reports the type and size of `inum`.
    pub fn stat(&mut self, inum: i32) -> Result<Stat> {
        let (_, inode) = self.locate(inum)?;
        Ok(Stat {
            itype: inode.itype,
            size: inode.size,
        })
    }

    /// Reads block `block` of `inum` into `buf`.
    ///
    /// The inode type is not checked, so directory blocks can be read back
    /// directly. Reading a slot that was never written succeeds and leaves
    /// `buf` untouched; its contents are unspecified.
    pub fn read(&mut self, inum: i32, block: i32, buf: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        if !(0..NDIRECT as i32).contains(&block) {
            return Err(FsError::InvalidArgument);
        }
        let (_, inode) = self.locate(inum)?;
        let block_off = inode.data[block as usize];
        if block_off != NONE {
            self.image.read_at(block_off, buf)?;
        }
        Ok(())
    }

    /// Writes `buf` as block `block` of the regular file `inum`.
    ///
    /// The block is appended at the log tail; the inode is rewritten in
    /// place at its current offset, so the shard keeps naming the same
    /// offset while its contents change.
    pub fn write(&mut self, inum: i32, block: i32, buf: &[u8; BLOCK_SIZE]) -> Result<()> {
        if !(0..NDIRECT as i32).contains(&block) {
            return Err(FsError::InvalidArgument);
        }
        let (inode_off, mut inode) = self.locate(inum)?;
        if inode.itype != T_FILE {
            return Err(FsError::TypeMismatch);
        }
        inode.data[block as usize] = self.append(buf)?;
        inode.size = (block + 1) * BLOCK_SIZE as i32;
        self.image.write_at(inode_off, inode.as_bytes())?;
        self.commit()
    }

    /// Creates `name` of the given type under the directory `pinum`.
    ///
    /// Creating a name that already exists succeeds without change, so a
    /// retransmitted request after a lost reply is harmless.
    pub fn creat(&mut self, pinum: i32, itype: i32, name: &[u8]) -> Result<()> {
        if name.len() > NAME_MAX || (itype != T_DIR && itype != T_FILE) {
            return Err(FsError::InvalidArgument);
        }
        match self.lookup(pinum, name) {
            Ok(_) => return Ok(()),
            Err(FsError::NotFound) => {}
            Err(e) => return Err(e),
        }
        let (pinode_off, mut pinode) = self.locate(pinum)?;
        if self.dir_is_full(&pinode)? {
            return Err(FsError::Capacity);
        }

        // The new inode goes in first; its offset is what the shard slot
        // will name.
        let mut inode = Inode::new(itype);
        let inode_off = self.append(inode.as_bytes())?;
        let inum = self.assign_inum(inode_off)?;

        if itype == T_DIR {
            let block = DirBlock::new_dir(inum, pinum);
            inode.data[0] = self.append(block.as_bytes())?;
            inode.size = BLOCK_SIZE as i32;
            self.image.write_at(inode_off, inode.as_bytes())?;
        }

        self.insert_entry(pinode_off, &mut pinode, name, inum)?;
        self.commit()
    }

    /// Removes `name` from the directory `pinum`.
    ///
    /// A name that cannot be found counts as already unlinked. Directories
    /// must hold nothing beyond their `.` and `..` entries. The unlinked
    /// inode and its blocks stay behind as unreachable log garbage.
    pub fn unlink(&mut self, pinum: i32, name: &[u8]) -> Result<()> {
        let inum = match self.lookup(pinum, name) {
            Ok(inum) => inum,
            Err(FsError::NotFound) | Err(FsError::TypeMismatch) => return Ok(()),
            Err(e) => return Err(e),
        };
        let (_, inode) = self.locate(inum)?;
        if inode.itype == T_DIR && !self.dir_is_clear(&inode)? {
            return Err(FsError::NotEmpty);
        }

        // Clear the first matching entry in the parent.
        let (_, pinode) = self.locate(pinum)?;
        for &block_off in &pinode.data {
            if block_off == NONE {
                continue;
            }
            let mut block = self.read_dir_block(block_off)?;
            if let Some(entry) = block
                .entries
                .iter_mut()
                .find(|e| !e.is_free() && e.name() == name)
            {
                entry.clear();
                self.image.write_at(block_off, block.as_bytes())?;
                break;
            }
        }

        // Drop the shard slot; a shard left all-clear leaves the map.
        let shard_idx = inum as usize / SHARD_INODES;
        let shard_off = self.cr.imap[shard_idx];
        let mut shard = self.read_shard(shard_off)?;
        shard.inodes[inum as usize % SHARD_INODES] = NONE;
        self.image.write_at(shard_off, shard.as_bytes())?;
        if shard.is_clear() {
            self.cr.imap[shard_idx] = NONE;
        }
        self.commit()
    }

    /// Tells whether `dir` has room for one more entry: an unused direct
    /// slot, or a free entry in any existing block.
    fn dir_is_full(&mut self, dir: &Inode) -> Result<bool> {
        for &block_off in &dir.data {
            if block_off == NONE {
                return Ok(false);
            }
            let block = self.read_dir_block(block_off)?;
            if block.entries.iter().any(DirEntry::is_free) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Tells whether `dir` holds nothing beyond `.` and `..`.
    fn dir_is_clear(&mut self, dir: &Inode) -> Result<bool> {
        for (k, &block_off) in dir.data.iter().enumerate() {
            if block_off == NONE {
                continue;
            }
            let block = self.read_dir_block(block_off)?;
            let first = if k == 0 { 2 } else { 0 };
            if block.entries[first..].iter().any(|e| !e.is_free()) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Binds `inode_off` to the smallest free inode number, walking shards
    /// in ascending order and slots in ascending order within each shard.
    /// A missing shard is appended fresh; an existing one is rewritten in
    /// place.
    fn assign_inum(&mut self, inode_off: i32) -> Result<i32> {
        for i in 0..NSHARDS {
            let shard_off = self.cr.imap[i];
            if shard_off == NONE {
                let mut shard = ImapShard::new();
                shard.inodes[0] = inode_off;
                self.cr.imap[i] = self.append(shard.as_bytes())?;
                return Ok((i * SHARD_INODES) as i32);
            }
            let mut shard = self.read_shard(shard_off)?;
            if let Some(j) = shard.inodes.iter().position(|&off| off == NONE) {
                shard.inodes[j] = inode_off;
                self.image.write_at(shard_off, shard.as_bytes())?;
                return Ok((i * SHARD_INODES + j) as i32);
            }
        }
        Err(FsError::Capacity)
    }

    /// Inserts `(name, inum)` into the first free entry of an existing
    /// parent block, or opens a fresh block in the first unused slot.
    fn insert_entry(
        &mut self,
        pinode_off: i32,
        pinode: &mut Inode,
        name: &[u8],
        inum: i32,
    ) -> Result<()> {
        for k in 0..NDIRECT {
            let block_off = pinode.data[k];
            if block_off == NONE {
                let block = DirBlock::with_entry(name, inum);
                pinode.data[k] = self.append(block.as_bytes())?;
                pinode.size += BLOCK_SIZE as i32;
                self.image.write_at(pinode_off, pinode.as_bytes())?;
                return Ok(());
            }
            let mut block = self.read_dir_block(block_off)?;
            if let Some(entry) = block.entries.iter_mut().find(|e| e.is_free()) {
                *entry = DirEntry::new(name, inum);
                self.image.write_at(block_off, block.as_bytes())?;
                return Ok(());
            }
        }
        Err(FsError::Capacity)
    }
}
