//! On-disk structures of the log-structured image.
//!
//! The image starts with the checkpoint region at offset 0; everything
//! beyond it is log. Shards, inodes and blocks are addressed by the
//! absolute byte offset at which they were appended.

use std::mem::size_of;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of a data or directory block in bytes.
pub const BLOCK_SIZE: usize = 4096;
/// Maximum number of inodes in an image.
pub const NINODES: usize = 4096;
/// Number of direct block slots in an inode.
pub const NDIRECT: usize = 14;
/// Number of inodes covered by one inode-map shard.
pub const SHARD_INODES: usize = 16;
/// Number of inode-map shards named by the checkpoint region.
pub const NSHARDS: usize = NINODES / SHARD_INODES;
/// Number of entries in a directory block.
pub const DIR_ENTRIES: usize = BLOCK_SIZE / size_of::<DirEntry>();
/// Maximum length of a name in bytes, excluding the terminating NUL.
pub const NAME_MAX: usize = 27;

/// Sentinel marking an offset, slot or entry as unused.
pub const NONE: i32 = -1;

/// Inode type: directory.
pub const T_DIR: i32 = 0;
/// Inode type: regular file.
pub const T_FILE: i32 = 1;

/// The inode number of the root directory.
pub const ROOT_INUM: i32 = 0;

/// Size of the encoded checkpoint region in bytes.
pub const CR_SIZE: usize = size_of::<CheckpointRegion>();

/// The checkpoint region, rewritten in place at offset 0 of the image.
///
/// It names the current on-disk version of every inode-map shard and the
/// offset at which the next append will be placed. It is the single source
/// of truth on recovery; no log replay is performed.
#[derive(Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct CheckpointRegion {
    /// Per-shard offset of the current shard version, or [`NONE`].
    pub imap: [i32; NSHARDS],
    /// The log tail.
    pub end_of_log: i32,
}

impl CheckpointRegion {
    /// A fresh checkpoint region: no shards, log starting right past the
    /// region itself.
    pub fn new() -> Self {
        Self {
            imap: [NONE; NSHARDS],
            end_of_log: CR_SIZE as i32,
        }
    }
}

impl Default for CheckpointRegion {
    fn default() -> Self {
        Self::new()
    }
}

/// One fragment of the inode-number-to-offset table, covering
/// [`SHARD_INODES`] consecutive inode numbers.
#[derive(Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct ImapShard {
    /// Per-slot offset of the current inode version, or [`NONE`].
    pub inodes: [i32; SHARD_INODES],
}

impl ImapShard {
    pub fn new() -> Self {
        Self {
            inodes: [NONE; SHARD_INODES],
        }
    }

    /// Tells whether every slot of the shard is unused.
    pub fn is_clear(&self) -> bool {
        self.inodes.iter().all(|&off| off == NONE)
    }
}

impl Default for ImapShard {
    fn default() -> Self {
        Self::new()
    }
}

/// An on-disk inode: type, size and the direct block table.
#[derive(Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Inode {
    /// Size in bytes. A write of block `k` sets this to
    /// `(k + 1) * BLOCK_SIZE`; for a directory it is the number of
    /// allocated directory blocks times [`BLOCK_SIZE`].
    pub size: i32,
    /// [`T_DIR`] or [`T_FILE`].
    pub itype: i32,
    /// Per-slot offset of a data or directory block, or [`NONE`].
    pub data: [i32; NDIRECT],
}

impl Inode {
    /// A fresh inode of the given type with no blocks.
    pub fn new(itype: i32) -> Self {
        Self {
            size: 0,
            itype,
            data: [NONE; NDIRECT],
        }
    }
}

/// One `(name, inum)` pair inside a directory block.
///
/// The name is an owned fixed-capacity byte string, NUL-terminated; an
/// entry with `inum == NONE` is unused.
#[derive(Clone, Copy, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct DirEntry {
    pub name: [u8; NAME_MAX + 1],
    pub inum: i32,
}

impl DirEntry {
    /// An unused entry.
    pub fn empty() -> Self {
        Self {
            name: [0; NAME_MAX + 1],
            inum: NONE,
        }
    }

    /// An entry binding `name` to `inum`.
    ///
    /// `name` must be at most [`NAME_MAX`] bytes; callers validate.
    pub fn new(name: &[u8], inum: i32) -> Self {
        let mut entry = Self::empty();
        entry.name[..name.len()].copy_from_slice(name);
        entry.inum = inum;
        entry
    }

    pub fn is_free(&self) -> bool {
        self.inum == NONE
    }

    /// The name bytes up to the terminating NUL.
    pub fn name(&self) -> &[u8] {
        trim_nul(&self.name)
    }

    /// Marks the entry unused and zeroes its name.
    pub fn clear(&mut self) {
        *self = Self::empty();
    }
}

/// A 4 KiB directory block of [`DIR_ENTRIES`] fixed-size entries.
#[derive(Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct DirBlock {
    pub entries: [DirEntry; DIR_ENTRIES],
}

impl DirBlock {
    fn empty() -> Self {
        Self {
            entries: [DirEntry::empty(); DIR_ENTRIES],
        }
    }

    /// Block 0 of a fresh directory: `.` and `..`, everything else unused.
    pub fn new_dir(self_inum: i32, parent_inum: i32) -> Self {
        let mut block = Self::empty();
        block.entries[0] = DirEntry::new(b".", self_inum);
        block.entries[1] = DirEntry::new(b"..", parent_inum);
        block
    }

    /// An overflow block seeded with a single entry at slot 0.
    pub fn with_entry(name: &[u8], inum: i32) -> Self {
        let mut block = Self::empty();
        block.entries[0] = DirEntry::new(name, inum);
        block
    }
}

/// Returns the prefix of `bytes` up to the first NUL, or all of it when no
/// NUL is present.
pub fn trim_nul(bytes: &[u8]) -> &[u8] {
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    &bytes[..len]
}
