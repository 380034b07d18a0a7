//! The fixed-size request/reply record exchanged over datagrams.
//!
//! Client and server share one [`Packet`] layout for both directions;
//! which fields are meaningful depends on the request tag.

use crate::layout::{BLOCK_SIZE, NAME_MAX};
use std::mem::size_of;
use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

/// Size in bytes of an encoded packet.
pub const PACKET_SIZE: usize = size_of::<Packet>();

/// Request tags carried in [`Packet::request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Request {
    /// Client-side address setup; never serviced by the server.
    Init = 0,
    Lookup = 1,
    Stat = 2,
    Write = 3,
    Read = 4,
    Creat = 5,
    Unlink = 6,
    Shutdown = 7,
}

impl TryFrom<i32> for Request {
    type Error = i32;

    /// Decodes a wire tag, handing back the raw value when unrecognized.
    fn try_from(tag: i32) -> Result<Self, i32> {
        Ok(match tag {
            0 => Self::Init,
            1 => Self::Lookup,
            2 => Self::Stat,
            3 => Self::Write,
            4 => Self::Read,
            5 => Self::Creat,
            6 => Self::Unlink,
            7 => Self::Shutdown,
            _ => return Err(tag),
        })
    }
}

/// Type and size of an inode, as reported by `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Stat {
    /// [`crate::layout::T_DIR`] or [`crate::layout::T_FILE`].
    pub itype: i32,
    /// Size in bytes.
    pub size: i32,
}

/// The request/reply record.
///
/// `stat` and `return_val` are meaningful in replies only; `buffer`
/// carries the payload of WRITE requests and READ replies.
#[derive(Clone, IntoBytes, FromBytes, Immutable, KnownLayout)]
#[repr(C)]
pub struct Packet {
    pub request: i32,
    /// Target inum, or parent inum for named operations.
    pub inum: i32,
    /// NUL-terminated name.
    pub name: [u8; NAME_MAX + 1],
    pub stat: Stat,
    pub buffer: [u8; BLOCK_SIZE],
    /// Block index for READ/WRITE.
    pub block: i32,
    /// [`crate::layout::T_DIR`] or [`crate::layout::T_FILE`] for CREAT.
    pub ftype: i32,
    /// 0 on success, -1 on failure; LOOKUP returns the inum found.
    pub return_val: i32,
}

impl Packet {
    /// A zeroed packet carrying the given request tag.
    pub fn new(request: Request) -> Self {
        let mut packet = Self::new_zeroed();
        packet.request = request as i32;
        packet
    }

    /// The name field up to its terminating NUL.
    pub fn name(&self) -> &[u8] {
        crate::layout::trim_nul(&self.name)
    }
}
