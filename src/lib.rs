//! A log-structured file server and its client library.
//!
//! The server services POSIX-like file operations (lookup, stat, create,
//! read, write, unlink, shutdown) received as fixed-size datagrams against
//! a single on-disk image file. Mutations append new versions of blocks,
//! inodes and inode-map shards at the tail of the log; a checkpoint region
//! at offset 0 is rewritten in place to publish them.

pub mod client;
pub mod fs;
pub mod image;
pub mod layout;
pub mod proto;
pub mod server;
