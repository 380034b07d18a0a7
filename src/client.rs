//! The client library: marshals file operations into request packets and
//! transacts them with the server over datagrams.

use crate::layout::{BLOCK_SIZE, NAME_MAX};
use crate::proto::{Packet, Request, Stat, PACKET_SIZE};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;
use zerocopy::{FromBytes, IntoBytes};

/// How long to wait for a reply before retransmitting the request.
const REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// A handle on a remote file server.
///
/// Every call is synchronous: it opens a fresh ephemeral socket, sends the
/// request and retransmits it after each timeout until a reply arrives.
/// Dropping the socket once a reply is accepted discards replies to any
/// duplicate still in flight.
pub struct Client {
    server: SocketAddr,
}

impl Client {
    /// Resolves the server address. No datagram is exchanged.
    pub fn new<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let server = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "server address")
        })?;
        Ok(Self { server })
    }

    fn transact(&self, request: &Packet) -> io::Result<Packet> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_read_timeout(Some(REPLY_TIMEOUT))?;
        let mut buf = [0u8; PACKET_SIZE];
        loop {
            socket.send_to(request.as_bytes(), self.server)?;
            match socket.recv_from(&mut buf) {
                Ok((len, _)) if len == PACKET_SIZE => {
                    return Packet::read_from_bytes(&buf[..]).map_err(|_| {
                        io::Error::new(io::ErrorKind::InvalidData, "malformed reply")
                    });
                }
                // A runt reply or a timeout both lead to retransmission.
                Ok(_) => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Builds a packet carrying `name`, rejecting names the fixed-size
    /// field cannot hold.
    fn named(request: Request, inum: i32, name: &str) -> io::Result<Packet> {
        let bytes = name.as_bytes();
        if bytes.len() > NAME_MAX || bytes.contains(&0) {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "bad name"));
        }
        let mut packet = Packet::new(request);
        packet.inum = inum;
        packet.name[..bytes.len()].copy_from_slice(bytes);
        Ok(packet)
    }

    /// Looks `name` up under the directory `pinum`; returns the inum found
    /// or -1.
    pub fn lookup(&self, pinum: i32, name: &str) -> io::Result<i32> {
        let packet = Self::named(Request::Lookup, pinum, name)?;
        Ok(self.transact(&packet)?.return_val)
    }

    /// Returns the type and size of `inum`, or `None` when it does not
    /// resolve.
    pub fn stat(&self, inum: i32) -> io::Result<Option<Stat>> {
        let mut packet = Packet::new(Request::Stat);
        packet.inum = inum;
        let reply = self.transact(&packet)?;
        Ok((reply.return_val == 0).then_some(reply.stat))
    }

    /// Reads block `block` of `inum`, or `None` when the server rejects
    /// the request.
    pub fn read(&self, inum: i32, block: i32) -> io::Result<Option<Box<[u8; BLOCK_SIZE]>>> {
        let mut packet = Packet::new(Request::Read);
        packet.inum = inum;
        packet.block = block;
        let reply = self.transact(&packet)?;
        if reply.return_val != 0 {
            return Ok(None);
        }
        Ok(Some(Box::new(reply.buffer)))
    }

    /// Writes `buffer` as block `block` of `inum`; returns the wire status.
    pub fn write(&self, inum: i32, block: i32, buffer: &[u8; BLOCK_SIZE]) -> io::Result<i32> {
        let mut packet = Packet::new(Request::Write);
        packet.inum = inum;
        packet.block = block;
        packet.buffer = *buffer;
        Ok(self.transact(&packet)?.return_val)
    }

    /// Creates `name` of type `ftype` under `pinum`; returns the wire
    /// status. Creating an existing name succeeds.
    pub fn creat(&self, pinum: i32, ftype: i32, name: &str) -> io::Result<i32> {
        let mut packet = Self::named(Request::Creat, pinum, name)?;
        packet.ftype = ftype;
        Ok(self.transact(&packet)?.return_val)
    }

    /// Unlinks `name` under `pinum`; returns the wire status. Unlinking a
    /// missing name succeeds.
    pub fn unlink(&self, pinum: i32, name: &str) -> io::Result<i32> {
        let packet = Self::named(Request::Unlink, pinum, name)?;
        Ok(self.transact(&packet)?.return_val)
    }

    /// Asks the server to sync and terminate; returns once the shutdown is
    /// acknowledged.
    pub fn shutdown(&self) -> io::Result<()> {
        let packet = Packet::new(Request::Shutdown);
        self.transact(&packet)?;
        Ok(())
    }
}
