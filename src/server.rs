//! The request dispatcher: a single-threaded loop over the server socket.

use crate::fs::{FileSystem, FsError};
use crate::proto::{Packet, Request, PACKET_SIZE};
use log::{debug, error, warn};
use std::io;
use std::net::UdpSocket;
use zerocopy::{FromBytes, IntoBytes};

/// Collapses an engine result to a wire `return_val`, letting image I/O
/// failures through as fatal.
fn return_val(result: crate::fs::Result<i32>) -> io::Result<i32> {
    match result {
        Ok(val) => Ok(val),
        Err(FsError::Io(e)) => Err(e),
        Err(e) => {
            debug!("request failed: {e}");
            Ok(-1)
        }
    }
}

/// Services requests until SHUTDOWN is received.
///
/// One request is fully processed, including its durability barrier,
/// before the next datagram is read. Undersized datagrams are ignored; an
/// unrecognized request tag or an image I/O failure is fatal and makes the
/// loop return an error.
pub fn serve(fs: &mut FileSystem, socket: &UdpSocket) -> io::Result<()> {
    let mut buf = [0u8; PACKET_SIZE];
    loop {
        let (len, addr) = socket.recv_from(&mut buf)?;
        if len != PACKET_SIZE {
            warn!("ignoring {len}-byte datagram from {addr}");
            continue;
        }
        let Ok(request) = Packet::read_from_bytes(&buf[..]) else {
            continue;
        };
        let tag = match Request::try_from(request.request) {
            Ok(tag) => tag,
            Err(raw) => {
                error!("unrecognized request tag {raw} from {addr}");
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unrecognized request tag",
                ));
            }
        };

        let mut reply = Packet::new(tag);
        match tag {
            Request::Lookup => {
                reply.return_val = return_val(fs.lookup(request.inum, request.name()))?;
            }
            Request::Stat => match fs.stat(request.inum) {
                Ok(stat) => reply.stat = stat,
                Err(FsError::Io(e)) => return Err(e),
                Err(_) => reply.return_val = -1,
            },
            Request::Write => {
                let result = fs.write(request.inum, request.block, &request.buffer);
                reply.return_val = return_val(result.map(|_| 0))?;
            }
            Request::Read => {
                let result = fs.read(request.inum, request.block, &mut reply.buffer);
                reply.return_val = return_val(result.map(|_| 0))?;
            }
            Request::Creat => {
                let result = fs.creat(request.inum, request.ftype, request.name());
                reply.return_val = return_val(result.map(|_| 0))?;
            }
            Request::Unlink => {
                let result = fs.unlink(request.inum, request.name());
                reply.return_val = return_val(result.map(|_| 0))?;
            }
            Request::Shutdown => {
                // Acknowledge before terminating so the client unblocks.
                socket.send_to(reply.as_bytes(), addr)?;
                fs.sync()?;
                debug!("shutdown acknowledged to {addr}");
                return Ok(());
            }
            // INIT is client-side address setup; it never reaches a
            // well-behaved server and is rejected like an unknown tag.
            Request::Init => {
                error!("INIT request from {addr}");
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "INIT is not serviceable",
                ));
            }
        }
        debug!("{tag:?} inum={} -> {}", request.inum, reply.return_val);
        socket.send_to(reply.as_bytes(), addr)?;
    }
}
