//! The `server` daemon: services file operations over UDP against a
//! log-structured image file.

use logfs::fs::FileSystem;
use logfs::server::serve;
use std::env;
use std::net::UdpSocket;
use std::process::exit;

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: server <port> <image-path>");
        exit(1);
    }
    let port: u16 = args[1].parse().unwrap_or_else(|_| {
        eprintln!("server: invalid port `{}`", args[1]);
        exit(1);
    });
    let image_path = &args[2];

    let mut fs = FileSystem::open(image_path).unwrap_or_else(|e| {
        eprintln!("server: {image_path}: {e}");
        exit(1);
    });
    let socket = UdpSocket::bind(("0.0.0.0", port)).unwrap_or_else(|e| {
        eprintln!("server: cannot bind port {port}: {e}");
        exit(1);
    });

    log::info!("serving {image_path} on port {port}");
    if let Err(e) = serve(&mut fs, &socket) {
        eprintln!("server: {e}");
        exit(1);
    }
}
