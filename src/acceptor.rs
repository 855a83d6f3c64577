use std::io;
use std::net::SocketAddr;

use log::*;
use mio::net::TcpListener;

use crate::error::Error;

// `backlog` is passed to `listen(2)` as is; a small one makes clients fail
// to `connect(2)` under load. Intended to be as large as `net.core.somaxconn`.
const BACKLOG: i32 = 256;

/// Bind a non-blocking listening socket on `addr`
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener, Error> {
    let tcp = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    tcp.set_reuse_address(true)
        .map_err(|err| addr_error(err, addr))?;
    tcp.set_nonblocking(true)?;
    tcp.bind(&addr.into())
        .map_err(|err| addr_error(err, addr))?;
    tcp.listen(BACKLOG)?;
    debug!("bound: {}", addr);
    Ok(TcpListener::from_std(tcp.into()))
}

fn addr_error(io_err: io::Error, addr: SocketAddr) -> Error {
    match io_err.kind() {
        io::ErrorKind::AddrInUse => Error::AddressAlreadyInUse { addr },
        io::ErrorKind::AddrNotAvailable => Error::AddressNotAvailable { addr },
        _ => Error::Io(io_err),
    }
}
