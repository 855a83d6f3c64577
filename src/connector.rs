use std::io;
use std::net::SocketAddr;

use log::*;
use mio::net::TcpStream;
use nix::errno::Errno;
use socket2::{Domain, Protocol, Socket, Type};

use crate::model::ConnectError;

/// Opens outbound connections without blocking the event loop
pub trait Connector: Send + 'static {
    /// Begin connecting to `addr`.
    /// The returned stream may still be connecting, see [`connect_outcome`].
    fn connect(&self, addr: SocketAddr) -> Result<TcpStream, ConnectError>;
}

#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, addr: SocketAddr) -> Result<TcpStream, ConnectError> {
        let sock = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|err| connect_error(&err))?;
        sock.set_nonblocking(true)
            .map_err(|err| connect_error(&err))?;
        match sock.connect(&addr.into()) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => {
                trace!("connect in progress: {}", addr);
            }
            Err(err) => {
                debug!("connect error: {}: {}", addr, err);
                return Err(connect_error(&err));
            }
        }
        Ok(TcpStream::from_std(sock.into()))
    }
}

/// Check a connecting stream after it became writable.
///
/// Returns the local (bound) address once connected, `Ok(None)` while the
/// connection is still in progress.
pub fn connect_outcome(strm: &TcpStream) -> Result<Option<SocketAddr>, ConnectError> {
    if let Ok(Some(err)) | Err(err) = strm.take_error() {
        return Err(connect_error(&err));
    }
    match strm.peer_addr() {
        Ok(_) => strm
            .local_addr()
            .map(Some)
            .map_err(|err| connect_error(&err)),
        Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(None),
        Err(err) if err.raw_os_error() == Some(libc::EINPROGRESS) => Ok(None),
        Err(err) => Err(connect_error(&err)),
    }
}

/// Reply status for a failed connect
pub fn connect_error(err: &io::Error) -> ConnectError {
    err.raw_os_error()
        .map_or(ConnectError::ServerFailure, |errno| {
            errno_to_cerr(Errno::from_i32(errno))
        })
}

pub fn errno_to_cerr(errno: Errno) -> ConnectError {
    use ConnectError::*;
    match errno {
        Errno::ENETUNREACH | Errno::ENETDOWN => NetworkUnreachable,
        Errno::EHOSTUNREACH | Errno::EHOSTDOWN => HostUnreachable,
        Errno::ECONNREFUSED => ConnectionRefused,
        Errno::ETIMEDOUT => TtlExpired,
        Errno::EACCES | Errno::EPERM => ConnectionNotAllowed,
        Errno::EAFNOSUPPORT => AddrTypeNotSupported,
        _ => ServerFailure,
    }
}

#[cfg(test)]
pub mod test {
    use super::*;
    use std::collections::BTreeMap;
    use std::iter::FromIterator;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    /// Connects to a replacement address for listed destinations and records
    /// every attempt.
    #[derive(Debug, Clone, Default)]
    pub struct RedirectConnector {
        pub routes: BTreeMap<SocketAddr, Result<SocketAddr, ConnectError>>,
        pub attempts: Arc<Mutex<Vec<SocketAddr>>>,
    }

    impl FromIterator<(SocketAddr, Result<SocketAddr, ConnectError>)> for RedirectConnector {
        fn from_iter<T>(iter: T) -> Self
        where
            T: IntoIterator<Item = (SocketAddr, Result<SocketAddr, ConnectError>)>,
        {
            Self {
                routes: iter.into_iter().collect(),
                attempts: Arc::default(),
            }
        }
    }

    impl RedirectConnector {
        pub fn attempts(&self) -> Vec<SocketAddr> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl Connector for RedirectConnector {
        fn connect(&self, addr: SocketAddr) -> Result<TcpStream, ConnectError> {
            println!("connect: {}", addr);
            self.attempts.lock().unwrap().push(addr);
            match self.routes.get(&addr) {
                Some(Ok(to)) => TcpConnector.connect(*to),
                Some(Err(cerr)) => Err(*cerr),
                None => TcpConnector.connect(addr),
            }
        }
    }

    fn wait_outcome(strm: &TcpStream) -> Result<SocketAddr, ConnectError> {
        for _ in 0..200 {
            if let Some(local) = connect_outcome(strm)? {
                return Ok(local);
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("connect did not finish");
    }

    #[test]
    fn errno_table() {
        use ConnectError::*;
        assert_eq!(errno_to_cerr(Errno::ENETUNREACH), NetworkUnreachable);
        assert_eq!(errno_to_cerr(Errno::ENETDOWN), NetworkUnreachable);
        assert_eq!(errno_to_cerr(Errno::EHOSTUNREACH), HostUnreachable);
        assert_eq!(errno_to_cerr(Errno::EHOSTDOWN), HostUnreachable);
        assert_eq!(errno_to_cerr(Errno::ECONNREFUSED), ConnectionRefused);
        assert_eq!(errno_to_cerr(Errno::ETIMEDOUT), TtlExpired);
        assert_eq!(errno_to_cerr(Errno::EACCES), ConnectionNotAllowed);
        assert_eq!(errno_to_cerr(Errno::EPERM), ConnectionNotAllowed);
        assert_eq!(errno_to_cerr(Errno::EAFNOSUPPORT), AddrTypeNotSupported);
        assert_eq!(errno_to_cerr(Errno::EBADF), ServerFailure);
    }

    #[test]
    fn io_error_without_errno() {
        let err = io::Error::new(io::ErrorKind::Other, "no errno");
        assert_eq!(connect_error(&err), ConnectError::ServerFailure);
        let err = io::Error::from_raw_os_error(libc::ECONNREFUSED);
        assert_eq!(connect_error(&err), ConnectError::ConnectionRefused);
    }

    #[test]
    fn connect_loopback() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let strm = TcpConnector.connect(addr).unwrap();
        let local = wait_outcome(&strm).unwrap();
        assert_eq!(local.ip(), addr.ip());
        let (_, peer) = listener.accept().unwrap();
        assert_eq!(peer, local);
    }

    #[test]
    fn connect_refused() {
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let res = TcpConnector
            .connect(addr)
            .and_then(|strm| wait_outcome(&strm));
        assert_eq!(res, Err(ConnectError::ConnectionRefused));
    }
}
