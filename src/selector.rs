//! Interest bookkeeping between sessions and the mio registry.
use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::ops::{BitAnd, BitOr, Not};

use log::*;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

/// Set of readiness a socket waits for; empty means not registered
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Ops(u8);

impl Ops {
    pub const NOOP: Ops = Ops(0);
    pub const READ: Ops = Ops(1);
    pub const WRITE: Ops = Ops(1 << 1);
    pub const READ_WRITE: Ops = Ops(1 | 1 << 1);

    pub fn contains(self, other: Ops) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn to_mio(self) -> Option<Interest> {
        match (self.contains(Ops::READ), self.contains(Ops::WRITE)) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

impl BitOr for Ops {
    type Output = Ops;
    fn bitor(self, rhs: Ops) -> Ops {
        Ops(self.0 | rhs.0)
    }
}

impl BitAnd for Ops {
    type Output = Ops;
    fn bitand(self, rhs: Ops) -> Ops {
        Ops(self.0 & rhs.0)
    }
}

impl Not for Ops {
    type Output = Ops;
    fn not(self) -> Ops {
        Ops(!self.0 & Ops::READ_WRITE.0)
    }
}

impl fmt::Debug for Ops {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.contains(Ops::READ), self.contains(Ops::WRITE)) {
            (true, true) => write!(f, "RW"),
            (true, false) => write!(f, "R"),
            (false, true) => write!(f, "W"),
            (false, false) => write!(f, "-"),
        }
    }
}

/// Which socket of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// A socket of a session with its token and current interest
pub struct Endpoint {
    pub stream: TcpStream,
    pub addr: SocketAddr,
    token: Token,
    interest: Ops,
    registered: bool,
}

impl Endpoint {
    pub fn new(stream: TcpStream, addr: SocketAddr, token: Token) -> Self {
        Self {
            stream,
            addr,
            token,
            interest: Ops::NOOP,
            registered: false,
        }
    }

    /// Register, reregister or deregister so that the registry matches `ops`.
    ///
    /// Reregistering also re-arms the edge triggered notification.
    pub fn set_interest(&mut self, registry: &Registry, ops: Ops) -> io::Result<()> {
        match (ops.to_mio(), self.registered) {
            (Some(interest), false) => {
                registry.register(&mut self.stream, self.token, interest)?;
                self.registered = true;
            }
            (Some(interest), true) => {
                registry.reregister(&mut self.stream, self.token, interest)?;
            }
            (None, true) => {
                registry.deregister(&mut self.stream)?;
                self.registered = false;
            }
            (None, false) => {}
        }
        if self.interest != ops {
            trace!("{:?} interest {:?} -> {:?}", self.token, self.interest, ops);
        }
        self.interest = ops;
        Ok(())
    }

    pub fn unregister(&mut self, registry: &Registry) {
        if self.registered {
            if let Err(err) = registry.deregister(&mut self.stream) {
                debug!("deregister {:?}: {}", self.token, err);
            }
            self.registered = false;
        }
        self.interest = Ops::NOOP;
    }

    /// Shut down one half, ignoring a peer that is already gone
    pub fn shutdown(&self, how: Shutdown) {
        if let Err(err) = self.stream.shutdown(how) {
            trace!("shutdown {:?} {:?}: {}", self.token, how, err);
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("addr", &self.addr)
            .field("token", &self.token)
            .field("interest", &self.interest)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ops_algebra() {
        let rw = Ops::READ | Ops::WRITE;
        assert_eq!(rw, Ops::READ_WRITE);
        assert!(rw.contains(Ops::READ));
        assert_eq!(rw & !Ops::READ, Ops::WRITE);
        assert_eq!(!Ops::READ_WRITE, Ops::NOOP);
        assert!(Ops::NOOP.is_empty());
        assert!(Ops::NOOP.to_mio().is_none());
        assert_eq!(Ops::WRITE.to_mio(), Some(Interest::WRITABLE));
    }

    #[test]
    fn empty_interest_deregisters() {
        let poll = mio::Poll::new().unwrap();
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let strm = TcpStream::connect(addr).unwrap();
        let mut ep = Endpoint::new(strm, addr, Token(2));

        ep.set_interest(poll.registry(), Ops::READ).unwrap();
        assert!(ep.registered);
        ep.set_interest(poll.registry(), Ops::READ_WRITE).unwrap();
        assert_eq!(ep.interest, Ops::READ_WRITE);
        ep.set_interest(poll.registry(), Ops::NOOP).unwrap();
        assert!(!ep.registered);
        // registering again after a deregistration
        ep.set_interest(poll.registry(), Ops::WRITE).unwrap();
        assert!(ep.registered);
        ep.unregister(poll.registry());
        assert!(!ep.registered);
        assert!(ep.interest.is_empty());
    }
}
