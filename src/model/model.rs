//! SOCKS5 message types exchanged between client and proxy.
//!
//! ```text
//! client            proxy            service
//!   |                 |                 |
//!   |---------------->|                 |
//!   |MethodCandidates |                 |
//!   |<----------------|                 |
//!   |  MethodSelection|                 |
//!   |                 |                 |
//!   |---------------->|                 |  (only if UserPass is selected)
//!   |UserPassRequest  |                 |
//!   |<----------------|                 |
//!   |     AuthStatus  |                 |
//!   |                 |                 |
//!   |---------------->|                 |
//!   |ConnectRequest   |---------------->|
//!   |                 |     connect     |
//!   |<----------------|                 |
//!   |     ConnectReply|                 |
//!   .                 .                 .
//!   | - - - - - - - ->| - - - - - - - ->|
//!   |            [[ Relay ]]            |
//!   |<- - - - - - - - |< - - - - - - - -|
//!   .                 .                 .
//! ```
//!
use std::fmt;
pub use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::str::FromStr;

use derive_more::{Display, From, Into};

pub const DEFAULT_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion(5);

/// Version of the username/password sub-negotiation (RFC1929)
pub const USER_PASS_VERSION: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Into, From, Display)]
pub struct ProtocolVersion(u8);

/// Authentication Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum Method {
    /// No Authentication
    NoAuth,
    /// GSSAPI
    GssApi,
    /// Authenticate with a username / password
    UserPass,
    /// IANA assigned method
    IANAMethod(u8),
    /// Reserved for private method
    Private(u8),
    /// No acceptable method
    NoMethods,
}

impl Method {
    /// Methods the proxy knows how to handle, strongest preference first.
    pub const PREFERENCE: [Method; 3] = [Method::NoAuth, Method::UserPass, Method::GssApi];

    /// Position in `Method::PREFERENCE`, `None` for methods never selected.
    pub fn preference(&self) -> Option<usize> {
        Self::PREFERENCE.iter().position(|m| m == self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MethodSelection {
    pub version: ProtocolVersion,
    pub method: Method,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
}

/// ip address and port
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Address {
    IpAddr(IpAddr, u16),
    Domain(String, u16),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Address::IpAddr(addr @ IpAddr::V6(_), port) => write!(f, "[{}]:{}", addr, port),
            Address::IpAddr(addr, port) => write!(f, "{}:{}", addr, port),
            Address::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

impl Address {
    pub fn port(&self) -> u16 {
        match self {
            Address::IpAddr(_, port) => *port,
            Address::Domain(_, port) => *port,
        }
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::IpAddr(addr.ip(), addr.port())
    }
}

impl FromStr for Address {
    type Err = std::net::AddrParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let addr: SocketAddr = s.parse()?;
        Ok(addr.into())
    }
}

/// Failure outcomes reported to the client in a connect reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum ConnectError {
    /// general server failure
    ServerFailure,
    ConnectionNotAllowed,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    TtlExpired,
    CommandNotSupported,
    AddrTypeNotSupported,
}

impl std::error::Error for ConnectError {}

pub type ConnectResult = std::result::Result<(), ConnectError>;
