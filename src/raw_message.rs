///! RFC1928 SOCKS Protocol Version 5 Raw Message Types
///! For each type structures correspond to SOCKS5 packet layout.
///!
use std::convert::TryFrom;
use std::fmt;
pub use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::model;

pub const RESERVED: u8 = 0x00;

/// Maximum length of a FQDN in a request
pub const MAX_DOMAIN_LEN: usize = 255;

/// Section 6. Replies > Reply field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResponseCode {
    Success = 0x00,
    Failure = 0x01,
    RuleFailure = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddrTypeNotSupported = 0x08,
}

impl From<model::ConnectResult> for ResponseCode {
    fn from(res: model::ConnectResult) -> Self {
        use model::ConnectError::*;
        match res {
            Ok(()) => ResponseCode::Success,
            Err(ServerFailure) => ResponseCode::Failure,
            Err(ConnectionNotAllowed) => ResponseCode::RuleFailure,
            Err(NetworkUnreachable) => ResponseCode::NetworkUnreachable,
            Err(HostUnreachable) => ResponseCode::HostUnreachable,
            Err(ConnectionRefused) => ResponseCode::ConnectionRefused,
            Err(TtlExpired) => ResponseCode::TtlExpired,
            Err(CommandNotSupported) => ResponseCode::CommandNotSupported,
            Err(AddrTypeNotSupported) => ResponseCode::AddrTypeNotSupported,
        }
    }
}

impl From<model::ConnectError> for ResponseCode {
    fn from(err: model::ConnectError) -> Self {
        ResponseCode::from(Err::<(), _>(err))
    }
}

impl ResponseCode {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn is_success(&self) -> bool {
        *self == ResponseCode::Success
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ResponseCode::*;
        match self {
            Success => write!(f, "succeeded"),
            Failure => write!(f, "general SOCKS server failure"),
            RuleFailure => write!(f, "connection not allowed by ruleset"),
            NetworkUnreachable => write!(f, "Network unreachable"),
            HostUnreachable => write!(f, "Host unreachable"),
            ConnectionRefused => write!(f, "Connection refused"),
            TtlExpired => write!(f, "TTL expired"),
            CommandNotSupported => write!(f, "Command not supported"),
            AddrTypeNotSupported => write!(f, "Address type not supported"),
        }
    }
}

/// RFC1929 status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Success = 0x00,
    Failure = 0x01,
}

impl AuthStatus {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Client Authentication Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthMethods {
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

impl AuthMethods {
    pub fn code(&self) -> u8 {
        use AuthMethods::*;
        match self {
            NoAuth => 0x00,
            GssApi => 0x01,
            UserPass => 0x02,
            IANAMethod(c) => *c,
            Private(c) => *c,
            NoMethods => 0xff,
        }
    }
}

impl From<AuthMethods> for model::Method {
    fn from(methods: AuthMethods) -> Self {
        use model::Method::*;
        match methods {
            AuthMethods::NoAuth => NoAuth,
            AuthMethods::GssApi => GssApi,
            AuthMethods::UserPass => UserPass,
            AuthMethods::IANAMethod(c) => IANAMethod(c),
            AuthMethods::Private(c) => Private(c),
            AuthMethods::NoMethods => NoMethods,
        }
    }
}

impl From<model::Method> for AuthMethods {
    fn from(method: model::Method) -> Self {
        use AuthMethods::*;
        match method {
            model::Method::NoAuth => NoAuth,
            model::Method::GssApi => GssApi,
            model::Method::UserPass => UserPass,
            model::Method::IANAMethod(c) => IANAMethod(c),
            model::Method::Private(c) => Private(c),
            model::Method::NoMethods => NoMethods,
        }
    }
}

impl From<u8> for AuthMethods {
    fn from(code: u8) -> Self {
        use AuthMethods::*;
        match code {
            0x00 => NoAuth,
            0x01 => GssApi,
            0x02 => UserPass,
            0x03..=0x7F => IANAMethod(code),
            0x80..=0xFE => Private(code),
            0xFF => NoMethods,
        }
    }
}

impl fmt::Display for AuthMethods {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use AuthMethods::*;
        match self {
            NoAuth => write!(f, "No Authentication Required"),
            GssApi => write!(f, "GSSAPI"),
            UserPass => write!(f, "Username/Password"),
            IANAMethod(c) => write!(f, "IANA Assigned: {:#X}", c),
            Private(c) => write!(f, "Private Methods: {:#X}", c),
            NoMethods => write!(f, "No Acceptable Methods"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TryFromU8Error {
    /// source value
    value: u8,
    /// target type
    to: String,
}

impl fmt::Display for TryFromU8Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "try from u8({:#X}) error to {}", self.value, self.to)
    }
}

impl std::error::Error for TryFromU8Error {}

/// ATYP
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddrType {
    V4 = 0x01,
    Domain = 0x03,
    V6 = 0x04,
}

impl AddrType {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for AddrType {
    type Error = TryFromU8Error;
    /// Parse Byte to AddrType
    fn try_from(n: u8) -> Result<AddrType, Self::Error> {
        match n {
            1 => Ok(AddrType::V4),
            3 => Ok(AddrType::Domain),
            4 => Ok(AddrType::V6),
            _ => Err(TryFromU8Error {
                value: n,
                to: "protocol::AddrType".to_owned(),
            }),
        }
    }
}

impl fmt::Display for AddrType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use AddrType::*;
        match self {
            V4 => write!(f, "Version4 IP Address"),
            Domain => write!(f, "Fully Qualified Domain Name"),
            V6 => write!(f, "Version6 IP Address"),
        }
    }
}

/// SOCK5 CMD Type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SockCommand {
    Connect = 0x01,
    Bind = 0x02,
    UdpAssociate = 0x3,
}

impl From<SockCommand> for model::Command {
    fn from(cmd: SockCommand) -> Self {
        use SockCommand::*;
        match cmd {
            Connect => model::Command::Connect,
            Bind => model::Command::Bind,
            UdpAssociate => model::Command::UdpAssociate,
        }
    }
}

impl TryFrom<u8> for SockCommand {
    type Error = TryFromU8Error;
    /// Parse Byte to Command
    fn try_from(n: u8) -> Result<SockCommand, Self::Error> {
        match n {
            1 => Ok(SockCommand::Connect),
            2 => Ok(SockCommand::Bind),
            3 => Ok(SockCommand::UdpAssociate),
            _ => Err(TryFromU8Error {
                value: n,
                to: "protocol::SockCommand".to_owned(),
            }),
        }
    }
}

/// DST.ADDR / BND.ADDR in wire layout
#[derive(Clone, PartialEq, Eq)]
pub enum DstAddr {
    V4([u8; 4]),
    V6([u8; 16]),
    /// `name[len]` is always 0
    Domain { name: [u8; MAX_DOMAIN_LEN + 1], len: u8 },
}

impl DstAddr {
    pub fn atyp(&self) -> AddrType {
        match self {
            DstAddr::V4(_) => AddrType::V4,
            DstAddr::V6(_) => AddrType::V6,
            DstAddr::Domain { .. } => AddrType::Domain,
        }
    }

    /// `None` if `name` is longer than 255 bytes
    #[cfg(test)]
    pub fn domain(name: &[u8]) -> Option<Self> {
        if name.len() > MAX_DOMAIN_LEN {
            return None;
        }
        let mut buf = [0u8; MAX_DOMAIN_LEN + 1];
        buf[..name.len()].copy_from_slice(name);
        Some(DstAddr::Domain {
            name: buf,
            len: name.len() as u8,
        })
    }

    /// Raw address bytes, without the FQDN length prefix
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            DstAddr::V4(octets) => octets,
            DstAddr::V6(octets) => octets,
            DstAddr::Domain { name, len } => &name[..*len as usize],
        }
    }

    /// Size on the wire, FQDN length prefix included
    pub fn wire_len(&self) -> usize {
        match self {
            DstAddr::Domain { len, .. } => 1 + *len as usize,
            other => other.as_bytes().len(),
        }
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            DstAddr::V4(octets) => Some(Ipv4Addr::from(*octets).into()),
            DstAddr::V6(octets) => Some(Ipv6Addr::from(*octets).into()),
            DstAddr::Domain { .. } => None,
        }
    }
}

impl From<IpAddr> for DstAddr {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => DstAddr::V4(v4.octets()),
            IpAddr::V6(v6) => DstAddr::V6(v6.octets()),
        }
    }
}

impl fmt::Debug for DstAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.ip() {
            Some(ip) => write!(f, "{:?}", ip),
            None => write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes())),
        }
    }
}

/// Parsed client request; the port is kept in network order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub cmd: SockCommand,
    pub addr: DstAddr,
    pub port: [u8; 2],
}

impl Request {
    pub fn port(&self) -> u16 {
        u16::from_be_bytes(self.port)
    }

    /// Destination in model form. Non UTF-8 domain names are converted lossily.
    pub fn address(&self) -> model::Address {
        match self.addr.ip() {
            Some(ip) => model::Address::IpAddr(ip, self.port()),
            None => model::Address::Domain(
                String::from_utf8_lossy(self.addr.as_bytes()).into_owned(),
                self.port(),
            ),
        }
    }

    /// `Some` only for IP literal destinations
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.addr.ip().map(|ip| SocketAddr::new(ip, self.port()))
    }
}

/// Reply to a request: outcome plus bound (or echoed) address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub rep: ResponseCode,
    pub addr: DstAddr,
    pub port: [u8; 2],
}

impl Reply {
    /// Reply carrying the address of the request
    pub fn echo(req: &Request, rep: ResponseCode) -> Self {
        Reply {
            rep,
            addr: req.addr.clone(),
            port: req.port,
        }
    }

    /// Reply carrying the local address of the outbound connection
    pub fn bound(rep: ResponseCode, addr: SocketAddr) -> Self {
        Reply {
            rep,
            addr: addr.ip().into(),
            port: addr.port().to_be_bytes(),
        }
    }

    /// VER REP RSV ATYP BND.ADDR BND.PORT
    pub fn wire_len(&self) -> usize {
        4 + self.addr.wire_len() + 2
    }
}
