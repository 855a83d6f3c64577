use std::convert::TryFrom;

use super::{Invalid, Parser, Progress};
use crate::model::{self, DEFAULT_PROTOCOL_VERSION};
use crate::raw_message::{AddrType, DstAddr, Request, SockCommand, MAX_DOMAIN_LEN, RESERVED};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ver,
    Cmd,
    Rsv,
    Atyp,
    /// fixed size address, `filled` bytes so far
    Ip { filled: usize },
    DomainLen,
    DomainName { filled: usize },
    Port { filled: usize },
    Done,
    Error(Invalid),
}

/// VER CMD RSV ATYP DST.ADDR DST.PORT
#[derive(Debug)]
pub struct RequestParser {
    state: State,
    cmd: SockCommand,
    atyp: AddrType,
    addr: [u8; 16],
    domain: [u8; MAX_DOMAIN_LEN + 1],
    domain_len: usize,
    port: [u8; 2],
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: State::Ver,
            cmd: SockCommand::Connect,
            atyp: AddrType::V4,
            addr: [0; 16],
            domain: [0; MAX_DOMAIN_LEN + 1],
            domain_len: 0,
            port: [0; 2],
        }
    }

    fn ip_len(&self) -> usize {
        match self.atyp {
            AddrType::V6 => 16,
            _ => 4,
        }
    }

    fn dst_addr(&self) -> DstAddr {
        match self.atyp {
            AddrType::V4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&self.addr[..4]);
                DstAddr::V4(octets)
            }
            AddrType::V6 => DstAddr::V6(self.addr),
            AddrType::Domain => DstAddr::Domain {
                name: self.domain,
                len: self.domain_len as u8,
            },
        }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for RequestParser {
    type Output = Request;

    #[cfg(test)]
    fn init(&mut self) {
        *self = Self::new();
    }

    fn feed(&mut self, byte: u8) -> Progress {
        use State::*;
        let state = self.state;
        self.state = match state {
            Ver if byte == u8::from(DEFAULT_PROTOCOL_VERSION) => Cmd,
            Ver => Error(Invalid::new("version", byte)),
            Cmd => match SockCommand::try_from(byte) {
                Ok(cmd) => {
                    self.cmd = cmd;
                    Rsv
                }
                Err(_) => Error(Invalid::new("command", byte)),
            },
            Rsv if byte == RESERVED => Atyp,
            Rsv => Error(Invalid::new("reserved", byte)),
            Atyp => match AddrType::try_from(byte) {
                Ok(atyp) => {
                    self.atyp = atyp;
                    if atyp == AddrType::Domain {
                        DomainLen
                    } else {
                        Ip { filled: 0 }
                    }
                }
                Err(_) => Error(Invalid::new("address type", byte)),
            },
            Ip { filled } => {
                self.addr[filled] = byte;
                if filled + 1 == self.ip_len() {
                    Port { filled: 0 }
                } else {
                    Ip { filled: filled + 1 }
                }
            }
            DomainLen => {
                self.domain_len = byte as usize;
                if byte == 0 {
                    Port { filled: 0 }
                } else {
                    DomainName { filled: 0 }
                }
            }
            DomainName { filled } => {
                self.domain[filled] = byte;
                if filled + 1 == self.domain_len {
                    self.domain[self.domain_len] = 0;
                    Port { filled: 0 }
                } else {
                    DomainName { filled: filled + 1 }
                }
            }
            Port { filled } => {
                self.port[filled] = byte;
                if filled == 1 {
                    Done
                } else {
                    Port { filled: 1 }
                }
            }
            Done | Error(_) => state,
        };
        match self.state {
            Done => Progress::Done,
            Error(_) => Progress::Error,
            _ => Progress::NeedMore,
        }
    }

    fn output(&self) -> Option<Request> {
        match self.state {
            State::Done => Some(Request {
                cmd: self.cmd,
                addr: self.dst_addr(),
                port: self.port,
            }),
            _ => None,
        }
    }

    fn error(&self) -> model::Error {
        match self.state {
            State::Error(invalid) => invalid.to_error(),
            _ => model::Error::message_fmt(format_args!("request not failed")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::Buffer;
    use crate::encoder::test_util::connect_request;
    use crate::model::Address;

    fn parse(bytes: &[u8]) -> (Progress, Option<Request>, usize) {
        let mut buf = Buffer::new(1024);
        buf.write_slice(bytes);
        let mut parser = RequestParser::new();
        let progress = parser.run(&mut buf);
        (progress, parser.output(), buf.len())
    }

    #[test]
    fn ipv4_connect() {
        let (progress, req, left) = parse(&[5, 1, 0, 1, 127, 0, 0, 1, 0x1f, 0x90]);
        assert_eq!(progress, Progress::Done);
        assert_eq!(left, 0);
        let req = req.unwrap();
        assert_eq!(req.cmd, SockCommand::Connect);
        assert_eq!(req.socket_addr(), Some("127.0.0.1:8080".parse().unwrap()));
    }

    #[test]
    fn ipv6_connect() {
        let addr: Address = "[2001:db8::1]:443".parse().unwrap();
        let (progress, req, _) = parse(&connect_request(&addr));
        assert_eq!(progress, Progress::Done);
        assert_eq!(req.unwrap().address(), addr);
    }

    #[test]
    fn domain_every_length() {
        for len in [0usize, 1, 63, 254, 255] {
            let name = "a".repeat(len);
            let mut msg = vec![5, 1, 0, 3, len as u8];
            msg.extend_from_slice(name.as_bytes());
            msg.extend_from_slice(&[0x00, 0x50]);
            // pipelined garbage is left untouched
            msg.push(0xaa);

            let (progress, req, left) = parse(&msg);
            assert_eq!(progress, Progress::Done, "len {}", len);
            assert_eq!(left, 1, "len {}", len);
            let req = req.unwrap();
            assert_eq!(req.addr.as_bytes(), name.as_bytes());
            assert_eq!(req.port(), 80);
        }
    }

    #[test]
    fn truncated_resumes() {
        let msg = connect_request(&Address::Domain("example.com".into(), 443));
        let mut buf = Buffer::new(64);
        let mut parser = RequestParser::new();
        for chunk in msg.chunks(3) {
            assert_eq!(parser.output(), None);
            buf.write_slice(chunk);
            let progress = parser.run(&mut buf);
            if buf.is_empty() && progress == Progress::NeedMore {
                continue;
            }
            assert_eq!(progress, Progress::Done);
        }
        assert_eq!(
            parser.output().unwrap().address(),
            Address::Domain("example.com".into(), 443)
        );
    }

    #[test]
    fn rejects() {
        // version
        assert_eq!(parse(&[4, 1, 0, 1]).0, Progress::Error);
        // command
        assert_eq!(parse(&[5, 4, 0, 1]).0, Progress::Error);
        // reserved
        assert_eq!(parse(&[5, 1, 1, 1]).0, Progress::Error);
        // address type
        assert_eq!(parse(&[5, 1, 0, 2]).0, Progress::Error);
    }

    #[test]
    fn bind_and_udp_are_parsed() {
        let (_, req, _) = parse(&[5, 2, 0, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(req.unwrap().cmd, SockCommand::Bind);
        let (_, req, _) = parse(&[5, 3, 0, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(req.unwrap().cmd, SockCommand::UdpAssociate);
    }
}
