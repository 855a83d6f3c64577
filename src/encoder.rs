//! Server side SOCKS5 messages written straight into a session buffer.
//!
//! Every message is written whole or not at all: when the free space of the
//! buffer is too small, an error is returned and the write cursor stays.
use std::io::{self, Write};

use crate::buffer::Buffer;
use crate::model::{Error, MethodSelection, ProtocolVersion, Result, USER_PASS_VERSION};
use crate::raw_message::*;

trait WriteSocksExt {
    fn write_u8(&mut self, v: u8) -> io::Result<()>;
    fn write_version(&mut self, version: ProtocolVersion) -> io::Result<()>;
    fn write_rep(&mut self, rep: ResponseCode) -> io::Result<()>;
    fn write_atyp(&mut self, atyp: AddrType) -> io::Result<()>;
    fn write_addr(&mut self, addr: &DstAddr) -> io::Result<()>;
}

impl<T> WriteSocksExt for T
where
    T: io::Write,
{
    fn write_u8(&mut self, v: u8) -> io::Result<()> {
        self.write_all(&[v])
    }

    fn write_version(&mut self, version: ProtocolVersion) -> io::Result<()> {
        self.write_u8(version.into())
    }

    fn write_rep(&mut self, rep: ResponseCode) -> io::Result<()> {
        self.write_u8(rep.code())
    }

    fn write_atyp(&mut self, atyp: AddrType) -> io::Result<()> {
        self.write_u8(atyp.code())
    }

    fn write_addr(&mut self, addr: &DstAddr) -> io::Result<()> {
        if let DstAddr::Domain { len, .. } = addr {
            self.write_u8(*len)?;
        }
        self.write_all(addr.as_bytes())
    }
}

/// Run `f` over exactly `required` bytes of free space, committing on success.
fn write_exact<F>(buf: &mut Buffer, required: usize, f: F) -> Result<()>
where
    F: FnOnce(&mut &mut [u8]) -> io::Result<()>,
{
    let available = buf.writable().len();
    if available < required {
        return Err(Error::buffer_exhausted(required, available));
    }
    let mut dst = &mut buf.writable()[..required];
    f(&mut dst)?;
    debug_assert!(dst.is_empty());
    buf.advance_write(required);
    Ok(())
}

/// VER METHOD
pub fn write_method_selection(buf: &mut Buffer, selection: MethodSelection) -> Result<()> {
    write_exact(buf, 2, |w| {
        w.write_version(selection.version)?;
        w.write_u8(AuthMethods::from(selection.method).code())
    })
}

/// RFC1929 VER STATUS
pub fn write_auth_status(buf: &mut Buffer, status: AuthStatus) -> Result<()> {
    write_exact(buf, 2, |w| {
        w.write_u8(USER_PASS_VERSION)?;
        w.write_u8(status.code())
    })
}

/// VER REP RSV ATYP BND.ADDR BND.PORT
pub fn write_reply(buf: &mut Buffer, reply: &Reply) -> Result<()> {
    write_exact(buf, reply.wire_len(), |w| {
        w.write_version(crate::model::DEFAULT_PROTOCOL_VERSION)?;
        w.write_rep(reply.rep)?;
        w.write_u8(RESERVED)?;
        w.write_atyp(reply.addr.atyp())?;
        w.write_addr(&reply.addr)?;
        w.write_all(&reply.port)
    })
}

/// Client side messages, for driving the proxy in tests
#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::model::{Address, DEFAULT_PROTOCOL_VERSION};

    pub fn greeting(methods: &[u8]) -> Vec<u8> {
        let mut msg = vec![];
        msg.write_version(DEFAULT_PROTOCOL_VERSION).unwrap();
        msg.write_u8(methods.len() as u8).unwrap();
        msg.write_all(methods).unwrap();
        msg
    }

    pub fn user_pass_request(user: &str, pass: &str) -> Vec<u8> {
        let mut msg = vec![];
        msg.write_u8(USER_PASS_VERSION).unwrap();
        msg.write_u8(user.len() as u8).unwrap();
        msg.write_all(user.as_bytes()).unwrap();
        msg.write_u8(pass.len() as u8).unwrap();
        msg.write_all(pass.as_bytes()).unwrap();
        msg
    }

    pub fn request(cmd: SockCommand, dst: &Address) -> Vec<u8> {
        let (addr, port) = match dst {
            Address::IpAddr(ip, port) => (DstAddr::from(*ip), *port),
            Address::Domain(name, port) => (DstAddr::domain(name.as_bytes()).unwrap(), *port),
        };
        let mut msg = vec![];
        msg.write_version(DEFAULT_PROTOCOL_VERSION).unwrap();
        msg.write_u8(cmd as u8).unwrap();
        msg.write_u8(RESERVED).unwrap();
        msg.write_atyp(addr.atyp()).unwrap();
        msg.write_addr(&addr).unwrap();
        msg.write_all(&port.to_be_bytes()).unwrap();
        msg
    }

    pub fn connect_request(dst: &Address) -> Vec<u8> {
        request(SockCommand::Connect, dst)
    }
}
