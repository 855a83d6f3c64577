//! Per connection state machine, from the greeting to the relay.
//!
//! ```text
//! ConnRead -> ConnWrite -+-> AuthRead -> AuthWrite -+
//!                        |                          |
//!                        +--------------------------+-> ReqRead
//!                                                         |
//!        +-------------------+----------------------------+
//!        |                   |                            |
//!   ReqResolve ----> ReqConnect ----> ReqWrite <----------+ (unsupported)
//!        |                   ^  |        |
//!        +-------------------|--+--------+--> Copy --> Done
//!                            +--+ (next candidate)
//! ```
//!
//! Every state owns the data it needs. Entering a read state first parses
//! what is already buffered, since clients may pipeline messages.
use std::fmt;
use std::io::{self, Read, Write};
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;

use log::*;
use mio::net::TcpStream;
use mio::{Registry, Token};

use crate::auth_service::AuthService;
use crate::buffer::Buffer;
use crate::connector::{connect_outcome, Connector};
use crate::encoder::{write_auth_status, write_method_selection, write_reply};
use crate::metrics::Stats;
use crate::model::{ConnectError, Error, Method, Result};
use crate::parser::{AuthParser, NegotiationParser, Parser, Progress, RequestParser};
use crate::raw_message::{AuthStatus, Reply, Request, ResponseCode, SockCommand};
use crate::relay::{Link, Relay};
use crate::resolver::{spawn_resolution, AddressChain, Notifier, PendingResolution, Resolver};
use crate::selector::{Endpoint, Ops, Side};
use crate::sniffer::{Pop3Sniffer, SnifferSwitch, POP3_PORT};

/// Token of the listening socket
pub const LISTENER: Token = Token(0);
/// Token of the loop waker
pub const WAKER: Token = Token(1);
const FIRST_SESSION_TOKEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u32);

impl From<u32> for SessionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

impl SessionId {
    /// Each session owns two consecutive tokens, client first
    pub fn token(self, side: Side) -> Token {
        let base = FIRST_SESSION_TOKEN + 2 * self.0 as usize;
        match side {
            Side::Client => Token(base),
            Side::Server => Token(base + 1),
        }
    }

    pub fn from_token(token: Token) -> Option<(SessionId, Side)> {
        let n = token.0.checked_sub(FIRST_SESSION_TOKEN)?;
        let side = if n % 2 == 0 { Side::Client } else { Side::Server };
        Some((SessionId((n / 2) as u32), side))
    }
}

/// What woke a session up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Readable(Side),
    Writable(Side),
    /// off-loop work finished
    Unblock,
}

/// Process wide collaborators shared by every session
pub struct Services<C, R> {
    pub connector: C,
    pub resolver: R,
    pub auth: Arc<dyn AuthService>,
    pub stats: Arc<Stats>,
    pub sniffer: Arc<SnifferSwitch>,
    pub notifier: Notifier,
    /// capacity of each direction's buffer
    pub buffer_size: usize,
}

enum State {
    ConnRead(NegotiationParser),
    ConnWrite {
        method: Method,
    },
    AuthRead(AuthParser),
    AuthWrite {
        accepted: bool,
    },
    ReqRead(RequestParser),
    ReqResolve {
        request: Request,
        pending: PendingResolution,
    },
    ReqConnect {
        request: Request,
        chain: AddressChain,
        target: SocketAddr,
    },
    ReqWrite {
        request: Request,
        rep: ResponseCode,
    },
    Copy(Relay),
    Error,
    Done,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::ConnRead(_) => "CONN_READ",
            State::ConnWrite { .. } => "CONN_WRITE",
            State::AuthRead(_) => "AUTH_READ",
            State::AuthWrite { .. } => "AUTH_WRITE",
            State::ReqRead(_) => "REQ_READ",
            State::ReqResolve { .. } => "REQ_RESOLVE",
            State::ReqConnect { .. } => "REQ_CONNECT",
            State::ReqWrite { .. } => "REQ_WRITE",
            State::Copy(_) => "COPY",
            State::Error => "ERROR",
            State::Done => "DONE",
        }
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event loop side of a step: where to register, and the shared services
pub struct Context<'a, C, R> {
    pub registry: &'a Registry,
    pub services: &'a Services<C, R>,
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: State,
    client: Endpoint,
    server: Option<Endpoint>,
    /// client -> server
    upstream: Buffer,
    /// server -> client
    downstream: Buffer,
    /// authenticated user name
    user: Option<String>,
}

impl Session {
    pub fn new(id: SessionId, stream: TcpStream, addr: SocketAddr, buffer_size: usize) -> Self {
        Self {
            id,
            state: State::Done,
            client: Endpoint::new(stream, addr, id.token(Side::Client)),
            server: None,
            upstream: Buffer::new(buffer_size),
            downstream: Buffer::new(buffer_size),
            user: None,
        }
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client.addr
    }

    /// Terminal states; the session can be dropped
    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Error | State::Done)
    }

    pub fn state_name(&self) -> &'static str {
        self.state.name()
    }

    /// Wait for the client greeting
    pub fn start<C, R>(&mut self, ctx: &Context<C, R>)
    where
        C: Connector,
        R: Resolver,
    {
        let parser = NegotiationParser::new(ctx.services.auth.acceptable_methods());
        self.state = match self.client.set_interest(ctx.registry, Ops::READ) {
            Ok(()) => State::ConnRead(parser),
            Err(err) => {
                error!("{}: register error: {}", self.id, err);
                State::Error
            }
        };
    }

    /// Drive the state machine with one event
    pub fn handle<C, R>(&mut self, ev: Event, ctx: &Context<C, R>)
    where
        C: Connector,
        R: Resolver,
    {
        let state = mem::replace(&mut self.state, State::Done);
        let before = state.name();
        let next = match self.step(state, ev, ctx) {
            Ok(next) => next,
            Err(err) => {
                debug!("{}: {} error: {}", self.id, before, err);
                State::Error
            }
        };
        if next.name() != before {
            debug!("{}: {} -> {}", self.id, before, next.name());
        }
        self.state = next;
    }

    /// Deregister and close both sockets
    pub fn close(&mut self, registry: &Registry) {
        self.client.unregister(registry);
        if let Some(server) = self.server.as_mut() {
            server.unregister(registry);
        }
        self.server = None;
    }

    fn step<C, R>(&mut self, state: State, ev: Event, ctx: &Context<C, R>) -> Result<State>
    where
        C: Connector,
        R: Resolver,
    {
        use Event::*;
        use Side::*;
        match (state, ev) {
            (State::ConnRead(parser), Readable(Client)) => {
                let closed = self.recv_client()?;
                self.conn_parse(parser, closed, ctx)
            }
            (State::ConnWrite { method }, Writable(Client)) => self.conn_write(method, ctx),
            (State::AuthRead(parser), Readable(Client)) => {
                let closed = self.recv_client()?;
                self.auth_parse(parser, closed, ctx)
            }
            (State::AuthWrite { accepted }, Writable(Client)) => self.auth_write(accepted, ctx),
            (State::ReqRead(parser), Readable(Client)) => {
                let closed = self.recv_client()?;
                self.req_parse(parser, closed, ctx)
            }
            (State::ReqResolve { request, pending }, Unblock) => {
                self.req_resolve(request, pending, ctx)
            }
            (
                State::ReqConnect {
                    request,
                    chain,
                    target,
                },
                Writable(Server),
            ) => self.req_connect(request, chain, target, ctx),
            (State::ReqWrite { request, rep }, Writable(Client)) => {
                self.req_write(request, rep, ctx)
            }
            (State::Copy(mut relay), Readable(side)) => {
                relay.on_read(side, &mut self.link(ctx)?)?;
                Ok(self.copy_next(relay))
            }
            (State::Copy(mut relay), Writable(side)) => {
                relay.on_write(side, &mut self.link(ctx)?)?;
                Ok(self.copy_next(relay))
            }
            (state, ev) => {
                trace!("{}: {:?} ignored in {}", self.id, ev, state.name());
                Ok(state)
            }
        }
    }

    /// Read what the client sent into the upstream buffer.
    /// Returns true once the client closed its side.
    fn recv_client(&mut self) -> Result<bool> {
        while self.upstream.can_write() {
            match self.client.stream.read(self.upstream.writable()) {
                Ok(0) => return Ok(true),
                Ok(n) => self.upstream.advance_write(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(false)
    }

    /// Send the downstream buffer to the client. Returns true once drained.
    fn send_client(&mut self) -> Result<bool> {
        while self.downstream.can_read() {
            match self.client.stream.write(self.downstream.readable()) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => self.downstream.advance_read(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(self.downstream.is_empty())
    }

    fn client_interest<C, R>(&mut self, ctx: &Context<C, R>, ops: Ops) -> Result<()> {
        self.client.set_interest(ctx.registry, ops)?;
        Ok(())
    }

    /// Parser ran out of input: wait for more, unless the client is gone
    fn need_more<C, R>(&mut self, closed: bool, ctx: &Context<C, R>) -> Result<()> {
        if closed {
            return Err(Error::PeerClosed {
                peer: self.client.addr,
            });
        }
        self.client_interest(ctx, Ops::READ)
    }

    fn conn_parse<C, R>(
        &mut self,
        mut parser: NegotiationParser,
        closed: bool,
        ctx: &Context<C, R>,
    ) -> Result<State>
    where
        C: Connector,
        R: Resolver,
    {
        match parser.run(&mut self.upstream) {
            Progress::Done => {
                let selection = parser
                    .output()
                    .ok_or_else(|| Error::message_fmt(format_args!("no method selection")))?;
                debug!("{}: method {}", self.id, selection.method);
                write_method_selection(&mut self.downstream, selection)?;
                self.client_interest(ctx, Ops::WRITE)?;
                Ok(State::ConnWrite {
                    method: selection.method,
                })
            }
            Progress::Error => Err(parser.error()),
            Progress::NeedMore => {
                self.need_more(closed, ctx)?;
                Ok(State::ConnRead(parser))
            }
        }
    }

    fn conn_write<C, R>(&mut self, method: Method, ctx: &Context<C, R>) -> Result<State>
    where
        C: Connector,
        R: Resolver,
    {
        if !self.send_client()? {
            return Ok(State::ConnWrite { method });
        }
        match method {
            Method::NoAuth => self.enter_req_read(ctx),
            Method::UserPass => {
                self.client_interest(ctx, Ops::READ)?;
                self.auth_parse(AuthParser::new(), false, ctx)
            }
            Method::GssApi => {
                info!("{}: GSSAPI is not supported, closing", self.id);
                Ok(State::Done)
            }
            _ => {
                info!("{}: {}, closing", self.id, Error::NoAcceptableMethod);
                Ok(State::Done)
            }
        }
    }

    fn auth_parse<C, R>(
        &mut self,
        mut parser: AuthParser,
        closed: bool,
        ctx: &Context<C, R>,
    ) -> Result<State>
    where
        C: Connector,
        R: Resolver,
    {
        match parser.run(&mut self.upstream) {
            Progress::Done => {
                let creds = parser
                    .output()
                    .ok_or_else(|| Error::message_fmt(format_args!("no credentials")))?;
                let accepted = ctx
                    .services
                    .auth
                    .authenticate(&creds.username, &creds.password)?;
                let status = if accepted {
                    debug!("{}: authenticated: {}", self.id, creds.username);
                    self.user = Some(creds.username);
                    AuthStatus::Success
                } else {
                    info!(
                        "{}: {}",
                        self.id,
                        Error::UnrecognizedUsernamePassword
                    );
                    AuthStatus::Failure
                };
                write_auth_status(&mut self.downstream, status)?;
                self.client_interest(ctx, Ops::WRITE)?;
                Ok(State::AuthWrite { accepted })
            }
            Progress::Error => Err(parser.error()),
            Progress::NeedMore => {
                self.need_more(closed, ctx)?;
                Ok(State::AuthRead(parser))
            }
        }
    }

    fn auth_write<C, R>(&mut self, accepted: bool, ctx: &Context<C, R>) -> Result<State>
    where
        C: Connector,
        R: Resolver,
    {
        if !self.send_client()? {
            return Ok(State::AuthWrite { accepted });
        }
        if accepted {
            self.enter_req_read(ctx)
        } else {
            Ok(State::Done)
        }
    }

    fn enter_req_read<C, R>(&mut self, ctx: &Context<C, R>) -> Result<State>
    where
        C: Connector,
        R: Resolver,
    {
        self.client_interest(ctx, Ops::READ)?;
        self.req_parse(RequestParser::new(), false, ctx)
    }

    fn req_parse<C, R>(
        &mut self,
        mut parser: RequestParser,
        closed: bool,
        ctx: &Context<C, R>,
    ) -> Result<State>
    where
        C: Connector,
        R: Resolver,
    {
        match parser.run(&mut self.upstream) {
            Progress::Done => {
                let request = parser
                    .output()
                    .ok_or_else(|| Error::message_fmt(format_args!("no request")))?;
                debug!("{}: request {:?} {}", self.id, request.cmd, request.address());
                self.dispatch(request, ctx)
            }
            Progress::Error => Err(parser.error()),
            Progress::NeedMore => {
                self.need_more(closed, ctx)?;
                Ok(State::ReqRead(parser))
            }
        }
    }

    fn dispatch<C, R>(&mut self, request: Request, ctx: &Context<C, R>) -> Result<State>
    where
        C: Connector,
        R: Resolver,
    {
        if request.cmd != SockCommand::Connect {
            let err = Error::command_not_supported(request.cmd.into());
            info!("{}: {}", self.id, err);
            return self.reply_error(request, err.cerr(), ctx);
        }
        if let Some(addr) = request.socket_addr() {
            return self.start_connect(request, AddressChain::new(Some(addr)), ctx);
        }

        let host = String::from_utf8_lossy(request.addr.as_bytes()).into_owned();
        let spawned = spawn_resolution(
            &ctx.services.resolver,
            host,
            request.port(),
            self.id,
            ctx.services.notifier.clone(),
        );
        match spawned {
            Ok(pending) => {
                // nothing to do on the client until the lookup is over
                self.client_interest(ctx, Ops::NOOP)?;
                Ok(State::ReqResolve { request, pending })
            }
            Err(err) => {
                error!("{}: resolver error: {}", self.id, err);
                self.reply_error(request, err.cerr(), ctx)
            }
        }
    }

    fn req_resolve<C, R>(
        &mut self,
        request: Request,
        pending: PendingResolution,
        ctx: &Context<C, R>,
    ) -> Result<State>
    where
        C: Connector,
        R: Resolver,
    {
        match pending.try_take() {
            None => Ok(State::ReqResolve { request, pending }),
            Some(Ok(addrs)) if !addrs.is_empty() => {
                self.start_connect(request, AddressChain::new(addrs), ctx)
            }
            Some(res) => {
                let err = Error::DomainNotResolved {
                    domain: String::from_utf8_lossy(request.addr.as_bytes()).into_owned(),
                    port: request.port(),
                };
                if let Err(io_err) = res {
                    debug!("{}: {}: {}", self.id, err, io_err);
                }
                info!("{}: {}", self.id, err);
                self.reply_error(request, err.cerr(), ctx)
            }
        }
    }

    /// Try the candidates in order until one starts connecting
    fn start_connect<C, R>(
        &mut self,
        request: Request,
        mut chain: AddressChain,
        ctx: &Context<C, R>,
    ) -> Result<State>
    where
        C: Connector,
        R: Resolver,
    {
        let mut last = ConnectError::HostUnreachable;
        while let Some(target) = chain.next_candidate() {
            match ctx.services.connector.connect(target) {
                Ok(stream) => {
                    trace!("{}: connecting to {}", self.id, target);
                    let mut server = Endpoint::new(stream, target, self.id.token(Side::Server));
                    server.set_interest(ctx.registry, Ops::WRITE)?;
                    self.server = Some(server);
                    self.client_interest(ctx, Ops::NOOP)?;
                    return Ok(State::ReqConnect {
                        request,
                        chain,
                        target,
                    });
                }
                Err(cerr) => {
                    debug!("{}: {}", self.id, Error::Connect { addr: target, cerr });
                    last = cerr;
                }
            }
        }
        self.connect_failed(request, last, ctx)
    }

    fn req_connect<C, R>(
        &mut self,
        request: Request,
        chain: AddressChain,
        target: SocketAddr,
        ctx: &Context<C, R>,
    ) -> Result<State>
    where
        C: Connector,
        R: Resolver,
    {
        let server = match self.server.as_mut() {
            Some(server) => server,
            None => return Err(Error::message_fmt(format_args!("no server socket"))),
        };
        match connect_outcome(&server.stream) {
            Ok(None) => Ok(State::ReqConnect {
                request,
                chain,
                target,
            }),
            Ok(Some(bound)) => {
                debug!("{}: connected to {} from {}", self.id, target, bound);
                server.set_interest(ctx.registry, Ops::NOOP)?;
                let reply = Reply::bound(ResponseCode::Success, bound);
                write_reply(&mut self.downstream, &reply)?;
                self.client_interest(ctx, Ops::WRITE)?;
                Ok(State::ReqWrite {
                    request,
                    rep: reply.rep,
                })
            }
            Err(cerr) => {
                debug!("{}: {}", self.id, Error::Connect { addr: target, cerr });
                server.unregister(ctx.registry);
                self.server = None;
                if chain.is_empty() {
                    self.connect_failed(request, cerr, ctx)
                } else {
                    self.start_connect(request, chain, ctx)
                }
            }
        }
    }

    /// Every candidate failed, `last` being the outcome of the last one
    fn connect_failed<C, R>(
        &mut self,
        request: Request,
        last: ConnectError,
        ctx: &Context<C, R>,
    ) -> Result<State> {
        let cerr = failure_status(&request, last);
        if request.socket_addr().is_none() {
            let err = Error::HostUnreachable {
                host: String::from_utf8_lossy(request.addr.as_bytes()).into_owned(),
                port: request.port(),
            };
            info!("{}: {}", self.id, err);
        }
        self.reply_error(request, cerr, ctx)
    }

    /// Stage a failure reply echoing the requested address
    fn reply_error<C, R>(
        &mut self,
        request: Request,
        cerr: ConnectError,
        ctx: &Context<C, R>,
    ) -> Result<State> {
        let reply = Reply::echo(&request, cerr.into());
        write_reply(&mut self.downstream, &reply)?;
        self.client_interest(ctx, Ops::WRITE)?;
        Ok(State::ReqWrite {
            request,
            rep: reply.rep,
        })
    }

    fn req_write<C, R>(
        &mut self,
        request: Request,
        rep: ResponseCode,
        ctx: &Context<C, R>,
    ) -> Result<State>
    where
        C: Connector,
        R: Resolver,
    {
        if !self.send_client()? {
            return Ok(State::ReqWrite { request, rep });
        }
        info!(
            "access: {} user={} {:?} {} => {}",
            self.client.addr,
            self.user.as_deref().unwrap_or("-"),
            request.cmd,
            request.address(),
            rep
        );
        if !rep.is_success() {
            return Ok(State::Done);
        }

        let sniffer = if request.port() == POP3_PORT && ctx.services.sniffer.is_on() {
            match Pop3Sniffer::new() {
                Ok(sniffer) => Some(sniffer),
                Err(err) => {
                    error!("{}: sniffer error: {}", self.id, err);
                    None
                }
            }
        } else {
            None
        };
        let mut relay = Relay::new(sniffer);
        relay.start(&mut self.link(ctx)?)?;
        Ok(State::Copy(relay))
    }

    fn copy_next(&self, relay: Relay) -> State {
        if relay.is_done() {
            debug!("{}: relay finished", self.id);
            State::Done
        } else {
            State::Copy(relay)
        }
    }

    fn link<'a, C, R>(&'a mut self, ctx: &'a Context<C, R>) -> Result<Link<'a>> {
        let server = self
            .server
            .as_mut()
            .ok_or_else(|| Error::message_fmt(format_args!("no server socket")))?;
        Ok(Link {
            registry: ctx.registry,
            stats: &ctx.services.stats,
            sniffer: &ctx.services.sniffer,
            client: &mut self.client,
            server,
            upstream: &mut self.upstream,
            downstream: &mut self.downstream,
        })
    }
}

/// Reply status once no candidate could be connected.
/// Literal addresses report why, names report the host as unreachable.
fn failure_status(request: &Request, last: ConnectError) -> ConnectError {
    match request.socket_addr() {
        Some(_) => last,
        None => ConnectError::HostUnreachable,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::raw_message::DstAddr;

    #[test]
    fn token_mapping() {
        let id = SessionId::from(41);
        let client = id.token(Side::Client);
        let server = id.token(Side::Server);
        assert_ne!(client, server);
        assert_ne!(client, LISTENER);
        assert_ne!(client, WAKER);
        assert_eq!(SessionId::from_token(client), Some((id, Side::Client)));
        assert_eq!(SessionId::from_token(server), Some((id, Side::Server)));
        assert_eq!(SessionId::from_token(WAKER), None);
        assert_eq!(
            SessionId::from_token(SessionId::from(0).token(Side::Client)),
            Some((SessionId(0), Side::Client))
        );
    }

    #[test]
    fn failure_status_by_address_kind() {
        let literal = Request {
            cmd: SockCommand::Connect,
            addr: DstAddr::V4([127, 0, 0, 1]),
            port: [0, 1],
        };
        assert_eq!(
            failure_status(&literal, ConnectError::ConnectionRefused),
            ConnectError::ConnectionRefused
        );
        let named = Request {
            addr: DstAddr::domain(b"example.com").unwrap(),
            ..literal
        };
        assert_eq!(
            failure_status(&named, ConnectError::ConnectionRefused),
            ConnectError::HostUnreachable
        );
    }
}
