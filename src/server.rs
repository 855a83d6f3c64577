use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{
    mpsc::{self, Receiver, Sender, TryRecvError},
    Arc,
};

use log::*;
use mio::event::Event as MioEvent;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use rand::prelude::*;

use crate::acceptor::bind_listener;
use crate::auth_service::UserStore;
use crate::config::ServerConfig;
use crate::connector::{Connector, TcpConnector};
use crate::error::Error;
use crate::metrics::{Snapshot, Stats};
use crate::resolver::{Notifier, Resolver, SystemResolver};
use crate::server_command::ServerCommand;
use crate::session::{Context, Event, Services, Session, SessionId, LISTENER, WAKER};
use crate::sniffer::SnifferSwitch;

const EVENTS_CAPACITY: usize = 1024;

/// Single threaded SOCKS5 server driven by a mio readiness loop
pub struct Server<C, R> {
    poll: Poll,
    listener: TcpListener,
    rx_cmd: Receiver<ServerCommand>,
    /// sessions whose off-loop work finished
    rx_notify: Receiver<SessionId>,
    services: Services<C, R>,
    sessions: HashMap<SessionId, Session>,
    /// random context for generating SessionIds
    id_rng: StdRng,
}

/// Thread safe handle controlling a running [`Server`]
#[derive(Clone)]
pub struct ServerHandle {
    tx: Sender<ServerCommand>,
    waker: Arc<Waker>,
    stats: Arc<Stats>,
    users: Arc<UserStore>,
}

impl ServerHandle {
    pub fn send(&self, cmd: ServerCommand) -> Result<(), Error> {
        self.tx.send(cmd).map_err(|_| Error::Disconnected {
            name: "server command".into(),
        })?;
        self.waker.wake()?;
        Ok(())
    }

    pub fn terminate(&self) -> Result<(), Error> {
        self.send(ServerCommand::Terminate)
    }

    pub fn stats(&self) -> Snapshot {
        self.stats.snapshot()
    }

    /// user store shared with the sessions
    pub fn users(&self) -> &UserStore {
        &self.users
    }
}

enum Flow {
    Continue,
    Break,
}

impl Server<TcpConnector, SystemResolver> {
    pub fn new(config: ServerConfig) -> Result<(Self, ServerHandle), Error> {
        Server::with_services(config, TcpConnector, SystemResolver)
    }
}

impl<C, R> Server<C, R>
where
    C: Connector,
    R: Resolver,
{
    pub fn with_services(
        config: ServerConfig,
        connector: C,
        resolver: R,
    ) -> Result<(Self, ServerHandle), Error> {
        config.validate()?;
        let poll = Poll::new()?;
        let mut listener = bind_listener(config.server_addr())?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        let (tx_cmd, rx_cmd) = mpsc::channel();
        let (tx_notify, rx_notify) = mpsc::channel();
        let users = Arc::new(UserStore::with_users(config.users.iter().cloned())?);
        let stats = Arc::new(Stats::new());
        let services = Services {
            connector,
            resolver,
            auth: users.clone(),
            stats: stats.clone(),
            sniffer: Arc::new(SnifferSwitch::new(config.sniffer)),
            notifier: Notifier::new(tx_notify, waker.clone()),
            buffer_size: config.buffer_size,
        };
        info!(
            "server config: {}, buffer {} bytes, sniffer {}, {} user(s)",
            config.server_addr(),
            config.buffer_size,
            config.sniffer,
            config.users.len()
        );

        Ok((
            Self {
                poll,
                listener,
                rx_cmd,
                rx_notify,
                services,
                sessions: HashMap::new(),
                id_rng: StdRng::from_entropy(),
            },
            ServerHandle {
                tx: tx_cmd,
                waker,
                stats,
                users,
            },
        ))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    fn next_session_id(&mut self) -> SessionId {
        loop {
            let next_candidate = SessionId::from(self.id_rng.next_u32());
            if self.sessions.contains_key(&next_candidate) {
                continue;
            }
            trace!("next session id is issued: {}", next_candidate);
            return next_candidate;
        }
    }

    pub fn serve(&mut self) -> Result<(), Error> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        info!("listening: {}", self.local_addr()?);
        loop {
            if let Err(err) = self.poll.poll(&mut events, None) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }
            for event in events.iter() {
                match event.token() {
                    LISTENER => self.accept(),
                    WAKER => {
                        if let Flow::Break = self.wake() {
                            self.shutdown();
                            info!("server shutdown");
                            return Ok(());
                        }
                    }
                    token => self.readiness(token, event),
                }
            }
        }
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let id = self.next_session_id();
                    info!("{}: accepted: {}", id, addr);
                    self.services.stats.connection_opened();
                    let mut session =
                        Session::new(id, stream, addr, self.services.buffer_size);
                    session.start(&Context {
                        registry: self.poll.registry(),
                        services: &self.services,
                    });
                    self.sessions.insert(id, session);
                    self.reap(id);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("accept error: {}", err);
                    return;
                }
            }
        }
    }

    /// Handle commands and sessions notified through the waker
    fn wake(&mut self) -> Flow {
        loop {
            match self.rx_cmd.try_recv() {
                Ok(cmd) => {
                    info!("cmd: {:?}", cmd);
                    match cmd {
                        ServerCommand::Terminate => return Flow::Break,
                        ServerCommand::SetSniffer(on) => self.services.sniffer.set(on),
                    }
                }
                Err(TryRecvError::Empty) => break,
                // every handle is gone, nobody can stop the loop any more
                Err(TryRecvError::Disconnected) => break,
            }
        }
        while let Ok(id) = self.rx_notify.try_recv() {
            self.drive(id, &[Event::Unblock]);
        }
        Flow::Continue
    }

    fn readiness(&mut self, token: Token, event: &MioEvent) {
        let (id, side) = match SessionId::from_token(token) {
            Some(x) => x,
            None => {
                error!("unknown token: {:?}", token);
                return;
            }
        };
        let mut evs = Vec::with_capacity(2);
        if event.is_readable() || event.is_read_closed() || event.is_error() {
            evs.push(Event::Readable(side));
        }
        if event.is_writable() || event.is_write_closed() || event.is_error() {
            evs.push(Event::Writable(side));
        }
        self.drive(id, &evs);
    }

    fn drive(&mut self, id: SessionId, evs: &[Event]) {
        let ctx = Context {
            registry: self.poll.registry(),
            services: &self.services,
        };
        let session = match self.sessions.get_mut(&id) {
            Some(session) => session,
            None => {
                trace!("{}: event for a closed session", id);
                return;
            }
        };
        for ev in evs {
            if session.is_finished() {
                break;
            }
            session.handle(*ev, &ctx);
        }
        self.reap(id);
    }

    /// Drop the session once it reached a terminal state
    fn reap(&mut self, id: SessionId) {
        let finished = self
            .sessions
            .get(&id)
            .map_or(false, |session| session.is_finished());
        if !finished {
            return;
        }
        if let Some(mut session) = self.sessions.remove(&id) {
            session.close(self.poll.registry());
            self.services.stats.connection_closed();
            info!(
                "{}: closed: {} ({})",
                id,
                session.client_addr(),
                session.state_name()
            );
        }
    }

    fn shutdown(&mut self) {
        trace!("closing {} session(s)", self.sessions.len());
        let registry = self.poll.registry();
        for (_, mut session) in self.sessions.drain() {
            session.close(registry);
            self.services.stats.connection_closed();
        }
        if let Err(err) = registry.deregister(&mut self.listener) {
            debug!("deregister listener: {}", err);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn local_config() -> ServerConfig {
        ServerConfig::new("127.0.0.1".parse().unwrap(), 0)
    }

    #[test]
    fn server_shutdown() {
        let (mut server, handle) = Server::new(local_config()).unwrap();
        let th = thread::spawn(move || server.serve());
        thread::sleep(Duration::from_millis(100));
        handle.terminate().unwrap();
        assert!(th.join().unwrap().is_ok());
        assert!(handle.terminate().is_err());
    }

    #[test]
    fn ephemeral_port() {
        let (server, handle) = Server::new(local_config()).unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(handle.stats(), Snapshot::default());
        assert!(handle.users().users().is_empty());
    }

    #[test]
    fn zero_buffer_size_rejected() {
        let mut config = local_config();
        config.set_buffer_size(0);
        assert!(matches!(
            Server::new(config),
            Err(Error::BufferTooSmall { size: 0, .. })
        ));
    }

    #[test]
    fn too_many_users() {
        let mut config = local_config();
        for i in 0..=crate::auth_service::MAX_USERS {
            config.add_user(crate::auth_service::User::new(format!("u{}", i), "pw"));
        }
        assert!(matches!(Server::new(config), Err(Error::User(_))));
    }
}
