//! Name resolution off the event loop thread.
//!
//! A lookup runs on a detached thread which owns copies of everything it
//! needs. Its result goes through a one-shot channel kept by the session,
//! and the loop is told which session to resume through the [`Notifier`].
use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use log::*;
use mio::Waker;

use crate::model::{Error, Result};
use crate::session::SessionId;
use crate::thread::spawn_thread;

/// Blocking hostname lookup
pub trait Resolver: Clone + Send + 'static {
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>>;
}

/// getaddrinfo(3) through the standard library
#[derive(Debug, Clone, Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        Ok((host, port).to_socket_addrs()?.collect())
    }
}

/// Thread safe handle to resume a session on the event loop
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<SessionId>,
    waker: Arc<Waker>,
}

impl Notifier {
    pub fn new(tx: Sender<SessionId>, waker: Arc<Waker>) -> Self {
        Self { tx, waker }
    }

    pub fn notify(&self, id: SessionId) -> Result<()> {
        self.tx
            .send(id)
            .map_err(|_| Error::disconnected("notifier"))?;
        self.waker.wake()?;
        Ok(())
    }
}

/// Receiving end of an in-flight lookup
#[derive(Debug)]
pub struct PendingResolution {
    rx: Receiver<io::Result<Vec<SocketAddr>>>,
}

impl PendingResolution {
    /// `None` until the worker has answered
    pub fn try_take(&self) -> Option<io::Result<Vec<SocketAddr>>> {
        match self.rx.try_recv() {
            Ok(res) => Some(res),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(io::Error::new(
                io::ErrorKind::Other,
                "resolver thread vanished",
            ))),
        }
    }
}

/// Start resolving `host:port` for session `id`
pub fn spawn_resolution<R: Resolver>(
    resolver: &R,
    host: String,
    port: u16,
    id: SessionId,
    notifier: Notifier,
) -> Result<PendingResolution> {
    let (tx, rx) = mpsc::channel();
    let resolver = resolver.clone();
    // the join handle is dropped, the thread runs detached
    spawn_thread("resolver", move || {
        let res = resolver.resolve(&host, port);
        debug!("resolved {}:{}: {:?}", host, port, res);
        if tx.send(res).is_err() {
            // session went away meanwhile
            trace!("{}: resolution result dropped", id);
            return;
        }
        if let Err(err) = notifier.notify(id) {
            error!("{}: notify error: {}", id, err);
        }
    })?;
    Ok(PendingResolution { rx })
}

/// Candidate addresses of a destination, tried in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressChain {
    addrs: VecDeque<SocketAddr>,
}

impl AddressChain {
    pub fn new<I: IntoIterator<Item = SocketAddr>>(addrs: I) -> Self {
        Self {
            addrs: addrs.into_iter().collect(),
        }
    }

    pub fn next_candidate(&mut self) -> Option<SocketAddr> {
        self.addrs.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}
