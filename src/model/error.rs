use std::fmt;
use std::io;
use std::sync;

use crate::model::*;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Failures local to a single client session
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("poisoned error: {}", _0)]
    Poisoned(String),
    #[error("disconnected channel error: {}", name)]
    Disconnected { name: String },
    #[error("message format error: {}", message)]
    MessageFormat { message: String },
    #[error("authentication error: no acceptable method")]
    NoAcceptableMethod,
    #[error("authentication error: unrecognized username/password")]
    UnrecognizedUsernamePassword,
    #[error("command not supported: {:?}", cmd)]
    CommandNotSupported { cmd: Command },
    #[error("host unreachable: {}:{}", host, port)]
    HostUnreachable { host: String, port: u16 },
    #[error("name not resolved: {}:{}", domain, port)]
    DomainNotResolved { domain: String, port: u16 },
    #[error("connect error: {}: {}", addr, cerr)]
    Connect { addr: SocketAddr, cerr: ConnectError },
    #[error("buffer exhausted: {} bytes required, {} available", required, available)]
    BufferExhausted { required: usize, available: usize },
    #[error("peer closed connection: {}", peer)]
    PeerClosed { peer: SocketAddr },
}

impl Error {
    pub fn disconnected<S: Into<String>>(name: S) -> Self {
        Self::Disconnected { name: name.into() }
    }

    pub fn message_fmt(message: fmt::Arguments) -> Self {
        Self::MessageFormat {
            message: message.to_string(),
        }
    }

    pub fn command_not_supported(cmd: Command) -> Self {
        Self::CommandNotSupported { cmd }
    }

    pub fn buffer_exhausted(required: usize, available: usize) -> Self {
        Self::BufferExhausted {
            required,
            available,
        }
    }

    /// The reply status a client should see for this error
    pub fn cerr(&self) -> ConnectError {
        use ConnectError as CErr;
        use Error::*;
        match self {
            Io(_) => CErr::ServerFailure,
            Poisoned(_) => CErr::ServerFailure,
            Disconnected { .. } => CErr::ServerFailure,
            MessageFormat { .. } => CErr::ServerFailure,
            NoAcceptableMethod => CErr::ConnectionNotAllowed,
            UnrecognizedUsernamePassword => CErr::ConnectionNotAllowed,
            CommandNotSupported { .. } => CErr::CommandNotSupported,
            HostUnreachable { .. } => CErr::HostUnreachable,
            DomainNotResolved { .. } => CErr::HostUnreachable,
            Connect { cerr, .. } => *cerr,
            BufferExhausted { .. } => CErr::ServerFailure,
            PeerClosed { .. } => CErr::ServerFailure,
        }
    }
}

impl<T: fmt::Debug> From<sync::PoisonError<T>> for Error {
    fn from(error: sync::PoisonError<T>) -> Self {
        Error::Poisoned(format!("{:?}", error))
    }
}
