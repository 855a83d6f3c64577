use std::net::SocketAddr;

use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

/// Server level failures: setup, configuration and the event loop itself
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),
    #[error("user error: {0}")]
    User(#[from] crate::auth_service::UserError),
    #[error("address already in use: {addr}")]
    AddressAlreadyInUse { addr: SocketAddr },
    #[error("address not available: {addr}")]
    AddressNotAvailable { addr: SocketAddr },
    #[error("disconnected channel error: {name}")]
    Disconnected { name: String },
    #[error("buffer size {size} is below the minimum of {min} bytes")]
    BufferTooSmall { size: usize, min: usize },
}
