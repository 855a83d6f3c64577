//! This crate provides a single threaded [SOCKS5](https://www.rfc-editor.org/rfc/rfc1928) proxy server.
//!
//! # Feature
//! ## Authentication
//!
//! `NO AUTHENTICATION REQUIRED` while no user is configured, otherwise
//! username/password ([RFC1929](https://www.rfc-editor.org/rfc/rfc1929)).
//! A client offering only GSSAPI gets the method selected and is then
//! disconnected.
//!
//! ## Command
//!
//! Only `CONNECT` command is supported.
//! `BIND` and `UDP ASSOCIATE` are answered with `command not supported`.
//!
//! ## I/O model
//!
//! Every connection is a state machine driven by one [mio] event loop.
//! Host names are resolved on short lived threads which wake the loop up
//! once done.
//!
//! ## Sniffer
//!
//! Plaintext POP3 logins relayed to port 110 are reported through the logger.
//! Disabled with [`ServerConfig::set_sniffer`] or at runtime with
//! [`ServerCommand::SetSniffer`].
//!
//! # Usage
//!
//! ## Server
//!
//! Here is a minimum server example.
//!
//! ```rust
//! use std::{time::Duration, thread};
//! use socks5d::*;
//! let mut config = ServerConfig::default();
//! config.server_port = 1081; // conflict to other example
//! config.add_user(User::new("alice", "secret"));
//! let (mut server, handle) = Server::new(config).unwrap();
//! let th = thread::spawn(move || server.serve());
//! thread::sleep(Duration::from_secs(1));
//! handle.terminate().unwrap();
//! th.join().unwrap().unwrap();
//! ```

pub mod acceptor;
pub mod auth_service;
mod buffer;
pub mod config;
pub mod connector;
mod encoder;
pub mod error;
pub mod metrics;
pub mod model;
mod parser;
mod raw_message;
mod relay;
pub mod resolver;
mod selector;
pub mod server;
pub mod server_command;
mod session;
pub mod sniffer;
mod thread;

pub use auth_service::{User, UserStore, MAX_USERS};
pub use config::*;
pub use model::model::*;
pub use server::*;
pub use server_command::*;
