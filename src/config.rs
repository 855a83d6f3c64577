use std::fs::File;
use std::path::Path;

use serde::Deserialize;

use crate::auth_service::User;
use crate::error::Error;
use crate::model::{IpAddr, Ipv4Addr, SocketAddr};

/// Bytes buffered per direction of a session
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Smallest usable buffer: a request with a 255 byte domain is 262 bytes
pub const MIN_BUFFER_SIZE: usize = 262;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_ip: IpAddr,
    pub server_port: u16,
    /// capacity of each direction's buffer
    pub buffer_size: usize,
    /// sniff POP3 credentials on port 110
    pub sniffer: bool,
    /// initial users; authentication is required iff not empty
    pub users: Vec<User>,
}

/// Settings accepted in a YAML config file, all optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    users: Vec<User>,
    sniffer: Option<bool>,
    buffer_size: Option<usize>,
}

impl ServerConfig {
    pub fn new(server_ip: IpAddr, server_port: u16) -> Self {
        Self {
            server_ip,
            server_port,
            ..Self::default()
        }
    }

    pub fn with_file(server_ip: IpAddr, server_port: u16, path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let content: ConfigFile = serde_yaml::from_reader(file)?;
        let config = Self::new(server_ip, server_port).merge(content);
        config.validate()?;
        Ok(config)
    }

    /// Check the settings a server cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(Error::BufferTooSmall {
                size: self.buffer_size,
                min: MIN_BUFFER_SIZE,
            });
        }
        Ok(())
    }

    fn merge(mut self, file: ConfigFile) -> Self {
        self.users.extend(file.users);
        if let Some(sniffer) = file.sniffer {
            self.sniffer = sniffer;
        }
        if let Some(size) = file.buffer_size {
            self.buffer_size = size;
        }
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server_ip: Ipv4Addr::new(0, 0, 0, 0).into(),
            server_port: 1080,
            buffer_size: DEFAULT_BUFFER_SIZE,
            sniffer: true,
            users: vec![],
        }
    }
}

impl ServerConfig {
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server_ip, self.server_port)
    }

    pub fn add_user(&mut self, user: User) -> &mut Self {
        self.users.push(user);
        self
    }

    pub fn set_sniffer(&mut self, on: bool) -> &mut Self {
        self.sniffer = on;
        self
    }

    pub fn set_buffer_size(&mut self, size: usize) -> &mut Self {
        self.buffer_size = size;
        self
    }
}
