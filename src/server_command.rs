//! Server control command
use std::fmt;

pub enum ServerCommand {
    /// stop accepting, close every session and return from `serve`
    Terminate,
    /// toggle the POP3 sniffer at runtime
    SetSniffer(bool),
}

impl fmt::Debug for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use ServerCommand::*;
        match self {
            Terminate => write!(f, "Terminate"),
            SetSniffer(on) => write!(f, "SetSniffer({})", on),
        }
    }
}
