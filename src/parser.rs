//! Restartable byte-at-a-time decoders for the client side messages.
//!
//! A parser is fed from a [`Buffer`] as bytes arrive and keeps its position
//! across reads. `run` stops right after the last byte of the message so
//! that pipelined bytes of the next message stay in the buffer.
use crate::buffer::Buffer;
use crate::model;

pub mod auth;
pub mod negotiation;
pub mod request;

pub use auth::AuthParser;
pub use negotiation::NegotiationParser;
pub use request::RequestParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Done,
    Error,
    NeedMore,
}

pub trait Parser {
    type Output;

    /// back to the start state, scratch data discarded
    #[cfg(test)]
    fn init(&mut self);

    fn feed(&mut self, byte: u8) -> Progress;

    /// parsed message, `Some` once `feed` reported `Done`
    fn output(&self) -> Option<Self::Output>;

    /// reason of the last `Error`
    fn error(&self) -> model::Error;

    /// Feed every readable byte of `buf`, stopping early on `Done` or `Error`.
    fn run(&mut self, buf: &mut Buffer) -> Progress {
        while let Some(byte) = buf.read_byte() {
            match self.feed(byte) {
                Progress::NeedMore => continue,
                other => return other,
            }
        }
        Progress::NeedMore
    }
}

/// Field name and offending byte of a rejected message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Invalid {
    field: &'static str,
    value: u8,
}

impl Invalid {
    pub(crate) fn new(field: &'static str, value: u8) -> Self {
        Self { field, value }
    }

    pub(crate) fn to_error(self) -> model::Error {
        model::Error::message_fmt(format_args!("invalid {}: {:#04x}", self.field, self.value))
    }
}
