use log::*;

use super::{Invalid, Parser, Progress};
use crate::model::{self, Method, MethodSelection, DEFAULT_PROTOCOL_VERSION};
use crate::raw_message::AuthMethods;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Version,
    NMethods,
    Methods { remaining: u8 },
    Done,
    Error(Invalid),
}

/// VER NMETHODS METHODS...
///
/// Selects the most preferred method which the client offered and the
/// server accepts, `NoMethods` when there is none.
#[derive(Debug)]
pub struct NegotiationParser {
    state: State,
    acceptable: Vec<Method>,
    // index in `Method::PREFERENCE`
    best: Option<usize>,
}

impl NegotiationParser {
    pub fn new(acceptable: Vec<Method>) -> Self {
        Self {
            state: State::Version,
            acceptable,
            best: None,
        }
    }

    fn offer(&mut self, code: u8) {
        let method: Method = AuthMethods::from(code).into();
        if !self.acceptable.contains(&method) {
            trace!("method not acceptable: {}", method);
            return;
        }
        if let Some(pref) = method.preference() {
            self.best = Some(self.best.map_or(pref, |best| best.min(pref)));
        }
    }
}

impl Parser for NegotiationParser {
    type Output = MethodSelection;

    #[cfg(test)]
    fn init(&mut self) {
        self.state = State::Version;
        self.best = None;
    }

    fn feed(&mut self, byte: u8) -> Progress {
        use State::*;
        let state = self.state;
        self.state = match state {
            Version if byte == u8::from(DEFAULT_PROTOCOL_VERSION) => NMethods,
            Version => Error(Invalid::new("version", byte)),
            NMethods if byte == 0 => Done,
            NMethods => Methods { remaining: byte },
            Methods { remaining } => {
                self.offer(byte);
                if remaining == 1 {
                    Done
                } else {
                    Methods {
                        remaining: remaining - 1,
                    }
                }
            }
            // finished parsers ignore further input
            Done | Error(_) => state,
        };
        match self.state {
            Done => Progress::Done,
            Error(_) => Progress::Error,
            _ => Progress::NeedMore,
        }
    }

    fn output(&self) -> Option<MethodSelection> {
        match self.state {
            State::Done => Some(MethodSelection {
                version: DEFAULT_PROTOCOL_VERSION,
                method: self
                    .best
                    .map_or(Method::NoMethods, |i| Method::PREFERENCE[i]),
            }),
            _ => None,
        }
    }

    fn error(&self) -> model::Error {
        match self.state {
            State::Error(invalid) => invalid.to_error(),
            _ => model::Error::message_fmt(format_args!("negotiation not failed")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::Buffer;

    fn parse(acceptable: Vec<Method>, bytes: &[u8]) -> (Progress, Option<Method>) {
        let mut buf = Buffer::new(64);
        buf.write_slice(bytes);
        let mut parser = NegotiationParser::new(acceptable);
        let progress = parser.run(&mut buf);
        (progress, parser.output().map(|sel| sel.method))
    }

    #[test]
    fn select_preferred() {
        let all = vec![Method::NoAuth, Method::UserPass, Method::GssApi];
        assert_eq!(
            parse(all.clone(), &[5, 2, 0x02, 0x00]),
            (Progress::Done, Some(Method::NoAuth))
        );
        assert_eq!(
            parse(all.clone(), &[5, 3, 0x01, 0x02, 0x80]),
            (Progress::Done, Some(Method::UserPass))
        );
        assert_eq!(
            parse(all, &[5, 1, 0x01]),
            (Progress::Done, Some(Method::GssApi))
        );
    }

    #[test]
    fn select_within_policy() {
        let policy = vec![Method::UserPass, Method::GssApi];
        assert_eq!(
            parse(policy.clone(), &[5, 2, 0x00, 0x02]),
            (Progress::Done, Some(Method::UserPass))
        );
        assert_eq!(
            parse(policy, &[5, 1, 0x00]),
            (Progress::Done, Some(Method::NoMethods))
        );
    }

    #[test]
    fn no_known_methods() {
        let all = vec![Method::NoAuth, Method::UserPass];
        assert_eq!(
            parse(all.clone(), &[5, 2, 0x03, 0xfe]),
            (Progress::Done, Some(Method::NoMethods))
        );
        assert_eq!(
            parse(all, &[5, 0]),
            (Progress::Done, Some(Method::NoMethods))
        );
    }

    #[test]
    fn bad_version() {
        let (progress, out) = parse(vec![Method::NoAuth], &[4, 1, 0x00]);
        assert_eq!(progress, Progress::Error);
        assert_eq!(out, None);
    }

    #[test]
    fn resume_and_leave_pipelined() {
        let mut buf = Buffer::new(64);
        let mut parser = NegotiationParser::new(vec![Method::NoAuth]);
        buf.write_slice(&[5, 2]);
        assert_eq!(parser.run(&mut buf), Progress::NeedMore);
        assert!(buf.is_empty());
        buf.write_slice(&[0x02, 0x00, 5, 1, 0]);
        assert_eq!(parser.run(&mut buf), Progress::Done);
        assert_eq!(buf.readable(), &[5, 1, 0]);

        parser.init();
        assert_eq!(parser.output(), None);
    }
}
