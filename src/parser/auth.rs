use super::{Invalid, Parser, Progress};
use crate::model::{self, USER_PASS_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Version,
    ULen,
    UName { remaining: u8 },
    PLen,
    Passwd { remaining: u8 },
    Done,
    Error(Invalid),
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// RFC1929: VER ULEN UNAME PLEN PASSWD
///
/// Zero length username or password is accepted.
#[derive(Debug)]
pub struct AuthParser {
    state: State,
    username: Vec<u8>,
    password: Vec<u8>,
}

impl AuthParser {
    pub fn new() -> Self {
        Self {
            state: State::Version,
            username: Vec::new(),
            password: Vec::new(),
        }
    }
}

impl Default for AuthParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for AuthParser {
    type Output = Credentials;

    #[cfg(test)]
    fn init(&mut self) {
        self.state = State::Version;
        self.username.clear();
        self.password.clear();
    }

    fn feed(&mut self, byte: u8) -> Progress {
        use State::*;
        let state = self.state;
        self.state = match state {
            Version if byte == USER_PASS_VERSION => ULen,
            Version => Error(Invalid::new("auth version", byte)),
            ULen if byte == 0 => PLen,
            ULen => UName { remaining: byte },
            UName { remaining } => {
                self.username.push(byte);
                if remaining == 1 {
                    PLen
                } else {
                    UName {
                        remaining: remaining - 1,
                    }
                }
            }
            PLen if byte == 0 => Done,
            PLen => Passwd { remaining: byte },
            Passwd { remaining } => {
                self.password.push(byte);
                if remaining == 1 {
                    Done
                } else {
                    Passwd {
                        remaining: remaining - 1,
                    }
                }
            }
            Done | Error(_) => state,
        };
        match self.state {
            Done => Progress::Done,
            Error(_) => Progress::Error,
            _ => Progress::NeedMore,
        }
    }

    fn output(&self) -> Option<Credentials> {
        match self.state {
            State::Done => Some(Credentials {
                username: String::from_utf8_lossy(&self.username).into_owned(),
                password: String::from_utf8_lossy(&self.password).into_owned(),
            }),
            _ => None,
        }
    }

    fn error(&self) -> model::Error {
        match self.state {
            State::Error(invalid) => invalid.to_error(),
            _ => model::Error::message_fmt(format_args!("auth not failed")),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::Buffer;
    use crate::encoder::test_util::user_pass_request;

    #[test]
    fn parse_credentials() {
        let mut buf = Buffer::new(600);
        buf.write_slice(&user_pass_request("alice", "s3cret"));
        let mut parser = AuthParser::new();
        assert_eq!(parser.run(&mut buf), Progress::Done);
        assert_eq!(
            parser.output(),
            Some(Credentials {
                username: "alice".into(),
                password: "s3cret".into()
            })
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn empty_fields() {
        let mut buf = Buffer::new(16);
        buf.write_slice(&[1, 0, 0]);
        let mut parser = AuthParser::new();
        assert_eq!(parser.run(&mut buf), Progress::Done);
        let creds = parser.output().unwrap();
        assert_eq!(creds.username, "");
        assert_eq!(creds.password, "");
    }

    #[test]
    fn byte_by_byte() {
        let msg = user_pass_request("bob", "");
        let mut parser = AuthParser::new();
        let (last, init) = msg.split_last().unwrap();
        for b in init {
            assert_eq!(parser.feed(*b), Progress::NeedMore);
        }
        assert_eq!(parser.feed(*last), Progress::Done);
        assert_eq!(parser.output().unwrap().username, "bob");

        parser.init();
        assert_eq!(parser.output(), None);
    }

    #[test]
    fn bad_version() {
        let mut parser = AuthParser::new();
        assert_eq!(parser.feed(5), Progress::Error);
        assert!(parser.error().to_string().contains("auth version"));
    }

    #[test]
    fn password_hidden_in_debug() {
        let creds = Credentials {
            username: "alice".into(),
            password: "s3cret".into(),
        };
        assert!(!format!("{:?}", creds).contains("s3cret"));
    }
}
