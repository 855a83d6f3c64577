use std::sync::atomic::{AtomicU64, Ordering};

/// Process wide connection counters
#[derive(Debug, Default)]
pub struct Stats {
    bytes_transferred: AtomicU64,
    current_connections: AtomicU64,
    historic_connections: AtomicU64,
    credentials_sniffed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    pub bytes_transferred: u64,
    pub current_connections: u64,
    pub historic_connections: u64,
    /// POP3 logins seen by the sniffer, accepted or not
    pub credentials_sniffed: u64,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bytes(&self, n: usize) {
        self.bytes_transferred
            .fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.current_connections.fetch_add(1, Ordering::Relaxed);
        self.historic_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.current_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn sniffed(&self) {
        self.credentials_sniffed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            current_connections: self.current_connections.load(Ordering::Relaxed),
            historic_connections: self.historic_connections.load(Ordering::Relaxed),
            credentials_sniffed: self.credentials_sniffed.load(Ordering::Relaxed),
        }
    }
}
