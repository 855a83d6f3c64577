use std::io;
use std::thread::{self, JoinHandle};

use log::*;

/// Spawn a thread named `name` running `f`.
///
/// Dropping the returned handle detaches the thread.
pub fn spawn_thread<F, R>(name: &str, f: F) -> io::Result<JoinHandle<R>>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    trace!("spawn thread: {}", name);
    thread::Builder::new().name(name.into()).spawn(f)
}
