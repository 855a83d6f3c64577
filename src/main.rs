//! A SOCKS5 proxy server implemented in Rust
//!
//! socks5d is a single threaded SOCKS5 proxy built on the socks5d crate.
//!
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::*;

use socks5d as sd;

#[derive(Parser, Debug)]
#[command(name = "socks5d", version, about)]
struct Opt {
    #[arg(short = 'p', long = "port", default_value = "1080")]
    /// Set port to listen on
    port: u16,

    #[arg(short = 'l', long = "listen", default_value = "0.0.0.0")]
    /// Set ipaddress to listen on
    ipaddr: IpAddr,

    #[arg(short = 'u', long = "user", value_parser = parse_user)]
    /// Add a user allowed to authenticate (format: name:pass), repeatable
    users: Vec<sd::User>,

    #[arg(short = 'N', long = "no-sniffer")]
    /// Disable the POP3 credential sniffer
    no_sniffer: bool,

    #[arg(short = 'c', long = "config")]
    /// Set path to config file (format: yaml)
    config: Option<PathBuf>,
}

fn parse_user(s: &str) -> Result<sd::User, String> {
    match s.split_once(':') {
        Some((name, pass)) if !name.is_empty() => Ok(sd::User::new(name, pass)),
        _ => Err(format!("expected name:pass, got {:?}", s)),
    }
}

fn set_handler(signals: &[i32], handler: impl Fn(i32) + Send + 'static) -> io::Result<()> {
    let mut signals = signal_hook::iterator::Signals::new(signals)?;
    std::thread::spawn(move || signals.forever().for_each(handler));
    Ok(())
}

fn main() -> anyhow::Result<()> {
    use signal_hook::consts::signal::*;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opt = Opt::parse();
    debug!("option: {:?}", opt);

    let mut config = match opt.config {
        Some(ref path) => sd::ServerConfig::with_file(opt.ipaddr, opt.port, path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => sd::ServerConfig::new(opt.ipaddr, opt.port),
    };
    for user in opt.users {
        config.add_user(user);
    }
    if opt.no_sniffer {
        config.set_sniffer(false);
    }

    let (mut server, handle) = sd::Server::new(config).context("starting server")?;
    set_handler(&[SIGTERM, SIGINT, SIGQUIT], move |sig| {
        info!("signal: {}", sig);
        if let Err(err) = handle.terminate() {
            error!("terminate: {}", err);
        }
    })
    .context("setting signal handler")?;

    server.serve().context("server error")?;
    Ok(())
}
