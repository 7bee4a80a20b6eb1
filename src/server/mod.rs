//! Configuration, the well-known-port listener, and privilege handling —
//! the glue that turns the session engine into a runnable daemon.

pub mod privilege;

use crate::session::Session;
use log::{error, info};
use std::net::{SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::time::Duration;

/// The fixed per-attempt retransmission schedule: 3s, then 5s, then 8s.
pub fn default_timeout_schedule() -> Vec<Duration> {
    vec![
        Duration::from_secs(3),
        Duration::from_secs(5),
        Duration::from_secs(8),
    ]
}

/// Everything a [`Listener`] needs to serve transfers. Built by the CLI
/// binary from process arguments, but plain enough for any embedder to
/// construct directly.
#[derive(Debug, Clone)]
pub struct Config {
    /// Interface to bind; empty string means all interfaces.
    pub host: String,
    pub port: u16,
    /// Absolute path of the served directory.
    pub tftp_root: PathBuf,
    pub writable: bool,
    /// Receive buffer size, must be at least 516 bytes.
    pub bufsize: usize,
    /// Per-attempt retransmission timeouts, tried in order.
    pub timeout_schedule: Vec<Duration>,
    /// Unix user to drop privileges to after binding, if any.
    pub user: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: String::new(),
            port: 69,
            tftp_root: PathBuf::from("."),
            writable: true,
            bufsize: 516,
            timeout_schedule: default_timeout_schedule(),
            user: None,
        }
    }
}

/// Failure binding or validating a [`Listener`].
#[derive(Debug)]
pub enum ListenerError {
    Io(std::io::Error),
    RootNotADirectory(PathBuf),
}

impl std::fmt::Display for ListenerError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ListenerError::Io(e) => write!(f, "{}", e),
            ListenerError::RootNotADirectory(p) => {
                write!(f, "served directory does not exist: {}", p.display())
            }
        }
    }
}

impl std::error::Error for ListenerError {}

impl From<std::io::Error> for ListenerError {
    fn from(e: std::io::Error) -> Self {
        ListenerError::Io(e)
    }
}

/// Binds the well-known port and spawns a session thread for each new peer.
#[derive(Debug)]
pub struct Listener {
    socket: UdpSocket,
    root: PathBuf,
    writable: bool,
    schedule: Vec<Duration>,
    bufsize: usize,
}

impl Listener {
    /// Binds `cfg.host:cfg.port` and validates `cfg.tftp_root`.
    pub fn bind(cfg: &Config) -> Result<Self, ListenerError> {
        let root = cfg
            .tftp_root
            .canonicalize()
            .map_err(|_| ListenerError::RootNotADirectory(cfg.tftp_root.clone()))?;
        if !root.is_dir() {
            return Err(ListenerError::RootNotADirectory(cfg.tftp_root.clone()));
        }

        let addr: SocketAddr = format!(
            "{}:{}",
            if cfg.host.is_empty() { "0.0.0.0" } else { &cfg.host },
            cfg.port
        )
        .parse()
        .map_err(|_| {
            ListenerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "invalid host/port",
            ))
        })?;
        let socket = UdpSocket::bind(addr)?;
        info!("server listening on {}", socket.local_addr()?);

        Ok(Listener {
            socket,
            root,
            writable: cfg.writable,
            schedule: cfg.timeout_schedule.clone(),
            bufsize: cfg.bufsize.max(516),
        })
    }

    /// The address this listener is actually bound to (useful when `Config`
    /// asks for an OS-assigned ephemeral port).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Loops forever, accepting one initial datagram per new peer and
    /// spawning a session thread to serve it. Never returns except on a
    /// fatal socket error.
    pub fn run(&self) -> std::io::Result<()> {
        let mut buf = vec![0u8; self.bufsize];
        loop {
            let (n, peer) = self.socket.recv_from(&mut buf)?;
            let bytes = buf[..n].to_vec();
            let root = self.root.clone();
            let writable = self.writable;
            let schedule = self.schedule.clone();

            match Session::new(peer, root, writable, schedule) {
                Ok(session) => {
                    std::thread::spawn(move || session.run(bytes));
                }
                Err(e) => {
                    error!("failed to create session socket for {}: {}", peer, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn bind_rejects_missing_root() {
        let cfg = Config {
            tftp_root: PathBuf::from("/does/not/exist/hopefully"),
            port: 0,
            ..Config::default()
        };
        assert_matches!(Listener::bind(&cfg), Err(ListenerError::RootNotADirectory(_)));
    }

    #[test]
    fn bind_succeeds_on_ephemeral_port() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            tftp_root: dir.path().to_path_buf(),
            port: 0,
            ..Config::default()
        };
        assert!(Listener::bind(&cfg).is_ok());
    }
}
