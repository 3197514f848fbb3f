//! Loopback port selection for the worker.
//!
//! Probing a port and then binding it is racy: another process can claim the port in between.
//! [`bind_loopback`] therefore falls back to an OS-assigned port when the final bind fails with
//! `AddrInUse`; it does not try to lock anything.

use std::io;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tracing::warn;

const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Returns `true` when something accepts connections on `127.0.0.1:port`.
pub async fn is_port_in_use(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}

/// Asks the OS for an ephemeral loopback port and releases it immediately.
pub async fn get_free_port() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    Ok(listener.local_addr()?.port())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortChoice {
    pub preferred: u16,
    pub port: u16,
}

impl PortChoice {
    pub fn is_fallback(&self) -> bool {
        self.port != self.preferred
    }
}

/// Picks `preferred` when it is free, otherwise a free ephemeral port. `0` means "any port".
pub async fn choose_port(preferred: u16) -> io::Result<PortChoice> {
    if preferred != 0 && !is_port_in_use(preferred).await {
        return Ok(PortChoice {
            preferred,
            port: preferred,
        });
    }

    let port = get_free_port().await?;
    if preferred != 0 {
        warn!(preferred, port, "preferred port is in use; falling back to a free port");
    }
    Ok(PortChoice { preferred, port })
}

/// Binds the worker listener on loopback, starting from `preferred`.
pub async fn bind_loopback(preferred: u16) -> io::Result<TcpListener> {
    let choice = choose_port(preferred).await?;
    match TcpListener::bind((Ipv4Addr::LOCALHOST, choice.port)).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
            warn!(
                port = choice.port,
                "port was claimed after probing; binding an OS-assigned port"
            );
            TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await
        }
        Err(err) => Err(err),
    }
}
