//! Loopback port allocation by random draw and connect probe.

use std::collections::HashSet;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use rand::Rng;
use tokio::net::TcpStream;

use crate::error::LaunchError;

/// Ports are abundant in [1024, 65535]; well before this many random draws
/// all collide with live listeners, something else is wrong with the host.
const MAX_PROBE_ATTEMPTS: u32 = 64;

/// Find a loopback TCP port with no live listener.
///
/// Draws random ports from the dynamic range and probes each candidate with
/// a real connect to `127.0.0.1`: a refused connection means the port is
/// free, an accepted one means it is taken. Any other probe outcome is a
/// host misconfiguration and is surfaced rather than retried.
///
/// The probe cannot reserve the port; a third party may still grab it before
/// the caller binds. [`crate::launch`] treats that bind failure as fatal for
/// the whole launch.
pub async fn find_unused_port() -> Result<u16, LaunchError> {
    let mut tried = HashSet::new();
    for _ in 0..MAX_PROBE_ATTEMPTS {
        let port: u16 = rand::thread_rng().gen_range(1024..=u16::MAX);
        if !tried.insert(port) {
            continue;
        }
        if !is_port_open(port).await? {
            return Ok(port);
        }
    }
    Err(LaunchError::PortsExhausted(MAX_PROBE_ATTEMPTS))
}

/// Whether something is currently accepting connections on the loopback port.
async fn is_port_open(port: u16) -> Result<bool, LaunchError> {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    match TcpStream::connect(addr).await {
        Ok(stream) => {
            drop(stream);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => Ok(false),
        Err(e) => Err(LaunchError::PortProbe(e)),
    }
}
