//! Multicast telemetry input.
//!
//! The socket is built with `rustix` so address reuse and the receive
//! buffer can be set before binding, then handed to tokio. Bursts of
//! fragments are absorbed by the enlarged kernel buffer rather than lost at
//! the socket layer.

use std::io;

use rustix::net::{sockopt, AddressFamily, SocketType};
use tokio::net::UdpSocket;
use tracing::{info, instrument};

use crate::config::MulticastConfig;
use crate::error::{RelayError, Result};

/// Bind and join the configured multicast group.
///
/// Every failure is a [`RelayError::FatalTransport`]: the relay has no
/// purpose without this input.
#[instrument(skip(config), fields(group = %config.group, port = config.port))]
pub fn bind(config: &MulticastConfig) -> Result<UdpSocket> {
    let socket = open_socket(config).map_err(|e| {
        RelayError::FatalTransport(format!(
            "Failed to bind multicast {}:{}: {e}",
            config.group, config.port
        ))
    })?;
    let socket = UdpSocket::from_std(socket)
        .map_err(|e| RelayError::FatalTransport(format!("Failed to register socket: {e}")))?;

    info!(local = ?socket.local_addr().ok(), group = %config.group, "Multicast listener bound");
    Ok(socket)
}

fn open_socket(config: &MulticastConfig) -> io::Result<std::net::UdpSocket> {
    let fd = rustix::net::socket(AddressFamily::INET, SocketType::DGRAM, None)?;
    sockopt::set_socket_reuseaddr(&fd, true)?;

    let before = sockopt::socket_recv_buffer_size(&fd)?;
    sockopt::set_socket_recv_buffer_size(&fd, config.recv_buffer_size)?;
    let after = sockopt::socket_recv_buffer_size(&fd)?;
    info!(
        before,
        after,
        requested = config.recv_buffer_size,
        "Multicast receive buffer"
    );

    rustix::net::bind(&fd, &config.bind_addr())?;

    let socket = std::net::UdpSocket::from(fd);
    socket.set_nonblocking(true)?;
    socket.set_broadcast(true)?;
    socket.set_multicast_ttl_v4(config.multicast_ttl)?;
    socket.join_multicast_v4(&config.group, &config.interface)?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_unbindable_address_is_fatal() {
        let config = MulticastConfig {
            // TEST-NET-1, never assigned to a local interface
            bind_address: Some(Ipv4Addr::new(192, 0, 2, 1)),
            port: 0,
            ..MulticastConfig::default()
        };
        match bind(&config) {
            Err(RelayError::FatalTransport(msg)) => assert!(msg.contains("239.255.65.56")),
            other => panic!("expected fatal transport error, got {other:?}"),
        }
    }
}
