//! UDP socket setup

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// Bind a receive socket on `0.0.0.0:<port>` with a bounded read timeout.
///
/// Address reuse is enabled so a restarted receiver can rebind straight
/// away. Port 0 binds an ephemeral port (used by tests).
pub fn create_socket(config: &NetworkConfig) -> Result<UdpSocket, NetworkError> {
    bind_socket(config).map_err(|source| NetworkError::BindFailed {
        port: config.udp_port,
        source,
    })
}

fn bind_socket(config: &NetworkConfig) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    if let Err(e) = socket.set_reuse_address(true) {
        tracing::warn!("Failed to set SO_REUSEADDR: {}", e);
    }
    if let Some(size) = config.recv_buffer_size {
        if let Err(e) = socket.set_recv_buffer_size(size) {
            tracing::warn!("Failed to set receive buffer size to {}: {}", size, e);
        }
    }

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.udp_port));
    socket.bind(&addr.into())?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(config.poll_timeout()))?;
    Ok(socket)
}

/// Whether a receive error is just the poll timeout expiring
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
