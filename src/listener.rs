//! Listening socket setup.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};
use tracing::debug;

/// Create an IPv4 TCP listener on all interfaces.
///
/// `SO_REUSEADDR` is set so a restart can rebind while old connections
/// linger in `TIME_WAIT`. The socket is left blocking.
pub fn open_listener(port: u16, backlog: i32) -> io::Result<TcpListener> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    let listener: TcpListener = socket.into();
    debug!(addr = %listener.local_addr()?, backlog, "Listening socket ready");
    Ok(listener)
}
