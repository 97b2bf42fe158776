//! TCP listener (spec §6 "External interfaces", component C7).
//!
//! Binds the debugger-facing socket, accepts exactly one client, and
//! configures it the way the session glue expects: `TCP_NODELAY` so RSP
//! packets aren't batched by Nagle's algorithm, `SO_KEEPALIVE` so a dead
//! link is eventually noticed, and non-blocking so the framer's single-byte
//! reads never stall the event pump.

use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};

use socket2::{Domain, Socket, Type};
use thiserror::Error;

/// Ports below this are rejected at bind time.
const MIN_PORT: u16 = 1024;

/// Errors binding or accepting on the debugger-facing socket.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested port fell outside `1024..=65535`.
    #[error("port {0} is out of the allowed range 1024-65535")]
    PortOutOfRange(u16),
    /// Any other I/O failure binding, listening, or accepting.
    #[error("listener I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Listens for exactly one debugger connection.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Binds `host:port`, rejecting ports outside `1024..=65535`.
    pub fn bind(host: IpAddr, port: u16) -> Result<Self, Error> {
        if port < MIN_PORT {
            return Err(Error::PortOutOfRange(port));
        }
        let addr = SocketAddr::new(host, port);
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1)?;
        Ok(Self { inner: socket.into() })
    }

    /// Blocks until a debugger connects, then configures the accepted
    /// socket per spec: `TCP_NODELAY`, `SO_KEEPALIVE`, non-blocking.
    pub fn accept(&self) -> Result<TcpStream, Error> {
        let (stream, peer) = self.inner.accept()?;
        log::info!("debugger connected: {peer}");
        stream.set_nodelay(true)?;
        socket2::SockRef::from(&stream).set_keepalive(true)?;
        stream.set_nonblocking(true)?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn rejects_well_known_ports() {
        let err = Listener::bind(IpAddr::from([127, 0, 0, 1]), 80).unwrap_err();
        assert!(matches!(err, Error::PortOutOfRange(80)));
    }

    #[test]
    fn rejects_port_zero() {
        let err = Listener::bind(IpAddr::from([127, 0, 0, 1]), 0).unwrap_err();
        assert!(matches!(err, Error::PortOutOfRange(0)));
    }

    #[test]
    fn binds_and_accepts_a_client() {
        let host = IpAddr::from([127, 0, 0, 1]);
        let listener = Listener::bind(host, 18_273).unwrap();
        let addr = SocketAddr::new(host, 18_273);
        let client = thread::spawn(move || TcpStream::connect(addr).unwrap());
        let server_side = listener.accept().unwrap();
        client.join().unwrap();
        assert!(server_side.set_nodelay(true).is_ok());
    }
}
