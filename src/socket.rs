//! UDP transport of KRPC packets.

use std::fmt::Debug;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::time::Duration;

use tracing::debug;

use crate::rpc::config::MULTICAST_GROUP;

/// Largest packet read from the socket.
pub const MTU: usize = 2048;

/// Datagram transport the node reads from and writes to.
pub trait Transport: Debug + Send + Sync {
    /// Block until a packet arrives or the read timeout elapses.
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    /// Try to join the multicast group. Returns `true` once joined.
    fn join_multicast(&self) -> bool {
        false
    }
}

#[derive(Debug)]
/// [Transport] over an IPv4 [UdpSocket].
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind to `port` on every interface. Reads time out after `read_timeout`
    /// so receiving threads can notice a shutdown.
    pub fn bind(port: u16, read_timeout: Duration) -> io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_read_timeout(Some(read_timeout))?;

        Ok(UdpTransport { socket })
    }
}

impl Transport for UdpTransport {
    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    fn send_to(&self, buf: &[u8], to: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(buf, to)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn join_multicast(&self) -> bool {
        let group: Ipv4Addr = match MULTICAST_GROUP.parse() {
            Ok(group) => group,
            Err(_) => return false,
        };

        match self
            .socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
        {
            Ok(()) => {
                debug!(%group, "Joined multicast group");
                true
            }
            Err(error) => {
                debug!(%group, ?error, "Failed to join multicast group");
                false
            }
        }
    }
}
