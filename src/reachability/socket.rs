//! Raw ICMP socket transport

use std::io;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use super::packet::PACKET_LEN;

/// Non-blocking datagram transport for the reachability monitor
///
/// `WouldBlock` from either method means try again later; the monitor's
/// state machine schedules the retry.
pub trait IcmpTransport: Send {
    /// Send one echo request to the monitored target
    fn try_send(&mut self, packet: &[u8]) -> io::Result<usize>;

    /// Receive one raw datagram; returns its length and source address
    /// (`None` when the kernel reports a non-inet source)
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)>;
}

/// Raw ICMP socket bound to one target, requires CAP_NET_RAW
pub struct RawIcmpSocket {
    socket: Socket,
    target: SockAddr,
}

impl RawIcmpSocket {
    pub fn new(target: Ipv4Addr) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            target: SockAddr::from(SocketAddrV4::new(target, 0)),
        })
    }
}

impl IcmpTransport for RawIcmpSocket {
    fn try_send(&mut self, packet: &[u8]) -> io::Result<usize> {
        self.socket.send_to(packet, &self.target)
    }

    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<(usize, Option<SocketAddr>)> {
        let mut raw = [MaybeUninit::<u8>::uninit(); PACKET_LEN];
        let take = raw.len().min(buf.len());
        let (n, addr) = self.socket.recv_from(&mut raw[..take])?;
        let n = n.min(buf.len());
        for (dst, src) in buf[..n].iter_mut().zip(&raw[..n]) {
            // initialized by recv_from up to n
            *dst = unsafe { src.assume_init() };
        }
        Ok((n, addr.as_socket()))
    }
}
