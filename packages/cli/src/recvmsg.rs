//! Recovers the true destination address of an inbound UDP datagram via
//! `IPV6_RECVPKTINFO`/`recvmsg` (spec §4.G): `recv_from` alone only reports
//! the *source* peer, but the virtual netif's `resolve()` needs the
//! *destination* the packet actually arrived on to pick the right node.
//! Grounded directly in the original `sl_zw_netif.c`'s own
//! `setsockopt(IPV6_RECVPKTINFO)` + `recvmsg` + `in6_pktinfo` cmsg pattern.

use libc::in6_pktinfo;
use nix::cmsg_space;
use nix::sys::socket::{recvmsg, setsockopt, sockopt::Ipv6RecvPacketInfo, ControlMessageOwned, MsgFlags, SockaddrIn6};
use std::io::{self, IoSliceMut};
use std::net::{Ipv6Addr, SocketAddrV6};
use std::os::fd::{AsRawFd, BorrowedFd};
use tokio::io::Interest;
use tokio::net::UdpSocket;

/// Enables `IPV6_RECVPKTINFO` on `socket`; must be called once before the
/// first [`recv_with_dest`] call.
pub fn enable_pktinfo(socket: &UdpSocket) -> io::Result<()> {
    let fd = unsafe { BorrowedFd::borrow_raw(socket.as_raw_fd()) };
    setsockopt(&fd, Ipv6RecvPacketInfo, &true).map_err(|e| io::Error::from_raw_os_error(e as i32))
}

/// Reads one datagram, returning its length, source address, and the
/// destination address it actually arrived on.
pub async fn recv_with_dest(
    socket: &UdpSocket,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddrV6, Ipv6Addr)> {
    loop {
        socket.readable().await?;
        let result = socket.try_io(Interest::READABLE, || {
            let fd = socket.as_raw_fd();
            let mut iov = [IoSliceMut::new(buf)];
            let mut cmsg_buf = cmsg_space!(in6_pktinfo);

            let msg = recvmsg::<SockaddrIn6>(fd, &mut iov, Some(&mut cmsg_buf), MsgFlags::empty())
                .map_err(|e| io::Error::from_raw_os_error(e as i32))?;

            let from_addr = msg
                .address
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "recvmsg returned no source address"))?;
            let from = SocketAddrV6::new(from_addr.ip(), from_addr.port(), 0, 0);

            let dest = msg
                .cmsgs()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
                .find_map(|cmsg| match cmsg {
                    ControlMessageOwned::Ipv6PacketInfo(pktinfo) => Some(Ipv6Addr::from(pktinfo.ipi6_addr.s6_addr)),
                    _ => None,
                })
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no IPV6_PKTINFO control message"))?;

            Ok((msg.bytes, from, dest))
        });

        match result {
            Ok(v) => return Ok(v),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}
