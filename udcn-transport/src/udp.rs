//! UDP transport: unicast and multicast datagram faces. Every packet is a
//! complete envelope (no reassembly across datagrams); faces are resolved
//! by peer address rather than by connection (spec.md §6).

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use log::{info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::mpsc;
use udcn_common::packet::MAX_ENVELOPE_SIZE;
use udcn_core::dispatcher::InboundEnvelope;
use udcn_core::face::{flags as face_flags, FaceFlags, FaceId, PeerAddr};

use crate::{ensure_datagram_face, CoreHandles, FaceRegistration};

fn make_socket(bind_addr: SocketAddr, multicast_groups: &[IpAddr]) -> Result<tokio::net::UdpSocket> {
    let domain = if bind_addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).context("creating udp socket")?;
    socket.set_reuse_address(true).ok();
    socket.bind(&bind_addr.into()).with_context(|| format!("binding udp socket {bind_addr}"))?;
    socket.set_nonblocking(true).context("setting udp socket nonblocking")?;

    for group in multicast_groups {
        match (group, bind_addr.ip()) {
            (IpAddr::V4(group), IpAddr::V4(iface)) => socket
                .join_multicast_v4(group, &iface)
                .with_context(|| format!("joining multicast group {group}"))?,
            (IpAddr::V6(group), _) => socket
                .join_multicast_v6(group, 0)
                .with_context(|| format!("joining multicast group {group}"))?,
            _ => return Err(anyhow!("multicast group {group} does not match the bind address family")),
        }
    }

    let std_socket: std::net::UdpSocket = socket.into();
    tokio::net::UdpSocket::from_std(std_socket).context("adopting udp socket into the async runtime")
}

/// Binds `bind_addr`, joins `multicast_groups` if any, and services
/// incoming datagrams until the socket errors.
pub async fn listen(
    bind_addr: SocketAddr,
    multicast_groups: Vec<IpAddr>,
    handles: CoreHandles,
    registrations: mpsc::UnboundedSender<FaceRegistration>,
) -> Result<()> {
    let socket = Arc::new(make_socket(bind_addr, &multicast_groups)?);
    info!("listening on udp {bind_addr}{}", if multicast_groups.is_empty() { String::new() } else { format!(" (multicast: {multicast_groups:?})") });

    let (send_tx, mut send_rx) = mpsc::unbounded_channel::<(SocketAddr, Bytes)>();
    {
        let socket = Arc::clone(&socket);
        tokio::spawn(async move {
            while let Some((peer, bytes)) = send_rx.recv().await {
                if let Err(err) = socket.send_to(&bytes, peer).await {
                    warn!("udp send to {peer} failed: {err}");
                }
            }
        });
    }

    let mut registered_peers: HashSet<FaceId> = HashSet::new();
    let mut buf = vec![0u8; MAX_ENVELOPE_SIZE + 64];
    loop {
        let (n, peer) = socket.recv_from(&mut buf).await.context("receiving udp datagram")?;

        let mut flags = FaceFlags::default();
        flags.set(face_flags::DGRAM);
        if peer.ip().is_multicast() {
            flags.set(face_flags::MCAST);
        }
        if peer.is_ipv6() {
            flags.set(face_flags::INET6);
        } else {
            flags.set(face_flags::INET);
        }

        let face = match ensure_datagram_face(&handles, flags, PeerAddr::Socket(peer)).await {
            Ok(face) => face,
            Err(err) => {
                warn!("enrolling udp face for {peer} failed: {err:#}");
                continue;
            }
        };

        if registered_peers.insert(face) {
            let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Bytes>();
            let _ = registrations.send(FaceRegistration { face, writer: writer_tx });
            let send_tx = send_tx.clone();
            tokio::spawn(async move {
                while let Some(bytes) = writer_rx.recv().await {
                    let _ = send_tx.send((peer, bytes));
                }
            });
        }

        match udcn_common::packet::parse_one(&buf[..n], udcn_common::hash::digest) {
            Ok(Some(parsed)) => {
                let _ = handles.inbound_tx.send(InboundEnvelope { face, packet: parsed.packet, digest: None });
            }
            Ok(None) => warn!("udp datagram from {peer} did not parse as a full envelope"),
            Err(err) => warn!("malformed udp datagram from {peer}: {err}"),
        }
    }
}
