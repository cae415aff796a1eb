//! TCP transport: LINK-framed faces to remote peers, IPv4 and IPv6 alike.
//! Used for statically configured neighbours rather than ad-hoc discovery
//! (spec.md §6).

use anyhow::{Context, Result};
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, info, warn};
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use udcn_core::dispatcher::InboundEnvelope;
use udcn_core::face::{flags as face_flags, FaceFlags, FaceId, PeerAddr};

use crate::{enroll, teardown, CoreHandles, FaceRegistration, READ_CHUNK};

/// Accepts connections on `addr` until the listener errors.
pub async fn listen(
    addr: SocketAddr,
    handles: CoreHandles,
    registrations: mpsc::UnboundedSender<FaceRegistration>,
) -> Result<()> {
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding tcp listener {addr}"))?;
    info!("listening on tcp {addr}");

    loop {
        let (stream, peer) = listener.accept().await.context("accepting tcp connection")?;
        stream.set_nodelay(true).ok();
        let handles = handles.clone();
        let registrations = registrations.clone();
        tokio::spawn(async move {
            if let Err(err) = serve(stream, peer, handles, registrations).await {
                warn!("tcp connection from {peer} ended: {err:#}");
            }
        });
    }
}

/// Dials a neighbour and enrolls the resulting connection the same way an
/// inbound `accept()` would (spec.md's faces are symmetric once established).
pub async fn connect(
    addr: SocketAddr,
    handles: CoreHandles,
    registrations: mpsc::UnboundedSender<FaceRegistration>,
) -> Result<FaceId> {
    let stream = TcpStream::connect(addr).await.with_context(|| format!("connecting to {addr}"))?;
    stream.set_nodelay(true).ok();
    let peer = stream.peer_addr().unwrap_or(addr);
    let handles_for_task = handles.clone();
    let registrations_for_task = registrations.clone();
    let face = enroll_for_peer(&handles, peer).await?;
    spawn_pump(stream, face, handles_for_task, registrations_for_task);
    Ok(face)
}

async fn enroll_for_peer(handles: &CoreHandles, peer: SocketAddr) -> Result<FaceId> {
    let mut flags = FaceFlags::default();
    flags.set(face_flags::LINK_FRAMED);
    if peer.is_ipv6() {
        flags.set(face_flags::INET6);
    } else {
        flags.set(face_flags::INET);
    }
    enroll(handles, flags, PeerAddr::Socket(peer)).await
}

async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    handles: CoreHandles,
    registrations: mpsc::UnboundedSender<FaceRegistration>,
) -> Result<()> {
    let face = enroll_for_peer(&handles, peer).await?;
    debug!("tcp face enrolled for {peer}: {face:?}");
    pump(stream, face, handles, registrations).await
}

fn spawn_pump(stream: TcpStream, face: FaceId, handles: CoreHandles, registrations: mpsc::UnboundedSender<FaceRegistration>) {
    tokio::spawn(async move {
        if let Err(err) = pump(stream, face, handles, registrations).await {
            warn!("tcp face {face:?} ended: {err:#}");
        }
    });
}

async fn pump(
    stream: TcpStream,
    face: FaceId,
    handles: CoreHandles,
    registrations: mpsc::UnboundedSender<FaceRegistration>,
) -> Result<()> {
    let (mut read_half, mut write_half) = stream.into_split();
    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Bytes>();
    let _ = registrations.send(FaceRegistration { face, writer: writer_tx });

    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = writer_rx.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    let result: Result<()> = loop {
        let n = match read_half.read(&mut chunk).await.context("reading tcp socket") {
            Ok(n) => n,
            Err(err) => break Err(err),
        };
        if n == 0 {
            break Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        loop {
            match udcn_common::packet::parse_one(&buf, udcn_common::hash::digest) {
                Ok(Some(parsed)) => {
                    let consumed = parsed.consumed;
                    let _ = handles.inbound_tx.send(InboundEnvelope { face, packet: parsed.packet, digest: None });
                    buf.advance(consumed);
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("malformed envelope on tcp face {face:?}: {err}");
                    break;
                }
            }
        }
    };

    writer_task.abort();
    teardown(&handles, face);
    result
}
