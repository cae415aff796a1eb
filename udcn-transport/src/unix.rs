//! Unix-domain socket transport: one LOCAL, LINK-framed face per
//! connection, rendezvousing at a per-instance socket path removed on exit
//! (spec.md §6).

use anyhow::{Context, Result};
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use udcn_core::dispatcher::InboundEnvelope;
use udcn_core::face::{flags as face_flags, FaceFlags, FaceId, PeerAddr};

use crate::{enroll, teardown, CoreHandles, FaceRegistration, READ_CHUNK};

/// The rendezvous path a client uses to find this daemon instance: the
/// platform temp directory, named by port suffix so several daemons can
/// coexist (spec.md §6).
pub fn socket_path(port_suffix: &str) -> PathBuf {
    std::env::temp_dir().join(format!(".udcn_{port_suffix}.sock"))
}

/// Binds `path` (removing any stale socket left behind by a prior run) and
/// accepts connections until the listener errors or the task is cancelled.
pub async fn listen(
    path: &Path,
    handles: CoreHandles,
    registrations: mpsc::UnboundedSender<FaceRegistration>,
) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path).ok();
    }
    let listener = UnixListener::bind(path).with_context(|| format!("binding unix socket {}", path.display()))?;
    info!("listening on unix socket {}", path.display());

    loop {
        let (stream, _addr) = listener.accept().await.context("accepting unix connection")?;
        let handles = handles.clone();
        let registrations = registrations.clone();
        tokio::spawn(async move {
            if let Err(err) = serve(stream, handles.clone(), registrations).await {
                warn!("unix connection ended: {err:#}");
            }
        });
    }
}

async fn serve(
    stream: UnixStream,
    handles: CoreHandles,
    registrations: mpsc::UnboundedSender<FaceRegistration>,
) -> Result<()> {
    let mut flags = FaceFlags::default();
    flags.set(face_flags::LOCAL);
    flags.set(face_flags::LINK_FRAMED);
    let face = enroll(&handles, flags, PeerAddr::None).await?;
    debug!("unix face enrolled: {face:?}");

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

    let result = read_loop(&mut read_half, face, &handles).await;
    writer_task.abort();
    teardown(&handles, face);
    result
}

async fn read_loop(
    read_half: &mut tokio::net::unix::OwnedReadHalf,
    face: FaceId,
    handles: &CoreHandles,
) -> Result<()> {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = read_half.read(&mut chunk).await.context("reading unix socket")?;
        if n == 0 {
            return Ok(());
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
                    warn!("malformed envelope on unix face {face:?}: {err}");
                    return Ok(());
                }
            }
        }
    }
}
