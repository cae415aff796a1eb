//! Transport faces for the µDCN forwarding daemon: a Unix-domain socket for
//! local clients, TCP for link-framed peers, and UDP (unicast and
//! multicast) for datagram peers.
//!
//! None of these modules touch the forwarding core's tables directly. A
//! connection is enrolled by sending a `ControlRequest` and forwarded
//! envelopes by sending on `inbound_tx`, the same seam `udcn-core` uses for
//! its own internal client (spec.md §1/§6: transports are external
//! collaborators).

use anyhow::{anyhow, Result};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use udcn_core::dispatcher::ControlRequest;
use udcn_core::face::{FaceFlags, FaceId, PeerAddr};

pub mod tcp;
pub mod udp;
pub mod unix;

/// Size of the scratch buffer each read uses to pull bytes off a stream
/// socket before handing complete envelopes to `udcn_common::packet::parse_one`.
pub const READ_CHUNK: usize = 16 * 1024;

/// The two channels every transport needs into the dispatcher: one to hand
/// off parsed packets, one to enroll or tear down faces. Cheap to clone,
/// since the channels themselves are already shared senders.
#[derive(Clone)]
pub struct CoreHandles {
    pub inbound_tx: mpsc::UnboundedSender<udcn_core::dispatcher::InboundEnvelope>,
    pub control_tx: mpsc::UnboundedSender<ControlRequest>,
}

/// Tells the outbound pump (owned by the daemon binary, see its `main.rs`)
/// where to write bytes destined for a newly enrolled face.
pub struct FaceRegistration {
    pub face: FaceId,
    pub writer: mpsc::UnboundedSender<Bytes>,
}

/// Enrolls a face through the dispatcher's control channel and awaits the
/// assigned `FaceId`.
pub async fn enroll(handles: &CoreHandles, flags: FaceFlags, peer: PeerAddr) -> Result<FaceId> {
    let (reply, reply_rx) = oneshot::channel();
    handles
        .control_tx
        .send(ControlRequest::Enroll { flags, peer, reply })
        .map_err(|_| anyhow!("dispatcher control channel closed"))?;
    let face = reply_rx.await.map_err(|_| anyhow!("dispatcher dropped enroll reply"))??;
    Ok(face)
}

/// Tears a face down; best-effort, since by the time a connection dies the
/// dispatcher may already be shutting down too.
pub fn teardown(handles: &CoreHandles, face: FaceId) {
    let _ = handles.control_tx.send(ControlRequest::TearDown { face });
}

/// Like `enroll`, but reuses an existing face for `peer` if one is already
/// on file, for datagram transports where every inbound packet needs a
/// face lookup rather than a fresh enrollment.
pub async fn ensure_datagram_face(handles: &CoreHandles, flags: FaceFlags, peer: PeerAddr) -> Result<FaceId> {
    let (reply, reply_rx) = oneshot::channel();
    handles
        .control_tx
        .send(ControlRequest::EnsureDatagramFace { flags, peer, reply })
        .map_err(|_| anyhow!("dispatcher control channel closed"))?;
    let face = reply_rx.await.map_err(|_| anyhow!("dispatcher dropped enroll reply"))??;
    Ok(face)
}
