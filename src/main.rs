//! `udcnd` — the µDCN forwarding daemon binary.
//!
//! Wires `udcn-core`'s dispatcher to the Unix, TCP and UDP transports in
//! `udcn-transport`, then runs the single-threaded cooperative event loop
//! spec.md §4.7 describes: the dispatcher owns all forwarding state, every
//! transport task only ever talks to it over channels.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use log::{info, warn};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::mpsc;
use udcn_core::config::DaemonConfig;
use udcn_core::dispatcher::{Dispatcher, DispatcherHandles, OutboundAction};
use udcn_core::face::FaceId;
use udcn_transport::{unix, tcp, udp, CoreHandles, FaceRegistration};

/// Command-line overrides; everything else comes from `DaemonConfig::from_env`
/// (spec.md §6's environment variables).
#[derive(Parser)]
#[clap(author, version, about)]
struct Args {
    /// Verbose (debug-level) logging
    #[clap(short, long)]
    verbose: bool,

    /// TCP bind address, e.g. 0.0.0.0:6363. Omit to skip the TCP face.
    #[clap(long)]
    tcp_bind: Option<SocketAddr>,

    /// UDP bind address, e.g. 0.0.0.0:6363. Omit to skip the UDP face.
    #[clap(long)]
    udp_bind: Option<SocketAddr>,

    /// Multicast groups to join on the UDP socket (comma-separated).
    #[clap(long, value_delimiter = ',')]
    udp_multicast: Vec<IpAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if args.verbose { "debug" } else { "info" }),
    )
    .init();

    let config = DaemonConfig::from_env();
    info!("starting udcnd, content store capacity {}", config.content_store_capacity);

    let (mut dispatcher, handles) = Dispatcher::new(config.content_store_capacity);
    let DispatcherHandles { inbound_tx, mut outbound_rx, control_tx } = handles;
    let core_handles = CoreHandles { inbound_tx, control_tx };

    let (reg_tx, mut reg_rx) = mpsc::unbounded_channel::<FaceRegistration>();

    let unix_path = unix::socket_path(&config.port_suffix);
    {
        let core_handles = core_handles.clone();
        let reg_tx = reg_tx.clone();
        let path = unix_path.clone();
        tokio::spawn(async move {
            if let Err(err) = unix::listen(&path, core_handles, reg_tx).await {
                warn!("unix listener stopped: {err:#}");
            }
        });
    }

    if let Some(addr) = args.tcp_bind {
        let core_handles = core_handles.clone();
        let reg_tx = reg_tx.clone();
        tokio::spawn(async move {
            if let Err(err) = tcp::listen(addr, core_handles, reg_tx).await {
                warn!("tcp listener stopped: {err:#}");
            }
        });
    }

    if let Some(addr) = args.udp_bind {
        let core_handles = core_handles.clone();
        let reg_tx = reg_tx.clone();
        let groups = args.udp_multicast.clone();
        tokio::spawn(async move {
            if let Err(err) = udp::listen(addr, groups, core_handles, reg_tx).await {
                warn!("udp listener stopped: {err:#}");
            }
        });
    }

    let mut writers: HashMap<FaceId, mpsc::UnboundedSender<Bytes>> = HashMap::new();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("installing SIGTERM handler")?;

    loop {
        tokio::select! {
            more = dispatcher.run_once() => {
                if !more {
                    info!("inbound channel closed, shutting down");
                    break;
                }
                drain_outbound(&dispatcher, &mut outbound_rx, &mut writers);
            }
            Some(registration) = reg_rx.recv() => {
                writers.insert(registration.face, registration.writer);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
        }
    }

    if unix_path.exists() {
        std::fs::remove_file(&unix_path).ok();
    }
    Ok(())
}

/// Drains every `OutboundAction` the dispatcher queued during the
/// `run_once` call that just returned, handing bytes to whichever
/// transport registered that face's writer.
fn drain_outbound(
    dispatcher: &Dispatcher,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundAction>,
    writers: &mut HashMap<FaceId, mpsc::UnboundedSender<Bytes>>,
) {
    while let Ok(action) = outbound_rx.try_recv() {
        match action {
            OutboundAction::Send { face, accession } => {
                if let Some(writer) = writers.get(&face) {
                    if let Some(bytes) = dispatcher.encode_for_send(accession) {
                        let _ = writer.send(bytes);
                    }
                }
            }
            OutboundAction::SendInterest { face, nonce } => {
                if let Some(writer) = writers.get(&face) {
                    if let Some(bytes) = dispatcher.encode_interest_for_send(&nonce) {
                        let _ = writer.send(bytes);
                    }
                }
            }
            OutboundAction::TearDown { face } => {
                writers.remove(&face);
            }
        }
    }
}
