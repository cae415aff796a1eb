//! `udcn newface` — request the daemon open an outbound face.
//!
//! The daemon has no transport-level dialer wired into its control path
//! (see DESIGN.md), so `/ccn/<node-id>/newface` is recognised but never
//! answered; this always ends in the client's own timeout rather than an
//! explicit rejection reply.

use anyhow::Result;
use log::info;
use std::time::Duration;

use crate::client::{control_name, Connection};

pub async fn run(addr: String, udp: bool) -> Result<()> {
    info!("requesting new face to {addr} (udp={udp})");
    let transport = if udp { "udp" } else { "tcp" };
    let mut conn = Connection::connect().await?;
    let interest = udcn_common::packet::Interest::new(control_name(&["node", "newface", transport, &addr]));
    conn.send_interest(&interest).await?;
    match conn.recv_content(Duration::from_millis(2000)).await {
        Ok(reply) => println!("face opened: {}", reply.name),
        Err(_) => {
            println!("newface is not wired up in this daemon build: it needs a transport-level");
            println!("dialer the core does not have. No reply was received.");
        }
    }
    Ok(())
}
