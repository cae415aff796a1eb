//! `udcn ping` — liveness check against `/ccn/ping`.

use anyhow::Result;
use log::info;
use std::time::Duration;

use crate::client::{control_name, Connection};

pub async fn run() -> Result<()> {
    info!("pinging daemon");
    let mut conn = Connection::connect().await?;
    let interest = udcn_common::packet::Interest::new(control_name(&["ping"]));
    conn.send_interest(&interest).await?;
    let reply = conn.recv_content(Duration::from_millis(2000)).await?;
    println!("pong: {}", reply.name);
    Ok(())
}
