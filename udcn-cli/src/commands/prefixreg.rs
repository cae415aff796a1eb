//! `udcn prefixreg` — register a forwarding entry for a name prefix.

use anyhow::Result;
use log::info;
use std::time::Duration;

use crate::client::{control_name, Connection};
use udcn_common::name::Name;

pub async fn run(prefix: String, face: u64, flags: u8, lifetime: u32) -> Result<()> {
    info!("registering prefix {prefix} -> face {face} (flags={flags:#x}, lifetime={lifetime}s)");

    let parsed_prefix = Name::from_str(&prefix);
    let prefix_components: Vec<String> = parsed_prefix.components().iter().map(|c| c.to_string()).collect();

    let mut args = vec!["node".to_string(), "prefixreg".to_string(), face.to_string(), flags.to_string(), lifetime.to_string()];
    args.extend(prefix_components);
    let args_str: Vec<&str> = args.iter().map(String::as_str).collect();

    let mut conn = Connection::connect().await?;
    let interest = udcn_common::packet::Interest::new(control_name(&args_str));
    conn.send_interest(&interest).await?;
    let reply = conn.recv_content(Duration::from_millis(2000)).await?;
    println!("registered: {} (echoed as {})", prefix, reply.name);
    Ok(())
}
