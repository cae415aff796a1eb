//! `udcn publish` — inject a ContentObject straight into the daemon's
//! content store, without waiting for a matching Interest first.

use anyhow::Result;
use log::info;
use udcn_common::name::Name;
use udcn_common::packet::ContentObject;

use crate::client::Connection;

pub async fn publish_data(name_str: String, content: String, ttl: u32) -> Result<()> {
    info!("publishing data: name={name_str}, content_len={}, ttl={ttl}s", content.len());

    let name = Name::from_str(&name_str);
    let mut object = ContentObject::new(name, content.clone().into_bytes(), [0u8; 32]);
    object.signed_info.freshness_seconds = Some(ttl);

    println!("Publishing:");
    println!("  Name: {name_str}");
    println!(
        "  Content ({}): {}",
        content.len(),
        if content.len() > 32 { format!("{}...", &content[..30]) } else { content.clone() }
    );
    println!("  Freshness: {ttl}s");

    let mut conn = Connection::connect().await?;
    conn.send_inject(&object).await?;
    println!("Sent to daemon.");

    Ok(())
}
