//! `udcn interest` — send an Interest and print the matching ContentObject.

use anyhow::Result;
use log::info;
use std::time::Duration;
use udcn_common::name::Name;
use udcn_common::packet::Interest;

use crate::client::Connection;

pub async fn send_interest(name_str: String, timeout_ms: u64) -> Result<()> {
    info!("sending Interest: name={name_str}, timeout={timeout_ms}ms");

    let name = Name::from_str(&name_str);
    let mut interest = Interest::new(name);
    interest.can_be_prefix = false;
    interest.must_be_fresh = true;

    println!("Sending Interest: {name_str}");
    println!("Timeout: {timeout_ms}ms");

    let mut conn = Connection::connect().await?;
    conn.send_interest(&interest).await?;

    match conn.recv_content(Duration::from_millis(timeout_ms)).await {
        Ok(data) => {
            println!("\nReceived ContentObject:");
            println!("  Name: {}", data.name);
            println!("  Freshness: {:?} seconds", data.signed_info.freshness_seconds);

            let content = data.content;
            if content.len() <= 100 {
                println!("  Content: {content:?}");
                if let Ok(text) = String::from_utf8(content.to_vec()) {
                    println!("  Content (as text): {text}");
                }
            } else {
                println!("  Content: {} bytes", content.len());
                println!("  Content (first 100 bytes): {:?}", &content[..100]);
            }
        }
        Err(err) => {
            println!("no reply: {err}");
        }
    }

    Ok(())
}
