//! Connection to a running daemon over its Unix-domain local face.
//!
//! Every command in this CLI is just an Interest (or, for `publish`, an
//! Inject) sent down the same socket a producer or consumer application
//! would use; there is no separate RPC transport.

use anyhow::{anyhow, Context, Result};
use bytes::{Buf, BytesMut};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;
use udcn_common::name::{Name, NameComponent};
use udcn_common::packet::{ContentObject, Interest, Packet};

/// Resolves the same rendezvous path the daemon listens on
/// (`UDCND_PORT_SUFFIX`, defaulting to the empty suffix).
pub fn default_socket_path() -> PathBuf {
    let suffix = std::env::var("UDCND_PORT_SUFFIX").unwrap_or_default();
    udcn_transport::unix::socket_path(&suffix)
}

/// Builds a `/ccn/...` control name from plain string arguments, the wire
/// convention this daemon uses for control-RPC arguments (see DESIGN.md).
pub fn control_name(components: &[&str]) -> Name {
    let mut name = Name::from_str("/ccn");
    for component in components {
        name.push(NameComponent::generic(component.as_bytes().to_vec()));
    }
    name
}

pub struct Connection {
    stream: UnixStream,
    buf: BytesMut,
}

impl Connection {
    pub async fn connect() -> Result<Self> {
        let path = default_socket_path();
        let stream = UnixStream::connect(&path)
            .await
            .with_context(|| format!("connecting to daemon at {}", path.display()))?;
        Ok(Self { stream, buf: BytesMut::new() })
    }

    pub async fn send_interest(&mut self, interest: &Interest) -> Result<()> {
        let mut out = BytesMut::new();
        interest.encode(&mut out);
        self.stream.write_all(&out).await.context("writing Interest")?;
        Ok(())
    }

    pub async fn send_inject(&mut self, object: &ContentObject) -> Result<()> {
        let mut body = BytesMut::new();
        object.encode(&mut body);
        let mut out = BytesMut::new();
        udcn_common::tlv::TlvElement::new(udcn_common::tlv::TLV_INJECT, body.freeze()).encode(&mut out);
        self.stream.write_all(&out).await.context("writing Inject")?;
        Ok(())
    }

    /// Waits up to `wait` for a complete ContentObject envelope to arrive.
    pub async fn recv_content(&mut self, wait: Duration) -> Result<ContentObject> {
        timeout(wait, self.read_one_content()).await.map_err(|_| anyhow!("timed out waiting for a reply"))?
    }

    async fn read_one_content(&mut self) -> Result<ContentObject> {
        let mut chunk = [0u8; 4096];
        loop {
            match udcn_common::packet::parse_one(&self.buf, udcn_common::hash::digest) {
                Ok(Some(parsed)) => {
                    let consumed = parsed.consumed;
                    self.buf.advance(consumed);
                    return match parsed.packet {
                        Packet::ContentObject(co) => Ok(co),
                        _ => Err(anyhow!("expected a ContentObject reply from the daemon")),
                    };
                }
                Ok(None) => {}
                Err(err) => return Err(anyhow!("malformed reply from daemon: {err}")),
            }
            let n = self.stream.read(&mut chunk).await.context("reading from daemon")?;
            if n == 0 {
                return Err(anyhow!("daemon closed the connection"));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_name_builds_ccn_prefixed_path() {
        let name = control_name(&["ping"]);
        let comps: Vec<String> = name.components().iter().map(|c| c.to_string()).collect();
        assert_eq!(comps, vec!["ccn".to_string(), "ping".to_string()]);
    }

    #[test]
    fn control_name_with_multiple_components() {
        let name = control_name(&["node", "prefixreg", "7", "1", "30"]);
        let comps: Vec<String> = name.components().iter().map(|c| c.to_string()).collect();
        assert_eq!(comps, vec!["ccn", "node", "prefixreg", "7", "1", "30"]);
    }
}
