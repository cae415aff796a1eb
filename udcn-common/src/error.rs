//! Error types for the µDCN wire layer.

use thiserror::Error;

/// Errors surfaced by name/packet parsing and TLV encoding.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or truncated TLV structure.
    #[error("TLV error: {0}")]
    Tlv(String),

    /// A structurally valid TLV that isn't a legal Interest/ContentObject.
    #[error("packet error: {0}")]
    Packet(String),

    /// Name component count or length exceeds the protocol bound.
    #[error("name error: {0}")]
    Name(String),

    /// Underlying I/O failure (surfaced by callers; this crate has no I/O of its own).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for conditions that don't deserve their own variant.
    #[error("{0}")]
    Other(String),
}
