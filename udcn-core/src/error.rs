//! Error types for the forwarding core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("wire codec error: {0}")]
    Wire(#[from] udcn_common::Error),

    /// Returned when the face table has no free slots and cannot grow
    /// further (spec.md §7: resource exhaustion propagates as a `newface`
    /// failure).
    #[error("face table exhausted")]
    FaceTableExhausted,

    #[error("unknown faceid {0:?}")]
    UnknownFace(crate::face::FaceId),

    #[error("control request rejected: {0}")]
    ControlRejected(String),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

pub type Result<T> = std::result::Result<T, Error>;
