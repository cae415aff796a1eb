//! Wire types and codec shared between the µDCN daemon, its transports and the CLI.
//!
//! This crate is deliberately "dumb": name and packet representation, TLV
//! encoding, digesting. The forwarding logic that interprets these types
//! (PIT, FIB, Content Store, scheduler) lives in `udcn-core`.

pub mod error;
pub mod hash;
pub mod metrics;
pub mod name;
pub mod packet;
pub mod tlv;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
