//! Digest seam used by the Content Store to compute the implicit name digest.
//!
//! Signature verification is explicitly out of scope for the core (see
//! spec.md §1); this module only provides the digest used to splice a
//! ContentObject's terminal name component (spec.md §4.3 step 1).

use sha2::{Digest, Sha256};

/// A running digest. The Content Store feeds it the signed range of a
/// ContentObject (name + signed-info + content) and reads back 32 bytes.
pub trait Hasher {
    fn update(&mut self, input: &[u8]);
    fn finalize(self) -> [u8; 32];
}

#[derive(Default)]
pub struct Sha256Hasher(Sha256);

impl Hasher for Sha256Hasher {
    fn update(&mut self, input: &[u8]) {
        self.0.update(input);
    }

    fn finalize(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

/// Convenience one-shot digest, used by tests and by callers that already
/// have the whole signed range in one slice.
pub fn digest(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256Hasher::default();
    hasher.update(bytes);
    hasher.finalize()
}
