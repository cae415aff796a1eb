//! The internal client's handshake with the core (spec.md §1, §4.4, §6).
//!
//! Everything past this handshake -- actual signing, RPC argument parsing
//! off the wire -- is out of scope (spec.md §1); this module wires the four
//! well-known control names to mutations on the face table and name-prefix
//! table, and gates them to FRIENDLY/LOCAL faces.

use crate::face::{flags as face_flags, FaceFlags, FaceId};
use crate::nameprefix::{fwd_flags, ForwardingEntry, NamePrefixTable};
use crate::rng::Rng48;
use sha2::{Digest, Sha256};
use udcn_common::name::Name;
use udcn_common::packet::ContentObject;

/// Out-of-scope signing seam (spec.md §1). A real daemon signs with
/// Ed25519/ECDSA; we only need the shape of the call so the handshake can
/// produce a `ContentObject` that looks signed.
pub trait Signer {
    fn sign(&self, content: &ContentObject) -> ContentObject;
    fn public_key_bytes(&self) -> &[u8];
}

/// SHA-256 of the daemon's public key (spec.md §6).
pub fn node_id(signer: &dyn Signer) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(signer.public_key_bytes());
    hasher.finalize().into()
}

pub trait ControlHandler {
    fn handle(&mut self, name: &Name, origin: FaceId, origin_flags: FaceFlags) -> Result<ContentObject, ControlError>;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ControlError {
    #[error("unrecognised control name")]
    Unrecognised,
    #[error("rejected: not a friendly/local face")]
    NotFriendly,
    #[error("malformed control request: {0}")]
    Malformed(String),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

fn is_friendly_or_local(flags: FaceFlags) -> bool {
    flags.has(face_flags::FRIENDLY) || flags.has(face_flags::LOCAL)
}

pub struct NewFaceRequest {
    pub addr: std::net::SocketAddr,
    pub use_udp: bool,
}

pub struct PrefixRegRequest {
    pub prefix: Name,
    pub face: FaceId,
    pub flags: u8,
    pub lifetime_secs: u32,
}

/// Concrete handler tying the control names to the name-prefix table. Face
/// creation itself (`newface`) is delegated through `FaceEnroller` since
/// only `udcn-transport` knows how to actually open a socket.
pub trait FaceEnroller {
    fn enroll_outbound(&mut self, req: &NewFaceRequest) -> Result<FaceId, ControlError>;
}

/// Stand-in enroller for callers that only exercise `ping`/`prefixreg`/
/// `reg_self`; `newface` needs a real dialer supplied by `udcn-transport`
/// (opening an outbound socket is not something the core can do itself).
pub struct NullEnroller;

impl FaceEnroller for NullEnroller {
    fn enroll_outbound(&mut self, _req: &NewFaceRequest) -> Result<FaceId, ControlError> {
        Err(ControlError::ResourceExhausted("newface requires a transport-level dialer, not wired up".into()))
    }
}

pub struct DefaultControlHandler<'a, E> {
    pub table: &'a mut NamePrefixTable,
    pub rng: &'a mut Rng48,
    pub enroller: &'a mut E,
}

/// Liveness reply for `/ccn/ping` (spec.md §6, §8 scenario 1); does not
/// touch the face table or FIB, so it needs no enroller type parameter.
pub fn ping() -> ContentObject {
    let mut object = ContentObject::new(Name::from_str("/ccn/ping"), Vec::new(), [0u8; 32]);
    object.signed_info.freshness_seconds = Some(60);
    object
}

impl<'a, E: FaceEnroller> DefaultControlHandler<'a, E> {
    pub fn prefixreg(
        &mut self,
        origin: FaceId,
        origin_flags: FaceFlags,
        req: PrefixRegRequest,
    ) -> Result<ContentObject, ControlError> {
        if !is_friendly_or_local(origin_flags) {
            return Err(ControlError::NotFriendly);
        }
        let keys: Vec<Vec<u8>> = (0..=req.prefix.len()).map(|i| req.prefix.prefix(i).key_bytes()).collect();
        let key = self.table.seek(&keys, self.rng);
        self.table.add_forwarding(
            &key,
            ForwardingEntry { face: req.face, flags: req.flags | fwd_flags::REFRESHED, expiry_secs: req.lifetime_secs },
        );
        let _ = origin;
        let mut echo = ContentObject::new(req.prefix, Vec::new(), [0u8; 32]);
        echo.signed_info.freshness_seconds = Some(5);
        Ok(echo)
    }

    pub fn newface(
        &mut self,
        origin_flags: FaceFlags,
        req: NewFaceRequest,
    ) -> Result<ContentObject, ControlError> {
        if !is_friendly_or_local(origin_flags) {
            return Err(ControlError::NotFriendly);
        }
        let face = self.enroller.enroll_outbound(&req)?;
        let name = Name::from_str(&format!("/ccn/newface/{}", face.packed()));
        let mut object = ContentObject::new(name, Vec::new(), [0u8; 32]);
        object.signed_info.freshness_seconds = Some(5);
        Ok(object)
    }

    pub fn reg_self(&mut self, origin: FaceId, prefix: Name) -> Result<ContentObject, ControlError> {
        self.prefixreg(
            origin,
            FaceFlags(face_flags::FRIENDLY),
            PrefixRegRequest { prefix, face: origin, flags: fwd_flags::ACTIVE, lifetime_secs: 300 },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSigner {
        key: Vec<u8>,
    }
    impl Signer for StubSigner {
        fn sign(&self, content: &ContentObject) -> ContentObject {
            content.clone()
        }
        fn public_key_bytes(&self) -> &[u8] {
            &self.key
        }
    }

    struct StubEnroller {
        next: u32,
    }
    impl FaceEnroller for StubEnroller {
        fn enroll_outbound(&mut self, _req: &NewFaceRequest) -> Result<FaceId, ControlError> {
            let id = FaceId { slot: self.next, generation: 0 };
            self.next += 1;
            Ok(id)
        }
    }

    #[test]
    fn node_id_is_sha256_of_public_key() {
        let signer = StubSigner { key: b"pubkey".to_vec() };
        let id = node_id(&signer);
        assert_eq!(id.len(), 32);
        assert_eq!(id, node_id(&signer));
    }

    #[test]
    fn prefixreg_rejected_from_non_friendly_face() {
        let mut table = NamePrefixTable::new();
        let mut rng = Rng48::new(1);
        let mut enroller = StubEnroller { next: 0 };
        let mut handler = DefaultControlHandler { table: &mut table, rng: &mut rng, enroller: &mut enroller };
        let result = handler.prefixreg(
            FaceId { slot: 1, generation: 0 },
            FaceFlags::default(),
            PrefixRegRequest {
                prefix: Name::from_str("/weather"),
                face: FaceId { slot: 17, generation: 0 },
                flags: fwd_flags::ACTIVE,
                lifetime_secs: 300,
            },
        );
        assert!(matches!(result, Err(ControlError::NotFriendly)));
    }

    #[test]
    fn prefixreg_from_friendly_face_binds_forwarding_entry() {
        let mut table = NamePrefixTable::new();
        let mut rng = Rng48::new(1);
        let mut enroller = StubEnroller { next: 0 };
        let mut handler = DefaultControlHandler { table: &mut table, rng: &mut rng, enroller: &mut enroller };
        let mut origin_flags = FaceFlags::default();
        origin_flags.set(face_flags::FRIENDLY);
        let result = handler.prefixreg(
            FaceId { slot: 1, generation: 0 },
            origin_flags,
            PrefixRegRequest {
                prefix: Name::from_str("/weather"),
                face: FaceId { slot: 17, generation: 0 },
                flags: fwd_flags::ACTIVE | fwd_flags::CHILD_INHERIT,
                lifetime_secs: 300,
            },
        );
        assert!(result.is_ok());
        let key = Name::from_str("/weather").key_bytes();
        assert_eq!(table.get(&key).unwrap().forwarding.len(), 1);
    }
}
