//! NDN-style hierarchical names.
//!
//! A [`Name`] is an ordered sequence of opaque byte components. Component
//! byte order defines the canonical total order the Content Store's
//! skiplist (see `udcn-core::content_store`) walks over.

use crate::error::Error;
use crate::tlv::{self, TlvElement};
use bytes::{Bytes, BytesMut};
use std::fmt;

pub const MAX_NAME_COMPONENT_LENGTH: usize = 255;
pub const MAX_NAME_COMPONENTS: usize = 32;

/// A single name component. `typ` distinguishes a generic component from
/// the synthesised implicit-digest component the Content Store appends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NameComponent {
    pub typ: u8,
    pub bytes: Bytes,
}

impl NameComponent {
    pub fn generic(bytes: impl Into<Bytes>) -> Self {
        Self {
            typ: tlv::TLV_COMPONENT,
            bytes: bytes.into(),
        }
    }

    pub fn implicit_digest(digest: [u8; 32]) -> Self {
        Self {
            typ: tlv::TLV_IMPLICIT_DIGEST_COMPONENT,
            bytes: Bytes::copy_from_slice(&digest),
        }
    }

    /// Wire size of this component once TLV-encoded: header (type + variable
    /// length) plus value. The implicit digest component is always 36 bytes
    /// (1-byte type + 1-byte length + 32-byte digest + 2 bytes of length
    /// escape headroom is not needed since 32 < 253) -- spelled out because
    /// spec.md §3 calls this out as an invariant.
    pub fn wire_len(&self) -> usize {
        TlvElement::new(self.typ, self.bytes.clone()).len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        TlvElement::new(self.typ, self.bytes.clone()).encode(buf);
    }

    fn decode(buf: &mut impl bytes::Buf) -> Result<Self, Error> {
        let element = TlvElement::decode(buf)?;
        Ok(Self {
            typ: element.tlv_type,
            bytes: element.value,
        })
    }
}

impl fmt::Display for NameComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.bytes.iter().all(|&b| b.is_ascii_graphic() || b == b' ') {
            write!(f, "{}", String::from_utf8_lossy(&self.bytes))
        } else {
            write!(f, "0x")?;
            for b in self.bytes.iter() {
                write!(f, "{:02x}", b)?;
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Name {
    components: Vec<NameComponent>,
}

impl Name {
    pub fn root() -> Self {
        Self { components: Vec::new() }
    }

    pub fn from_str(s: &str) -> Self {
        let components = s
            .split('/')
            .filter(|c| !c.is_empty())
            .map(|c| NameComponent::generic(Bytes::copy_from_slice(c.as_bytes())))
            .collect();
        Self { components }
    }

    pub fn push(&mut self, component: NameComponent) -> &mut Self {
        self.components.push(component);
        self
    }

    pub fn with_component(mut self, component: NameComponent) -> Self {
        self.push(component);
        self
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> &[NameComponent] {
        &self.components
    }

    pub fn get(&self, index: usize) -> Option<&NameComponent> {
        self.components.get(index)
    }

    /// Returns the name truncated to its first `len` components.
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            components: self.components.iter().take(len).cloned().collect(),
        }
    }

    /// Every Name is a prefix of itself; the empty name `/` is a prefix of
    /// every name (spec.md §8 boundary case).
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }

    /// Lexicographic comparison over the component sequence, used as the
    /// canonical name order the Content Store's skiplist maintains.
    pub fn cmp_canonical(&self, other: &Self) -> std::cmp::Ordering {
        for (a, b) in self.components.iter().zip(other.components.iter()) {
            let ord = a.typ.cmp(&b.typ).then_with(|| a.bytes.cmp(&b.bytes));
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        self.components.len().cmp(&other.components.len())
    }

    /// Raw concatenated TLV bytes of every component, used as the
    /// name-prefix table's hash/BTree key (spec.md §3: "keyed by the raw
    /// bytes of a Name prefix").
    pub fn key_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for c in &self.components {
            c.encode(&mut buf);
        }
        buf.to_vec()
    }

    pub fn to_tlv(&self) -> TlvElement {
        let mut buf = BytesMut::new();
        for c in &self.components {
            c.encode(&mut buf);
        }
        TlvElement::new(tlv::TLV_NAME, buf.freeze())
    }

    pub fn from_tlv(element: &TlvElement) -> Result<Self, Error> {
        if element.tlv_type != tlv::TLV_NAME {
            return Err(Error::Name(format!(
                "expected name TLV type {}, got {}",
                tlv::TLV_NAME,
                element.tlv_type
            )));
        }
        let mut components = Vec::new();
        let mut buf = element.value.clone();
        while bytes::Buf::has_remaining(&buf) {
            components.push(NameComponent::decode(&mut buf)?);
            if components.len() > MAX_NAME_COMPONENTS {
                return Err(Error::Name("too many name components".into()));
            }
        }
        Ok(Self { components })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for c in &self.components {
            write!(f, "/{}", c)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let name = Name::from_str("/a/b/c");
        assert_eq!(name.len(), 3);
        assert_eq!(name.to_string(), "/a/b/c");
    }

    #[test]
    fn empty_name_is_prefix_of_everything() {
        let root = Name::root();
        let name = Name::from_str("/a/b");
        assert!(root.is_prefix_of(&name));
        assert!(root.is_prefix_of(&root));
    }

    #[test]
    fn prefix_matching_is_component_wise() {
        let short = Name::from_str("/a/b");
        let long = Name::from_str("/a/b/c");
        let sibling = Name::from_str("/a/bb");
        assert!(short.is_prefix_of(&long));
        assert!(!long.is_prefix_of(&short));
        assert!(!short.is_prefix_of(&sibling));
    }

    #[test]
    fn canonical_order_is_componentwise_then_length() {
        let a = Name::from_str("/a");
        let ab = Name::from_str("/a/b");
        let b = Name::from_str("/b");
        assert_eq!(a.cmp_canonical(&ab), std::cmp::Ordering::Less);
        assert_eq!(ab.cmp_canonical(&b), std::cmp::Ordering::Less);
    }

    #[test]
    fn round_trips_through_tlv() {
        let name = Name::from_str("/foo/bar/42");
        let tlv = name.to_tlv();
        let parsed = Name::from_tlv(&tlv).unwrap();
        assert_eq!(name, parsed);
    }

    #[test]
    fn implicit_digest_component_is_36_wire_bytes() {
        let digest_component = NameComponent::implicit_digest([7u8; 32]);
        assert_eq!(digest_component.wire_len(), 36);
    }
}
