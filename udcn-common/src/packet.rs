//! The structured binary envelope (spec.md §6).
//!
//! This module is the "wire codec" spec.md §1 calls an external
//! collaborator: parsing/emitting Interests and ContentObjects, extracting
//! name component boundaries, and exposing the fields the core consults
//! (selectors, scope, nonce, freshness...). It does not verify signatures
//! (out of scope) and it does not itself decide what the core should do
//! with a parsed packet.

use crate::error::Error;
use crate::name::Name;
use crate::tlv::{self, TlvElement};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// `scope` numeric indicator (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    HostLocal,
    LinkLocal,
    Unrestricted(u8),
}

impl Scope {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Scope::HostLocal,
            1 => Scope::LinkLocal,
            n => Scope::Unrestricted(n),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Scope::HostLocal => 0,
            Scope::LinkLocal => 1,
            Scope::Unrestricted(n) => n,
        }
    }
}

/// Order preference for Content Store matching (spec.md §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderPreference {
    #[default]
    Leftmost,
    Rightmost,
}

/// Answer-from bits (spec.md §6): which sources of content may satisfy
/// this Interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerFrom {
    pub new_only: bool,
    pub cached: bool,
    pub stale_ok: bool,
    pub expire_on_answer: bool,
}

impl Default for AnswerFrom {
    fn default() -> Self {
        Self {
            new_only: false,
            cached: true,
            stale_ok: false,
            expire_on_answer: false,
        }
    }
}

/// A simple exclusion list of name components (spec.md §6). The core's
/// Content Store match only needs "is this component excluded", so we keep
/// it as a flat, sorted set rather than a full range-exclude encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludeFilter {
    pub components: Vec<Bytes>,
}

impl ExcludeFilter {
    pub fn excludes(&self, component: &Bytes) -> bool {
        self.components.iter().any(|c| c == component)
    }
}

/// Selectors consumed by Content Store matching (spec.md §6).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selectors {
    pub min_suffix_components: Option<u32>,
    pub max_suffix_components: Option<u32>,
    pub exclude: ExcludeFilter,
    pub publisher: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct Interest {
    pub name: Name,
    pub selectors: Selectors,
    pub order_preference: OrderPreference,
    pub answer_from: AnswerFrom,
    pub scope: Scope,
    /// Absent until the core splices one in before forwarding (spec.md §4.5,
    /// §9: six random bytes drawn from the shared PRNG).
    pub nonce: Option<[u8; 6]>,
    pub interest_lifetime_us: Option<u64>,
    pub can_be_prefix: bool,
    pub must_be_fresh: bool,
    pub hop_limit: Option<u8>,
}

impl Interest {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            selectors: Selectors::default(),
            order_preference: OrderPreference::default(),
            answer_from: AnswerFrom::default(),
            scope: Scope::Unrestricted(2),
            nonce: None,
            interest_lifetime_us: None,
            can_be_prefix: false,
            must_be_fresh: false,
            hop_limit: None,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        self.name.to_tlv().encode(&mut body);
        if let Some(nonce) = self.nonce {
            TlvElement::new(tlv::TLV_NONCE, Bytes::copy_from_slice(&nonce)).encode(&mut body);
        }
        if let Some(lifetime) = self.interest_lifetime_us {
            TlvElement::new(tlv::TLV_INTEREST_LIFETIME, Bytes::copy_from_slice(&lifetime.to_be_bytes()))
                .encode(&mut body);
        }
        TlvElement::new(tlv::TLV_SCOPE, Bytes::copy_from_slice(&[self.scope.as_u8()])).encode(&mut body);
        let mut flags = 0u8;
        if self.can_be_prefix {
            flags |= 0b0001;
        }
        if self.must_be_fresh {
            flags |= 0b0010;
        }
        if self.order_preference == OrderPreference::Rightmost {
            flags |= 0b0100;
        }
        TlvElement::new(tlv::TLV_SELECTORS, Bytes::copy_from_slice(&[flags])).encode(&mut body);
        TlvElement::new(tlv::TLV_INTEREST, body.freeze()).encode(buf);
    }

    pub fn decode(element: &TlvElement) -> Result<Self, Error> {
        if element.tlv_type != tlv::TLV_INTEREST {
            return Err(Error::Packet(format!(
                "expected Interest TLV type {}, got {}",
                tlv::TLV_INTEREST,
                element.tlv_type
            )));
        }
        let mut buf = element.value.clone();
        let mut name = None;
        let mut nonce = None;
        let mut lifetime = None;
        let mut scope = Scope::Unrestricted(2);
        let mut can_be_prefix = false;
        let mut must_be_fresh = false;
        let mut order_preference = OrderPreference::Leftmost;

        while buf.has_remaining() {
            let sub = TlvElement::decode(&mut buf)?;
            match sub.tlv_type {
                tlv::TLV_NAME => name = Some(Name::from_tlv(&sub)?),
                tlv::TLV_NONCE => {
                    if sub.value.len() != 6 {
                        return Err(Error::Packet("nonce must be 6 bytes".into()));
                    }
                    let mut n = [0u8; 6];
                    n.copy_from_slice(&sub.value);
                    nonce = Some(n);
                }
                tlv::TLV_INTEREST_LIFETIME => {
                    if sub.value.len() != 8 {
                        return Err(Error::Packet("interest lifetime must be 8 bytes".into()));
                    }
                    lifetime = Some(u64::from_be_bytes(sub.value[..8].try_into().unwrap()));
                }
                tlv::TLV_SCOPE => {
                    if let Some(&b) = sub.value.first() {
                        scope = Scope::from_u8(b);
                    }
                }
                tlv::TLV_SELECTORS => {
                    if let Some(&flags) = sub.value.first() {
                        can_be_prefix = flags & 0b0001 != 0;
                        must_be_fresh = flags & 0b0010 != 0;
                        order_preference = if flags & 0b0100 != 0 {
                            OrderPreference::Rightmost
                        } else {
                            OrderPreference::Leftmost
                        };
                    }
                }
                _ => {} // unrecognised sub-TLV, ignore per TLV conventions
            }
        }

        let name = name.ok_or_else(|| Error::Packet("Interest missing Name".into()))?;

        Ok(Self {
            name,
            selectors: Selectors::default(),
            order_preference,
            answer_from: AnswerFrom::default(),
            scope,
            nonce,
            interest_lifetime_us: lifetime,
            can_be_prefix,
            must_be_fresh,
            hop_limit: None,
        })
    }
}

/// ContentObject signed-info (spec.md §6). Publisher/type/freshness/final
/// block id are consumed by the core; the signature bytes themselves are
/// opaque (verification is out of scope).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Data,
    Key,
    ControlOrEncrypted,
}

#[derive(Debug, Clone)]
pub struct SignedInfo {
    pub publisher_id: Option<Bytes>,
    pub content_type: ContentType,
    /// µs, 0..2^31 per spec.md §6.
    pub freshness_seconds: Option<u32>,
    pub final_block_id: Option<Bytes>,
}

impl Default for SignedInfo {
    fn default() -> Self {
        Self {
            publisher_id: None,
            content_type: ContentType::Data,
            freshness_seconds: None,
            final_block_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentObject {
    pub name: Name,
    pub signed_info: SignedInfo,
    pub content: Bytes,
    /// Filled in by the codec from the signature seam; the core never
    /// computes this itself (spec.md §4.3 step 1 takes it as given).
    pub digest: [u8; 32],
}

impl ContentObject {
    pub fn new(name: Name, content: impl Into<Bytes>, digest: [u8; 32]) -> Self {
        Self {
            name,
            signed_info: SignedInfo::default(),
            content: content.into(),
            digest,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let mut body = BytesMut::new();
        self.name.to_tlv().encode(&mut body);
        let mut signed = BytesMut::new();
        if let Some(freshness) = self.signed_info.freshness_seconds {
            TlvElement::new(tlv::TLV_FRESHNESS_SECONDS, Bytes::copy_from_slice(&freshness.to_be_bytes()))
                .encode(&mut signed);
        }
        if let Some(publisher) = &self.signed_info.publisher_id {
            TlvElement::new(tlv::TLV_PUBLISHER_ID, publisher.clone()).encode(&mut signed);
        }
        if let Some(fbi) = &self.signed_info.final_block_id {
            TlvElement::new(tlv::TLV_FINAL_BLOCK_ID, fbi.clone()).encode(&mut signed);
        }
        TlvElement::new(tlv::TLV_SIGNED_INFO, signed.freeze()).encode(&mut body);
        TlvElement::new(tlv::TLV_CONTENT, self.content.clone()).encode(&mut body);
        TlvElement::new(tlv::TLV_CONTENT_OBJECT, body.freeze()).encode(buf);
    }

    /// `digest` is supplied by the caller (the codec's crypto seam), not
    /// recomputed here -- spec.md explicitly pushes digesting to a
    /// collaborator.
    pub fn decode(element: &TlvElement, digest: [u8; 32]) -> Result<Self, Error> {
        if element.tlv_type != tlv::TLV_CONTENT_OBJECT && element.tlv_type != tlv::TLV_CONTENT_OBJECT_LEGACY {
            return Err(Error::Packet(format!(
                "expected ContentObject TLV type {} or legacy {}, got {}",
                tlv::TLV_CONTENT_OBJECT,
                tlv::TLV_CONTENT_OBJECT_LEGACY,
                element.tlv_type
            )));
        }
        let mut buf = element.value.clone();
        let mut name = None;
        let mut signed_info = SignedInfo::default();
        let mut content = Bytes::new();

        while buf.has_remaining() {
            let sub = TlvElement::decode(&mut buf)?;
            match sub.tlv_type {
                tlv::TLV_NAME => name = Some(Name::from_tlv(&sub)?),
                tlv::TLV_SIGNED_INFO => {
                    let mut inner = sub.value.clone();
                    while inner.has_remaining() {
                        let field = TlvElement::decode(&mut inner)?;
                        match field.tlv_type {
                            tlv::TLV_FRESHNESS_SECONDS => {
                                if field.value.len() == 4 {
                                    signed_info.freshness_seconds =
                                        Some(u32::from_be_bytes(field.value[..4].try_into().unwrap()));
                                }
                            }
                            tlv::TLV_PUBLISHER_ID => signed_info.publisher_id = Some(field.value),
                            tlv::TLV_FINAL_BLOCK_ID => signed_info.final_block_id = Some(field.value),
                            _ => {}
                        }
                    }
                }
                tlv::TLV_CONTENT => content = sub.value,
                _ => {}
            }
        }

        let name = name.ok_or_else(|| Error::Packet("ContentObject missing Name".into()))?;

        Ok(Self {
            name,
            signed_info,
            content,
            digest,
        })
    }
}

/// Administrative, local-only message (spec.md §6).
#[derive(Debug, Clone)]
pub struct Inject {
    pub payload: Bytes,
}

/// Any top-level envelope the daemon must recognise.
#[derive(Debug, Clone)]
pub enum Packet {
    Interest(Interest),
    ContentObject(ContentObject),
    Inject(Inject),
}

/// Result of parsing one length-delimited envelope off a face's inbound
/// buffer. `pdu_framed` is true when the envelope arrived wrapped in the
/// PDU tag, which implicitly marks the originating face LINK-framed
/// (spec.md §6).
pub struct ParsedEnvelope {
    pub packet: Packet,
    pub pdu_framed: bool,
    /// Bytes consumed from the input for this one envelope.
    pub consumed: usize,
}

/// Maximum envelope size the daemon accepts (spec.md §7).
pub const MAX_ENVELOPE_SIZE: usize = 65_535;

/// Parses at most one top-level envelope from the front of `input`.
///
/// Returns `Ok(None)` when `input` holds an incomplete frame (the caller
/// should keep buffering); the face's incremental parser state is just
/// "how many bytes have I got so far", preserved by the caller across
/// `read()` calls as spec.md §6 requires.
pub fn parse_one(input: &[u8], digest_of: impl Fn(&[u8]) -> [u8; 32]) -> Result<Option<ParsedEnvelope>, Error> {
    if input.is_empty() {
        return Ok(None);
    }
    // Peek the outer TLV without consuming: we need type + length to know
    // whether the full frame has arrived yet.
    let mut peek = Bytes::copy_from_slice(input);
    let start_remaining = peek.remaining();
    let outer_type = match tlv::decode_tlv_type(&mut peek) {
        Ok(t) => t,
        Err(_) => return Ok(None),
    };
    let outer_len = match tlv::decode_tlv_length(&mut peek) {
        Ok(l) => l,
        Err(_) => return Ok(None),
    };
    if outer_len > MAX_ENVELOPE_SIZE {
        return Err(Error::Packet(format!("oversize envelope: {outer_len} bytes")));
    }
    if peek.remaining() < outer_len {
        return Ok(None); // partial frame; wait for more bytes
    }

    let header_len = start_remaining - peek.remaining();
    let total_len = header_len + outer_len;
    let mut full = Bytes::copy_from_slice(&input[..total_len]);
    let element = TlvElement::decode(&mut full)?;

    let (inner_element, pdu_framed) = if element.tlv_type == tlv::TLV_PDU {
        let mut inner_buf = element.value.clone();
        (TlvElement::decode(&mut inner_buf)?, true)
    } else {
        (element, false)
    };

    let packet = match inner_element.tlv_type {
        tlv::TLV_INTEREST => Packet::Interest(Interest::decode(&inner_element)?),
        tlv::TLV_CONTENT_OBJECT | tlv::TLV_CONTENT_OBJECT_LEGACY => {
            let digest = digest_of(&inner_element.value);
            Packet::ContentObject(ContentObject::decode(&inner_element, digest)?)
        }
        tlv::TLV_INJECT => Packet::Inject(Inject { payload: inner_element.value }),
        other => return Err(Error::Packet(format!("unrecognised top-level tag {other}"))),
    };

    Ok(Some(ParsedEnvelope {
        packet,
        pdu_framed,
        consumed: total_len,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interest_round_trips_modulo_nonce() {
        let mut interest = Interest::new(Name::from_str("/a/b"));
        interest.nonce = Some([1, 2, 3, 4, 5, 6]);
        interest.can_be_prefix = true;
        interest.must_be_fresh = true;

        let mut buf = BytesMut::new();
        interest.encode(&mut buf);
        let element = TlvElement::decode(&mut buf.freeze()).unwrap();
        let mut parsed = Interest::decode(&element).unwrap();

        // Strip nonce from both sides, per spec.md §8's round-trip law.
        let original_nonce = interest.nonce.take();
        let parsed_nonce = parsed.nonce.take();
        assert!(original_nonce.is_some());
        assert!(parsed_nonce.is_some());

        let mut reencoded_original = BytesMut::new();
        interest.encode(&mut reencoded_original);
        let mut reencoded_parsed = BytesMut::new();
        parsed.encode(&mut reencoded_parsed);
        assert_eq!(reencoded_original, reencoded_parsed);
    }

    #[test]
    fn content_object_digest_component_round_trips() {
        let co = ContentObject::new(Name::from_str("/a/b"), Bytes::from_static(b"hello"), [9u8; 32]);
        let mut buf = BytesMut::new();
        co.encode(&mut buf);

        let name_with_digest = co.name.clone().with_component(crate::name::NameComponent::implicit_digest(co.digest));
        let excised = name_with_digest.prefix(co.name.len());
        assert_eq!(excised, co.name);
    }

    #[test]
    fn oversize_envelope_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(tlv::TLV_INTEREST);
        buf.put_u8(254);
        buf.put_u32(MAX_ENVELOPE_SIZE as u32 + 1);
        let result = parse_one(&buf, |_| [0u8; 32]);
        assert!(result.is_err());
    }

    #[test]
    fn partial_frame_yields_none() {
        let interest = Interest::new(Name::from_str("/a/b"));
        let mut buf = BytesMut::new();
        interest.encode(&mut buf);
        let truncated = &buf[..buf.len() - 1];
        assert!(parse_one(truncated, |_| [0u8; 32]).unwrap().is_none());
    }
}
