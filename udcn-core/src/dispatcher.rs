//! Dispatcher: ties scheduler, face table, CS, FIB and PIT together
//! (spec.md §4.7).
//!
//! Rendered as an async task rather than a raw `poll()` loop: each
//! registered face feeds inbound envelopes through one `mpsc` sender (the
//! idiomatic-async equivalent of "rebuild the pollfd array and poll"), and
//! the dispatcher `tokio::select!`s between that channel and the
//! scheduler's next deadline. `face0` (the internal client) is a loopback
//! pair wired directly in rather than a socket (spec.md §4.7).
//!
//! `faces`/`cs`/`fib`/`pit`/`queues`/`rng` live behind `Rc<RefCell<_>>`
//! rather than as plain fields. The scheduler's callbacks must be `'static`
//! and cannot borrow `&mut Dispatcher` (the scheduler is itself one of its
//! fields), so a scheduled propagate/drain/ageing step instead captures a
//! cloned `Rc` into the same state. This is interior mutability confined to
//! the single cooperative task that owns the dispatcher, not a `Dispatcher`
//! shared across tasks -- nothing here crosses an `.await` point while
//! borrowed.

use crate::clock::MonotonicClock;
use crate::content_store::{self, ContentStore, InsertOutcome};
use crate::face::{flags as face_flags, FaceFlags, FaceId, FaceTable, PeerAddr};
use crate::internal_client::{self, DefaultControlHandler, NullEnroller, PrefixRegRequest};
use crate::nameprefix::NamePrefixTable;
use crate::pit::{self, Pit};
use crate::queue::{DelayClass, FaceQueues, PacingParams, YIELD_THRESHOLD_NS};
use crate::rng::Rng48;
use crate::scheduler::Scheduler;
use crate::scratch::ScratchPool;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;
use tokio::sync::mpsc;
use udcn_common::metrics::UdcnMetrics;
use udcn_common::name::{Name, NameComponent};
use udcn_common::packet::{ContentObject, Packet, Scope};

pub struct InboundEnvelope {
    pub face: FaceId,
    pub packet: Packet,
    pub digest: Option<[u8; 32]>,
}

/// What the dispatcher wants a transport to actually do with bytes. The
/// dispatcher never touches a socket itself (spec.md §1: transports are
/// external collaborators).
pub enum OutboundAction {
    Send { face: FaceId, accession: u64 },
    /// A propagation step popped `face` off a pending Interest's outbound
    /// set (spec.md §4.5); `nonce` identifies which PIT entry to re-encode.
    SendInterest { face: FaceId, nonce: [u8; 6] },
    TearDown { face: FaceId },
}

/// Requests a transport cannot settle by itself because they mutate the
/// face table: routed through the same cooperative loop as packets rather
/// than shared behind a lock, so a face never gets enrolled mid-`run_once`.
pub enum ControlRequest {
    Enroll {
        flags: FaceFlags,
        peer: PeerAddr,
        reply: tokio::sync::oneshot::Sender<Result<FaceId, crate::error::Error>>,
    },
    /// For datagram transports: reuses the face already on file for `peer`
    /// rather than enrolling a fresh one per incoming packet (spec.md §6
    /// "peer address" hashing).
    EnsureDatagramFace {
        flags: FaceFlags,
        peer: PeerAddr,
        reply: tokio::sync::oneshot::Sender<Result<FaceId, crate::error::Error>>,
    },
    TearDown {
        face: FaceId,
    },
}

pub struct Dispatcher {
    pub faces: Rc<RefCell<FaceTable>>,
    pub cs: Rc<RefCell<ContentStore>>,
    pub fib: Rc<RefCell<NamePrefixTable>>,
    pub pit: Rc<RefCell<Pit>>,
    pub scheduler: Scheduler,
    pub rng: Rc<RefCell<Rng48>>,
    pub metrics: UdcnMetrics,
    pub queues: Rc<RefCell<HashMap<FaceId, FaceQueues>>>,
    /// Loaned out synchronously (never across an `.await` or from inside a
    /// scheduler callback), so it stays a plain field (spec.md §2.2).
    scratch: ScratchPool,
    inbound_rx: mpsc::UnboundedReceiver<InboundEnvelope>,
    outbound_tx: mpsc::UnboundedSender<OutboundAction>,
    control_rx: mpsc::UnboundedReceiver<ControlRequest>,
}

pub struct DispatcherHandles {
    pub inbound_tx: mpsc::UnboundedSender<InboundEnvelope>,
    pub outbound_rx: mpsc::UnboundedReceiver<OutboundAction>,
    pub control_tx: mpsc::UnboundedSender<ControlRequest>,
}

impl Dispatcher {
    pub fn new(cs_capacity: usize) -> (Self, DispatcherHandles) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let mut dispatcher = Self {
            faces: Rc::new(RefCell::new(FaceTable::new())),
            cs: Rc::new(RefCell::new(ContentStore::new(cs_capacity))),
            fib: Rc::new(RefCell::new(NamePrefixTable::new())),
            pit: Rc::new(RefCell::new(Pit::new())),
            scheduler: Scheduler::new(MonotonicClock::new()),
            rng: Rc::new(RefCell::new(Rng48::from_os())),
            metrics: UdcnMetrics::new(),
            queues: Rc::new(RefCell::new(HashMap::new())),
            scratch: ScratchPool::new(),
            inbound_rx,
            outbound_tx,
            control_rx,
        };
        dispatcher.start_periodic_timers();
        (dispatcher, DispatcherHandles { inbound_tx, outbound_rx, control_tx })
    }

    fn prefix_keys(name: &udcn_common::name::Name) -> Vec<Vec<u8>> {
        (0..=name.len()).map(|i| name.prefix(i).key_bytes()).collect()
    }

    /// spec.md §4.5: parse/reject-out-of-scope, duplicate suppression,
    /// CS answer, else compute outbound set, insert into the PIT, and
    /// schedule propagation.
    pub fn handle_interest(&mut self, face: FaceId, mut interest: udcn_common::packet::Interest) {
        let origin_is_local = self
            .faces
            .borrow()
            .lookup(face)
            .map(|f| f.flags.has(face_flags::LOCAL))
            .unwrap_or(false);

        // Step 1: scope rejection.
        match interest.scope {
            Scope::HostLocal if !origin_is_local => return,
            Scope::LinkLocal if !origin_is_local => {
                let is_friendly =
                    self.faces.borrow().lookup(face).map(|f| f.flags.has(face_flags::FRIENDLY)).unwrap_or(false);
                if !is_friendly {
                    return;
                }
            }
            _ => {}
        }

        let nonce = match interest.nonce {
            Some(n) => n,
            None => {
                let n = self.rng.borrow_mut().nonce6();
                interest.nonce = Some(n);
                n
            }
        };

        // face0: administrative Interests never touch the PIT/FIB pipeline.
        // The reply is handed straight back to the requesting face, the way
        // writes to the internal client's loopback pair re-enter dispatch
        // without ever hitting a socket (spec.md §4.7).
        if let Some(reply) = self.control_reply(face, &interest.name) {
            let digest = udcn_common::hash::digest(reply.content.as_ref());
            let outcome = {
                let mut rng = self.rng.borrow_mut();
                self.cs.borrow_mut().insert(reply, digest, &mut rng)
            };
            let accession = match outcome {
                InsertOutcome::Inserted(a) | InsertOutcome::Duplicate(a) => a,
            };
            self.enqueue_content(face, accession, DelayClass::Asap);
            return;
        }

        // Step 2: duplicate suppression across faces.
        if self.pit.borrow_mut().suppress_duplicate(&nonce, face) {
            return;
        }

        let keys = Self::prefix_keys(&interest.name);
        let prefix_key = {
            let mut rng = self.rng.borrow_mut();
            self.fib.borrow_mut().seek(&keys, &mut rng)
        };

        // Step 3: try CS.
        if let Some(accession) = self.cs.borrow().find_match(&interest) {
            self.enqueue_content(face, accession, DelayClass::Asap);
            self.propagate_upstream_for_cache_hit(face, &interest, &prefix_key, nonce);
            return;
        }

        // Step 4: compute outbound set.
        let mut outbound: HashSet<FaceId> =
            self.fib.borrow_mut().forward_to(&prefix_key).into_iter().filter(|f| *f != face).collect();
        if interest.scope == Scope::LinkLocal {
            let faces = self.faces.borrow();
            outbound.retain(|f| faces.lookup(*f).map(|fc| fc.flags.has(face_flags::FRIENDLY)).unwrap_or(false));
        }

        let predicted_response_us = self.fib.borrow().get(&prefix_key).map(|p| p.predicted_response_us).unwrap_or(8192);
        let origin_is_broadcast_like =
            self.faces.borrow().lookup(face).map(|f| f.flags.has(face_flags::MCAST)).unwrap_or(false);
        let existing_nonces: Vec<[u8; 6]> = self.pit.borrow().nonces_for_prefix(&prefix_key).collect();
        let extra_delay = self.pit.borrow_mut().adjust_outbound_for_existing_interests(
            &existing_nonces,
            &interest,
            face,
            origin_is_broadcast_like,
            predicted_response_us,
            &mut outbound,
        );
        let Some(_extra_delay_us) = extra_delay else {
            return; // redundant beyond tolerance; drop
        };

        let outbound_vec: VecDeque<FaceId> = outbound.into_iter().collect();
        self.pit.borrow_mut().insert(nonce, interest, prefix_key.clone(), face, outbound_vec, crate::config::DEFAULT_INTEREST_LIFETIME_US);
        if let Some(prefix) = self.fib.borrow_mut().get_mut(&prefix_key) {
            prefix.pit_entries.push(pit::nonce_to_u64(nonce));
        }
        self.schedule_propagate(nonce);
    }

    /// Rebuilds a `Name` from path component strings (the inverse of
    /// `NameComponent`'s `Display` impl, used when unpacking control-RPC
    /// arguments carried as trailing name components).
    fn name_from(components: &[String]) -> Name {
        let mut name = Name::root();
        for component in components {
            name.push(NameComponent::generic(component.clone().into_bytes()));
        }
        name
    }

    /// Recognises the four well-known control names (spec.md §6) and
    /// dispatches them to `internal_client`. `None` means the name isn't a
    /// control name and should fall through to ordinary forwarding.
    ///
    /// Request arguments ride as extra name components after the fixed
    /// prefix (`<face>/<flags>/<lifetime>/<prefix...>` for `prefixreg`,
    /// `<prefix...>` for `reg/self`) -- spec.md leaves wire-level argument
    /// parsing out of scope, so this encoding is this daemon's own
    /// convention rather than anything the spec mandates (see DESIGN.md).
    /// `newface` is recognised but always rejected: opening an outbound
    /// socket needs a transport-level dialer that the core does not have.
    fn control_reply(&mut self, face: FaceId, name: &Name) -> Option<ContentObject> {
        let comps: Vec<String> = name.components().iter().map(|c| c.to_string()).collect();
        if comps.first().map(String::as_str) != Some("ccn") {
            return None;
        }

        let origin_flags = self.faces.borrow().lookup(face).map(|f| f.flags).unwrap_or_default();

        match comps.get(1).map(String::as_str) {
            Some("ping") => Some(internal_client::ping()),
            Some("reg") if comps.get(2).map(String::as_str) == Some("self") => {
                let prefix = Self::name_from(&comps[3..]);
                let mut fib = self.fib.borrow_mut();
                let mut rng = self.rng.borrow_mut();
                let mut handler = DefaultControlHandler { table: &mut fib, rng: &mut rng, enroller: &mut NullEnroller };
                handler.reg_self(face, prefix).ok()
            }
            Some(_node_id) if comps.get(2).map(String::as_str) == Some("prefixreg") => {
                let args = comps.get(3..)?;
                let target_face = FaceId::from_packed(args.first()?.parse::<u64>().ok()?);
                let flags = args.get(1)?.parse::<u8>().ok()?;
                let lifetime_secs = args.get(2)?.parse::<u32>().ok()?;
                let prefix = Self::name_from(args.get(3..).unwrap_or(&[]));
                let mut fib = self.fib.borrow_mut();
                let mut rng = self.rng.borrow_mut();
                let mut handler = DefaultControlHandler { table: &mut fib, rng: &mut rng, enroller: &mut NullEnroller };
                handler
                    .prefixreg(face, origin_flags, PrefixRegRequest { prefix, face: target_face, flags, lifetime_secs })
                    .ok()
            }
            Some(_node_id) if comps.get(2).map(String::as_str) == Some("newface") => None,
            _ => None,
        }
    }

    /// A producer's direct publication: an encoded `ContentObject` TLV
    /// carried administratively rather than fetched via an Interest
    /// (spec.md §6's "Inject" tag). Restricted to LOCAL faces -- this is not
    /// a thing a remote peer gets to do.
    fn handle_inject(&mut self, face: FaceId, inject: udcn_common::packet::Inject) {
        let is_local = self.faces.borrow().lookup(face).map(|f| f.flags.has(face_flags::LOCAL)).unwrap_or(false);
        if !is_local {
            log::warn!("rejected Inject from non-local face {face:?}");
            return;
        }
        let mut buf = inject.payload.clone();
        let element = match udcn_common::tlv::TlvElement::decode(&mut buf) {
            Ok(e) => e,
            Err(err) => {
                log::warn!("malformed Inject payload on face {face:?}: {err}");
                return;
            }
        };
        let digest = udcn_common::hash::digest(&element.value);
        let object = match ContentObject::decode(&element, digest) {
            Ok(o) => o,
            Err(err) => {
                log::warn!("Inject payload is not a ContentObject on face {face:?}: {err}");
                return;
            }
        };
        let name = object.name.clone();
        let freshness_secs = object.signed_info.freshness_seconds;
        let outcome = {
            let mut rng = self.rng.borrow_mut();
            self.cs.borrow_mut().insert(object, digest, &mut rng)
        };
        if let InsertOutcome::Inserted(accession) = outcome {
            self.schedule_freshness(accession, freshness_secs);
            self.match_pit_and_deliver(&name, accession, None);
        }
    }

    fn propagate_upstream_for_cache_hit(
        &mut self,
        source_face: FaceId,
        interest: &udcn_common::packet::Interest,
        prefix_key: &[u8],
        _nonce: [u8; 6],
    ) {
        // spec.md §4.5 step 3: "propagate the Interest upstream so other
        // responders may still hear it" -- only when not already pending
        // for the source face. We approximate "already pending" as "a PIT
        // entry for this prefix already includes the source face".
        let already_pending = {
            let pit = self.pit.borrow();
            pit.nonces_for_prefix(prefix_key).any(|n| pit.get(&n).map(|e| e.origin_face == source_face).unwrap_or(false))
        };
        if already_pending {
            return;
        }
        let mut outbound: HashSet<FaceId> =
            self.fib.borrow_mut().forward_to(prefix_key).into_iter().filter(|f| *f != source_face).collect();
        outbound.remove(&source_face);
        if outbound.is_empty() {
            return;
        }
        let nonce = self.rng.borrow_mut().nonce6();
        let mut copy = interest.clone();
        copy.nonce = Some(nonce);
        let outbound_vec: VecDeque<FaceId> = outbound.into_iter().collect();
        self.pit.borrow_mut().insert(nonce, copy, prefix_key.to_vec(), source_face, outbound_vec, crate::config::DEFAULT_INTEREST_LIFETIME_US);
        if let Some(prefix) = self.fib.borrow_mut().get_mut(prefix_key) {
            prefix.pit_entries.push(pit::nonce_to_u64(nonce));
        }
        self.schedule_propagate(nonce);
    }

    /// spec.md §4.3 admit + §4.5 "matching incoming content to PIT": walk
    /// prefix lengths from the full name down to empty, matching PIT
    /// entries at each length.
    pub fn handle_content_object(
        &mut self,
        origin_face: FaceId,
        object: udcn_common::packet::ContentObject,
        digest: [u8; 32],
    ) {
        let name = object.name.clone();
        let freshness_secs = object.signed_info.freshness_seconds;
        let outcome = {
            let mut rng = self.rng.borrow_mut();
            self.cs.borrow_mut().insert(object, digest, &mut rng)
        };
        let accession = match outcome {
            InsertOutcome::Inserted(a) => {
                self.schedule_freshness(a, freshness_secs);
                a
            }
            InsertOutcome::Duplicate(a) => a,
        };
        self.match_pit_and_deliver(&name, accession, Some(origin_face));
    }

    /// Matches a newly admitted object at every enclosing prefix against
    /// waiting PIT entries and enqueues it onto each matched face (spec.md
    /// §1's ContentObject path). `origin_face`, when present, is
    /// excluded from delivery since that face already has the object.
    fn match_pit_and_deliver(&mut self, name: &Name, accession: u64, origin_face: Option<FaceId>) {
        let keys = Self::prefix_keys(name);
        let mut matched_faces = Vec::new();
        for key in keys.iter().rev() {
            let nonces: Vec<[u8; 6]> = self.pit.borrow().nonces_for_prefix(key).collect();
            for nonce in nonces {
                let removed = self.pit.borrow_mut().remove(&nonce);
                if let Some(entry) = removed {
                    if let Some(handle) = entry.propagate_handle {
                        self.scheduler.cancel(handle);
                    }
                    if Some(entry.origin_face) != origin_face {
                        matched_faces.push(entry.origin_face);
                    }
                    if let Some(prefix) = self.fib.borrow_mut().get_mut(key) {
                        let target = pit::nonce_to_u64(nonce);
                        prefix.pit_entries.retain(|&n| n != target);
                    }
                }
            }
        }
        for face in matched_faces {
            self.enqueue_content(face, accession, DelayClass::Normal);
        }
    }

    /// Enqueues onto the face's output queue; the actual send is driven by
    /// `schedule_drain` so pacing/burst limits (spec.md §4.6) apply instead
    /// of firing immediately.
    fn enqueue_content(&mut self, face: FaceId, accession: u64, class: DelayClass) {
        let was_empty = {
            let mut queues = self.queues.borrow_mut();
            let queue = queues.entry(face).or_insert_with(|| FaceQueues::new(PacingParams::unicast_link()));
            let was_empty = queue.is_empty();
            queue.enqueue(class, accession);
            was_empty
        };
        if was_empty {
            self.schedule_drain(face);
        }
    }

    /// Drains a face's output queue through the scheduler (spec.md §4.6)
    /// instead of sending synchronously. Re-arms itself while the queue
    /// still has work; once it runs dry, the next `enqueue_content` on that
    /// face restarts it.
    fn schedule_drain(&mut self, face: FaceId) {
        let queues = Rc::clone(&self.queues);
        let cs = Rc::clone(&self.cs);
        let outbound_tx = self.outbound_tx.clone();
        self.scheduler.schedule(0, move |cancelled| {
            if cancelled {
                return None;
            }
            let mut queues_ref = queues.borrow_mut();
            let Some(queue) = queues_ref.get_mut(&face) else { return None };
            let sent = {
                let cs_ref = cs.borrow();
                queue.drain_burst(|accession| cs_ref.get_entry(accession).map(|e| e.content.len()).unwrap_or(0))
            };
            let still_pending = !queue.is_empty();
            drop(queues_ref);
            for accession in sent {
                let _ = outbound_tx.send(OutboundAction::Send { face, accession });
            }
            if still_pending {
                Some(YIELD_THRESHOLD_NS / 1000)
            } else {
                None
            }
        });
    }

    pub fn content_flags(&self, accession: u64) -> Option<content_store::ContentFlags> {
        self.cs.borrow().get_entry(accession).map(|e| e.flags)
    }

    /// Re-encodes a stored ContentObject for `OutboundAction::Send`; a
    /// transport has no business reaching into the content store itself.
    pub fn encode_for_send(&self, accession: u64) -> Option<bytes::Bytes> {
        let cs = self.cs.borrow();
        let entry = cs.get_entry(accession)?;
        let mut buf = bytes::BytesMut::new();
        entry.to_content_object().encode(&mut buf);
        Some(buf.freeze())
    }

    /// Re-encodes a pending Interest for `OutboundAction::SendInterest`,
    /// reusing the scratch byte buffer (spec.md §2.2) since this runs once
    /// per propagation step rather than once per dispatcher lifetime.
    pub fn encode_interest_for_send(&self, nonce: &[u8; 6]) -> Option<bytes::Bytes> {
        let pit = self.pit.borrow();
        let entry = pit.get(nonce)?;
        let mut guard = self.scratch.acquire_bytes();
        let loaned = std::mem::take(&mut *guard);
        let mut buf = bytes::BytesMut::from(loaned);
        entry.interest.encode(&mut buf);
        let out = bytes::Bytes::copy_from_slice(&buf);
        *guard = Vec::from(buf);
        Some(out)
    }

    /// Drives `pit::propagate_step` through the scheduler: pops one
    /// outbound face per tick, asks the transport to send the Interest
    /// there, and re-arms with jitter (plus the CONTROL-face extra delay)
    /// until the outbound set is exhausted or the entry's lifetime runs out
    /// (spec.md §4.5). Uses `predicted_source: None` -- this daemon does
    /// not yet track a per-prefix "most likely responder" face, so every
    /// popped face goes out as a plain UNSENT send rather than ever
    /// flipping WAIT1 from here (see DESIGN.md).
    fn schedule_propagate(&mut self, nonce: [u8; 6]) {
        let pit = Rc::clone(&self.pit);
        let fib = Rc::clone(&self.fib);
        let faces = Rc::clone(&self.faces);
        let rng = Rc::clone(&self.rng);
        let outbound_tx = self.outbound_tx.clone();
        let mut last_tick_us = 0u64;

        let handle = self.scheduler.schedule(0, move |cancelled| {
            if cancelled {
                return None;
            }
            let mut pit_ref = pit.borrow_mut();
            let Some(entry) = pit_ref.get_mut(&nonce) else { return None };

            entry.residual_us = entry.residual_us.saturating_sub(last_tick_us);
            if entry.residual_us == 0 {
                let prefix_key = entry.prefix_key.clone();
                drop(pit_ref);
                pit.borrow_mut().remove(&nonce);
                if let Some(prefix) = fib.borrow_mut().get_mut(&prefix_key) {
                    let target = pit::nonce_to_u64(nonce);
                    prefix.pit_entries.retain(|&n| n != target);
                }
                return None;
            }

            let Some(step) = pit::propagate_step(entry, None) else {
                last_tick_us = entry.residual_us.min(1_000_000);
                return Some(last_tick_us);
            };
            drop(pit_ref);

            let _ = outbound_tx.send(OutboundAction::SendInterest { face: step.face, nonce });

            let is_control = faces.borrow().lookup(step.face).map(|f| f.flags.has(face_flags::CONTROL)).unwrap_or(false);
            let mut delay = pit::next_send_delay_us(&mut rng.borrow_mut());
            if is_control {
                delay += pit::CONTROL_FACE_EXTRA_DELAY_US;
            }
            last_tick_us = delay;
            Some(delay)
        });

        if let Some(entry) = self.pit.borrow_mut().get_mut(&nonce) {
            entry.propagate_handle = Some(handle);
        }
    }

    /// Marks a freshly admitted object STALE once its freshness window
    /// elapses (spec.md §4.3); a missing or out-of-range freshness value
    /// schedules nothing (spec.md §8 boundary case, see
    /// `content_store::freshness_delay_us`).
    fn schedule_freshness(&mut self, accession: u64, freshness_seconds: Option<u32>) {
        let Some(delay_us) = content_store::freshness_delay_us(freshness_seconds) else { return };
        let cs = Rc::clone(&self.cs);
        self.scheduler.schedule(delay_us, move |cancelled| {
            if !cancelled {
                cs.borrow_mut().mark_stale(accession);
            }
            None
        });
    }

    /// Starts the two fixed-interval sweeps spec.md §4.3/§4.4 describe:
    /// FIB ageing/reap and content-store capacity eviction. Neither has a
    /// natural one-shot trigger the way PIT reap and CS freshness do, so
    /// they run on their own self-rearming ticks from dispatcher startup.
    fn start_periodic_timers(&mut self) {
        let fib = Rc::clone(&self.fib);
        self.scheduler.schedule(crate::config::FIB_AGE_INTERVAL_US, move |cancelled| {
            if cancelled {
                return None;
            }
            let mut fib_ref = fib.borrow_mut();
            fib_ref.age_forwarding_entries();
            for key in fib_ref.keys() {
                fib_ref.reap_if_eligible(&key);
            }
            Some(crate::config::FIB_AGE_INTERVAL_US)
        });

        let cs = Rc::clone(&self.cs);
        self.scheduler.schedule(crate::config::CS_EVICT_INTERVAL_US, move |cancelled| {
            if cancelled {
                return None;
            }
            cs.borrow_mut().evict_if_over_capacity(crate::config::CS_EVICT_WORK_LIMIT);
            Some(crate::config::CS_EVICT_INTERVAL_US)
        });
    }

    pub async fn run_once(&mut self) -> bool {
        let next_due_us = self.scheduler.run_once();
        let sleep = if next_due_us == crate::scheduler::NO_PENDING_WORK {
            tokio::time::Duration::from_secs(3600)
        } else {
            tokio::time::Duration::from_micros(next_due_us)
        };
        tokio::select! {
            maybe_envelope = self.inbound_rx.recv() => {
                match maybe_envelope {
                    Some(envelope) => {
                        match envelope.packet {
                            Packet::Interest(interest) => self.handle_interest(envelope.face, interest),
                            Packet::ContentObject(co) => {
                                let digest = envelope.digest.unwrap_or(co.digest);
                                self.handle_content_object(envelope.face, co, digest);
                            }
                            Packet::Inject(inject) => self.handle_inject(envelope.face, inject),
                        }
                        true
                    }
                    None => false,
                }
            }
            maybe_request = self.control_rx.recv() => {
                match maybe_request {
                    Some(ControlRequest::Enroll { flags, peer, reply }) => {
                        let _ = reply.send(self.enroll_face(flags, peer));
                        true
                    }
                    Some(ControlRequest::EnsureDatagramFace { flags, peer, reply }) => {
                        let existing = self.faces.borrow().lookup_by_peer(&peer);
                        let outcome = match existing {
                            Some(existing) => Ok(existing),
                            None => self.enroll_face(flags, peer),
                        };
                        let _ = reply.send(outcome);
                        true
                    }
                    Some(ControlRequest::TearDown { face }) => {
                        self.teardown_face(face);
                        true
                    }
                    None => false,
                }
            }
            _ = tokio::time::sleep(sleep) => true,
        }
    }

    pub fn enroll_face(&mut self, flags: FaceFlags, peer: PeerAddr) -> Result<FaceId, crate::error::Error> {
        self.faces.borrow_mut().enroll(flags, peer)
    }

    pub fn teardown_face(&mut self, face: FaceId) {
        {
            let mut queues = self.queues.borrow_mut();
            if let Some(queue) = queues.get_mut(&face) {
                queue.drain_and_cancel();
            }
            queues.remove(&face);
        }
        self.faces.borrow_mut().remove(face);
        let _ = self.outbound_tx.send(OutboundAction::TearDown { face });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use udcn_common::hash;
    use udcn_common::name::Name;
    use udcn_common::packet::{ContentObject, Interest};

    fn setup() -> (Dispatcher, DispatcherHandles) {
        Dispatcher::new(1000)
    }

    #[test]
    fn cached_answer_does_not_propagate_upstream() {
        // spec.md §8 scenario 2
        let (mut dispatcher, _handles) = setup();
        let mut flags = FaceFlags::default();
        flags.set(face_flags::LOCAL);
        let face_f = dispatcher.enroll_face(flags, PeerAddr::None).unwrap();

        let object = ContentObject::new(Name::from_str("/a/b/c"), b"content".to_vec(), [0u8; 32]);
        let digest = hash::digest(b"content");
        dispatcher.handle_content_object(face_f, object, digest);

        let mut interest = Interest::new(Name::from_str("/a"));
        interest.selectors.min_suffix_components = Some(2);
        dispatcher.handle_interest(face_f, interest);

        let pit = dispatcher.pit.borrow();
        assert!(pit.is_empty() || pit.len() <= 1);
    }

    #[test]
    fn scope_zero_from_remote_face_produces_no_outbound() {
        // spec.md §8 boundary case
        let (mut dispatcher, _handles) = setup();
        let remote = dispatcher.enroll_face(FaceFlags::default(), PeerAddr::None).unwrap();
        let mut interest = Interest::new(Name::from_str("/x"));
        interest.scope = Scope::HostLocal;
        dispatcher.handle_interest(remote, interest);
        assert!(dispatcher.pit.borrow().is_empty());
    }

    #[test]
    fn unmatched_interest_is_scheduled_for_propagation() {
        // spec.md §8 scenario 3/5/6: a new Interest with somewhere to go
        // gets a live propagate handle, not just a PIT row.
        let (mut dispatcher, _handles) = setup();
        let local = dispatcher.enroll_face(FaceFlags(face_flags::LOCAL), PeerAddr::None).unwrap();
        let remote = dispatcher.enroll_face(FaceFlags::default(), PeerAddr::None).unwrap();
        let prefix = Name::from_str("/weather");
        let key = {
            let mut rng = dispatcher.rng.borrow_mut();
            dispatcher.fib.borrow_mut().seek(&[prefix.key_bytes()], &mut rng)
        };
        dispatcher.fib.borrow_mut().add_forwarding(
            &key,
            crate::nameprefix::ForwardingEntry {
                face: remote,
                flags: crate::nameprefix::fwd_flags::ACTIVE,
                expiry_secs: 300,
            },
        );

        dispatcher.handle_interest(local, Interest::new(prefix.clone()));

        let pit = dispatcher.pit.borrow();
        assert_eq!(pit.len(), 1);
        let nonce = pit.nonces_for_prefix(&prefix.key_bytes()).next().expect("entry pending on the prefix");
        assert!(pit.get(&nonce).unwrap().propagate_handle.is_some());
    }
}
