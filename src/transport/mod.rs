// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
//! MTU-tracked fragmentation/reassembly, one [`Transport`] per runtime,
//! scoped to one process. State is kept per peer: the current write-MTU,
//! in-flight reassembly buffers, and a monotonic outbound message-id
//! counter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::trace;

use crate::api::PeerId;
use crate::error::{Error, Result};

/// Fixed wire header size in bytes.
pub const HEADER_SIZE: usize = 24;
const MAGIC: u32 = 0xB1E0_2024;
const VERSION: u8 = 1;

// The header's payload-length field is a u16; guard against a future header
// change silently truncating it.
static_assertions::const_assert!(HEADER_SIZE <= u16::MAX as usize);

/// Default MTU assumed for a peer before any negotiation has occurred.
pub const DEFAULT_MAX_WRITE_LENGTH: usize = 20;

/// One fragment of a (possibly multi-packet) transport message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub message_id: u64,
    pub sequence: u16,
    pub total: u16,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Serialize to the fixed 24-byte header followed by the payload.
    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&MAGIC.to_le_bytes());
        out.push(VERSION);
        out.push(0); // reserved
        out.extend_from_slice(&self.message_id.to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.total.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // reserved
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse a wire packet, validating magic/version and the declared
    /// payload length.
    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::FragmentationFailed(
                "packet shorter than header".into(),
            ));
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(Error::InvalidEnvelope("bad packet magic".into()));
        }
        let version = bytes[4];
        if version != VERSION {
            return Err(Error::VersionMismatch);
        }
        let message_id = u64::from_le_bytes(bytes[6..14].try_into().unwrap());
        let sequence = u16::from_le_bytes(bytes[14..16].try_into().unwrap());
        let total = u16::from_le_bytes(bytes[16..18].try_into().unwrap());
        let payload_len = u16::from_le_bytes(bytes[18..20].try_into().unwrap()) as usize;
        let payload = bytes
            .get(HEADER_SIZE..HEADER_SIZE + payload_len)
            .ok_or_else(|| Error::FragmentationFailed("payload truncated".into()))?
            .to_vec();
        Ok(Packet {
            message_id,
            sequence,
            total,
            payload,
        })
    }
}

struct ReassemblyEntry {
    total: u16,
    parts: HashMap<u16, Vec<u8>>,
    deadline: Instant,
}

struct PeerState {
    max_write_length: AtomicU64,
    next_message_id: AtomicU64,
    incoming: DashMap<u64, ReassemblyEntry>,
}

impl Default for PeerState {
    fn default() -> Self {
        Self {
            max_write_length: AtomicU64::new(DEFAULT_MAX_WRITE_LENGTH as u64),
            next_message_id: AtomicU64::new(1),
            incoming: DashMap::new(),
        }
    }
}

/// Per-runtime transport: fragments outbound messages and reassembles
/// inbound packets, tracking MTU and reassembly state independently for
/// each peer.
#[derive(Default)]
pub struct Transport {
    peers: DashMap<PeerId, PeerState>,
    reassembly_timeout: std::sync::RwLock<Duration>,
}

impl Transport {
    pub fn new(reassembly_timeout: Duration) -> Self {
        Self {
            peers: DashMap::new(),
            reassembly_timeout: std::sync::RwLock::new(reassembly_timeout),
        }
    }

    fn peer_state(&self, peer: PeerId) -> dashmap::mapref::one::Ref<'_, PeerId, PeerState> {
        self.peers.entry(peer).or_default();
        self.peers.get(&peer).unwrap()
    }

    /// Record a peer's current write-MTU, as learned from the adapter's
    /// `maximum_write_length` or an MTU-exchange event.
    pub fn set_max_write_length(&self, peer: PeerId, max_write_length: usize) {
        self.peer_state(peer)
            .max_write_length
            .store(max_write_length as u64, Ordering::Relaxed);
    }

    pub fn max_write_length(&self, peer: PeerId) -> usize {
        self.peer_state(peer).max_write_length.load(Ordering::Relaxed) as usize
    }

    /// Fragment `data` into wire packets sized to fit the peer's current
    /// write-MTU. Allocates a fresh message-id for this message.
    pub fn fragment(&self, data: &[u8], peer: PeerId) -> Result<Vec<Packet>> {
        let state = self.peer_state(peer);
        let max_write_length = state.max_write_length.load(Ordering::Relaxed) as usize;
        if max_write_length <= HEADER_SIZE {
            return Err(Error::MtuTooSmall);
        }
        let payload_max = max_write_length - HEADER_SIZE;

        let message_id = state.next_message_id.fetch_add(1, Ordering::Relaxed);

        if data.is_empty() {
            return Ok(vec![Packet {
                message_id,
                sequence: 0,
                total: 1,
                payload: Vec::new(),
            }]);
        }

        let total = data.len().div_ceil(payload_max) as u16;
        let packets = data
            .chunks(payload_max)
            .enumerate()
            .map(|(i, chunk)| Packet {
                message_id,
                sequence: i as u16,
                total,
                payload: chunk.to_vec(),
            })
            .collect();
        Ok(packets)
    }

    /// Feed one wire packet from `peer` into reassembly. Returns the
    /// reassembled message once every sequence has arrived; single-packet
    /// messages (`total == 1`) are returned immediately without allocating
    /// reassembly state.
    pub fn receive(&self, peer: PeerId, packet: Packet) -> Option<Vec<u8>> {
        if packet.total == 1 {
            return Some(packet.payload);
        }

        self.prune_expired(peer);

        let state = self.peer_state(peer);
        let now = Instant::now();
        let timeout = *self.reassembly_timeout.read().unwrap();

        let mut entry = state
            .incoming
            .entry(packet.message_id)
            .or_insert_with(|| ReassemblyEntry {
                total: packet.total,
                parts: HashMap::new(),
                deadline: now + timeout,
            });

        if entry.total != packet.total {
            trace!(
                "peer {peer} message {} changed total, discarding as corrupt",
                packet.message_id
            );
            drop(entry);
            state.incoming.remove(&packet.message_id);
            return None;
        }

        entry.parts.insert(packet.sequence, packet.payload);
        entry.deadline = now + timeout;

        if entry.parts.len() as u16 == entry.total {
            let total = entry.total;
            let mut parts = std::mem::take(&mut entry.parts);
            drop(entry);
            state.incoming.remove(&packet.message_id);
            let mut message = Vec::new();
            for seq in 0..total {
                if let Some(chunk) = parts.remove(&seq) {
                    message.extend_from_slice(&chunk);
                } else {
                    return None;
                }
            }
            Some(message)
        } else {
            None
        }
    }

    /// Drop any reassembly entries for `peer` whose deadline has elapsed.
    /// Expired entries are dropped silently; the pending call they would
    /// have completed times out normally via the event bridge.
    pub fn prune_expired(&self, peer: PeerId) {
        let state = self.peer_state(peer);
        let now = Instant::now();
        state.incoming.retain(|_, entry| entry.deadline > now);
    }
}
