// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
//! Invocation and response envelopes: self-describing, versioned records
//! carrying one RPC call's arguments or result. Encoded with `postcard`, a
//! compact binary serde format well suited to MTU-constrained BLE links.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ActorId;
use crate::error::{Error, Result};

/// The envelope wire-format version this build speaks. A peer encountering
/// a different version in `metadata.version` should treat the call as
/// `VersionMismatch`.
pub const ENVELOPE_VERSION: &str = "1.0";

/// A call-id, unique within one runtime for the lifetime of its pending
/// entry.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct CallId(pub Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Envelope metadata: version tag plus a wall-clock timestamp, kept as an
/// open map so a future field can be added without breaking older peers'
/// ability to ignore it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeMetadata {
    pub version: String,
    pub timestamp: u64,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl Default for EnvelopeMetadata {
    fn default() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            version: ENVELOPE_VERSION.to_string(),
            timestamp,
            extra: HashMap::new(),
        }
    }
}

/// An encoded method invocation addressed to a specific actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationEnvelope {
    pub call_id: CallId,
    pub recipient_id: ActorId,
    pub sender_id: Option<ActorId>,
    /// Mangled method name, e.g. `ping` or `setBrightness(level:)`.
    pub target: String,
    pub arguments: Vec<u8>,
    pub metadata: EnvelopeMetadata,
}

impl InvocationEnvelope {
    pub fn new(recipient_id: ActorId, target: impl Into<String>, arguments: Vec<u8>) -> Self {
        Self {
            call_id: CallId::new(),
            recipient_id,
            sender_id: None,
            target: target.into(),
            arguments,
            metadata: EnvelopeMetadata::default(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self)
            .map_err(|e| Error::InvalidEnvelope(format!("invocation encode failed: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes)
            .map_err(|e| Error::InvalidEnvelope(format!("invocation decode failed: {e}")))
    }
}

/// The outcome of one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CallResult {
    Success(Vec<u8>),
    Failure(RemoteErrorKind),
    Void,
}

/// A serializable projection of [`crate::error::Error`] suitable for
/// crossing the wire; the receiving side maps it back to a local `Error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    ActorNotFound,
    MethodNotFound,
    MethodFailed(String),
    InvalidEnvelope,
}

/// An encoded response to one invocation. `call_id` equals the
/// invocation's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub call_id: CallId,
    pub result: CallResult,
    pub metadata: EnvelopeMetadata,
}

impl ResponseEnvelope {
    pub fn success(call_id: CallId, bytes: Vec<u8>) -> Self {
        Self {
            call_id,
            result: CallResult::Success(bytes),
            metadata: EnvelopeMetadata::default(),
        }
    }

    pub fn void(call_id: CallId) -> Self {
        Self {
            call_id,
            result: CallResult::Void,
            metadata: EnvelopeMetadata::default(),
        }
    }

    pub fn failure(call_id: CallId, kind: RemoteErrorKind) -> Self {
        Self {
            call_id,
            result: CallResult::Failure(kind),
            metadata: EnvelopeMetadata::default(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        postcard::to_allocvec(self)
            .map_err(|e| Error::InvalidEnvelope(format!("response encode failed: {e}")))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        postcard::from_bytes(bytes)
            .map_err(|e| Error::InvalidEnvelope(format!("response decode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocation_round_trips() {
        let env = InvocationEnvelope::new(ActorId::random(), "ping", b"hello".to_vec());
        let bytes = env.encode().unwrap();
        let back = InvocationEnvelope::decode(&bytes).unwrap();
        assert_eq!(back.call_id, env.call_id);
        assert_eq!(back.target, "ping");
        assert_eq!(back.arguments, b"hello");
        assert_eq!(back.metadata.version, ENVELOPE_VERSION);
    }

    #[test]
    fn response_round_trips_success_and_failure() {
        let call_id = CallId::new();
        let ok = ResponseEnvelope::success(call_id, b"pong".to_vec());
        let bytes = ok.encode().unwrap();
        let back = ResponseEnvelope::decode(&bytes).unwrap();
        assert_eq!(back.call_id, call_id);
        match back.result {
            CallResult::Success(b) => assert_eq!(b, b"pong"),
            _ => panic!("expected success"),
        }

        let fail = ResponseEnvelope::failure(call_id, RemoteErrorKind::MethodNotFound);
        let bytes = fail.encode().unwrap();
        let back = ResponseEnvelope::decode(&bytes).unwrap();
        assert!(matches!(back.result, CallResult::Failure(RemoteErrorKind::MethodNotFound)));
    }

    #[test]
    fn decode_garbage_is_invalid_envelope() {
        let err = InvocationEnvelope::decode(&[0xff, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, Error::InvalidEnvelope(_)));
    }
}
