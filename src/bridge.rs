// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
//! Per-runtime event dispatcher. Owns the pending-calls table that
//! correlates RPC calls to responses, and fans out adapter events to
//! per-actor subscribers. Pending calls are owned by exactly one runtime
//! instance, no shared singleton is consulted for dispatch, which is what
//! keeps instance isolation intact.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use log::trace;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::api::{ActorId, AdapterEvent, PeerId};
use crate::envelope::{CallId, CallResult, InvocationEnvelope, ResponseEnvelope};
use crate::error::{Error, Result};
use crate::transport::{Packet, Transport};

/// An outstanding `remoteCall`, awaiting either a matching response, a
/// timeout, a peer disconnect, or cancellation.
struct PendingCall {
    responder: oneshot::Sender<Result<Vec<u8>>>,
    peer: PeerId,
}

/// Invoked when a write-request event decodes to an invocation envelope;
/// executes inside the runtime, guaranteeing dispatch happens in the
/// process that owns the actor. The `PeerId` is the central that sent the
/// write, so the callback knows where to deliver the response notification.
pub type RpcRequestCallback = Arc<
    dyn Fn(PeerId, InvocationEnvelope) -> std::pin::Pin<Box<dyn std::future::Future<Output = ResponseEnvelope> + Send>>
        + Send
        + Sync,
>;

/// An application-level subscriber for one actor's raw (non-RPC) events.
pub type EventHandler = Arc<dyn Fn(AdapterEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBridge {
    subscribers: DashMap<ActorId, EventHandler>,
    rpc_characteristics: DashMap<ActorId, Uuid>,
    pending_calls: Arc<DashMap<CallId, PendingCall>>,
    request_callback: std::sync::RwLock<Option<RpcRequestCallback>>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, actor: ActorId, handler: EventHandler) {
        self.subscribers.insert(actor, handler);
    }

    pub fn unsubscribe(&self, actor: ActorId) {
        self.subscribers.remove(&actor);
        self.rpc_characteristics.remove(&actor);
    }

    pub fn mark_rpc_characteristic(&self, actor: ActorId, characteristic: Uuid) {
        self.rpc_characteristics.insert(actor, characteristic);
    }

    pub fn rpc_characteristic_for(&self, actor: ActorId) -> Option<Uuid> {
        self.rpc_characteristics.get(&actor).map(|e| *e)
    }

    fn actor_for_characteristic(&self, characteristic: Uuid) -> Option<ActorId> {
        self.rpc_characteristics
            .iter()
            .find(|e| *e.value() == characteristic)
            .map(|e| *e.key())
    }

    pub fn set_request_callback(&self, callback: RpcRequestCallback) {
        *self.request_callback.write().unwrap() = Some(callback);
    }

    /// Register a pending call; returns a future that resolves with the
    /// response bytes, or fails with `RpcTimeout`/`PeerDisconnected`/
    /// `Cancelled`.
    pub fn register_call(
        &self,
        call_id: CallId,
        peer: PeerId,
        deadline: Duration,
    ) -> impl std::future::Future<Output = Result<Vec<u8>>> {
        let (tx, rx) = oneshot::channel();
        self.pending_calls
            .insert(call_id, PendingCall { responder: tx, peer });
        let pending_calls = self.pending_calls.clone();
        async move {
            match tokio::time::timeout(deadline, rx).await {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => Err(Error::Cancelled),
                Err(_) => {
                    pending_calls.remove(&call_id);
                    Err(Error::RpcTimeout)
                }
            }
        }
    }

    /// Cancelling a `remoteCall` future removes its pending entry; any
    /// later-arriving response for that call-id is then dropped without
    /// error.
    pub fn cancel_call(&self, call_id: CallId) {
        self.pending_calls.remove(&call_id);
    }

    pub fn pending_call_count(&self) -> usize {
        self.pending_calls.len()
    }

    /// Complete every pending call whose peer matches, surfacing
    /// `PeerDisconnected`. Called by the connection manager when it reports
    /// a connection failure for that peer.
    pub fn fail_calls_for_peer(&self, peer: PeerId) {
        let to_remove: Vec<CallId> = self
            .pending_calls
            .iter()
            .filter(|e| e.value().peer == peer)
            .map(|e| *e.key())
            .collect();
        for call_id in to_remove {
            if let Some((_, pending)) = self.pending_calls.remove(&call_id) {
                let _ = pending.responder.send(Err(Error::PeerDisconnected));
            }
        }
    }

    fn complete_call(&self, call_id: CallId, result: Result<Vec<u8>>) {
        if let Some((_, pending)) = self.pending_calls.remove(&call_id) {
            let _ = pending.responder.send(result);
        } else {
            trace!("response for unknown or cancelled call {call_id}, dropping");
        }
    }

    /// Fan out one adapter event. Write requests on an RPC characteristic
    /// carry one transport fragment: each is unpacked and fed to
    /// `transport` for reassembly, and only once a full message has arrived
    /// does it decode as an invocation envelope and route through the
    /// request callback. Value updates on an RPC characteristic are
    /// reassembled and decoded the same way as response envelopes that
    /// complete the matching pending call. Everything else is forwarded to
    /// ordinary subscribers unchanged.
    pub async fn distribute(&self, event: AdapterEvent, transport: &Transport) {
        match &event {
            AdapterEvent::WriteRequestReceived {
                central,
                characteristic,
                value,
                ..
            } => {
                if let Some(actor) = self.actor_for_characteristic(*characteristic) {
                    let message = match Self::reassemble(transport, *central, value) {
                        Ok(Some(message)) => message,
                        Ok(None) => return,
                        Err(e) => {
                            trace!("bad fragment on actor {actor}'s characteristic: {e}");
                            return;
                        }
                    };
                    match InvocationEnvelope::decode(&message) {
                        Ok(envelope) => {
                            let callback = self.request_callback.read().unwrap().clone();
                            if let Some(callback) = callback {
                                callback(*central, envelope).await;
                            }
                            return;
                        }
                        Err(e) => {
                            trace!("invalid invocation envelope for actor {actor}: {e}");
                            return;
                        }
                    }
                }
            }
            AdapterEvent::CharacteristicValueUpdated {
                peer,
                characteristic,
                value,
                ..
            } => {
                if let Some(actor) = self.actor_for_characteristic(*characteristic) {
                    let message = match Self::reassemble(transport, *peer, value) {
                        Ok(Some(message)) => message,
                        Ok(None) => return,
                        Err(e) => {
                            trace!("bad fragment on actor {actor}'s characteristic: {e}");
                            return;
                        }
                    };
                    match ResponseEnvelope::decode(&message) {
                        Ok(response) => {
                            let result = match response.result {
                                CallResult::Success(bytes) => Ok(bytes),
                                CallResult::Void => Ok(Vec::new()),
                                CallResult::Failure(kind) => {
                                    Err(Error::RpcFailed(format!("{kind:?}")))
                                }
                            };
                            self.complete_call(response.call_id, result);
                            return;
                        }
                        Err(e) => {
                            trace!("invalid response envelope for actor {actor}: {e}");
                            return;
                        }
                    }
                }
            }
            _ => {}
        }

        for entry in self.subscribers.iter() {
            (entry.value())(event.clone());
        }
    }

    /// Unpack one wire fragment and feed it to `transport`'s reassembly
    /// buffer for `peer`. Returns the full message once every fragment has
    /// arrived, or `None` while still waiting on the rest.
    fn reassemble(transport: &Transport, peer: PeerId, bytes: &[u8]) -> Result<Option<Vec<u8>>> {
        let packet = Packet::unpack(bytes)?;
        Ok(transport.receive(peer, packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn register_call_times_out() {
        let bridge = EventBridge::new();
        let fut = bridge.register_call(CallId::new(), PeerId::random(), Duration::from_millis(10));
        let result = fut.await;
        assert!(matches!(result, Err(Error::RpcTimeout)));
        assert_eq!(bridge.pending_call_count(), 0);
    }

    /// Fragment `response` through a fresh `Transport` the way the runtime
    /// would, so tests exercise `distribute` against real wire packets
    /// rather than bare envelope bytes.
    fn pack_response(transport: &Transport, peer: PeerId, response: &ResponseEnvelope) -> Vec<u8> {
        transport.set_max_write_length(peer, 185);
        let encoded = response.encode().unwrap();
        let packets = transport.fragment(&encoded, peer).unwrap();
        assert_eq!(packets.len(), 1, "test response must fit in one fragment");
        packets[0].pack()
    }

    #[tokio::test]
    async fn response_completes_pending_call() {
        let bridge = Arc::new(EventBridge::new());
        let transport = Transport::new(Duration::from_secs(30));
        let peer = PeerId::random();
        let call_id = CallId::new();
        let actor = ActorId::random();
        let characteristic = Uuid::new_v4();
        bridge.mark_rpc_characteristic(actor, characteristic);

        let fut = bridge.register_call(call_id, peer, Duration::from_secs(1));

        let response = ResponseEnvelope::success(call_id, b"pong".to_vec());
        let value = pack_response(&transport, peer, &response);
        bridge
            .distribute(
                AdapterEvent::CharacteristicValueUpdated {
                    peer,
                    service: Uuid::new_v4(),
                    characteristic,
                    value,
                    error: None,
                },
                &transport,
            )
            .await;

        let result = fut.await.unwrap();
        assert_eq!(result, b"pong");
    }

    #[tokio::test]
    async fn cancel_drops_later_response_without_error() {
        let bridge = Arc::new(EventBridge::new());
        let transport = Transport::new(Duration::from_secs(30));
        let peer = PeerId::random();
        let call_id = CallId::new();
        let actor = ActorId::random();
        let characteristic = Uuid::new_v4();
        bridge.mark_rpc_characteristic(actor, characteristic);

        let fut = bridge.register_call(call_id, peer, Duration::from_secs(5));
        bridge.cancel_call(call_id);
        drop(fut);

        let response = ResponseEnvelope::success(call_id, b"late".to_vec());
        let value = pack_response(&transport, peer, &response);
        // must not panic even though there is no pending call left.
        bridge
            .distribute(
                AdapterEvent::CharacteristicValueUpdated {
                    peer,
                    service: Uuid::new_v4(),
                    characteristic,
                    value,
                    error: None,
                },
                &transport,
            )
            .await;

        assert_eq!(bridge.pending_call_count(), 0);
    }

    #[tokio::test]
    async fn peer_disconnect_fails_pending_calls() {
        let bridge = Arc::new(EventBridge::new());
        let peer = PeerId::random();
        let call_id = CallId::new();
        let fut = bridge.register_call(call_id, peer, Duration::from_secs(5));
        bridge.fail_calls_for_peer(peer);
        let result = fut.await;
        assert!(matches!(result, Err(Error::PeerDisconnected)));
    }
}
