// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
//! The runtime: `ActorSystem`. Orchestrates the adapter, transport, method
//! and instance registries, event bridge, and connection manager behind
//! `start_advertising`, `discover`, `connect`, `remote_call`, and
//! `handle_incoming_rpc`. Exactly one `ActorSystem` owns a given actor; the
//! closure it attaches to the event bridge's RPC-request callback is the
//! only path from an incoming write to `handle_incoming_rpc`, which is what
//! keeps instance isolation intact.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, trace, warn};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::{
    Adapter, AdapterEvent, AdvertisementData, ActorId, CentralRole, CharPropFlags,
    CharacteristicMetadata, DiscoveredPeripheral, PeerId, PeripheralRole, ServiceMetadata,
    WriteType,
};
use crate::bridge::EventBridge;
use crate::config::RuntimeConfig;
use crate::connection::ConnectionManager;
use crate::envelope::{CallId, CallResult, InvocationEnvelope, RemoteErrorKind, ResponseEnvelope};
use crate::error::{Error, Result};
use crate::registry::method::Handler;
use crate::registry::{InstanceRegistry, MethodRegistry};
use crate::transport::Transport;
use crate::uuid as uuids;

/// Default scan duration when a caller does not supply one.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);
/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// The conventional method name under which a type's single RPC
/// characteristic is derived; application methods are addressed within the
/// envelope's `target` field, not by a characteristic of their own.
const RPC_METHOD_NAME: &str = "__rpc__";

fn rpc_characteristic_uuid(type_name: &str) -> Uuid {
    uuids::characteristic_uuid(type_name, RPC_METHOD_NAME)
}

/// The default actor-id for a type's sole advertised instance: derived the
/// same deterministic way as service/characteristic UUIDs, so two peers
/// agree on it without an out-of-band exchange. Callers hosting more than
/// one instance of a type must exchange actor-ids through their own
/// application channel and pass them explicitly.
pub fn singleton_actor_id(type_name: &str) -> ActorId {
    ActorId::new(uuids::deterministic(
        &format!("{type_name}.Actor"),
        uuids::BLEU_NAMESPACE,
    ))
}

/// A resolved handle to a remote actor, obtained from [`ActorSystem::connect`].
/// Held by the instance registry as a weak reference; the proxy itself owns
/// nothing that keeps the runtime alive.
pub struct RemoteProxy {
    pub peer: PeerId,
    pub actor_id: ActorId,
    characteristic: Uuid,
}

impl RemoteProxy {
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn actor_id(&self) -> ActorId {
        self.actor_id
    }
}

/// Per-runtime orchestrator. Generic over the concrete adapter backend so
/// the same runtime code runs against a real host stack, the mock adapter,
/// or the emulator.
pub struct ActorSystem<A: Adapter + Clone + 'static> {
    adapter: A,
    config: RuntimeConfig,
    transport: Transport,
    methods: MethodRegistry,
    instances: InstanceRegistry,
    bridge: Arc<EventBridge>,
    connections: Arc<ConnectionManager<A>>,
    event_pump: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl<A: Adapter + Clone + 'static> ActorSystem<A> {
    /// Construct a runtime over `adapter`. Spawns the event pump that
    /// forwards the adapter's event stream into the event bridge.
    pub async fn new(adapter: A, config: RuntimeConfig) -> Result<Arc<Self>> {
        adapter.initialize().await?;
        adapter.wait_for_powered_on().await?;

        let connections = ConnectionManager::new(adapter.clone(), config.default_reconnection_policy);
        let bridge = Arc::new(EventBridge::new());
        let system = Arc::new(Self {
            adapter,
            transport: Transport::new(config.reassembly_timeout),
            methods: MethodRegistry::new(),
            instances: InstanceRegistry::new(),
            bridge,
            connections,
            config,
            event_pump: std::sync::Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        });

        let weak: Weak<Self> = Arc::downgrade(&system);
        system.bridge.set_request_callback(Arc::new(move |peer, envelope| {
            let weak = weak.clone();
            Box::pin(async move {
                match weak.upgrade() {
                    Some(system) => system.handle_incoming_rpc(peer, envelope).await,
                    None => ResponseEnvelope::failure(envelope.call_id, RemoteErrorKind::ActorNotFound),
                }
            })
        }));

        system.spawn_event_pump();
        Ok(system)
    }

    fn spawn_event_pump(self: &Arc<Self>) {
        let system = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut events = system.adapter.events();
            while let Some(event) = events.next().await {
                if system.shutting_down.load(Ordering::Relaxed) {
                    break;
                }
                match &event {
                    AdapterEvent::PeripheralDisconnected { peer, error } => {
                        system.bridge.fail_calls_for_peer(*peer);
                        if error.is_some() {
                            system.connections.on_connection_lost(*peer, error.clone());
                        }
                    }
                    AdapterEvent::CentralSubscribed { central, .. } => {
                        // Learn the subscribing central's negotiated MTU so
                        // responses can be fragmented back to it; mirrors
                        // the same query the central side performs after
                        // `connect`.
                        if let Ok(Some(mtu)) = system
                            .adapter
                            .maximum_write_length(*central, WriteType::WithoutResponse)
                            .await
                        {
                            system.transport.set_max_write_length(*central, mtu);
                        }
                    }
                    _ => {}
                }
                system.bridge.distribute(event, &system.transport).await;
            }
        });
        *self.event_pump.lock().unwrap() = Some(handle);
    }

    /// Host `actor` locally under `type_name`, registering its RPC
    /// characteristic, its methods, and starting advertising.
    pub async fn start_advertising<T: Any + Send + Sync>(
        self: &Arc<Self>,
        actor: Arc<T>,
        actor_id: ActorId,
        type_name: &str,
        methods: Vec<(&str, Handler)>,
        mut advertisement: AdvertisementData,
    ) -> Result<()> {
        let service_uuid = uuids::service_uuid(type_name);
        let characteristic_uuid = rpc_characteristic_uuid(type_name);

        let mut characteristics = std::collections::BTreeSet::new();
        characteristics.insert(CharacteristicMetadata {
            uuid: characteristic_uuid,
            service_uuid,
            properties: CharPropFlags::WRITE
                | CharPropFlags::WRITE_WITHOUT_RESPONSE
                | CharPropFlags::NOTIFY,
        });
        let service = ServiceMetadata {
            uuid: service_uuid,
            primary: true,
            characteristics,
        };
        self.adapter.add_service(service).await?;

        self.instances.register_local(actor_id, actor);
        for (name, handler) in methods {
            self.methods.register(actor_id, name, handler);
        }
        self.bridge.mark_rpc_characteristic(actor_id, characteristic_uuid);

        if !advertisement.service_uuids.contains(&service_uuid) {
            advertisement.service_uuids.push(service_uuid);
        }
        self.adapter.start_advertising(advertisement).await?;
        debug!("advertising {type_name} as actor {actor_id} on service {service_uuid}");
        Ok(())
    }

    /// Stop hosting `actor_id`: unregisters its methods and drops it from
    /// the instance registry. Does not stop advertising the service itself
    /// if other actors still share it.
    pub fn stop_advertising(&self, actor_id: ActorId) {
        self.methods.unregister(actor_id);
        self.instances.unregister(actor_id);
        self.bridge.unsubscribe(actor_id);
    }

    /// Scan for peripherals advertising `type_name`'s service.
    pub async fn discover(
        &self,
        type_name: &str,
        timeout: Duration,
    ) -> Result<Vec<DiscoveredPeripheral>> {
        let service_uuid = uuids::service_uuid(type_name);
        let mut stream = self.adapter.scan(&[service_uuid], timeout).await?;
        let mut seen = std::collections::HashSet::new();
        let mut found = Vec::new();
        while let Some(peripheral) = stream.next().await {
            if !self.config.allow_duplicates_in_scan && !seen.insert(peripheral.peer_id) {
                continue;
            }
            found.push(peripheral);
        }
        self.adapter.stop_scan().await?;
        Ok(found)
    }

    /// Connect to `peer`, discover its RPC characteristic for `type_name`,
    /// and return a proxy for its singleton actor. The returned `Arc` is
    /// the only strong reference; the instance registry keeps a weak one
    /// only, so the proxy stops being resolvable the moment the caller
    /// drops it.
    pub async fn connect(self: &Arc<Self>, peer: PeerId, type_name: &str) -> Result<Arc<RemoteProxy>> {
        self.connections.connect(peer, DEFAULT_CONNECT_TIMEOUT).await?;

        let service_uuid = uuids::service_uuid(type_name);
        let characteristic_uuid = rpc_characteristic_uuid(type_name);

        let services = self
            .adapter
            .discover_services(peer, Some(&[service_uuid]))
            .await?;
        if !services.iter().any(|s| s.uuid == service_uuid) {
            return Err(Error::ServiceNotFound(service_uuid));
        }
        let characteristics = self
            .adapter
            .discover_characteristics(service_uuid, peer, Some(&[characteristic_uuid]))
            .await?;
        let characteristic = characteristics
            .into_iter()
            .find(|c| c.uuid == characteristic_uuid && c.properties.is_rpc_capable())
            .ok_or(Error::CharacteristicNotFound(characteristic_uuid))?;

        if let Some(mtu) = self
            .adapter
            .maximum_write_length(peer, WriteType::WithoutResponse)
            .await?
        {
            self.transport.set_max_write_length(peer, mtu);
        }
        self.adapter.set_notify(true, characteristic.uuid, peer).await?;

        let actor_id = singleton_actor_id(type_name);
        // The caller's own bridge also needs the characteristic-to-actor
        // mapping: incoming notifications on it decode as response
        // envelopes, the mirror image of the hosting side's write-to-actor
        // lookup.
        self.bridge.mark_rpc_characteristic(actor_id, characteristic.uuid);
        let proxy = Arc::new(RemoteProxy {
            peer,
            actor_id,
            characteristic: characteristic.uuid,
        });
        self.instances.register_remote(actor_id, &proxy);
        Ok(proxy)
    }

    pub async fn disconnect(self: &Arc<Self>, peer: PeerId) -> Result<()> {
        self.bridge.fail_calls_for_peer(peer);
        self.connections.disconnect(peer).await
    }

    /// Invoke `target` on the actor `proxy` refers to, awaiting the
    /// response or the default RPC timeout.
    pub async fn remote_call(
        &self,
        proxy: &RemoteProxy,
        target: &str,
        arguments: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let call_id = CallId::new();
        let envelope = InvocationEnvelope {
            call_id,
            recipient_id: proxy.actor_id,
            sender_id: None,
            target: target.to_string(),
            arguments,
            metadata: Default::default(),
        };
        let encoded = envelope.encode()?;
        let packets = self.transport.fragment(&encoded, proxy.peer)?;

        let pending = self
            .bridge
            .register_call(call_id, proxy.peer, self.config.default_rpc_timeout);

        for packet in packets {
            if let Err(e) = self
                .adapter
                .write_value(
                    &packet.pack(),
                    proxy.characteristic,
                    proxy.peer,
                    WriteType::WithoutResponse,
                )
                .await
            {
                self.bridge.cancel_call(call_id);
                return Err(Error::RpcFailed(e.to_string()));
            }
        }

        pending.await
    }

    /// Resolve and execute an incoming invocation, then push the encoded
    /// response back to `peer` as a notification on the RPC characteristic.
    /// This is the only code path that reaches an actor hosted by this
    /// runtime, attached once, at construction, as the event bridge's
    /// request callback.
    async fn handle_incoming_rpc(&self, peer: PeerId, envelope: InvocationEnvelope) -> ResponseEnvelope {
        let response = self.resolve_and_execute(&envelope);
        if let Some(characteristic) = self.bridge.rpc_characteristic_for(envelope.recipient_id) {
            match response.encode() {
                Ok(encoded) => match self.transport.fragment(&encoded, peer) {
                    Ok(packets) => {
                        for packet in packets {
                            if let Err(e) = self
                                .adapter
                                .update_value(&packet.pack(), characteristic, Some(&[peer]))
                                .await
                            {
                                warn!("failed to deliver response to {peer}: {e}");
                            }
                        }
                    }
                    Err(e) => warn!("failed to fragment response for {peer}: {e}"),
                },
                Err(e) => warn!("failed to encode response for {peer}: {e}"),
            }
        } else {
            trace!("no RPC characteristic for actor {}, response not delivered", envelope.recipient_id);
        }
        response
    }

    fn resolve_and_execute(&self, envelope: &InvocationEnvelope) -> ResponseEnvelope {
        if !self.instances.is_local(envelope.recipient_id) {
            return ResponseEnvelope::failure(envelope.call_id, RemoteErrorKind::ActorNotFound);
        }
        match self
            .methods
            .execute(envelope.recipient_id, &envelope.target, &envelope.arguments)
        {
            Ok(bytes) => ResponseEnvelope::success(envelope.call_id, bytes),
            Err(Error::ActorNotFound(_)) => {
                ResponseEnvelope::failure(envelope.call_id, RemoteErrorKind::ActorNotFound)
            }
            Err(Error::MethodNotFound(name)) => {
                trace!("method not found: {name}");
                ResponseEnvelope::failure(envelope.call_id, RemoteErrorKind::MethodNotFound)
            }
            Err(Error::MethodFailed(msg)) => {
                ResponseEnvelope::failure(envelope.call_id, RemoteErrorKind::MethodFailed(msg))
            }
            Err(other) => {
                ResponseEnvelope::failure(envelope.call_id, RemoteErrorKind::MethodFailed(other.to_string()))
            }
        }
    }

    /// Incoming response/result of a direct, in-process invocation against a
    /// locally-decoded envelope, bypassing the transport entirely. Exposed
    /// for the emulator/mock-driven integration tests exercising dispatch
    /// without a full fragment round trip.
    pub async fn handle_incoming_rpc_direct(&self, envelope: InvocationEnvelope) -> ResponseEnvelope {
        self.resolve_and_execute(&envelope)
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager<A>> {
        &self.connections
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Cancel background tasks, disconnect every known peer, and unregister
    /// all actors.
    pub async fn shutdown(self: &Arc<Self>) {
        self.shutting_down.store(true, Ordering::Relaxed);
        if let Some(handle) = self.event_pump.lock().unwrap().take() {
            handle.abort();
        }
        for actor_id in self.instances.local_actor_ids() {
            self.stop_advertising(actor_id);
        }
        let _ = self.adapter.stop_advertising().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::emulator::EmulatorHub;
    use crate::config::RuntimeConfig;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn minimal_call_round_trips() {
        let hub = EmulatorHub::new();
        let server_peer = PeerId::random();
        let server_adapter = hub.adapter(server_peer);
        let server = ActorSystem::new(server_adapter, RuntimeConfig::default()).await.unwrap();

        let actor_id = singleton_actor_id("Greeter");
        server
            .start_advertising(
                Arc::new(()),
                actor_id,
                "Greeter",
                vec![(
                    "ping",
                    Arc::new(|_args: &[u8]| Ok(b"pong".to_vec())) as Handler,
                )],
                AdvertisementData::default(),
            )
            .await
            .unwrap();

        let client_adapter = hub.adapter(PeerId::random());
        let client = ActorSystem::new(client_adapter, RuntimeConfig::default()).await.unwrap();

        let found = client.discover("Greeter", Duration::from_secs(1)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].peer_id, server_peer);

        let proxy = client.connect(server_peer, "Greeter").await.unwrap();
        let result = client.remote_call(&proxy, "ping", Vec::new()).await.unwrap();
        assert_eq!(result, b"pong");
    }

    #[tokio::test]
    async fn unknown_actor_yields_actor_not_found() {
        let hub = EmulatorHub::new();
        let server = ActorSystem::new(hub.adapter(PeerId::random()), RuntimeConfig::default())
            .await
            .unwrap();
        let envelope = InvocationEnvelope::new(ActorId::random(), "ping", Vec::new());
        let response = server.handle_incoming_rpc_direct(envelope).await;
        match response.result {
            CallResult::Failure(RemoteErrorKind::ActorNotFound) => {}
            other => panic!("expected ActorNotFound, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_clears_pending_call() {
        let hub = EmulatorHub::new();
        let server_peer = PeerId::random();
        let server_adapter = hub.adapter(server_peer);
        let server = ActorSystem::new(server_adapter, RuntimeConfig::default()).await.unwrap();

        let actor_id = singleton_actor_id("Sleeper");
        let counter = Arc::new(AtomicU32::new(0));
        let counter_for_handler = Arc::clone(&counter);
        server
            .start_advertising(
                Arc::clone(&counter),
                actor_id,
                "Sleeper",
                vec![(
                    "sleep",
                    Arc::new(move |_args: &[u8]| {
                        counter_for_handler.fetch_add(1, Ordering::Relaxed);
                        std::thread::sleep(Duration::from_millis(50));
                        Ok(Vec::new())
                    }) as Handler,
                )],
                AdvertisementData::default(),
            )
            .await
            .unwrap();

        let mut config = RuntimeConfig::default();
        config.default_rpc_timeout = Duration::from_millis(1);
        let client_adapter = hub.adapter(PeerId::random());
        let client = ActorSystem::new(client_adapter, config).await.unwrap();
        let proxy = client.connect(server_peer, "Sleeper").await.unwrap();

        let result = client.remote_call(&proxy, "sleep", Vec::new()).await;
        assert!(matches!(result, Err(Error::RpcTimeout)));
        assert_eq!(client.bridge.pending_call_count(), 0);
    }
}
