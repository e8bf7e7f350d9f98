// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
//! An in-process adapter that lets two [`crate::runtime::ActorSystem`]
//! instances exchange GATT traffic without any real radio, by sharing an
//! [`EmulatorHub`]. Unlike [`mock`](crate::api::mock), which scripts a
//! single side of a link, the emulator actually routes a peripheral's
//! `update_value` to the subscribed central's event stream and a central's
//! `write_value` to the peripheral's, so two runtimes can complete a full
//! RPC round trip.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use super::{
    AdapterEvent, AdvertisementData, CharacteristicMetadata, DiscoveredPeripheral, EventStream,
    ManagerState, PeerId, ServiceMetadata, WriteType,
};
use crate::error::Result;

/// Per-peer state shared by every [`EmulatorAdapter`] handle addressing
/// that peer: its advertised services, who has subscribed to what, and its
/// event sender. Lives inside the [`EmulatorHub`] keyed by [`PeerId`].
struct EmulatorNode {
    events: broadcast::Sender<AdapterEvent>,
    services: DashMap<Uuid, ServiceMetadata>,
    subscriptions: DashMap<Uuid, HashSet<PeerId>>,
    connected_centrals: DashMap<PeerId, ()>,
    advertising: AtomicBool,
    max_write_length: DashMap<PeerId, usize>,
}

impl Default for EmulatorNode {
    fn default() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            events,
            services: DashMap::new(),
            subscriptions: DashMap::new(),
            connected_centrals: DashMap::new(),
            advertising: AtomicBool::new(false),
            max_write_length: DashMap::new(),
        }
    }
}

/// Shared registry of emulated peers. Each call to [`EmulatorHub::adapter`]
/// hands back a [`EmulatorAdapter`] bound to one [`PeerId`] within the hub;
/// any number of adapters can share a hub to model a small mesh.
#[derive(Default)]
pub struct EmulatorHub {
    nodes: DashMap<PeerId, Arc<EmulatorNode>>,
}

impl EmulatorHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns an adapter handle identified as `peer_id` within this hub.
    /// Calling this again with the same id returns a handle to the same
    /// underlying node, mirroring how a real radio has one identity.
    pub fn adapter(self: &Arc<Self>, peer_id: PeerId) -> EmulatorAdapter {
        self.nodes.entry(peer_id).or_default();
        EmulatorAdapter {
            hub: Arc::clone(self),
            self_id: peer_id,
        }
    }

    fn node(&self, peer: PeerId) -> Arc<EmulatorNode> {
        Arc::clone(&self.nodes.entry(peer).or_default())
    }

    /// All peers currently advertising, as a central's scan would see them.
    fn advertising_peers(&self) -> Vec<PeerId> {
        self.nodes
            .iter()
            .filter(|e| e.value().advertising.load(Ordering::Relaxed))
            .map(|e| *e.key())
            .collect()
    }
}

/// One identity's view of an [`EmulatorHub`]: an [`Adapter`](super::Adapter)
/// implementation backed by shared in-process state instead of a host
/// Bluetooth stack.
#[derive(Clone)]
pub struct EmulatorAdapter {
    hub: Arc<EmulatorHub>,
    self_id: PeerId,
}

impl EmulatorAdapter {
    pub fn peer_id(&self) -> PeerId {
        self.self_id
    }

    fn own_node(&self) -> Arc<EmulatorNode> {
        self.hub.node(self.self_id)
    }
}

#[async_trait]
impl super::CentralRole for EmulatorAdapter {
    async fn scan(
        &self,
        service_uuids: &[Uuid],
        _timeout: Duration,
    ) -> Result<Pin<Box<dyn Stream<Item = DiscoveredPeripheral> + Send>>> {
        let wanted: HashSet<Uuid> = service_uuids.iter().copied().collect();
        let hub = Arc::clone(&self.hub);
        let found: Vec<DiscoveredPeripheral> = hub
            .advertising_peers()
            .into_iter()
            .filter(|peer| *peer != self.self_id)
            .filter_map(|peer| {
                let node = hub.node(peer);
                let service_uuids: Vec<Uuid> = node.services.iter().map(|e| *e.key()).collect();
                if !wanted.is_empty() && service_uuids.iter().all(|u| !wanted.contains(u)) {
                    return None;
                }
                Some(DiscoveredPeripheral {
                    peer_id: peer,
                    local_name: None,
                    rssi: Some(-50),
                    service_uuids,
                })
            })
            .collect();
        Ok(Box::pin(futures::stream::iter(found)))
    }

    async fn stop_scan(&self) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, peer: PeerId, _timeout: Duration) -> Result<()> {
        let peripheral = self.hub.node(peer);
        peripheral.connected_centrals.insert(self.self_id, ());
        // A real ATT_MTU is a single negotiated value shared by both ends
        // of the link; the emulator records it symmetrically on both
        // nodes so either side's `maximum_write_length` query resolves,
        // without needing a real MTU-exchange round trip. Tests exercising
        // small-MTU behavior call `set_max_write_length` explicitly.
        peripheral
            .max_write_length
            .entry(self.self_id)
            .or_insert(185);
        let own = self.own_node();
        own.max_write_length.entry(peer).or_insert(185);
        let _ = peripheral
            .events
            .send(AdapterEvent::CentralSubscribed {
                central: self.self_id,
                characteristic: Uuid::nil(),
            });
        let _ = own.events.send(AdapterEvent::PeripheralConnected(peer));
        Ok(())
    }

    async fn disconnect(&self, peer: PeerId) -> Result<()> {
        let peripheral = self.hub.node(peer);
        peripheral.connected_centrals.remove(&self.self_id);
        let own = self.own_node();
        let _ = own.events.send(AdapterEvent::PeripheralDisconnected {
            peer,
            error: None,
        });
        Ok(())
    }

    async fn is_connected(&self, peer: PeerId) -> Result<bool> {
        Ok(self.hub.node(peer).connected_centrals.contains_key(&self.self_id))
    }

    async fn discover_services(
        &self,
        peer: PeerId,
        uuids: Option<&[Uuid]>,
    ) -> Result<Vec<ServiceMetadata>> {
        let node = self.hub.node(peer);
        let wanted = uuids.map(|u| u.iter().copied().collect::<HashSet<_>>());
        Ok(node
            .services
            .iter()
            .map(|e| e.value().clone())
            .filter(|s| match &wanted {
                Some(w) => w.contains(&s.uuid),
                None => true,
            })
            .collect())
    }

    async fn discover_characteristics(
        &self,
        service: Uuid,
        peer: PeerId,
        _uuids: Option<&[Uuid]>,
    ) -> Result<Vec<CharacteristicMetadata>> {
        let node = self.hub.node(peer);
        Ok(node
            .services
            .get(&service)
            .map(|s| s.characteristics.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn read_value(&self, _characteristic: Uuid, _peer: PeerId) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn write_value(
        &self,
        data: &[u8],
        characteristic: Uuid,
        peer: PeerId,
        _write_type: WriteType,
    ) -> Result<()> {
        let peripheral = self.hub.node(peer);
        let service = peripheral
            .services
            .iter()
            .find(|e| e.characteristics.iter().any(|c| c.uuid == characteristic))
            .map(|e| *e.key())
            .unwrap_or(Uuid::nil());
        let _ = peripheral.events.send(AdapterEvent::WriteRequestReceived {
            central: self.self_id,
            service,
            characteristic,
            value: data.to_vec(),
        });
        Ok(())
    }

    async fn set_notify(&self, enabled: bool, characteristic: Uuid, peer: PeerId) -> Result<()> {
        let peripheral = self.hub.node(peer);
        let mut subs = peripheral.subscriptions.entry(characteristic).or_default();
        if enabled {
            subs.insert(self.self_id);
        } else {
            subs.remove(&self.self_id);
        }
        Ok(())
    }

    async fn maximum_write_length(&self, peer: PeerId, _write_type: WriteType) -> Result<Option<usize>> {
        Ok(self.hub.node(peer).max_write_length.get(&self.self_id).map(|v| *v))
    }
}

#[async_trait]
impl super::PeripheralRole for EmulatorAdapter {
    async fn add_service(&self, service: ServiceMetadata) -> Result<()> {
        self.own_node().services.insert(service.uuid, service);
        Ok(())
    }

    async fn start_advertising(&self, _data: AdvertisementData) -> Result<()> {
        let node = self.own_node();
        node.advertising.store(true, Ordering::Relaxed);
        let _ = node.events.send(AdapterEvent::AdvertisingStarted { error: None });
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.own_node().advertising.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn update_value(
        &self,
        data: &[u8],
        characteristic: Uuid,
        centrals: Option<&[PeerId]>,
    ) -> Result<bool> {
        let node = self.own_node();
        let subs: HashSet<PeerId> = node
            .subscriptions
            .get(&characteristic)
            .map(|v| v.clone())
            .unwrap_or_default();
        let targets: Vec<PeerId> = match centrals {
            Some(filter) => subs.into_iter().filter(|p| filter.contains(p)).collect(),
            None => subs.into_iter().collect(),
        };
        if targets.is_empty() {
            return Ok(false);
        }
        let service = node
            .services
            .iter()
            .find(|e| e.characteristics.iter().any(|c| c.uuid == characteristic))
            .map(|e| *e.key())
            .unwrap_or(Uuid::nil());
        for central in targets {
            let central_node = self.hub.node(central);
            let _ = central_node.events.send(AdapterEvent::CharacteristicValueUpdated {
                peer: self.self_id,
                service,
                characteristic,
                value: data.to_vec(),
                error: None,
            });
        }
        Ok(true)
    }

    async fn subscribed_centrals(&self, characteristic: Uuid) -> Result<Vec<PeerId>> {
        Ok(self
            .own_node()
            .subscriptions
            .get(&characteristic)
            .map(|v| v.iter().copied().collect())
            .unwrap_or_default())
    }

    fn is_advertising(&self) -> bool {
        self.own_node().advertising.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl super::Adapter for EmulatorAdapter {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn wait_for_powered_on(&self) -> Result<ManagerState> {
        Ok(ManagerState::PoweredOn)
    }

    fn events(&self) -> EventStream {
        let node = self.own_node();
        Box::pin(BroadcastStream::new(node.events.subscribe()).filter_map(|x| async move { x.ok() }))
    }
}

/// A [`crate::api::Manager`] vending a single [`EmulatorAdapter`] bound to
/// one hub and identity; construct one per simulated device.
#[derive(Clone)]
pub struct EmulatorManager {
    adapter: EmulatorAdapter,
}

impl EmulatorManager {
    pub fn new(hub: &Arc<EmulatorHub>, peer_id: PeerId) -> Self {
        Self {
            adapter: hub.adapter(peer_id),
        }
    }
}

#[async_trait]
impl super::Manager for EmulatorManager {
    type Adapter = EmulatorAdapter;

    async fn adapters(&self) -> Result<Vec<EmulatorAdapter>> {
        Ok(vec![self.adapter.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{CentralRole, PeripheralRole};
    use std::collections::BTreeSet;

    fn echo_service() -> (Uuid, Uuid, ServiceMetadata) {
        let service_uuid = Uuid::new_v4();
        let char_uuid = Uuid::new_v4();
        let mut characteristics = BTreeSet::new();
        characteristics.insert(CharacteristicMetadata {
            uuid: char_uuid,
            service_uuid,
            properties: crate::api::CharPropFlags::WRITE | crate::api::CharPropFlags::NOTIFY,
        });
        (
            service_uuid,
            char_uuid,
            ServiceMetadata {
                uuid: service_uuid,
                primary: true,
                characteristics,
            },
        )
    }

    #[tokio::test]
    async fn scan_discovers_advertising_peer() {
        let hub = EmulatorHub::new();
        let peripheral = hub.adapter(PeerId::random());
        let (service_uuid, _char_uuid, service) = echo_service();
        peripheral.add_service(service).await.unwrap();
        peripheral
            .start_advertising(AdvertisementData::default())
            .await
            .unwrap();

        let central = hub.adapter(PeerId::random());
        let mut found = central.scan(&[], Duration::from_secs(1)).await.unwrap();
        let discovered = found.next().await.unwrap();
        assert!(discovered.service_uuids.contains(&service_uuid));
    }

    #[tokio::test]
    async fn write_then_notify_round_trips_across_adapters() {
        let hub = EmulatorHub::new();
        let peripheral_id = PeerId::random();
        let peripheral = hub.adapter(peripheral_id);
        let (_service_uuid, char_uuid, service) = echo_service();
        peripheral.add_service(service).await.unwrap();

        let central = hub.adapter(PeerId::random());
        central.connect(peripheral_id, Duration::from_secs(1)).await.unwrap();
        central.set_notify(true, char_uuid, peripheral_id).await.unwrap();

        let mut peripheral_events = peripheral.events();
        central
            .write_value(b"ping", char_uuid, peripheral_id, WriteType::WithResponse)
            .await
            .unwrap();
        let event = peripheral_events.next().await.unwrap();
        assert!(matches!(event, AdapterEvent::WriteRequestReceived { .. }));

        let mut central_events = central.events();
        peripheral.update_value(b"pong", char_uuid, None).await.unwrap();
        let event = central_events.next().await.unwrap();
        assert!(matches!(event, AdapterEvent::CharacteristicValueUpdated { .. }));
    }
}
