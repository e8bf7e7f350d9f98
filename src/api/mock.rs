// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
//! A configurable mock adapter implementing the adapter contract with no
//! real BLE host. Scriptable responses and injectable faults make it
//! suitable for exercising the connection manager's reconnection and
//! timeout behavior without hardware.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
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
use crate::error::{Error, Result};

/// Faults that can be injected into a [`MockAdapter`] to exercise the
/// connection manager's reconnection and timeout paths deterministically.
#[derive(Debug, Clone, Default)]
pub struct MockFaults {
    /// `connect` fails this many times before succeeding.
    pub fail_connect_attempts: usize,
    /// `connect` always times out (never resolves) when set.
    pub hang_on_connect: bool,
    /// Reported via `wait_for_powered_on` before flipping to `PoweredOn`.
    pub powered_off: bool,
}

#[derive(Default)]
struct MockState {
    discovered: DashMap<PeerId, DiscoveredPeripheral>,
    connected: DashMap<PeerId, ()>,
    services: DashMap<Uuid, ServiceMetadata>,
    max_write_length: DashMap<PeerId, usize>,
    subscriptions: DashMap<Uuid, Vec<PeerId>>,
    advertising: AtomicBool,
    connect_attempts: DashMap<PeerId, AtomicUsize>,
}

/// An in-process mock adapter. Cloning shares the underlying state, matching
/// the `Adapter: Clone` contract the rest of this crate relies on.
#[derive(Clone)]
pub struct MockAdapter {
    state: Arc<MockState>,
    faults: Arc<std::sync::RwLock<MockFaults>>,
    events: broadcast::Sender<AdapterEvent>,
}

impl Default for MockAdapter {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Arc::new(MockState::default()),
            faults: Arc::new(std::sync::RwLock::new(MockFaults::default())),
            events,
        }
    }
}

impl MockAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_faults(&self, faults: MockFaults) {
        *self.faults.write().unwrap() = faults;
    }

    /// Seed a peer as discoverable, as if a scan had already found it.
    pub fn seed_peripheral(&self, discovered: DiscoveredPeripheral) {
        self.state
            .discovered
            .insert(discovered.peer_id, discovered.clone());
        let _ = self
            .events
            .send(AdapterEvent::PeripheralDiscovered(discovered));
    }

    /// Simulate the adapter losing the link to `peer`, as a real host stack
    /// would report via `peripheral-disconnected`.
    pub fn simulate_disconnect(&self, peer: PeerId, error: Option<String>) {
        self.state.connected.remove(&peer);
        let _ = self.events.send(AdapterEvent::PeripheralDisconnected { peer, error });
    }

    fn emit(&self, event: AdapterEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl super::CentralRole for MockAdapter {
    async fn scan(
        &self,
        _service_uuids: &[Uuid],
        _timeout: Duration,
    ) -> Result<Pin<Box<dyn Stream<Item = DiscoveredPeripheral> + Send>>> {
        let items: Vec<_> = self
            .state
            .discovered
            .iter()
            .map(|e| e.value().clone())
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }

    async fn stop_scan(&self) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, peer: PeerId, _timeout: Duration) -> Result<()> {
        let faults = self.faults.read().unwrap().clone();
        if faults.hang_on_connect {
            std::future::pending::<()>().await;
        }
        let attempts = self
            .state
            .connect_attempts
            .entry(peer)
            .or_insert_with(|| AtomicUsize::new(0));
        let count = attempts.fetch_add(1, Ordering::Relaxed);
        if count < faults.fail_connect_attempts {
            return Err(Error::ConnectionFailed("mock induced failure".into()));
        }
        self.state.connected.insert(peer, ());
        self.state.max_write_length.entry(peer).or_insert(20);
        self.emit(AdapterEvent::PeripheralConnected(peer));
        Ok(())
    }

    async fn disconnect(&self, peer: PeerId) -> Result<()> {
        self.state.connected.remove(&peer);
        self.emit(AdapterEvent::PeripheralDisconnected { peer, error: None });
        Ok(())
    }

    async fn is_connected(&self, peer: PeerId) -> Result<bool> {
        Ok(self.state.connected.contains_key(&peer))
    }

    async fn discover_services(
        &self,
        _peer: PeerId,
        _uuids: Option<&[Uuid]>,
    ) -> Result<Vec<ServiceMetadata>> {
        Ok(self.state.services.iter().map(|e| e.value().clone()).collect())
    }

    async fn discover_characteristics(
        &self,
        service: Uuid,
        _peer: PeerId,
        _uuids: Option<&[Uuid]>,
    ) -> Result<Vec<CharacteristicMetadata>> {
        Ok(self
            .state
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
        let service = self
            .state
            .services
            .iter()
            .find(|e| e.characteristics.iter().any(|c| c.uuid == characteristic))
            .map(|e| *e.key())
            .unwrap_or(Uuid::nil());
        self.emit(AdapterEvent::WriteRequestReceived {
            central: peer,
            service,
            characteristic,
            value: data.to_vec(),
        });
        Ok(())
    }

    async fn set_notify(&self, enabled: bool, characteristic: Uuid, peer: PeerId) -> Result<()> {
        let mut subs = self.state.subscriptions.entry(characteristic).or_default();
        if enabled {
            if !subs.contains(&peer) {
                subs.push(peer);
            }
        } else {
            subs.retain(|p| *p != peer);
        }
        Ok(())
    }

    async fn maximum_write_length(&self, peer: PeerId, _write_type: WriteType) -> Result<Option<usize>> {
        Ok(self.state.max_write_length.get(&peer).map(|v| *v))
    }
}

#[async_trait]
impl super::PeripheralRole for MockAdapter {
    async fn add_service(&self, service: ServiceMetadata) -> Result<()> {
        self.state.services.insert(service.uuid, service);
        Ok(())
    }

    async fn start_advertising(&self, _data: AdvertisementData) -> Result<()> {
        self.state.advertising.store(true, Ordering::Relaxed);
        self.emit(AdapterEvent::AdvertisingStarted { error: None });
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<()> {
        self.state.advertising.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn update_value(
        &self,
        data: &[u8],
        characteristic: Uuid,
        centrals: Option<&[PeerId]>,
    ) -> Result<bool> {
        let subs = self
            .state
            .subscriptions
            .get(&characteristic)
            .map(|v| v.clone())
            .unwrap_or_default();
        let targets: Vec<PeerId> = match centrals {
            Some(filter) => subs.into_iter().filter(|p| filter.contains(p)).collect(),
            None => subs,
        };
        if targets.is_empty() {
            return Ok(false);
        }
        let service = self
            .state
            .services
            .iter()
            .find(|e| e.characteristics.iter().any(|c| c.uuid == characteristic))
            .map(|e| *e.key())
            .unwrap_or(Uuid::nil());
        for peer in &targets {
            self.emit(AdapterEvent::CharacteristicValueUpdated {
                peer: *peer,
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
            .state
            .subscriptions
            .get(&characteristic)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    fn is_advertising(&self) -> bool {
        self.state.advertising.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl super::Adapter for MockAdapter {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn wait_for_powered_on(&self) -> Result<ManagerState> {
        if self.faults.read().unwrap().powered_off {
            return Err(Error::BluetoothPoweredOff);
        }
        Ok(ManagerState::PoweredOn)
    }

    fn events(&self) -> EventStream {
        Box::pin(BroadcastStream::new(self.events.subscribe()).filter_map(|x| async move { x.ok() }))
    }
}

/// A [`crate::api::Manager`] that always returns a single [`MockAdapter`].
#[derive(Clone, Default)]
pub struct MockManager {
    adapter: MockAdapter,
}

impl MockManager {
    pub fn new(adapter: MockAdapter) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl super::Manager for MockManager {
    type Adapter = MockAdapter;

    async fn adapters(&self) -> Result<Vec<MockAdapter>> {
        Ok(vec![self.adapter.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_fails_then_succeeds_per_faults() {
        let adapter = MockAdapter::new();
        adapter.set_faults(MockFaults {
            fail_connect_attempts: 1,
            ..Default::default()
        });
        let peer = PeerId::random();
        use crate::api::CentralRole;
        assert!(adapter.connect(peer, Duration::from_secs(1)).await.is_err());
        assert!(adapter.connect(peer, Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn write_emits_write_request_event() {
        use crate::api::CentralRole;
        let adapter = MockAdapter::new();
        let characteristic = Uuid::new_v4();
        let mut events = adapter.events();
        adapter
            .write_value(b"hi", characteristic, PeerId::random(), WriteType::WithoutResponse)
            .await
            .unwrap();
        let event = events.next().await.unwrap();
        assert!(matches!(event, AdapterEvent::WriteRequestReceived { .. }));
    }
}
