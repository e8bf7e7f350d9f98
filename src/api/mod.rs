// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
//! The `api` module contains the traits and types that make up bleu's
//! abstract BLE adapter interface. The core never depends on a concrete BLE
//! host: [`CentralRole`] and [`PeripheralRole`] are implemented once per
//! backend, and the real host stack, the [`mock`](crate::api::mock)
//! adapter, and the [`emulator`](crate::api::emulator) adapter are
//! interchangeable behind them.

pub mod bleuuid;
pub mod emulator;
pub mod mock;

use std::{
    collections::BTreeSet,
    fmt::{self, Debug, Display, Formatter},
    pin::Pin,
    time::Duration,
};

use async_trait::async_trait;
use bitflags::bitflags;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// A 128-bit identifier naming a remote device; stable across reconnects.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct PeerId(pub Uuid);

impl PeerId {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Sentinel identifier used where the peripheral role cannot expose a
    /// real central identifier to the adapter. Never returned for a
    /// connection the core itself tracks.
    pub fn unknown() -> Self {
        Self(Uuid::nil())
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 128-bit identifier naming a specific remote (or local) object instance.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ActorId(pub Uuid);

impl ActorId {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

bitflags! {
    /// A set of properties that indicate what operations are supported by a
    /// characteristic.
    #[derive(Default)]
    pub struct CharPropFlags: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

impl CharPropFlags {
    /// A characteristic is RPC-capable iff it declares both a write
    /// capability (to receive invocations) and NOTIFY (to deliver
    /// responses).
    pub fn is_rpc_capable(&self) -> bool {
        let has_write = self.intersects(Self::WRITE | Self::WRITE_WITHOUT_RESPONSE);
        has_write && self.contains(Self::NOTIFY)
    }
}

/// Metadata describing one GATT characteristic, as declared locally when
/// hosting a service or discovered remotely when connecting to one.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct CharacteristicMetadata {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub properties: CharPropFlags,
}

impl Display for CharacteristicMetadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uuid: {}, properties: {:?}, rpc-capable: {}",
            self.uuid,
            self.properties,
            self.properties.is_rpc_capable()
        )
    }
}

/// Metadata describing one GATT service and its characteristics.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct ServiceMetadata {
    pub uuid: Uuid,
    pub primary: bool,
    pub characteristics: BTreeSet<CharacteristicMetadata>,
}

/// Advertisement data a peripheral broadcasts while advertising.
#[derive(Debug, Clone, Default)]
pub struct AdvertisementData {
    pub local_name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    pub manufacturer_data: Option<Vec<u8>>,
    pub service_data: std::collections::HashMap<Uuid, Vec<u8>>,
    pub tx_power_level: Option<i16>,
}

/// A peripheral discovered during a central-role scan.
#[derive(Debug, Clone)]
pub struct DiscoveredPeripheral {
    pub peer_id: PeerId,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    pub service_uuids: Vec<Uuid>,
}

/// The power/availability state of the local Bluetooth manager.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ManagerState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

/// The type of write operation to use.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum WriteType {
    /// A write the peer is expected to acknowledge.
    WithResponse,
    /// A write-without-response (a command).
    WithoutResponse,
}

/// A single event out of the adapter's event stream. Both the central and
/// peripheral role multiplex onto the same variant set so the core's event
/// bridge only has to marshal one stream per adapter.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    StateChanged(ManagerState),
    PeripheralDiscovered(DiscoveredPeripheral),
    PeripheralConnected(PeerId),
    PeripheralDisconnected {
        peer: PeerId,
        error: Option<String>,
    },
    ServiceDiscovered {
        peer: PeerId,
        service: ServiceMetadata,
    },
    CharacteristicDiscovered {
        peer: PeerId,
        characteristic: CharacteristicMetadata,
    },
    CharacteristicValueUpdated {
        peer: PeerId,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
        error: Option<String>,
    },
    CharacteristicWriteCompleted {
        peer: PeerId,
        characteristic: Uuid,
        error: Option<String>,
    },
    NotificationStateChanged {
        peer: PeerId,
        characteristic: Uuid,
        enabled: bool,
    },
    ReadRequestReceived {
        central: PeerId,
        characteristic: Uuid,
    },
    WriteRequestReceived {
        central: PeerId,
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    CentralSubscribed {
        central: PeerId,
        characteristic: Uuid,
    },
    CentralUnsubscribed {
        central: PeerId,
        characteristic: Uuid,
    },
    AdvertisingStarted {
        error: Option<String>,
    },
}

pub type EventStream = Pin<Box<dyn Stream<Item = AdapterEvent> + Send>>;

/// The peripheral role: advertises services and responds to central writes.
#[async_trait]
pub trait PeripheralRole: Send + Sync {
    async fn add_service(&self, service: ServiceMetadata) -> Result<()>;
    async fn start_advertising(&self, data: AdvertisementData) -> Result<()>;
    async fn stop_advertising(&self) -> Result<()>;
    async fn update_value(
        &self,
        data: &[u8],
        characteristic: Uuid,
        centrals: Option<&[PeerId]>,
    ) -> Result<bool>;
    async fn subscribed_centrals(&self, characteristic: Uuid) -> Result<Vec<PeerId>>;
    fn is_advertising(&self) -> bool;
}

/// The central role: scans, connects, and performs GATT operations.
#[async_trait]
pub trait CentralRole: Send + Sync {
    async fn scan(
        &self,
        service_uuids: &[Uuid],
        timeout: Duration,
    ) -> Result<Pin<Box<dyn Stream<Item = DiscoveredPeripheral> + Send>>>;
    async fn stop_scan(&self) -> Result<()>;
    async fn connect(&self, peer: PeerId, timeout: Duration) -> Result<()>;
    async fn disconnect(&self, peer: PeerId) -> Result<()>;
    async fn is_connected(&self, peer: PeerId) -> Result<bool>;
    async fn discover_services(
        &self,
        peer: PeerId,
        uuids: Option<&[Uuid]>,
    ) -> Result<Vec<ServiceMetadata>>;
    async fn discover_characteristics(
        &self,
        service: Uuid,
        peer: PeerId,
        uuids: Option<&[Uuid]>,
    ) -> Result<Vec<CharacteristicMetadata>>;
    async fn read_value(&self, characteristic: Uuid, peer: PeerId) -> Result<Vec<u8>>;
    async fn write_value(
        &self,
        data: &[u8],
        characteristic: Uuid,
        peer: PeerId,
        write_type: WriteType,
    ) -> Result<()>;
    async fn set_notify(&self, enabled: bool, characteristic: Uuid, peer: PeerId) -> Result<()>;
    async fn maximum_write_length(&self, peer: PeerId, write_type: WriteType) -> Result<Option<usize>>;
}

/// A single BLE adapter combining both roles behind one lazy, restartable
/// event stream, unified because the core never holds two separate host
/// connections to the same radio.
#[async_trait]
pub trait Adapter: PeripheralRole + CentralRole {
    async fn initialize(&self) -> Result<()>;
    async fn wait_for_powered_on(&self) -> Result<ManagerState>;
    fn events(&self) -> EventStream;
}

/// The entry point to an adapter backend, analogous to `btleplug`'s
/// `Manager` trait: it enumerates the adapters available on the host.
#[async_trait]
pub trait Manager: Send + Sync {
    type Adapter: self::Adapter + Clone + 'static;

    async fn adapters(&self) -> Result<Vec<Self::Adapter>>;
}
