// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
// Deterministic service/characteristic UUID derivation. Any two peers that
// compute a UUID for the same (type, method) pair must agree, so this
// module is pure and holds no runtime state.

use uuid::Uuid;

/// The namespace all bleu UUIDs are derived under, analogous to the standard
/// DNS/URL/OID namespaces in RFC 4122 but private to this protocol.
pub const BLEU_NAMESPACE: Uuid = Uuid::from_u128(0x4242_1000_beef_5000_8000_00805f9b34fb);

/// Name-based (UUIDv5-equivalent) derivation: a 128-bit UUID that is a pure
/// function of `(namespace, name)`. Two callers computing `deterministic`
/// for the same inputs always get the same UUID.
pub fn deterministic(name: &str, namespace: Uuid) -> Uuid {
    Uuid::new_v5(&namespace, name.as_bytes())
}

/// The service UUID for a distributed-actor type `T`, named by its Rust type
/// name (or any stable string identifier the application chooses).
pub fn service_uuid(type_name: &str) -> Uuid {
    deterministic(&format!("{type_name}.BLEService"), BLEU_NAMESPACE)
}

/// The characteristic UUID for method `m` of type `T`, scoped under that
/// type's service UUID so that two types can reuse a method name without
/// colliding.
pub fn characteristic_uuid(type_name: &str, method_name: &str) -> Uuid {
    let service = service_uuid(type_name);
    deterministic(&format!("{type_name}.{method_name}"), service)
}

/// Convert a 32-bit BLE short UUID to a full 128-bit UUID by filling in the
/// standard Bluetooth Base UUID. Kept alongside the protocol's own
/// derivation because real GATT servers still advertise standard 16/32-bit
/// UUIDs (battery service, device information, ...) that a peer may need to
/// recognize on the wire.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;
const BLUETOOTH_BASE_MASK: u128 = 0x0000_0000_ffff_ffff_ffff_ffffffffffff;
const BLUETOOTH_BASE_MASK_16: u128 = 0xffff_0000_ffff_ffff_ffff_ffffffffffff;

pub const fn uuid_from_u32(short: u32) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

pub const fn uuid_from_u16(short: u16) -> Uuid {
    uuid_from_u32(short as u32)
}

/// An extension trait for `Uuid` which provides BLE-specific methods.
pub trait BleUuid {
    fn to_ble_u32(&self) -> Option<u32>;
    fn to_ble_u16(&self) -> Option<u16>;
    fn to_short_string(&self) -> String;
}

impl BleUuid for Uuid {
    fn to_ble_u32(&self) -> Option<u32> {
        let value = self.as_u128();
        if value & BLUETOOTH_BASE_MASK == BLUETOOTH_BASE_UUID {
            Some((value >> 96) as u32)
        } else {
            None
        }
    }

    fn to_ble_u16(&self) -> Option<u16> {
        let value = self.as_u128();
        if value & BLUETOOTH_BASE_MASK_16 == BLUETOOTH_BASE_UUID {
            Some((value >> 96) as u16)
        } else {
            None
        }
    }

    fn to_short_string(&self) -> String {
        if let Some(uuid16) = self.to_ble_u16() {
            format!("{:#04x}", uuid16)
        } else if let Some(uuid32) = self.to_ble_u32() {
            format!("{:#06x}", uuid32)
        } else {
            self.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_is_pure() {
        let a = deterministic("Foo.ping", BLEU_NAMESPACE);
        let b = deterministic("Foo.ping", BLEU_NAMESPACE);
        assert_eq!(a, b);
    }

    #[test]
    fn deterministic_has_v5_version_and_variant() {
        let id = deterministic("Foo.ping", BLEU_NAMESPACE);
        assert_eq!(id.get_version_num(), 5);
        let bytes = id.as_bytes();
        assert_eq!(bytes[8] & 0xc0, 0x80);
    }

    #[test]
    fn characteristic_uuid_is_function_of_type_and_method() {
        let a = characteristic_uuid("Counter", "increment");
        let b = characteristic_uuid("Counter", "increment");
        let c = characteristic_uuid("Counter", "decrement");
        let d = characteristic_uuid("Timer", "increment");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn two_peers_agree() {
        // Simulates two independent peers deriving the same UUIDs offline.
        let peer1 = characteristic_uuid("Light", "setBrightness");
        let peer2 = characteristic_uuid("Light", "setBrightness");
        assert_eq!(peer1, peer2);
    }

    #[test]
    fn uuid_from_u16_matches_base() {
        assert_eq!(
            uuid_from_u16(0x1122),
            Uuid::parse_str("00001122-0000-1000-8000-00805f9b34fb").unwrap()
        );
    }

    #[test]
    fn short_string_round_trips() {
        let uuid = uuid_from_u16(0x1234);
        assert_eq!(uuid.to_short_string(), "0x1234");
    }
}
