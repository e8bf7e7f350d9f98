// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
//! Re-exports of the short-UUID helpers from [`crate::uuid`], kept at this
//! path for parity with the ambient BLE-UUID ergonomics this crate ships
//! alongside its own deterministic derivation.

pub use crate::uuid::{uuid_from_u16, uuid_from_u32, BleUuid};
