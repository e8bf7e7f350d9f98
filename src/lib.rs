// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
//! bleu turns paired Bluetooth Low Energy devices into a distributed-actor
//! RPC fabric: an actor hosted on one peer is reachable from another as if
//! it were local, addressed by a deterministically-derived service and
//! characteristic UUID rather than a hand-assigned one.
//!
//! The crate is organized around the same seams a real GATT stack has:
//!
//! - [`api`] the abstract BLE adapter interface; a real host stack,
//!   [`api::mock`] and [`api::emulator`] all implement it.
//! - [`transport`] MTU-aware fragmentation and reassembly.
//! - [`uuid`] deterministic service/characteristic UUID derivation.
//! - [`registry`] method dispatch tables and local/remote actor
//!   bookkeeping.
//! - [`bridge`] per-runtime event dispatch and call correlation.
//! - [`connection`] connection state machine and reconnection.
//! - [`runtime`] [`runtime::ActorSystem`], the entry point tying the
//!   rest together.

pub mod api;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod runtime;
pub mod transport;
pub mod uuid;

pub use config::RuntimeConfig;
pub use error::{Error, Result};
pub use runtime::ActorSystem;
