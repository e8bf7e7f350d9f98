// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
//! Method dispatch and instance tracking registries.

pub mod instance;
pub mod method;

pub use instance::InstanceRegistry;
pub use method::{Handler, MethodRegistry};
