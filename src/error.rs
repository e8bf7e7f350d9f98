// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
// Error taxonomy for the BLE distributed-actor RPC runtime. One variant per
// failure mode the core can surface, with a recoverability classification
// that callers can use to decide whether to retry, rescan, or reconnect.

use std::fmt;

/// Suggested remediation for a recoverable [`Error`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RecoveryAction {
    /// Retry the same operation.
    Retry,
    /// Re-scan for the peer before retrying.
    Scan,
    /// Re-establish the connection before retrying.
    Reconnect,
}

/// The error type produced by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bluetooth adapter is powered off")]
    BluetoothPoweredOff,

    #[error("bluetooth is unavailable on this device")]
    BluetoothUnavailable,

    #[error("peripheral not found")]
    PeripheralNotFound,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection attempt timed out")]
    ConnectionTimeout,

    #[error("service not found: {0}")]
    ServiceNotFound(uuid::Uuid),

    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(uuid::Uuid),

    #[error("write MTU too small to carry a single fragment")]
    MtuTooSmall,

    #[error("fragmentation failed: {0}")]
    FragmentationFailed(String),

    #[error("reassembly of message {message_id} timed out")]
    ReassemblyTimeout { message_id: u64 },

    #[error("packet version mismatch")]
    VersionMismatch,

    #[error("actor not found: {0}")]
    ActorNotFound(uuid::Uuid),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("method failed: {0}")]
    MethodFailed(String),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("rpc call timed out")]
    RpcTimeout,

    #[error("rpc call failed: {0}")]
    RpcFailed(String),

    #[error("peer disconnected while awaiting response")]
    PeerDisconnected,

    #[error("operation was cancelled")]
    Cancelled,

    #[error("operation not supported by this adapter")]
    OperationNotSupported,

    #[error("adapter error: {0}")]
    AdapterError(String),

    #[error("maximum reconnection attempts reached")]
    MaxReconnectAttemptsReached,
}

impl Error {
    /// Whether the transport layer considers this error worth retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::BluetoothPoweredOff
                | Error::BluetoothUnavailable
                | Error::PeripheralNotFound
                | Error::ConnectionFailed(_)
                | Error::ConnectionTimeout
                | Error::RpcTimeout
                | Error::PeerDisconnected
        )
    }

    /// The suggested remediation for a recoverable error, or `None` if the
    /// error is not recoverable by the transport (e.g. `MethodNotFound`).
    pub fn suggested_action(&self) -> Option<RecoveryAction> {
        match self {
            Error::BluetoothPoweredOff | Error::BluetoothUnavailable => {
                Some(RecoveryAction::Retry)
            }
            Error::PeripheralNotFound => Some(RecoveryAction::Scan),
            Error::ConnectionFailed(_) | Error::ConnectionTimeout => {
                Some(RecoveryAction::Reconnect)
            }
            Error::RpcTimeout => Some(RecoveryAction::Retry),
            Error::PeerDisconnected => Some(RecoveryAction::Reconnect),
            _ => None,
        }
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryAction::Retry => write!(f, "retry"),
            RecoveryAction::Scan => write!(f, "scan"),
            RecoveryAction::Reconnect => write!(f, "reconnect"),
        }
    }
}

/// The crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_errors_carry_a_suggested_action() {
        for err in [
            Error::BluetoothPoweredOff,
            Error::PeripheralNotFound,
            Error::ConnectionTimeout,
            Error::RpcTimeout,
            Error::PeerDisconnected,
        ] {
            assert!(err.is_recoverable());
            assert!(err.suggested_action().is_some());
        }
    }

    #[test]
    fn unrecoverable_errors_have_no_suggested_action() {
        for err in [
            Error::MethodNotFound("ping".into()),
            Error::ActorNotFound(uuid::Uuid::nil()),
            Error::VersionMismatch,
            Error::InvalidEnvelope("bad".into()),
        ] {
            assert!(!err.is_recoverable());
            assert!(err.suggested_action().is_none());
        }
    }
}
