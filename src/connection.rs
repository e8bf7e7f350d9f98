// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
//! A per-peer connection state machine with quality metrics and
//! backoff-driven automatic reconnection.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, trace, warn};
use rand::Rng;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::api::{Adapter, CentralRole, PeerId};
use crate::error::Error;

const ERROR_RING_CAPACITY: usize = 10;

/// {Disconnected → Connecting → Connected | Failed; Connected →
/// Disconnected; Disconnected/Failed → Reconnecting → Connected | Failed}
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum QualityBucket {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// Link quality metrics for one peer.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionQuality {
    pub rssi: i16,
    pub packet_loss: f64,
    pub latency: Duration,
    pub throughput: f64,
    pub updated_at: Instant,
}

impl Default for ConnectionQuality {
    fn default() -> Self {
        Self {
            rssi: -100,
            packet_loss: 0.0,
            latency: Duration::ZERO,
            throughput: 0.0,
            updated_at: Instant::now(),
        }
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

impl ConnectionQuality {
    /// `mean(rssi_score, 1 - loss, latency_score)`.
    pub fn score(&self) -> f64 {
        let rssi_score = clamp01((self.rssi as f64 + 100.0) / 70.0);
        let loss_score = clamp01(1.0 - self.packet_loss);
        let latency_score = clamp01(1.0 - (self.latency.as_secs_f64() - 0.01) / 0.5);
        (rssi_score + loss_score + latency_score) / 3.0
    }

    pub fn bucket(&self) -> QualityBucket {
        let score = self.score();
        if score >= 0.8 {
            QualityBucket::Excellent
        } else if score >= 0.6 {
            QualityBucket::Good
        } else if score >= 0.4 {
            QualityBucket::Fair
        } else {
            QualityBucket::Poor
        }
    }
}

/// `{ enabled, max-attempts, initial-delay, max-delay, backoff-multiplier,
/// jitter-factor }`.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectionPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

impl ReconnectionPolicy {
    /// `clamp(initial * multiplier^k, 0.1, max) + uniform(-jitter*d,
    /// jitter*d)`. The jittered delay never goes negative.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt).as_secs_f64();
        let jitter = base * self.jitter_factor;
        let offset = rand::rng().random_range(-jitter..=jitter);
        Duration::from_secs_f64((base + offset).max(0.0))
    }

    /// The backoff curve before jitter is applied; exposed separately so
    /// monotonicity can be tested deterministically.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let min = Duration::from_millis(100).as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let raw = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(raw.clamp(min, max))
    }
}

/// A bounded ring of the most recent errors for one peer (last 10).
#[derive(Debug, Default, Clone)]
pub struct ErrorRing {
    entries: VecDeque<String>,
}

impl ErrorRing {
    pub fn push(&mut self, error: impl Into<String>) {
        if self.entries.len() == ERROR_RING_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(error.into());
    }

    pub fn entries(&self) -> impl Iterator<Item = &String> {
        self.entries.iter()
    }
}

/// Per-peer connection bookkeeping, retained across disconnects for
/// reconnection accounting; destroyed only on explicit cleanup.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub state: ConnectionState,
    pub quality: ConnectionQuality,
    pub connected_at: Option<Instant>,
    pub last_seen: Option<Instant>,
    pub reconnect_attempts: u32,
    pub total_reconnects: u32,
    pub errors: ErrorRing,
}

impl Default for ConnectionRecord {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            quality: ConnectionQuality::default(),
            connected_at: None,
            last_seen: None,
            reconnect_attempts: 0,
            total_reconnects: 0,
            errors: ErrorRing::default(),
        }
    }
}

pub type ObserverId = u64;

/// Manages connection state machines for every peer known to one runtime.
/// Observers are notified best-effort, not delivery-guaranteed.
pub struct ConnectionManager<A: Adapter + Clone + 'static> {
    adapter: A,
    records: DashMap<PeerId, ConnectionRecord>,
    policies: DashMap<PeerId, ReconnectionPolicy>,
    default_policy: ReconnectionPolicy,
    reconnect_tasks: DashMap<PeerId, JoinHandle<()>>,
    observers: Mutex<HashMap<ObserverId, broadcast::Sender<(PeerId, ConnectionState)>>>,
    next_observer_id: std::sync::atomic::AtomicU64,
}

impl<A: Adapter + Clone + 'static> ConnectionManager<A> {
    pub fn new(adapter: A, default_policy: ReconnectionPolicy) -> Arc<Self> {
        Arc::new(Self {
            adapter,
            records: DashMap::new(),
            policies: DashMap::new(),
            default_policy,
            reconnect_tasks: DashMap::new(),
            observers: Mutex::new(HashMap::new()),
            next_observer_id: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn record(&self, peer: PeerId) -> ConnectionRecord {
        self.records.entry(peer).or_default().clone()
    }

    pub fn set_policy(&self, peer: PeerId, policy: ReconnectionPolicy) {
        self.policies.insert(peer, policy);
    }

    fn policy_for(&self, peer: PeerId) -> ReconnectionPolicy {
        self.policies
            .get(&peer)
            .map(|p| *p)
            .unwrap_or(self.default_policy)
    }

    fn transition(&self, peer: PeerId, state: ConnectionState) {
        {
            let mut record = self.records.entry(peer).or_default();
            record.state = state;
            match state {
                ConnectionState::Connected => {
                    record.connected_at = Some(Instant::now());
                    record.last_seen = Some(Instant::now());
                    record.reconnect_attempts = 0;
                }
                ConnectionState::Disconnected | ConnectionState::Failed => {
                    record.last_seen = Some(Instant::now());
                }
                _ => {}
            }
        }
        self.notify_observers(peer, state);
    }

    fn notify_observers(&self, peer: PeerId, state: ConnectionState) {
        if let Ok(observers) = self.observers.try_lock() {
            for sender in observers.values() {
                let _ = sender.send((peer, state));
            }
        }
    }

    pub async fn add_observer(self: &Arc<Self>) -> (ObserverId, broadcast::Receiver<(PeerId, ConnectionState)>) {
        let id = self
            .next_observer_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (tx, rx) = broadcast::channel(32);
        self.observers.lock().await.insert(id, tx);
        (id, rx)
    }

    pub async fn remove_observer(&self, id: ObserverId) {
        self.observers.lock().await.remove(&id);
    }

    /// Attempt a fresh connection (not a reconnection). Transitions through
    /// Connecting, to Connected or Failed.
    pub async fn connect(self: &Arc<Self>, peer: PeerId, timeout: Duration) -> Result<(), Error> {
        self.transition(peer, ConnectionState::Connecting);
        match tokio::time::timeout(timeout, self.adapter.connect(peer, timeout)).await {
            Ok(Ok(())) => {
                self.transition(peer, ConnectionState::Connected);
                Ok(())
            }
            Ok(Err(e)) => {
                self.record_error(peer, &e);
                self.on_connection_lost(peer, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                let _ = self.adapter.disconnect(peer).await;
                self.record_error(peer, &Error::ConnectionTimeout);
                self.on_connection_lost(peer, Some("connection timeout".into()));
                Err(Error::ConnectionTimeout)
            }
        }
    }

    fn record_error(&self, peer: PeerId, error: &Error) {
        self.records.entry(peer).or_default().errors.push(error.to_string());
    }

    /// Called when the adapter reports `PeripheralDisconnected` with an
    /// error, or a connect attempt fails. Spawns the reconnection task if
    /// the peer's policy allows it.
    pub fn on_connection_lost(self: &Arc<Self>, peer: PeerId, error: Option<String>) {
        if let Some(error) = &error {
            self.record_error(peer, &Error::ConnectionFailed(error.clone()));
        }
        self.transition(peer, ConnectionState::Disconnected);

        let policy = self.policy_for(peer);
        if !policy.enabled {
            return;
        }
        if self.reconnect_tasks.contains_key(&peer) {
            return;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            this.run_reconnection_loop(peer, policy).await;
        });
        self.reconnect_tasks.insert(peer, handle);
    }

    async fn run_reconnection_loop(self: Arc<Self>, peer: PeerId, policy: ReconnectionPolicy) {
        self.transition(peer, ConnectionState::Reconnecting);
        for attempt in 0..policy.max_attempts {
            {
                let mut record = self.records.entry(peer).or_default();
                record.reconnect_attempts = attempt + 1;
            }
            let delay = policy.delay_for_attempt(attempt);
            trace!("peer {peer} reconnect attempt {attempt} after {delay:?}");
            tokio::time::sleep(delay).await;

            match self.adapter.connect(peer, policy.max_delay).await {
                Ok(()) => {
                    debug!("peer {peer} reconnected on attempt {attempt}");
                    {
                        let mut record = self.records.entry(peer).or_default();
                        record.total_reconnects += 1;
                    }
                    self.transition(peer, ConnectionState::Connected);
                    self.reconnect_tasks.remove(&peer);
                    return;
                }
                Err(e) => {
                    warn!("peer {peer} reconnect attempt {attempt} failed: {e}");
                    self.record_error(peer, &e);
                }
            }
        }
        self.record_error(peer, &Error::MaxReconnectAttemptsReached);
        self.transition(peer, ConnectionState::Failed);
        self.reconnect_tasks.remove(&peer);
    }

    /// Cancelling the reconnection task leaves the connection record in its
    /// current state.
    pub fn cancel_reconnect(&self, peer: PeerId) {
        if let Some((_, handle)) = self.reconnect_tasks.remove(&peer) {
            handle.abort();
        }
    }

    pub async fn disconnect(self: &Arc<Self>, peer: PeerId) -> Result<(), Error> {
        self.cancel_reconnect(peer);
        self.adapter.disconnect(peer).await?;
        self.transition(peer, ConnectionState::Disconnected);
        Ok(())
    }

    pub fn update_quality(&self, peer: PeerId, quality: ConnectionQuality) {
        self.records.entry(peer).or_default().quality = quality;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excellent_quality_scores_high() {
        let q = ConnectionQuality {
            rssi: -40,
            packet_loss: 0.0,
            latency: Duration::from_millis(20),
            throughput: 1.0,
            updated_at: Instant::now(),
        };
        assert!(q.score() >= 0.8);
        assert_eq!(q.bucket(), QualityBucket::Excellent);
    }

    #[test]
    fn poor_quality_scores_low() {
        let q = ConnectionQuality {
            rssi: -95,
            packet_loss: 0.5,
            latency: Duration::from_millis(400),
            throughput: 0.1,
            updated_at: Instant::now(),
        };
        assert!(q.score() <= 0.4);
        assert_eq!(q.bucket(), QualityBucket::Poor);
    }

    #[test]
    fn backoff_is_bounded_and_monotone_until_max() {
        let policy = ReconnectionPolicy {
            enabled: true,
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };
        let mut prev = Duration::ZERO;
        for attempt in 0..10 {
            let d = policy.base_delay_for_attempt(attempt);
            assert!(d.as_secs_f64() >= 0.1 - 1e-9);
            assert!(d <= policy.max_delay);
            assert!(d >= prev);
            prev = d;
        }
    }

    #[test]
    fn error_ring_bounds_at_ten() {
        let mut ring = ErrorRing::default();
        for i in 0..15 {
            ring.push(format!("err-{i}"));
        }
        assert_eq!(ring.entries().count(), ERROR_RING_CAPACITY);
        assert_eq!(ring.entries().next().unwrap(), "err-5");
    }
}
