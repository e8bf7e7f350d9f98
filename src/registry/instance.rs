// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
//! Tracks locally-hosted actors and remote proxies for one runtime. This
//! registry is the single source of truth for "is this actor-id served
//! here?"; the runtime consults it to decide between local dispatch and a
//! remote call.

use std::any::Any;
use std::sync::{Arc, Weak};

use dashmap::DashMap;

use crate::api::ActorId;

/// Local actors are held by strong reference: the registry (and therefore
/// the runtime) keeps them alive until explicitly unregistered or the
/// runtime shuts down.
#[derive(Default)]
pub struct InstanceRegistry {
    local: DashMap<ActorId, Arc<dyn Any + Send + Sync>>,
    /// Remote proxies are held by weak reference only: a proxy owns
    /// nothing and must not prolong the runtime's lifetime.
    remote: DashMap<ActorId, Weak<dyn Any + Send + Sync>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_local<T: Any + Send + Sync>(&self, actor_id: ActorId, actor: Arc<T>) {
        self.local.insert(actor_id, actor as Arc<dyn Any + Send + Sync>);
    }

    pub fn register_remote<T: Any + Send + Sync>(&self, actor_id: ActorId, proxy: &Arc<T>) {
        let weak: Weak<dyn Any + Send + Sync> = Arc::downgrade(proxy) as Weak<dyn Any + Send + Sync>;
        self.remote.insert(actor_id, weak);
    }

    /// Is this actor-id hosted locally by this runtime? The runtime uses
    /// this to route an incoming write to `handle_incoming_rpc` versus a
    /// proxy call to `remote_call`.
    pub fn is_local(&self, actor_id: ActorId) -> bool {
        self.local.contains_key(&actor_id)
    }

    pub fn get_local<T: Any + Send + Sync>(&self, actor_id: ActorId) -> Option<Arc<T>> {
        self.local
            .get(&actor_id)
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    pub fn get_remote<T: Any + Send + Sync>(&self, actor_id: ActorId) -> Option<Arc<T>> {
        self.remote
            .get(&actor_id)
            .and_then(|entry| entry.upgrade())
            .and_then(|arc| arc.downcast::<T>().ok())
    }

    pub fn unregister(&self, actor_id: ActorId) {
        self.local.remove(&actor_id);
        self.remote.remove(&actor_id);
    }

    pub fn local_actor_ids(&self) -> Vec<ActorId> {
        self.local.iter().map(|e| *e.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(std::sync::atomic::AtomicU32);

    #[test]
    fn register_and_fetch_local() {
        let registry = InstanceRegistry::new();
        let actor_id = ActorId::random();
        let actor = Arc::new(Counter(std::sync::atomic::AtomicU32::new(0)));
        registry.register_local(actor_id, actor.clone());

        assert!(registry.is_local(actor_id));
        let fetched = registry.get_local::<Counter>(actor_id).unwrap();
        assert!(Arc::ptr_eq(&fetched, &actor));
    }

    #[test]
    fn remote_proxy_does_not_prolong_lifetime() {
        let registry = InstanceRegistry::new();
        let actor_id = ActorId::random();
        {
            let proxy = Arc::new(Counter(std::sync::atomic::AtomicU32::new(0)));
            registry.register_remote(actor_id, &proxy);
            assert!(registry.get_remote::<Counter>(actor_id).is_some());
        }
        // proxy dropped: weak reference can no longer upgrade
        assert!(registry.get_remote::<Counter>(actor_id).is_none());
    }

    #[test]
    fn unregister_clears_both_maps() {
        let registry = InstanceRegistry::new();
        let actor_id = ActorId::random();
        let actor = Arc::new(Counter(std::sync::atomic::AtomicU32::new(0)));
        registry.register_local(actor_id, actor);
        registry.unregister(actor_id);
        assert!(!registry.is_local(actor_id));
    }

    #[test]
    fn unknown_actor_is_not_local() {
        let registry = InstanceRegistry::new();
        assert!(!registry.is_local(ActorId::random()));
    }
}
