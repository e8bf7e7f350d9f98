// bleu Source Code File
//
// Copyright 2026 Bleu Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project
// root for full license information.
//
//! Maps `(actor-id, method-name)` to an invocation handler. The runtime
//! cannot serialize the host language's reflective call target across a
//! BLE boundary, so handlers are registered by mangled name at
//! actor-construction time by whatever code owns the actor.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::api::ActorId;
use crate::error::{Error, Result};

/// An invocation handler: decodes `arguments`, runs the method, and
/// encodes the result. Failures surface as `Error::MethodFailed`.
pub type Handler = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>> + Send + Sync>;

#[derive(Default)]
struct ActorMethods {
    methods: DashMap<String, Handler>,
}

/// Registration and lookup are serialized per actor-id by `DashMap`'s
/// internal sharding; execution of two different methods on two different
/// actors may run concurrently, but two calls to the same actor are
/// serialized by the handler's own closure state if it needs to be.
#[derive(Default)]
pub struct MethodRegistry {
    actors: DashMap<ActorId, ActorMethods>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, actor: ActorId, method: impl Into<String>, handler: Handler) {
        self.actors
            .entry(actor)
            .or_default()
            .methods
            .insert(method.into(), handler);
    }

    pub fn unregister(&self, actor: ActorId) {
        self.actors.remove(&actor);
    }

    pub fn has(&self, actor: ActorId, method: &str) -> bool {
        self.actors
            .get(&actor)
            .map(|a| a.methods.contains_key(method))
            .unwrap_or(false)
    }

    pub fn methods(&self, actor: ActorId) -> HashSet<String> {
        self.actors
            .get(&actor)
            .map(|a| a.methods.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default()
    }

    pub fn execute(&self, actor: ActorId, method: &str, arguments: &[u8]) -> Result<Vec<u8>> {
        let actor_methods = self
            .actors
            .get(&actor)
            .ok_or(Error::ActorNotFound(actor.0))?;
        let handler = actor_methods
            .methods
            .get(method)
            .ok_or_else(|| Error::MethodNotFound(method.to_string()))?
            .clone();
        drop(actor_methods);
        handler(arguments).map_err(|e| match e {
            Error::MethodFailed(_) => e,
            other => Error::MethodFailed(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_execute() {
        let registry = MethodRegistry::new();
        let actor = ActorId::random();
        registry.register(actor, "ping", Arc::new(|_args| Ok(b"pong".to_vec())));

        assert!(registry.has(actor, "ping"));
        let result = registry.execute(actor, "ping", b"").unwrap();
        assert_eq!(result, b"pong");
    }

    #[test]
    fn execute_unknown_actor_is_actor_not_found() {
        let registry = MethodRegistry::new();
        let err = registry.execute(ActorId::random(), "ping", b"").unwrap_err();
        assert!(matches!(err, Error::ActorNotFound(_)));
    }

    #[test]
    fn execute_unknown_method_is_method_not_found() {
        let registry = MethodRegistry::new();
        let actor = ActorId::random();
        registry.register(actor, "ping", Arc::new(|_| Ok(vec![])));
        let err = registry.execute(actor, "pong", b"").unwrap_err();
        assert!(matches!(err, Error::MethodNotFound(_)));
    }

    #[test]
    fn handler_failure_wraps_as_method_failed() {
        let registry = MethodRegistry::new();
        let actor = ActorId::random();
        registry.register(
            actor,
            "boom",
            Arc::new(|_| Err(Error::MethodFailed("kaboom".into()))),
        );
        let err = registry.execute(actor, "boom", b"").unwrap_err();
        assert!(matches!(err, Error::MethodFailed(msg) if msg == "kaboom"));
    }

    #[test]
    fn unregister_removes_all_methods() {
        let registry = MethodRegistry::new();
        let actor = ActorId::random();
        registry.register(actor, "ping", Arc::new(|_| Ok(vec![])));
        registry.unregister(actor);
        assert!(!registry.has(actor, "ping"));
        assert!(registry.methods(actor).is_empty());
    }
}
