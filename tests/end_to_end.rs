//! End-to-end scenarios driven through the public `ActorSystem` API over
//! the in-process emulator, exercising discovery, connection, multi-fragment
//! round trips, and MTU-too-small rejection.

use std::sync::Arc;
use std::time::Duration;

use bleu::api::emulator::EmulatorHub;
use bleu::api::{AdvertisementData, PeerId};
use bleu::error::Error;
use bleu::registry::Handler;
use bleu::runtime::singleton_actor_id;
use bleu::{ActorSystem, RuntimeConfig};

#[tokio::test]
async fn minimal_call_discovers_connects_and_round_trips() {
    let _ = pretty_env_logger::try_init();
    let hub = EmulatorHub::new();
    let server_peer = PeerId::random();
    let server = ActorSystem::new(hub.adapter(server_peer), RuntimeConfig::default())
        .await
        .unwrap();

    server
        .start_advertising(
            Arc::new(()),
            singleton_actor_id("Greeter"),
            "Greeter",
            vec![("ping", Arc::new(|_args: &[u8]| Ok(b"pong".to_vec())) as Handler)],
            AdvertisementData::default(),
        )
        .await
        .unwrap();

    let client = ActorSystem::new(hub.adapter(PeerId::random()), RuntimeConfig::default())
        .await
        .unwrap();

    let found = client.discover("Greeter", Duration::from_secs(1)).await.unwrap();
    assert_eq!(found.len(), 1);

    let proxy = client.connect(server_peer, "Greeter").await.unwrap();
    let result = client.remote_call(&proxy, "ping", Vec::new()).await.unwrap();
    assert_eq!(result, b"pong");
}

#[tokio::test]
async fn large_payload_fragments_and_reassembles_both_directions() -> anyhow::Result<()> {
    let hub = EmulatorHub::new();
    let server_peer = PeerId::random();
    let server = ActorSystem::new(hub.adapter(server_peer), RuntimeConfig::default()).await?;

    server
        .start_advertising(
            Arc::new(()),
            singleton_actor_id("Echo"),
            "Echo",
            vec![(
                "echo",
                Arc::new(|args: &[u8]| Ok(args.to_vec())) as Handler,
            )],
            AdvertisementData::default(),
        )
        .await?;

    let client = ActorSystem::new(hub.adapter(PeerId::random()), RuntimeConfig::default()).await?;
    let proxy = client.connect(server_peer, "Echo").await?;

    // The emulator's default negotiated MTU is 185 bytes, giving ~161 bytes
    // of payload per fragment; this payload needs more than ten fragments
    // in each direction.
    let payload = vec![0x5Au8; 2000];
    let result = client.remote_call(&proxy, "echo", payload.clone()).await?;
    assert_eq!(result, payload);
    Ok(())
}

#[tokio::test]
async fn mtu_too_small_rejects_any_non_empty_call() {
    let hub = EmulatorHub::new();
    let server_peer = PeerId::random();
    let server = ActorSystem::new(hub.adapter(server_peer), RuntimeConfig::default())
        .await
        .unwrap();
    server
        .start_advertising(
            Arc::new(()),
            singleton_actor_id("Greeter"),
            "Greeter",
            vec![("ping", Arc::new(|_args: &[u8]| Ok(b"pong".to_vec())) as Handler)],
            AdvertisementData::default(),
        )
        .await
        .unwrap();

    let client = ActorSystem::new(hub.adapter(PeerId::random()), RuntimeConfig::default())
        .await
        .unwrap();
    let proxy = client.connect(server_peer, "Greeter").await.unwrap();

    // Force the negotiated MTU down below the header size (24 bytes; 20
    // leaves no room for any payload).
    client.transport().set_max_write_length(server_peer, 20);

    let result = client.remote_call(&proxy, "ping", b"x".to_vec()).await;
    assert!(matches!(result, Err(Error::MtuTooSmall)));
}
