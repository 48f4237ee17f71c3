//! Full pipeline: two engines converging over the secure channel.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use dicemesh::{IdentityManager, MemorySecretStore, MemoryStore, SyncEngine};
use dicemesh_channel::{ChannelConfig, ChannelIdentity, SecureChannel};
use dicemesh_sync::{run_round, ChannelLink};

async fn engine(name: &str) -> SyncEngine<MemoryStore> {
    let secrets = MemorySecretStore::new();
    let identity = IdentityManager::initialize(&secrets, Some(name)).await.unwrap();
    let engine = SyncEngine::new(MemoryStore::new(), identity, CancellationToken::new());
    engine.initialize().await.unwrap();
    engine
}

fn channel_identity(engine: &SyncEngine<MemoryStore>) -> ChannelIdentity {
    let manager = engine.identity_manager();
    ChannelIdentity {
        keypair: manager.keypair().clone(),
        agreement: manager.agreement_secret(),
        device_name: manager.device_name().to_string(),
    }
}

#[tokio::test]
async fn test_engines_converge_over_secure_channel() {
    let alice = engine("alice").await;
    let bob = engine("bob").await;

    alice.append_chat_message(1, "the dragon stirs", None).await.unwrap();
    alice
        .append_dice_roll(1, 1, 20, 2, dicemesh::DiceMode::Normal)
        .await
        .unwrap();
    bob.append_chat_message(1, "ready my bow", None).await.unwrap();

    let (client, server) = tokio::io::duplex(256 * 1024);
    let alice_id = channel_identity(&alice);
    let bob_id = channel_identity(&bob);

    let accept = tokio::spawn(async move {
        SecureChannel::accept(
            server,
            &bob_id,
            ChannelConfig::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap()
    });
    let (alice_channel, mut alice_events) = SecureChannel::connect(
        client,
        &alice_id,
        ChannelConfig::default(),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    let (bob_channel, mut bob_events) = accept.await.unwrap();

    // The channel authenticated both identities.
    assert_eq!(alice_channel.peer().peer_id, bob.identity().peer_id);
    assert_eq!(bob_channel.peer().peer_id, alice.identity().peer_id);

    let timeout = Duration::from_secs(5);
    let (alice_report, bob_report) = tokio::join!(
        async {
            let mut link = ChannelLink::new(&alice_channel, &mut alice_events);
            run_round(&alice, &mut link, 1, timeout).await.unwrap()
        },
        async {
            let mut link = ChannelLink::new(&bob_channel, &mut bob_events);
            run_round(&bob, &mut link, 1, timeout).await.unwrap()
        },
    );

    assert_eq!(alice_report.sent, 2);
    assert_eq!(alice_report.imported, 1);
    assert_eq!(bob_report.sent, 1);
    assert_eq!(bob_report.imported, 2);

    let alice_state = alice.get_session_state(1).await.unwrap();
    let bob_state = bob.get_session_state(1).await.unwrap();
    assert_eq!(alice_state, bob_state);
    assert_eq!(alice_state.chat.len(), 2);
    assert_eq!(alice_state.dice_history.len(), 1);
    assert!(alice_state.dice_history[0].signature_valid);

    alice_channel.close().await.unwrap();
}
