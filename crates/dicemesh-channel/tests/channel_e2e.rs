//! End-to-end channel tests over an in-memory duplex pipe.
//!
//! One set drives both ends through the public API; another plays a
//! hand-rolled responder so that replayed and tampered frames can be
//! injected below the channel's own send path.

use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dicemesh_channel::{
    derive_session_keys, read_frame, verify_payload, write_frame, ChannelConfig, ChannelEvent,
    ChannelError, ChannelIdentity, FrameCode, HandshakePayload, Role, SecureChannel,
    SecurityReason, SessionKeys,
};
use dicemesh_core::{AgreementSecret, EphemeralAgreement, IdentityKeypair};

const TAG_LEN: usize = 16;

fn identity(seed: u8) -> ChannelIdentity {
    ChannelIdentity {
        keypair: IdentityKeypair::from_seed(&[seed; 32]),
        agreement: AgreementSecret::from_bytes([seed.wrapping_add(100); 32]),
        device_name: format!("device-{seed}"),
    }
}

fn config() -> ChannelConfig {
    ChannelConfig {
        ack_timeout: Duration::from_millis(500),
        ..ChannelConfig::default()
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for channel event")
        .expect("event stream closed")
}

#[tokio::test]
async fn test_connect_accept_and_exchange() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let alice = identity(1);
    let bob = identity(2);

    let accept_task = tokio::spawn(async move {
        SecureChannel::accept(server, &bob, config(), CancellationToken::new())
            .await
            .unwrap()
    });
    let (alice_channel, mut alice_events) =
        SecureChannel::connect(client, &alice, config(), CancellationToken::new())
            .await
            .unwrap();
    let (bob_channel, mut bob_events) = accept_task.await.unwrap();

    assert_eq!(alice_channel.session_id(), bob_channel.session_id());
    assert_eq!(alice_channel.peer().peer_id, identity(2).peer_id());
    assert_eq!(bob_channel.peer().peer_id, identity(1).peer_id());

    // Both directions deliver, and sends resolve on ack.
    alice_channel.send(b"goblins attack").await.unwrap();
    match next_event(&mut bob_events).await {
        ChannelEvent::Message(bytes) => assert_eq!(bytes.as_ref(), b"goblins attack"),
        other => panic!("expected message, got {other:?}"),
    }

    bob_channel.send(b"roll initiative").await.unwrap();
    match next_event(&mut alice_events).await {
        ChannelEvent::Message(bytes) => assert_eq!(bytes.as_ref(), b"roll initiative"),
        other => panic!("expected message, got {other:?}"),
    }

    // Close tells the peer.
    alice_channel.close().await.unwrap();
    match next_event(&mut bob_events).await {
        ChannelEvent::PeerDisconnected(peer) => assert_eq!(peer, identity(1).peer_id()),
        other => panic!("expected disconnect, got {other:?}"),
    }
}

/// A hand-driven responder that completes the handshake and exposes the
/// raw pipe plus the derived keys.
struct ManualResponder<S> {
    read_half: tokio::io::ReadHalf<S>,
    write_half: tokio::io::WriteHalf<S>,
    keys: SessionKeys,
    session_id: uuid::Uuid,
}

async fn manual_accept<S>(stream: S, me: &ChannelIdentity) -> ManualResponder<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    let frame = read_frame(&mut read_half).await.unwrap();
    assert_eq!(frame.code().unwrap(), FrameCode::HandshakeHello);
    let hello_bytes = frame.payload.to_vec();
    let hello = HandshakePayload::from_bytes(&hello_bytes).unwrap();
    let peer = verify_payload(&hello, None).unwrap();

    let ephemeral = EphemeralAgreement::generate();
    let ack = HandshakePayload::build(me, hello.session_id, &ephemeral.public_key());
    let ack_bytes = ack.to_bytes().unwrap();
    write_frame(&mut write_half, FrameCode::HandshakeAck, &ack_bytes)
        .await
        .unwrap();

    let keys = derive_session_keys(
        Role::Responder,
        ephemeral,
        &me.agreement,
        &peer.ephemeral_key,
        &peer.key_exchange_key,
        &hello_bytes,
        &ack_bytes,
    );

    ManualResponder {
        read_half,
        write_half,
        keys,
        session_id: hello.session_id,
    }
}

/// Build a Data frame payload by hand: `seq || nonce || cipher_len || ct || tag`.
fn make_data_payload(
    keys: &SessionKeys,
    session_id: &uuid::Uuid,
    seq: u64,
    plaintext: &[u8],
) -> Vec<u8> {
    let cipher = Aes256Gcm::new_from_slice(keys.send_key.as_ref()).unwrap();
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(&[9, 9, 9, 9]);
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: session_id.as_bytes(),
            },
        )
        .unwrap();

    let mut payload = Vec::new();
    payload.extend_from_slice(&seq.to_be_bytes());
    payload.extend_from_slice(&nonce);
    payload.extend_from_slice(&((ciphertext.len() - TAG_LEN) as u32).to_be_bytes());
    payload.extend_from_slice(&ciphertext);
    payload
}

#[tokio::test]
async fn test_replay_and_tamper_rejected() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let alice = identity(1);
    let bob = identity(2);

    let connect_task = tokio::spawn(async move {
        SecureChannel::connect(client, &alice, config(), CancellationToken::new())
            .await
            .unwrap()
    });
    let mut responder = manual_accept(server, &bob).await;
    let (_alice_channel, mut alice_events) = connect_task.await.unwrap();

    // A valid frame is delivered and acked.
    let payload = make_data_payload(&responder.keys, &responder.session_id, 1, b"legit");
    write_frame(&mut responder.write_half, FrameCode::Data, &payload)
        .await
        .unwrap();
    match next_event(&mut alice_events).await {
        ChannelEvent::Message(bytes) => assert_eq!(bytes.as_ref(), b"legit"),
        other => panic!("expected message, got {other:?}"),
    }
    let ack = read_frame(&mut responder.read_half).await.unwrap();
    assert_eq!(ack.code().unwrap(), FrameCode::Ack);
    assert_eq!(ack.payload.as_ref(), &1u64.to_be_bytes()[..]);

    // The byte-identical frame again: replay.
    write_frame(&mut responder.write_half, FrameCode::Data, &payload)
        .await
        .unwrap();
    match next_event(&mut alice_events).await {
        ChannelEvent::Security { reason, .. } => {
            assert_eq!(reason, SecurityReason::ReplayDetected)
        }
        other => panic!("expected replay event, got {other:?}"),
    }

    // A tampered ciphertext: AEAD failure.
    let mut tampered = make_data_payload(&responder.keys, &responder.session_id, 2, b"evil");
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    write_frame(&mut responder.write_half, FrameCode::Data, &tampered)
        .await
        .unwrap();
    match next_event(&mut alice_events).await {
        ChannelEvent::Security { reason, .. } => {
            assert_eq!(reason, SecurityReason::CryptographicFailure)
        }
        other => panic!("expected crypto failure event, got {other:?}"),
    }

    // The channel survives all of it: the next valid frame still lands.
    let payload = make_data_payload(&responder.keys, &responder.session_id, 3, b"still here");
    write_frame(&mut responder.write_half, FrameCode::Data, &payload)
        .await
        .unwrap();
    match next_event(&mut alice_events).await {
        ChannelEvent::Message(bytes) => assert_eq!(bytes.as_ref(), b"still here"),
        other => panic!("expected message, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_frame_emits_security_event() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let alice = identity(1);
    let bob = identity(2);

    let connect_task = tokio::spawn(async move {
        SecureChannel::connect(client, &alice, config(), CancellationToken::new())
            .await
            .unwrap()
    });
    let mut responder = manual_accept(server, &bob).await;
    let (_alice_channel, mut alice_events) = connect_task.await.unwrap();

    use tokio::io::AsyncWriteExt;
    responder.write_half.write_all(&[77u8]).await.unwrap();
    responder
        .write_half
        .write_all(&0u32.to_be_bytes())
        .await
        .unwrap();
    responder.write_half.flush().await.unwrap();

    match next_event(&mut alice_events).await {
        ChannelEvent::Security { reason, .. } => assert_eq!(reason, SecurityReason::UnknownFrame),
        other => panic!("expected unknown-frame event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ack_timeout_when_peer_silent() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let alice = identity(1);
    let bob = identity(2);

    let connect_task = tokio::spawn(async move {
        SecureChannel::connect(client, &alice, config(), CancellationToken::new())
            .await
            .unwrap()
    });
    // Complete the handshake but never ack anything.
    let _responder = manual_accept(server, &bob).await;
    let (alice_channel, _alice_events) = connect_task.await.unwrap();

    match alice_channel.send(b"anyone there?").await {
        Err(ChannelError::AckTimeout(seq)) => assert_eq!(seq, 1),
        other => panic!("expected ack timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancellation_aborts_send() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let alice = identity(1);
    let bob = identity(2);
    let cancel = CancellationToken::new();

    let connect_cancel = cancel.clone();
    let connect_task = tokio::spawn(async move {
        SecureChannel::connect(client, &alice, config(), connect_cancel)
            .await
            .unwrap()
    });
    let _responder = manual_accept(server, &bob).await;
    let (alice_channel, _alice_events) = connect_task.await.unwrap();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    match alice_channel.send(b"doomed").await {
        Err(ChannelError::Cancelled) => {}
        other => panic!("expected cancellation, got {other:?}"),
    }
    canceller.await.unwrap();
}

#[tokio::test]
async fn test_wrong_identity_claim_fails_handshake() {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let alice = identity(1);
    let bob = identity(2);

    // The responder answers with an ack claiming a peer id that is not the
    // fingerprint of its identity key.
    let server_task = tokio::spawn(async move {
        let (mut read_half, mut write_half) = tokio::io::split(server);
        let frame = read_frame(&mut read_half).await.unwrap();
        let hello = HandshakePayload::from_bytes(&frame.payload).unwrap();

        let ephemeral = EphemeralAgreement::generate();
        let mut ack = HandshakePayload::build(&bob, hello.session_id, &ephemeral.public_key());
        ack.peer_id = identity(3).peer_id();
        write_frame(
            &mut write_half,
            FrameCode::HandshakeAck,
            &ack.to_bytes().unwrap(),
        )
        .await
        .unwrap();
    });

    let result =
        SecureChannel::connect(client, &alice, config(), CancellationToken::new()).await;
    assert!(matches!(
        result,
        Err(ChannelError::PeerIdentityMismatch { .. })
    ));
    server_task.await.unwrap();
}
