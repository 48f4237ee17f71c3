//! The secure channel: AEAD-framed messaging over an authenticated
//! handshake.
//!
//! A channel wraps a reliable byte pipe. The initiator calls
//! [`SecureChannel::connect`], the responder [`SecureChannel::accept`];
//! both return the channel plus an event stream carrying decrypted
//! messages, security events, and the disconnect notification.
//!
//! Security failures on the receive path (bad tag, replay, malformed or
//! unknown frames) surface as events and do not tear the connection down;
//! only `Close` and pipe errors end it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use bytes::Bytes;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use dicemesh_core::{EphemeralAgreement, PeerId};

use crate::error::{ChannelError, Result};
use crate::frame::{read_frame, write_frame, FrameCode};
use crate::handshake::{verify_payload, ChannelIdentity, HandshakePayload, VerifiedPeer};
use crate::keys::{derive_session_keys, Role, SessionKeys};

/// AES-GCM tag length.
const TAG_LEN: usize = 16;

/// Size of the de-dup window on the receive side.
const REPLAY_WINDOW_LEN: usize = 64;

/// Channel timing configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// How long a send waits for its ack.
    pub ack_timeout: Duration,
    /// Discovery beacon cadence (consumed by transport layers above).
    pub discovery_broadcast_interval: Duration,
    /// How long a silent peer stays listed (consumed by transport layers).
    pub peer_expiry: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            discovery_broadcast_interval: Duration::from_secs(3),
            peer_expiry: Duration::from_secs(20),
        }
    }
}

/// Why a receive-side security event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityReason {
    /// AEAD open failed.
    CryptographicFailure,
    /// Sequence number already seen or outside the window.
    ReplayDetected,
    /// Frame structure could not be parsed.
    MalformedFrame,
    /// Frame code outside the enumerated set.
    UnknownFrame,
}

/// Events delivered to the channel consumer.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A decrypted application message.
    Message(Bytes),
    /// A receive-side security failure attributed to the peer.
    Security {
        peer_id: PeerId,
        reason: SecurityReason,
        detail: String,
    },
    /// The peer closed the channel or the pipe dropped.
    PeerDisconnected(PeerId),
}

/// Receive-side anti-replay state.
///
/// A frame is admitted when its sequence is strictly above the highest
/// seen, or when it falls inside the 64-entry reorder window and has not
/// been seen before. Everything else is a replay.
struct ReplayWindow {
    highest: u64,
    order: VecDeque<u64>,
    seen: HashSet<u64>,
}

impl ReplayWindow {
    fn new() -> Self {
        Self {
            highest: 0,
            order: VecDeque::with_capacity(REPLAY_WINDOW_LEN),
            seen: HashSet::with_capacity(REPLAY_WINDOW_LEN),
        }
    }

    fn admit(&mut self, seq: u64) -> bool {
        if self.seen.contains(&seq) {
            return false;
        }
        if seq <= self.highest {
            // Equal to the highest means a duplicate of an accepted frame
            // even if it has aged out of the de-dup set.
            if seq == self.highest {
                return false;
            }
            if self.highest - seq >= REPLAY_WINDOW_LEN as u64 {
                return false;
            }
        }

        self.seen.insert(seq);
        self.order.push_back(seq);
        if self.order.len() > REPLAY_WINDOW_LEN {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        if seq > self.highest {
            self.highest = seq;
        }
        true
    }
}

/// Build the 12-byte nonce: 4-byte channel salt, then the sequence number
/// big-endian in the low 8 bytes.
fn data_nonce(salt: &[u8; 4], seq: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(salt);
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

/// Inner Data payload: `seq(8) || nonce(12) || cipher_len(4) || ciphertext || tag(16)`.
fn encode_data_payload(seq: u64, nonce: &[u8; 12], ciphertext_with_tag: &[u8]) -> Vec<u8> {
    let cipher_len = ciphertext_with_tag.len() - TAG_LEN;
    let mut payload = Vec::with_capacity(8 + 12 + 4 + ciphertext_with_tag.len());
    payload.extend_from_slice(&seq.to_be_bytes());
    payload.extend_from_slice(nonce);
    payload.extend_from_slice(&(cipher_len as u32).to_be_bytes());
    payload.extend_from_slice(ciphertext_with_tag);
    payload
}

fn decode_data_payload(payload: &[u8]) -> Result<(u64, [u8; 12], Vec<u8>)> {
    if payload.len() < 8 + 12 + 4 + TAG_LEN {
        return Err(ChannelError::MalformedFrame("data frame too short".into()));
    }
    let seq = u64::from_be_bytes(payload[0..8].try_into().expect("sliced to 8 bytes"));
    let nonce: [u8; 12] = payload[8..20].try_into().expect("sliced to 12 bytes");
    let cipher_len =
        u32::from_be_bytes(payload[20..24].try_into().expect("sliced to 4 bytes")) as usize;
    let rest = &payload[24..];
    if rest.len() != cipher_len + TAG_LEN {
        return Err(ChannelError::MalformedFrame(format!(
            "cipher length {cipher_len} disagrees with frame length {}",
            rest.len()
        )));
    }
    Ok((seq, nonce, rest.to_vec()))
}

/// One side of an established secure channel.
pub struct SecureChannel<S> {
    session_id: Uuid,
    peer: VerifiedPeer,
    config: ChannelConfig,
    shutdown: CancellationToken,
    send_cipher: Aes256Gcm,
    nonce_salt: [u8; 4],
    next_seq: AtomicU64,
    writer: Arc<Mutex<WriteHalf<S>>>,
    pending: Arc<StdMutex<HashMap<u64, oneshot::Sender<()>>>>,
    reader: tokio::task::JoinHandle<()>,
}

impl<S> SecureChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Initiate a channel: pick a session id, send the hello, verify the
    /// ack, derive keys.
    pub async fn connect(
        stream: S,
        identity: &ChannelIdentity,
        config: ChannelConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let session_id = Uuid::new_v4();
        let ephemeral = EphemeralAgreement::generate();
        let hello = HandshakePayload::build(identity, session_id, &ephemeral.public_key());
        let hello_bytes = hello.to_bytes()?;
        write_frame(&mut write_half, FrameCode::HandshakeHello, &hello_bytes).await?;

        let frame = read_frame(&mut read_half).await?;
        if frame.code()? != FrameCode::HandshakeAck {
            return Err(ChannelError::MalformedFrame(
                "expected handshake ack".into(),
            ));
        }
        let ack_bytes = frame.payload.to_vec();
        let ack = HandshakePayload::from_bytes(&ack_bytes)?;
        let peer = verify_payload(&ack, Some(session_id))?;

        let keys = derive_session_keys(
            Role::Initiator,
            ephemeral,
            &identity.agreement,
            &peer.ephemeral_key,
            &peer.key_exchange_key,
            &hello_bytes,
            &ack_bytes,
        );

        debug!(session = %session_id, peer = %peer.peer_id, "channel established (initiator)");
        Self::finish(session_id, peer, keys, read_half, write_half, config, cancel)
    }

    /// Accept a channel: verify the hello, adopt its session id, answer
    /// with the ack, derive keys.
    pub async fn accept(
        stream: S,
        identity: &ChannelIdentity,
        config: ChannelConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let frame = read_frame(&mut read_half).await?;
        if frame.code()? != FrameCode::HandshakeHello {
            return Err(ChannelError::MalformedFrame(
                "expected handshake hello".into(),
            ));
        }
        let hello_bytes = frame.payload.to_vec();
        let hello = HandshakePayload::from_bytes(&hello_bytes)?;
        let peer = verify_payload(&hello, None)?;
        let session_id = hello.session_id;

        let ephemeral = EphemeralAgreement::generate();
        let ack = HandshakePayload::build(identity, session_id, &ephemeral.public_key());
        let ack_bytes = ack.to_bytes()?;
        write_frame(&mut write_half, FrameCode::HandshakeAck, &ack_bytes).await?;

        let keys = derive_session_keys(
            Role::Responder,
            ephemeral,
            &identity.agreement,
            &peer.ephemeral_key,
            &peer.key_exchange_key,
            &hello_bytes,
            &ack_bytes,
        );

        debug!(session = %session_id, peer = %peer.peer_id, "channel established (responder)");
        Self::finish(session_id, peer, keys, read_half, write_half, config, cancel)
    }

    fn finish(
        session_id: Uuid,
        peer: VerifiedPeer,
        keys: SessionKeys,
        read_half: ReadHalf<S>,
        write_half: WriteHalf<S>,
        config: ChannelConfig,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>)> {
        let send_cipher = Aes256Gcm::new_from_slice(keys.send_key.as_ref())
            .map_err(|e| ChannelError::CryptographicFailure(e.to_string()))?;
        let recv_cipher = Aes256Gcm::new_from_slice(keys.recv_key.as_ref())
            .map_err(|e| ChannelError::CryptographicFailure(e.to_string()))?;

        let mut nonce_salt = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut nonce_salt);

        let shutdown = cancel.child_token();
        let writer = Arc::new(Mutex::new(write_half));
        let pending: Arc<StdMutex<HashMap<u64, oneshot::Sender<()>>>> =
            Arc::new(StdMutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(
            read_half,
            recv_cipher,
            session_id,
            peer.peer_id.clone(),
            Arc::clone(&writer),
            Arc::clone(&pending),
            event_tx,
            shutdown.clone(),
        ));

        let channel = Self {
            session_id,
            peer,
            config,
            shutdown,
            send_cipher,
            nonce_salt,
            next_seq: AtomicU64::new(1),
            writer,
            pending,
            reader,
        };
        Ok((channel, event_rx))
    }

    /// The 16-byte session id (also the AEAD associated data).
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The authenticated remote peer.
    pub fn peer(&self) -> &VerifiedPeer {
        &self.peer
    }

    /// Encrypt and send one message, waiting for the peer's ack.
    ///
    /// Fails with `AckTimeout` when no ack arrives in time; the caller may
    /// retry, which re-encrypts under a fresh sequence number. Event
    /// appends are content-addressed, so a duplicate delivery is harmless.
    pub async fn send(&self, plaintext: &[u8]) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ChannelError::Closed);
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let nonce = data_nonce(&self.nonce_salt, seq);
        let ciphertext = self
            .send_cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: self.session_id.as_bytes(),
                },
            )
            .map_err(|_| ChannelError::CryptographicFailure("seal failed".into()))?;

        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .insert(seq, ack_tx);

        let payload = encode_data_payload(seq, &nonce, &ciphertext);
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = write_frame(&mut *writer, FrameCode::Data, &payload).await {
                self.forget_pending(seq);
                return Err(e);
            }
        }

        tokio::select! {
            _ = self.shutdown.cancelled() => {
                self.forget_pending(seq);
                Err(ChannelError::Cancelled)
            }
            outcome = tokio::time::timeout(self.config.ack_timeout, ack_rx) => {
                match outcome {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(ChannelError::Closed),
                    Err(_) => {
                        self.forget_pending(seq);
                        Err(ChannelError::AckTimeout(seq))
                    }
                }
            }
        }
    }

    /// Send a keep-alive frame.
    pub async fn heartbeat(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, FrameCode::Heartbeat, b"").await
    }

    /// Close the channel: notify the peer and stop the read loop.
    pub async fn close(&self) -> Result<()> {
        {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, FrameCode::Close, b"").await?;
        }
        self.shutdown.cancel();
        Ok(())
    }

    fn forget_pending(&self, seq: u64) {
        self.pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(&seq);
    }
}

impl<S> Drop for SecureChannel<S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.reader.abort();
    }
}

#[allow(clippy::too_many_arguments)]
async fn read_loop<S>(
    mut read_half: ReadHalf<S>,
    recv_cipher: Aes256Gcm,
    session_id: Uuid,
    peer_id: PeerId,
    writer: Arc<Mutex<WriteHalf<S>>>,
    pending: Arc<StdMutex<HashMap<u64, oneshot::Sender<()>>>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let mut replay = ReplayWindow::new();

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = read_frame(&mut read_half) => match result {
                Ok(frame) => frame,
                Err(ChannelError::MalformedFrame(detail)) => {
                    // The length prefix cannot be trusted anymore; the
                    // stream is desynchronized beyond recovery.
                    security(&events, &peer_id, SecurityReason::MalformedFrame, detail);
                    break;
                }
                Err(_) => {
                    let _ = events.send(ChannelEvent::PeerDisconnected(peer_id.clone()));
                    break;
                }
            }
        };

        let code = match frame.code() {
            Ok(code) => code,
            Err(ChannelError::UnknownFrame(code)) => {
                security(
                    &events,
                    &peer_id,
                    SecurityReason::UnknownFrame,
                    format!("frame code {code}"),
                );
                continue;
            }
            Err(_) => continue,
        };

        match code {
            FrameCode::Data => {
                let (seq, nonce, ciphertext) = match decode_data_payload(&frame.payload) {
                    Ok(parts) => parts,
                    Err(e) => {
                        security(
                            &events,
                            &peer_id,
                            SecurityReason::MalformedFrame,
                            e.to_string(),
                        );
                        continue;
                    }
                };

                let plaintext = match recv_cipher.decrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: &ciphertext,
                        aad: session_id.as_bytes(),
                    },
                ) {
                    Ok(plaintext) => plaintext,
                    Err(_) => {
                        security(
                            &events,
                            &peer_id,
                            SecurityReason::CryptographicFailure,
                            format!("AEAD open failed for sequence {seq}"),
                        );
                        continue;
                    }
                };

                if !replay.admit(seq) {
                    security(
                        &events,
                        &peer_id,
                        SecurityReason::ReplayDetected,
                        format!("sequence {seq}"),
                    );
                    continue;
                }

                {
                    let mut writer = writer.lock().await;
                    if write_frame(&mut *writer, FrameCode::Ack, &seq.to_be_bytes())
                        .await
                        .is_err()
                    {
                        let _ = events.send(ChannelEvent::PeerDisconnected(peer_id.clone()));
                        break;
                    }
                }

                let _ = events.send(ChannelEvent::Message(Bytes::from(plaintext)));
            }
            FrameCode::Ack => {
                if frame.payload.len() != 8 {
                    security(
                        &events,
                        &peer_id,
                        SecurityReason::MalformedFrame,
                        "ack payload must be 8 bytes".into(),
                    );
                    continue;
                }
                let seq =
                    u64::from_be_bytes(frame.payload[..].try_into().expect("checked length"));
                let sender = pending
                    .lock()
                    .expect("pending map lock poisoned")
                    .remove(&seq);
                match sender {
                    Some(tx) => {
                        let _ = tx.send(());
                    }
                    None => debug!(seq, "ack for unknown or expired sequence"),
                }
            }
            FrameCode::Close => {
                let _ = events.send(ChannelEvent::PeerDisconnected(peer_id.clone()));
                break;
            }
            FrameCode::Heartbeat => {}
            FrameCode::HandshakeHello | FrameCode::HandshakeAck => {
                security(
                    &events,
                    &peer_id,
                    SecurityReason::MalformedFrame,
                    "handshake frame after establishment".into(),
                );
            }
        }
    }
}

fn security(
    events: &mpsc::UnboundedSender<ChannelEvent>,
    peer_id: &PeerId,
    reason: SecurityReason,
    detail: String,
) {
    warn!(peer = %peer_id, ?reason, detail, "channel security event");
    let _ = events.send(ChannelEvent::Security {
        peer_id: peer_id.clone(),
        reason,
        detail,
    });
}
