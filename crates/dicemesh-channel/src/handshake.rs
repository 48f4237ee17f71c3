//! Mutual-authentication handshake payloads.
//!
//! Each side presents its identity, its static key-exchange key, a fresh
//! ephemeral key, and an Ed25519 signature binding all three to the
//! session id. Verification checks that the claimed peer id really is the
//! fingerprint of the presented identity key, so a peer cannot impersonate
//! another id even with a valid signature of its own.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dicemesh_core::{
    AgreementPublicKey, AgreementSecret, IdentityKeypair, IdentityPublicKey, IdentitySignature,
    PeerId,
};

use crate::error::{ChannelError, Result};

/// What the channel layer needs to know about the local device.
pub struct ChannelIdentity {
    pub keypair: IdentityKeypair,
    pub agreement: AgreementSecret,
    pub device_name: String,
}

impl ChannelIdentity {
    pub fn peer_id(&self) -> PeerId {
        self.keypair.peer_id()
    }
}

/// What discovery hands to the channel layer: where a peer is and which
/// keys it advertises. Produced by transports outside this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerDescriptor {
    pub peer_id: PeerId,
    pub device_name: String,
    pub identity_public_key_b64: String,
    pub key_exchange_public_key_b64: String,
    pub host: String,
    pub port: u16,
    /// Unix ms of the last discovery beacon.
    pub last_seen: i64,
}

/// Hello and ack share this shape; only the frame code differs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakePayload {
    pub session_id: Uuid,
    pub peer_id: PeerId,
    pub device_name: String,
    /// Ed25519 identity public key, base64.
    pub identity_public_key: String,
    /// Static X25519 key-exchange public key, base64.
    pub key_exchange_public_key: String,
    /// Fresh X25519 ephemeral public key, base64.
    pub ephemeral_public_key: String,
    /// Ed25519 over `session_id_bytes || ephemeral_public || key_exchange_public`, base64.
    pub signature: String,
}

impl HandshakePayload {
    /// Build and sign the local side's payload.
    pub fn build(
        identity: &ChannelIdentity,
        session_id: Uuid,
        ephemeral_public: &AgreementPublicKey,
    ) -> Self {
        let key_exchange_public = identity.agreement.public_key();
        let signature = identity
            .keypair
            .sign(&signed_message(&session_id, ephemeral_public, &key_exchange_public));

        Self {
            session_id,
            peer_id: identity.peer_id(),
            device_name: identity.device_name.clone(),
            identity_public_key: identity.keypair.public_key().to_base64(),
            key_exchange_public_key: key_exchange_public.to_base64(),
            ephemeral_public_key: ephemeral_public.to_base64(),
            signature: signature.to_base64(),
        }
    }

    /// Serialize for the wire (also the transcript input).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ChannelError::Encoding(e.to_string()))
    }

    /// Parse from wire bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ChannelError::Encoding(e.to_string()))
    }
}

/// The authenticated remote side of a verified handshake.
#[derive(Debug, Clone)]
pub struct VerifiedPeer {
    pub peer_id: PeerId,
    pub device_name: String,
    pub identity_key: IdentityPublicKey,
    pub key_exchange_key: AgreementPublicKey,
    pub ephemeral_key: AgreementPublicKey,
}

/// Verify a received handshake payload.
///
/// `expected_session` is the initiator's session id when verifying an ack;
/// a responder verifying a hello passes `None` and adopts the id.
pub fn verify_payload(
    payload: &HandshakePayload,
    expected_session: Option<Uuid>,
) -> Result<VerifiedPeer> {
    if let Some(expected) = expected_session {
        if payload.session_id != expected {
            return Err(ChannelError::SessionMismatch {
                expected: expected.to_string(),
                got: payload.session_id.to_string(),
            });
        }
    }

    let identity_key = IdentityPublicKey::from_base64(&payload.identity_public_key)
        .map_err(|_| ChannelError::HandshakeSignatureInvalid)?;
    let key_exchange_key = AgreementPublicKey::from_base64(&payload.key_exchange_public_key)
        .map_err(|_| ChannelError::HandshakeSignatureInvalid)?;
    let ephemeral_key = AgreementPublicKey::from_base64(&payload.ephemeral_public_key)
        .map_err(|_| ChannelError::HandshakeSignatureInvalid)?;

    let computed = PeerId::derive(&identity_key);
    if computed != payload.peer_id {
        return Err(ChannelError::PeerIdentityMismatch {
            claimed: payload.peer_id.to_string(),
            computed: computed.to_string(),
        });
    }

    let signature = IdentitySignature::from_base64(&payload.signature)
        .map_err(|_| ChannelError::HandshakeSignatureInvalid)?;
    identity_key
        .verify(
            &signed_message(&payload.session_id, &ephemeral_key, &key_exchange_key),
            &signature,
        )
        .map_err(|_| ChannelError::HandshakeSignatureInvalid)?;

    Ok(VerifiedPeer {
        peer_id: payload.peer_id.clone(),
        device_name: payload.device_name.clone(),
        identity_key,
        key_exchange_key,
        ephemeral_key,
    })
}

fn signed_message(
    session_id: &Uuid,
    ephemeral: &AgreementPublicKey,
    key_exchange: &AgreementPublicKey,
) -> Vec<u8> {
    let mut message = Vec::with_capacity(16 + 32 + 32);
    message.extend_from_slice(session_id.as_bytes());
    message.extend_from_slice(ephemeral.as_bytes());
    message.extend_from_slice(key_exchange.as_bytes());
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicemesh_core::EphemeralAgreement;

    fn identity(seed: u8) -> ChannelIdentity {
        ChannelIdentity {
            keypair: IdentityKeypair::from_seed(&[seed; 32]),
            agreement: AgreementSecret::from_bytes([seed.wrapping_add(1); 32]),
            device_name: format!("device-{seed}"),
        }
    }

    #[test]
    fn test_build_verify_roundtrip() {
        let alice = identity(1);
        let session = Uuid::new_v4();
        let ephemeral = EphemeralAgreement::generate();

        let payload = HandshakePayload::build(&alice, session, &ephemeral.public_key());
        let bytes = payload.to_bytes().unwrap();
        let parsed = HandshakePayload::from_bytes(&bytes).unwrap();

        let peer = verify_payload(&parsed, Some(session)).unwrap();
        assert_eq!(peer.peer_id, alice.peer_id());
        assert_eq!(peer.device_name, "device-1");
        assert_eq!(peer.ephemeral_key, ephemeral.public_key());
    }

    #[test]
    fn test_session_mismatch() {
        let alice = identity(1);
        let ephemeral = EphemeralAgreement::generate();
        let payload = HandshakePayload::build(&alice, Uuid::new_v4(), &ephemeral.public_key());

        assert!(matches!(
            verify_payload(&payload, Some(Uuid::new_v4())),
            Err(ChannelError::SessionMismatch { .. })
        ));
    }

    #[test]
    fn test_peer_id_mismatch() {
        let alice = identity(1);
        let ephemeral = EphemeralAgreement::generate();
        let mut payload =
            HandshakePayload::build(&alice, Uuid::new_v4(), &ephemeral.public_key());

        // Claim someone else's peer id.
        payload.peer_id = identity(9).peer_id();
        assert!(matches!(
            verify_payload(&payload, None),
            Err(ChannelError::PeerIdentityMismatch { .. })
        ));
    }

    #[test]
    fn test_tampered_ephemeral_fails_signature() {
        let alice = identity(1);
        let ephemeral = EphemeralAgreement::generate();
        let mut payload =
            HandshakePayload::build(&alice, Uuid::new_v4(), &ephemeral.public_key());

        // Swap in a different ephemeral key after signing.
        payload.ephemeral_public_key = EphemeralAgreement::generate().public_key().to_base64();
        assert!(matches!(
            verify_payload(&payload, None),
            Err(ChannelError::HandshakeSignatureInvalid)
        ));
    }

    #[test]
    fn test_peer_descriptor_wire_shape() {
        let me = identity(1);
        let descriptor = PeerDescriptor {
            peer_id: me.peer_id(),
            device_name: me.device_name.clone(),
            identity_public_key_b64: me.keypair.public_key().to_base64(),
            key_exchange_public_key_b64: me.agreement.public_key().to_base64(),
            host: "192.168.1.20".into(),
            port: 48231,
            last_seen: 1_700_000_000_000,
        };

        let json = serde_json::to_string(&descriptor).unwrap();
        assert!(json.contains("\"peerId\""));
        assert!(json.contains("\"identityPublicKeyB64\""));

        let parsed: PeerDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, descriptor);
    }

    #[test]
    fn test_garbage_keys_fail_cleanly() {
        let alice = identity(1);
        let ephemeral = EphemeralAgreement::generate();
        let mut payload =
            HandshakePayload::build(&alice, Uuid::new_v4(), &ephemeral.public_key());
        payload.identity_public_key = "!!not base64!!".into();

        assert!(verify_payload(&payload, None).is_err());
    }
}
