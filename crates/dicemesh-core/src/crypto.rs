//! Cryptographic primitives for dicemesh.
//!
//! Wraps Ed25519 signing, X25519 key agreement, and SHA-256 fingerprints
//! with strong types. Raw Diffie-Hellman output is never used directly:
//! every shared secret passes through HKDF-SHA-256 before it leaves this
//! module.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use crate::error::CoreError;

/// Alphabet for peer-id rendering: base32 without the ambiguous I, L, O, U.
const PEER_ID_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Number of fingerprint bytes folded into a peer id.
const PEER_ID_FINGERPRINT_BYTES: usize = 6;

/// Length of the rendered peer id (6 bytes = 48 bits = 10 base32 chars).
pub const PEER_ID_LEN: usize = 10;

/// A short textual fingerprint of an identity public key.
///
/// Rendered as 10 uppercase base32 characters over the leading 6 bytes of
/// SHA-256(identity public key). Comparison is byte-ordinal everywhere.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Derive the peer id from an identity public key.
    pub fn derive(key: &IdentityPublicKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        let mut out = String::with_capacity(PEER_ID_LEN);
        let mut acc: u32 = 0;
        let mut bits: u32 = 0;
        for &byte in &digest[..PEER_ID_FINGERPRINT_BYTES] {
            acc = (acc << 8) | u32::from(byte);
            bits += 8;
            while bits >= 5 {
                bits -= 5;
                out.push(PEER_ID_ALPHABET[((acc >> bits) & 0x1f) as usize] as char);
            }
        }
        if bits > 0 {
            out.push(PEER_ID_ALPHABET[((acc << (5 - bits)) & 0x1f) as usize] as char);
        }
        Self(out)
    }

    /// Wrap an already-rendered peer id (e.g. read back from storage).
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityPublicKey(pub [u8; 32]);

impl IdentityPublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to base64 (the wire rendering).
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parse from base64.
    pub fn from_base64(s: &str) -> Result<Self, CoreError> {
        let bytes = BASE64
            .decode(s)
            .map_err(|_| CoreError::InvalidPublicKey)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CoreError::InvalidPublicKey)?;
        Ok(Self(arr))
    }

    /// Verify a detached signature over a message.
    pub fn verify(&self, message: &[u8], signature: &IdentitySignature) -> Result<(), CoreError> {
        let verifying_key =
            VerifyingKey::from_bytes(&self.0).map_err(|_| CoreError::InvalidPublicKey)?;
        let sig = Signature::from_bytes(&signature.0);
        verifying_key
            .verify(message, &sig)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPub({})", &hex::encode(self.0)[..16])
    }
}

impl AsRef<[u8]> for IdentityPublicKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IdentitySignature(pub [u8; 64]);

impl IdentitySignature {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }

    /// Convert to base64 (the wire rendering).
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parse from base64.
    pub fn from_base64(s: &str) -> Result<Self, CoreError> {
        let bytes = BASE64
            .decode(s)
            .map_err(|_| CoreError::InvalidSignature)?;
        let arr: [u8; 64] = bytes.try_into().map_err(|_| CoreError::InvalidSignature)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for IdentitySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentitySig({}...)", &hex::encode(&self.0[..8]))
    }
}

/// The persistent Ed25519 signing keypair for a device.
#[derive(Clone)]
pub struct IdentityKeypair {
    signing_key: SigningKey,
}

impl IdentityKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Create from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Get the public key.
    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Derive the peer id for this identity.
    pub fn peer_id(&self) -> PeerId {
        PeerId::derive(&self.public_key())
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> IdentitySignature {
        IdentitySignature(self.signing_key.sign(message).to_bytes())
    }

    /// Get the seed bytes (secret key material, zeroized on drop).
    pub fn seed(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.signing_key.to_bytes())
    }
}

impl fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKeypair({:?})", self.public_key())
    }
}

/// An X25519 public key (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementPublicKey(pub [u8; 32]);

impl AgreementPublicKey {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to base64 (the wire rendering).
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }

    /// Parse from base64.
    pub fn from_base64(s: &str) -> Result<Self, CoreError> {
        let bytes = BASE64
            .decode(s)
            .map_err(|_| CoreError::InvalidPublicKey)?;
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CoreError::InvalidPublicKey)?;
        Ok(Self(arr))
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl fmt::Debug for AgreementPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgreementPub({})", &hex::encode(self.0)[..16])
    }
}

/// The persistent X25519 key-agreement secret for a device.
pub struct AgreementSecret(StaticSecret);

impl AgreementSecret {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let secret = Self(StaticSecret::from(bytes));
        bytes.zeroize();
        secret
    }

    /// Create from seed bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Get the seed bytes (secret key material, zeroized on drop).
    pub fn to_bytes(&self) -> Zeroizing<[u8; 32]> {
        Zeroizing::new(self.0.to_bytes())
    }

    /// Derive the public key.
    pub fn public_key(&self) -> AgreementPublicKey {
        AgreementPublicKey(*PublicKey::from(&self.0).as_bytes())
    }

    /// Compute the HKDF-derived shared secret with a peer's public key.
    pub fn shared_secret(&self, remote: &AgreementPublicKey) -> SharedSecret {
        let raw = self.0.diffie_hellman(&remote.to_dalek());
        derive_shared(raw.as_bytes())
    }
}

impl fmt::Debug for AgreementSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AgreementSecret({:?})", self.public_key())
    }
}

/// A fresh X25519 keypair for a single handshake.
///
/// The secret lives only until key derivation completes; the underlying
/// library zeroizes it on drop. A handshake derives two secrets from the
/// same ephemeral key (against the peer's ephemeral and static keys), so
/// the secret is held rather than consumed on first use.
pub struct EphemeralAgreement {
    secret: StaticSecret,
    public: AgreementPublicKey,
}

impl EphemeralAgreement {
    /// Generate a new ephemeral keypair.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let secret = StaticSecret::from(bytes);
        bytes.zeroize();
        let public = AgreementPublicKey(*PublicKey::from(&secret).as_bytes());
        Self { secret, public }
    }

    /// Get the public key.
    pub fn public_key(&self) -> AgreementPublicKey {
        self.public
    }

    /// Compute the HKDF-derived shared secret with a peer's public key.
    pub fn shared_secret(&self, remote: &AgreementPublicKey) -> SharedSecret {
        let raw = self.secret.diffie_hellman(&remote.to_dalek());
        derive_shared(raw.as_bytes())
    }
}

/// A 32-byte shared secret, zeroized on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret(..)")
    }
}

/// Run raw DH output through HKDF-SHA-256 (empty salt, empty info, 32 bytes).
///
/// The wire protocol never uses raw curve output as key material.
fn derive_shared(raw: &[u8; 32]) -> SharedSecret {
    let hkdf = Hkdf::<Sha256>::new(None, raw);
    let mut out = [0u8; 32];
    hkdf.expand(&[], &mut out)
        .expect("HKDF expand cannot fail for 32-byte output");
    SharedSecret(out)
}
