//! Device identity: persistent signing and key-agreement keys.
//!
//! Created once on first initialization and persisted to secure storage;
//! immutable thereafter. Corrupted blobs are discarded with a warning and
//! regenerated rather than wedging startup.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::Rng;
use tracing::warn;

use dicemesh_core::{
    AgreementPublicKey, AgreementSecret, IdentityKeypair, IdentityPublicKey, IdentitySignature,
    PeerId, SharedSecret,
};

use crate::error::Result;
use crate::secrets::SecureStorage;

/// Secure storage slots.
const IDENTITY_KEY_SLOT: &str = "dicemesh.identity_key";
const AGREEMENT_KEY_SLOT: &str = "dicemesh.agreement_key";
const DEVICE_NAME_SLOT: &str = "dicemesh.device_name";

/// The public face of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub peer_id: PeerId,
    pub device_name: String,
    pub identity_public_key: IdentityPublicKey,
    pub key_exchange_public_key: AgreementPublicKey,
}

/// Holds the device's private keys for the process lifetime.
pub struct IdentityManager {
    identity: DeviceIdentity,
    keypair: IdentityKeypair,
    agreement: AgreementSecret,
}

impl IdentityManager {
    /// Load the device identity from secure storage, generating and
    /// persisting fresh keys on first run. Idempotent.
    ///
    /// `device_name` overrides any stored name when given; with neither a
    /// stored name nor an override, a `Peer-NNNN` fallback is generated
    /// and persisted.
    pub async fn initialize<S: SecureStorage>(
        storage: &S,
        device_name: Option<&str>,
    ) -> Result<Self> {
        let keypair = match load_seed(storage, IDENTITY_KEY_SLOT).await? {
            Some(seed) => IdentityKeypair::from_seed(&seed),
            None => {
                let keypair = IdentityKeypair::generate();
                storage
                    .set(IDENTITY_KEY_SLOT, &BASE64.encode(keypair.seed().as_ref()))
                    .await?;
                keypair
            }
        };

        let agreement = match load_seed(storage, AGREEMENT_KEY_SLOT).await? {
            Some(seed) => AgreementSecret::from_bytes(seed),
            None => {
                let agreement = AgreementSecret::generate();
                storage
                    .set(
                        AGREEMENT_KEY_SLOT,
                        &BASE64.encode(agreement.to_bytes().as_ref()),
                    )
                    .await?;
                agreement
            }
        };

        let device_name = match device_name {
            Some(name) => {
                storage.set(DEVICE_NAME_SLOT, name).await?;
                name.to_string()
            }
            None => match storage.get(DEVICE_NAME_SLOT).await? {
                Some(name) => name,
                None => {
                    let name = format!("Peer-{:04}", rand::thread_rng().gen_range(0..10_000));
                    storage.set(DEVICE_NAME_SLOT, &name).await?;
                    name
                }
            },
        };

        let identity = DeviceIdentity {
            peer_id: keypair.peer_id(),
            device_name,
            identity_public_key: keypair.public_key(),
            key_exchange_public_key: agreement.public_key(),
        };

        Ok(Self {
            identity,
            keypair,
            agreement,
        })
    }

    /// The public identity.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// This device's peer id.
    pub fn peer_id(&self) -> &PeerId {
        &self.identity.peer_id
    }

    /// This device's name.
    pub fn device_name(&self) -> &str {
        &self.identity.device_name
    }

    /// The signing keypair.
    pub fn keypair(&self) -> &IdentityKeypair {
        &self.keypair
    }

    /// Ed25519 detached signature over `data`.
    pub fn sign(&self, data: &[u8]) -> IdentitySignature {
        self.keypair.sign(data)
    }

    /// Ed25519 verification. Returns false on any parse or verify failure.
    pub fn verify(data: &[u8], signature: &IdentitySignature, key: &IdentityPublicKey) -> bool {
        key.verify(data, signature).is_ok()
    }

    /// X25519 + HKDF shared secret with the persistent agreement key.
    pub fn compute_static_shared_secret(&self, remote: &AgreementPublicKey) -> SharedSecret {
        self.agreement.shared_secret(remote)
    }

    /// The static agreement secret, re-materialized for a channel.
    pub fn agreement_secret(&self) -> AgreementSecret {
        AgreementSecret::from_bytes(*self.agreement.to_bytes())
    }
}

/// Read a 32-byte seed from a storage slot. Corrupt blobs are removed and
/// reported as absent so the caller regenerates.
async fn load_seed<S: SecureStorage>(storage: &S, slot: &str) -> Result<Option<[u8; 32]>> {
    let Some(blob) = storage.get(slot).await? else {
        return Ok(None);
    };
    match BASE64.decode(&blob) {
        Ok(bytes) if bytes.len() == 32 => {
            let mut seed = [0u8; 32];
            seed.copy_from_slice(&bytes);
            Ok(Some(seed))
        }
        _ => {
            warn!(slot, "discarding corrupted key blob");
            storage.remove(slot).await?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemorySecretStore;

    #[tokio::test]
    async fn test_first_run_generates_and_persists() {
        let storage = MemorySecretStore::new();
        let manager = IdentityManager::initialize(&storage, Some("game-table"))
            .await
            .unwrap();

        assert_eq!(manager.device_name(), "game-table");
        assert_eq!(manager.peer_id().as_str().len(), 10);
        assert!(storage.get(IDENTITY_KEY_SLOT).await.unwrap().is_some());
        assert!(storage.get(AGREEMENT_KEY_SLOT).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_run_loads_same_identity() {
        let storage = MemorySecretStore::new();
        let first = IdentityManager::initialize(&storage, Some("desk"))
            .await
            .unwrap();
        let second = IdentityManager::initialize(&storage, None).await.unwrap();

        assert_eq!(first.identity(), second.identity());
    }

    #[tokio::test]
    async fn test_corrupt_blob_regenerated() {
        let storage = MemorySecretStore::new();
        storage.set(IDENTITY_KEY_SLOT, "%%garbage%%").await.unwrap();

        let manager = IdentityManager::initialize(&storage, Some("desk"))
            .await
            .unwrap();

        // A fresh valid blob replaced the corrupt one.
        let blob = storage.get(IDENTITY_KEY_SLOT).await.unwrap().unwrap();
        let seed: [u8; 32] = BASE64.decode(&blob).unwrap().try_into().unwrap();
        assert_eq!(
            IdentityKeypair::from_seed(&seed).peer_id(),
            *manager.peer_id()
        );
    }

    #[tokio::test]
    async fn test_fallback_device_name_shape() {
        let storage = MemorySecretStore::new();
        let manager = IdentityManager::initialize(&storage, None).await.unwrap();

        let name = manager.device_name();
        assert!(name.starts_with("Peer-"), "got {name}");
        assert_eq!(name.len(), 9);

        // The fallback is persisted, not re-rolled.
        let again = IdentityManager::initialize(&storage, None).await.unwrap();
        assert_eq!(again.device_name(), name);
    }

    #[tokio::test]
    async fn test_sign_verify_helpers() {
        let storage = MemorySecretStore::new();
        let manager = IdentityManager::initialize(&storage, Some("desk"))
            .await
            .unwrap();

        let signature = manager.sign(b"attack roll");
        assert!(IdentityManager::verify(
            b"attack roll",
            &signature,
            &manager.identity().identity_public_key
        ));
        assert!(!IdentityManager::verify(
            b"attack r0ll",
            &signature,
            &manager.identity().identity_public_key
        ));
    }

    #[tokio::test]
    async fn test_static_shared_secret_agrees() {
        let storage_a = MemorySecretStore::new();
        let storage_b = MemorySecretStore::new();
        let a = IdentityManager::initialize(&storage_a, Some("a")).await.unwrap();
        let b = IdentityManager::initialize(&storage_b, Some("b")).await.unwrap();

        let ab = a.compute_static_shared_secret(&b.identity().key_exchange_public_key);
        let ba = b.compute_static_shared_secret(&a.identity().key_exchange_public_key);
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }
}
