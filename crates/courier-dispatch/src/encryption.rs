//! Encryption engine boundary.
//!
//! Session negotiation, double-ratchet 1:1 encryption and hash-ratchet group
//! encryption are provided by an implementation of [`EncryptionLayer`]. The
//! dispatcher only routes bytes through it and reacts to the signals it
//! returns.

use async_trait::async_trait;
use thiserror::Error;

use courier_shared::{GroupId, HashRatchetInfo, Identity, KeyId, PublicKey};

/// A negotiated secret between us and one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSecret {
    pub identity: PublicKey,
    pub key: Vec<u8>,
}

/// Encrypted output ready to be framed and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMessageSpec {
    pub payload: Vec<u8>,
    /// Secret produced while building this spec, if any.
    pub shared_secret: Option<SharedSecret>,
    /// Both sides agreed on `shared_secret`; send on its topic.
    pub agreed_secret: bool,
}

impl ProtocolMessageSpec {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            shared_secret: None,
            agreed_secret: false,
        }
    }
}

/// Plaintext recovered by the encryption layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecryptedMessage {
    pub payload: Vec<u8>,
    /// Hash-ratchet keys this message made available.
    pub hash_ratchet_info: Vec<HashRatchetInfo>,
}

#[derive(Debug, Error)]
pub enum DecryptError {
    /// The payload carries no encryption layer; use it as-is.
    #[error("Payload is not encrypted")]
    NotEncrypted,

    /// No session with the sender's device exists yet.
    #[error("Device not found")]
    DeviceNotFound,

    /// The hash-ratchet key has not been received yet.
    #[error("Hash ratchet key {key_id} for group {group_id} not found")]
    GroupKeyNotFound { group_id: GroupId, key_id: KeyId },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait EncryptionLayer: Send + Sync + 'static {
    async fn encrypt_one_to_one(
        &self,
        sender: &Identity,
        recipient: &PublicKey,
        payload: &[u8],
    ) -> anyhow::Result<ProtocolMessageSpec>;

    async fn encrypt_public(
        &self,
        sender: &Identity,
        payload: &[u8],
    ) -> anyhow::Result<ProtocolMessageSpec>;

    /// Hash-ratchet encryption for `group_id`. With `rekey` the group's
    /// current key travels with the payload to `recipients`; no new key is
    /// generated here.
    async fn encrypt_group(
        &self,
        sender: &Identity,
        recipients: &[PublicKey],
        group_id: &GroupId,
        payload: &[u8],
        rekey: bool,
    ) -> anyhow::Result<ProtocolMessageSpec>;

    /// Static Diffie-Hellman encryption, used between our own devices.
    async fn encrypt_dh(
        &self,
        sender: &Identity,
        recipient: &PublicKey,
        payload: &[u8],
    ) -> anyhow::Result<ProtocolMessageSpec>;

    /// One key-exchange spec per recipient, in `recipients` order.
    async fn key_exchange_specs(
        &self,
        group_id: &GroupId,
        sender: &Identity,
        recipients: &[PublicKey],
        force_rekey: bool,
    ) -> anyhow::Result<Vec<ProtocolMessageSpec>>;

    /// Bundle the existing keys of `group_id` together with `payload` for
    /// one recipient. Returns the bytes to put on the wire.
    async fn key_exchange_with_payload(
        &self,
        sender: &Identity,
        recipient: &PublicKey,
        group_id: &GroupId,
        payload: &[u8],
    ) -> anyhow::Result<Vec<u8>>;

    async fn decrypt(
        &self,
        recipient: &Identity,
        sender: &PublicKey,
        payload: &[u8],
        skip_negotiation: bool,
    ) -> Result<DecryptedMessage, DecryptError>;

    /// Whether a bundle should be advertised to `peer` at unix time `now`.
    async fn should_advertise_bundle(&self, peer: &PublicKey, now: i64) -> anyhow::Result<bool>;

    async fn bundle_advertise_spec(
        &self,
        sender: &Identity,
        peer: &PublicKey,
    ) -> anyhow::Result<ProtocolMessageSpec>;

    async fn confirm_bundle_advertisement(&self, peer: &PublicKey, now: i64);
}
