use crate::constants::{KDF_CONTEXT_COMMUNITY_GROUP, KDF_CONTEXT_ONE_TO_ONE_GROUP};
use crate::types::{GroupId, MessageId, PublicKey};

/// BLAKE3-256 content hash.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Identity of a logical message: `hash(sender ‖ wrapped)`.
///
/// Deterministic, so a retried send of the same wrapped bytes keeps its id.
pub fn message_id(sender: &PublicKey, wrapped: &[u8]) -> MessageId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&sender.0);
    hasher.update(wrapped);
    MessageId(*hasher.finalize().as_bytes())
}

// Both parties derive the same group regardless of who sends first.
pub fn one_to_one_group_id(a: &PublicKey, b: &PublicKey) -> GroupId {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_ONE_TO_ONE_GROUP);
    hasher.update(&lo.0);
    hasher.update(&hi.0);
    GroupId(hasher.finalize().as_bytes().to_vec())
}

pub fn community_group_id(community: &PublicKey) -> GroupId {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_COMMUNITY_GROUP);
    hasher.update(&community.0);
    GroupId(hasher.finalize().as_bytes().to_vec())
}
