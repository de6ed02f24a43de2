//! Reliable-retransmission boundary.
//!
//! Datasync owns retries, acks, offers and requests for 1:1 payloads. The
//! dispatcher appends payloads to a group and folds whatever datasync
//! surfaces on receive into its response.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use courier_shared::{DataSyncId, GroupId, PublicKey};

/// An id offered by a peer for a datasync group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasyncOffer {
    pub group_id: GroupId,
    pub message_id: DataSyncId,
}

/// A decoded datasync envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatasyncPayload {
    pub acks: Vec<DataSyncId>,
    pub requests: Vec<DataSyncId>,
    pub offers: Vec<DatasyncOffer>,
    /// Bodies of the messages carried by the envelope.
    pub messages: Vec<Vec<u8>>,
}

#[async_trait]
pub trait Datasync: Send + Sync + 'static {
    /// Add `peer` to `group_id` unless it is already a member.
    async fn ensure_peer_in_group(&self, group_id: &GroupId, peer: &PublicKey)
        -> anyhow::Result<()>;

    /// Schedule `payload` for reliable delivery to the group.
    async fn append_message(&self, group_id: &GroupId, payload: &[u8])
        -> anyhow::Result<DataSyncId>;

    /// Decode a datasync envelope. Errors for payloads that are not one.
    fn unwrap(&self, sender: &PublicKey, payload: &[u8]) -> anyhow::Result<DatasyncPayload>;
}
