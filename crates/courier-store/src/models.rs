//! Row types persisted in the dispatcher database.

use serde::{Deserialize, Serialize};

use courier_shared::protocol::MessageType;
use courier_shared::{DataSyncId, GroupId, KeyId, MessageId, PublicKey};

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// One persisted chunk of a reassembly job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSegment {
    pub entire_message_hash: [u8; 32],
    pub index: u32,
    pub segments_count: u32,
    pub sig_pub_key: PublicKey,
    pub payload: Vec<u8>,
    pub timestamp: i64,
}

/// Result of feeding one chunk into the reassembly store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// A tombstone exists; the job already finished.
    AlreadyCompleted,
    /// Stored, but the job still lacks chunks.
    Incomplete { received: u32, expected: u32 },
    /// Every chunk arrived and the hash matched. Carries the payload.
    Completed(Vec<u8>),
}

// ---------------------------------------------------------------------------
// Confirmations
// ---------------------------------------------------------------------------

/// Delivery confirmation of one datasync payload by one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub datasync_id: DataSyncId,
    pub message_id: MessageId,
    pub public_key: PublicKey,
    /// Unix seconds; 0 while unconfirmed.
    pub confirmed_at: i64,
}

impl PendingConfirmation {
    pub fn new(datasync_id: DataSyncId, message_id: MessageId, public_key: PublicKey) -> Self {
        Self {
            datasync_id,
            message_id,
            public_key,
            confirmed_at: 0,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at > 0
    }
}

// ---------------------------------------------------------------------------
// Raw messages
// ---------------------------------------------------------------------------

/// Durable copy of a dispatched message, kept for resend bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessageRecord {
    pub id: MessageId,
    pub local_chat_id: String,
    pub last_sent: i64,
    pub send_count: u32,
    pub sent: bool,
    pub message_type: MessageType,
    pub resend_automatically: bool,
    pub recipients: Vec<PublicKey>,
    pub skip_encryption: bool,
    pub send_push_notification: bool,
    pub skip_group_message_wrap: bool,
    pub send_on_personal_topic: bool,
    pub payload: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Hash-ratchet queue
// ---------------------------------------------------------------------------

/// A frame waiting for the hash-ratchet key `(group_id, key_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedFrame {
    pub group_id: GroupId,
    pub key_id: KeyId,
    pub frame: courier_shared::protocol::ReceivedFrame,
}
