use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_POW_TARGET, FRAME_TTL_SECS, LARGE_PAYLOAD_BYTES, LARGE_PAYLOAD_POW_TARGET,
    POW_TIME_SECS, SEGMENT_MAGIC,
};
use crate::crypto;
use crate::error::WireError;
use crate::identity::{self, Identity};
use crate::types::{FrameHash, MessageId, PublicKey};

// ---------------------------------------------------------------------------
// Application layer
// ---------------------------------------------------------------------------

/// Kind of application payload carried by a logical message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageType {
    ChatMessage,
    EditMessage,
    DeleteMessage,
    PinMessage,
    EmojiReaction,
    MembershipUpdate,
    PairInstallation,
    CommunityDescription,
    CommunityKeyExchange,
    PubsubTopicKey,
    ContactRequest,
    /// A code without a named variant. `Other(n)` for a named code `n`
    /// is not canonical: it encodes as `n` and decodes as the named
    /// variant. Build these with [`MessageType::from_u32`].
    Other(u32),
}

impl MessageType {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::ChatMessage => 1,
            Self::EditMessage => 2,
            Self::DeleteMessage => 3,
            Self::PinMessage => 4,
            Self::EmojiReaction => 5,
            Self::MembershipUpdate => 6,
            Self::PairInstallation => 7,
            Self::CommunityDescription => 8,
            Self::CommunityKeyExchange => 9,
            Self::PubsubTopicKey => 10,
            Self::ContactRequest => 11,
            Self::Other(n) => n,
        }
    }

    pub fn from_u32(n: u32) -> Self {
        match n {
            1 => Self::ChatMessage,
            2 => Self::EditMessage,
            3 => Self::DeleteMessage,
            4 => Self::PinMessage,
            5 => Self::EmojiReaction,
            6 => Self::MembershipUpdate,
            7 => Self::PairInstallation,
            8 => Self::CommunityDescription,
            9 => Self::CommunityKeyExchange,
            10 => Self::PubsubTopicKey,
            11 => Self::ContactRequest,
            other => Self::Other(other),
        }
    }

    /// Community messages of these kinds go through hash-ratchet encryption;
    /// everything else is sent on the community topic unencrypted.
    pub fn should_community_message_be_encrypted(self) -> bool {
        matches!(
            self,
            Self::ChatMessage
                | Self::EditMessage
                | Self::DeleteMessage
                | Self::PinMessage
                | Self::EmojiReaction
        )
    }
}

/// Signed application envelope. The wrapped bytes are what a message id is
/// computed over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationMetadataMessage {
    pub signer: PublicKey,
    pub signature: Vec<u8>,
    pub payload: Vec<u8>,
    pub message_type: MessageType,
}

/// A decoded application-layer message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationLayer {
    pub id: MessageId,
    pub signer: PublicKey,
    pub message_type: MessageType,
    pub payload: Vec<u8>,
}

fn signing_input(payload: &[u8], message_type: MessageType) -> [u8; 32] {
    let mut input = Vec::with_capacity(payload.len() + 4);
    input.extend_from_slice(&message_type.as_u32().to_be_bytes());
    input.extend_from_slice(payload);
    crypto::hash(&input)
}

/// Wrap a payload in a signed application envelope.
pub fn wrap_message(
    payload: &[u8],
    message_type: MessageType,
    sender: &Identity,
) -> Result<Vec<u8>, WireError> {
    let signature = sender.sign(&signing_input(payload, message_type));
    let envelope = ApplicationMetadataMessage {
        signer: sender.public_key(),
        signature: signature.to_vec(),
        payload: payload.to_vec(),
        message_type,
    };
    Ok(bincode::serialize(&envelope)?)
}

/// Decode and verify a signed application envelope.
pub fn decode_application_layer(wrapped: &[u8]) -> Result<ApplicationLayer, WireError> {
    let envelope: ApplicationMetadataMessage = bincode::deserialize(wrapped)?;
    identity::verify(
        &envelope.signer,
        &signing_input(&envelope.payload, envelope.message_type),
        &envelope.signature,
    )
    .map_err(|_| WireError::InvalidSignature)?;

    Ok(ApplicationLayer {
        id: crypto::message_id(&envelope.signer, wrapped),
        signer: envelope.signer,
        message_type: envelope.message_type,
        payload: envelope.payload,
    })
}

// ---------------------------------------------------------------------------
// Segmentation layer
// ---------------------------------------------------------------------------

/// One chunk of a payload too large for a single transport frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SegmentMessage {
    pub entire_message_hash: [u8; 32],
    pub index: u32,
    pub segments_count: u32,
    pub payload: Vec<u8>,
}

impl SegmentMessage {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let body = bincode::serialize(self)?;
        let mut out = Vec::with_capacity(SEGMENT_MAGIC.len() + body.len());
        out.extend_from_slice(&SEGMENT_MAGIC);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Returns `Ok(None)` when the bytes are not a segment frame at all.
    pub fn decode(data: &[u8]) -> Result<Option<Self>, WireError> {
        match data.strip_prefix(&SEGMENT_MAGIC[..]) {
            Some(body) => Ok(Some(bincode::deserialize(body)?)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Transport layer
// ---------------------------------------------------------------------------

/// PoW target for a payload: lower for large payloads, which would otherwise
/// be too expensive to send.
pub fn calculate_pow(payload_len: usize) -> f64 {
    if payload_len > LARGE_PAYLOAD_BYTES {
        LARGE_PAYLOAD_POW_TARGET
    } else {
        DEFAULT_POW_TARGET
    }
}

/// An outbound transport frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewMessage {
    pub ttl: u32,
    pub payload: Vec<u8>,
    pub pow_target: f64,
    pub pow_time: u32,
    pub pubsub_topic: Option<String>,
    pub ephemeral: bool,
}

impl NewMessage {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            ttl: FRAME_TTL_SECS,
            pow_target: calculate_pow(payload.len()),
            pow_time: POW_TIME_SECS,
            payload,
            pubsub_topic: None,
            ephemeral: false,
        }
    }

    pub fn with_pubsub_topic(mut self, topic: Option<String>) -> Self {
        self.pubsub_topic = topic;
        self
    }

    /// Same frame settings, different payload (and a PoW target to match).
    pub fn with_payload(&self, payload: Vec<u8>) -> Self {
        Self {
            pow_target: calculate_pow(payload.len()),
            payload,
            ..self.clone()
        }
    }
}

/// An inbound transport frame as delivered by the network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub hash: FrameHash,
    /// Public key recovered from the frame signature by the transport.
    pub sig_pub_key: Option<PublicKey>,
    /// Key the frame was addressed to, when sent to a key-derived topic.
    pub dst: Option<PublicKey>,
    pub payload: Vec<u8>,
    pub timestamp: u32,
    pub topic: String,
}

/// Transport layer of a received frame after integrity checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportLayer {
    pub hash: FrameHash,
    pub sig_pub_key: PublicKey,
    pub dst: Option<PublicKey>,
    pub payload: Vec<u8>,
    pub timestamp: u32,
}

impl TransportLayer {
    /// Accept a frame into the pipeline. Unsigned or empty frames are rejected.
    pub fn unwrap(frame: &ReceivedFrame) -> Result<Self, WireError> {
        let sig_pub_key = frame.sig_pub_key.ok_or(WireError::MissingSignature)?;
        if frame.payload.is_empty() {
            return Err(WireError::EmptyPayload);
        }
        Ok(Self {
            hash: frame.hash,
            sig_pub_key,
            dst: frame.dst,
            payload: frame.payload.clone(),
            timestamp: frame.timestamp,
        })
    }
}
