//! Wire transport boundary.
//!
//! The transport publishes frames on topics derived from a destination and
//! reports the hash it assigned to each emitted frame. Proof-of-work, topic
//! derivation and peer connectivity all live behind this trait.

use async_trait::async_trait;

use courier_shared::protocol::NewMessage;
use courier_shared::{FrameHash, Identity, MessageId, PublicKey};

/// Where a frame is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// A public chat topic derived from its name.
    Public { chat_name: String },
    /// The recipient's partitioned topic.
    Partitioned(PublicKey),
    /// The recipient's personal topic.
    PersonalTopic(PublicKey),
    /// A topic derived from a negotiated shared secret.
    SharedSecret { recipient: PublicKey, key: Vec<u8> },
    /// The community's own topic.
    Community(PublicKey),
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Largest frame the transport accepts, in bytes.
    fn max_message_size(&self) -> usize;

    /// Publish one frame. Returns the transport-assigned hash.
    async fn send(&self, message: &NewMessage, destination: &Destination)
        -> anyhow::Result<FrameHash>;

    /// Correlate the emitted frames of a logical message with its id.
    fn track(&self, message_id: &MessageId, hashes: &[FrameHash], frames: &[NewMessage]);

    /// Start listening on topics addressed to `identity`.
    async fn load_key_filters(&self, identity: &Identity) -> anyhow::Result<()> {
        let _ = identity;
        Ok(())
    }
}
