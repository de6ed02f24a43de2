use std::sync::Arc;

use courier_shared::protocol::MessageType;
use courier_shared::{GroupId, Identity, MessageId, PublicKey};
use courier_store::RawMessageRecord;

/// Called once with the message (id already assigned) right before it is
/// scheduled. An error aborts the send.
pub type BeforeDispatch = Box<dyn FnOnce(&LogicalMessage) -> anyhow::Result<()> + Send + Sync>;

/// Kind of community key exchange piggybacked on a community send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommunityKeyExchange {
    #[default]
    None,
    /// Send every current key to the recipients.
    Full,
    /// Generate a new group key and distribute it.
    Rekey,
    /// Wrap the payload together with the existing group keys.
    Reuse,
}

/// A to-be-sent unit handed to the dispatcher.
pub struct LogicalMessage {
    /// Assigned by the dispatcher; immutable once set.
    pub id: Option<MessageId>,
    pub local_chat_id: String,
    pub payload: Vec<u8>,
    pub message_type: MessageType,
    /// Defaults to the dispatcher's identity.
    pub sender: Option<Arc<Identity>>,
    pub recipients: Vec<PublicKey>,
    pub resend_automatically: bool,
    pub skip_encryption_layer: bool,
    pub skip_application_wrap: bool,
    pub skip_group_message_wrap: bool,
    pub send_on_personal_topic: bool,
    pub send_push_notification: bool,
    pub ephemeral: bool,
    pub community_id: Option<PublicKey>,
    pub community_key_exchange: CommunityKeyExchange,
    pub hash_ratchet_group_id: Option<GroupId>,
    pub pubsub_topic: Option<String>,
    pub before_dispatch: Option<BeforeDispatch>,
}

impl LogicalMessage {
    pub fn new(payload: Vec<u8>, message_type: MessageType) -> Self {
        Self {
            id: None,
            local_chat_id: String::new(),
            payload,
            message_type,
            sender: None,
            recipients: Vec::new(),
            resend_automatically: false,
            skip_encryption_layer: false,
            skip_application_wrap: false,
            skip_group_message_wrap: false,
            send_on_personal_topic: false,
            send_push_notification: false,
            ephemeral: false,
            community_id: None,
            community_key_exchange: CommunityKeyExchange::None,
            hash_ratchet_group_id: None,
            pubsub_topic: None,
            before_dispatch: None,
        }
    }

    pub fn with_chat_id(mut self, local_chat_id: impl Into<String>) -> Self {
        self.local_chat_id = local_chat_id.into();
        self
    }

    pub fn with_sender(mut self, sender: Arc<Identity>) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_recipients(mut self, recipients: Vec<PublicKey>) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn with_group(mut self, group_id: GroupId) -> Self {
        self.hash_ratchet_group_id = Some(group_id);
        self
    }

    pub fn with_community(mut self, community_id: PublicKey) -> Self {
        self.community_id = Some(community_id);
        self
    }

    pub fn with_key_exchange(mut self, kind: CommunityKeyExchange) -> Self {
        self.community_key_exchange = kind;
        self
    }

    pub fn with_pubsub_topic(mut self, topic: impl Into<String>) -> Self {
        self.pubsub_topic = Some(topic.into());
        self
    }

    pub fn resend_automatically(mut self) -> Self {
        self.resend_automatically = true;
        self
    }

    pub fn skip_encryption(mut self) -> Self {
        self.skip_encryption_layer = true;
        self
    }

    pub fn skip_application_wrap(mut self) -> Self {
        self.skip_application_wrap = true;
        self
    }

    pub fn on_personal_topic(mut self) -> Self {
        self.send_on_personal_topic = true;
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn before_dispatch<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&LogicalMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before_dispatch = Some(Box::new(hook));
        self
    }

    /// Run the pre-dispatch hook, if still present. It is taken out first,
    /// so it can never run twice.
    pub(crate) fn run_before_dispatch(&mut self) -> anyhow::Result<()> {
        match self.before_dispatch.take() {
            Some(hook) => hook(self),
            None => Ok(()),
        }
    }

    /// Durable copy for resend bookkeeping. Requires an assigned id.
    pub fn to_record(&self, last_sent: i64) -> Option<RawMessageRecord> {
        Some(RawMessageRecord {
            id: self.id?,
            local_chat_id: self.local_chat_id.clone(),
            last_sent,
            send_count: 1,
            sent: false,
            message_type: self.message_type,
            resend_automatically: self.resend_automatically,
            recipients: self.recipients.clone(),
            skip_encryption: self.skip_encryption_layer,
            send_push_notification: self.send_push_notification,
            skip_group_message_wrap: self.skip_group_message_wrap,
            send_on_personal_topic: self.send_on_personal_topic,
            payload: self.payload.clone(),
        })
    }
}

impl std::fmt::Debug for LogicalMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalMessage")
            .field("id", &self.id)
            .field("local_chat_id", &self.local_chat_id)
            .field("message_type", &self.message_type)
            .field("payload_len", &self.payload.len())
            .field("recipients", &self.recipients.len())
            .field("resend_automatically", &self.resend_automatically)
            .field("skip_encryption_layer", &self.skip_encryption_layer)
            .field("community_key_exchange", &self.community_key_exchange)
            .field("has_hook", &self.before_dispatch.is_some())
            .finish_non_exhaustive()
    }
}
