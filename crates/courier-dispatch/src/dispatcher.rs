//! Send side of the message dispatcher.
//!
//! Every send path follows the same shape:
//! resolve mode -> wrap and identify -> pre-dispatch hook -> scheduled event
//! -> encrypt / segment / emit -> sent event -> transport tracking.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use courier_shared::constants::{DEFAULT_MAX_MESSAGE_SIZE, PROTOCOL_VERSION};
use courier_shared::crypto;
use courier_shared::protocol::{self, MessageType, NewMessage};
use courier_shared::{DataSyncId, FrameHash, Identity, MessageId, PublicKey};
use courier_store::{Database, PendingConfirmation, RawMessageRecord};

use crate::config::DispatcherConfig;
use crate::datasync::Datasync;
use crate::encryption::{EncryptionLayer, ProtocolMessageSpec, SharedSecret};
use crate::error::{DispatchError, Result};
use crate::events::{EventBus, MessageEvent, MessageEventKind};
use crate::keys::EphemeralKeys;
use crate::message::{CommunityKeyExchange, LogicalMessage};
use crate::mode::DeliveryMode;
use crate::segmentation::SegmentCodec;
use crate::transport::{Destination, Transport};

/// Called with every shared secret produced while building an outbound
/// spec, before the first frame of that spec leaves.
pub type SharedSecretHandler = Arc<dyn Fn(&[SharedSecret]) -> anyhow::Result<()> + Send + Sync>;

/// Frames emitted for one spec and the hashes the transport gave them.
#[derive(Debug, Clone, Default)]
pub struct Dispatched {
    pub hashes: Vec<FrameHash>,
    pub frames: Vec<NewMessage>,
}

pub struct MessageDispatcher {
    pub(crate) identity: Arc<Identity>,
    pub(crate) config: DispatcherConfig,
    pub(crate) db: Arc<Mutex<Database>>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) encryption: Arc<dyn EncryptionLayer>,
    pub(crate) datasync: Option<Arc<dyn Datasync>>,
    pub(crate) ephemeral_keys: EphemeralKeys,
    codec: SegmentCodec,
    events: EventBus,
    shared_secret_handler: RwLock<Option<SharedSecretHandler>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl MessageDispatcher {
    pub fn new(
        identity: Identity,
        database: Database,
        transport: Arc<dyn Transport>,
        encryption: Arc<dyn EncryptionLayer>,
        datasync: Option<Arc<dyn Datasync>>,
        config: DispatcherConfig,
    ) -> Self {
        let max_message_size = match transport.max_message_size() {
            0 => {
                warn!(
                    default = DEFAULT_MAX_MESSAGE_SIZE,
                    "transport reported no frame limit, using default"
                );
                DEFAULT_MAX_MESSAGE_SIZE
            }
            n => n,
        };
        let codec = SegmentCodec::new(max_message_size);

        info!(
            protocol = PROTOCOL_VERSION,
            public_key = %identity.public_key(),
            max_segment_size = codec.max_segment_size(),
            datasync = config.datasync && datasync.is_some(),
            "message dispatcher started"
        );

        Self {
            identity: Arc::new(identity),
            events: EventBus::new(config.event_capacity),
            config,
            db: Arc::new(Mutex::new(database)),
            transport,
            encryption,
            datasync,
            ephemeral_keys: EphemeralKeys::new(),
            codec,
            shared_secret_handler: RwLock::new(None),
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Send paths
    // -----------------------------------------------------------------------

    /// Send a 1:1 message. Auto-resend messages go through datasync.
    pub async fn send_private(
        &self,
        recipient: &PublicKey,
        mut msg: LogicalMessage,
    ) -> Result<MessageId> {
        debug!(site = "send_private", recipient = %recipient.short(), "sending a private message");

        let mode = DeliveryMode::for_private(
            &msg,
            self.datasync_enabled().is_some(),
            &self.public_key(),
            recipient,
        )?;

        let (sender, wrapped, id) = self.prepare(&mut msg)?;
        msg.run_before_dispatch().map_err(DispatchError::Hook)?;
        self.notify_scheduled(Some(*recipient), &msg);

        self.dispatch_private(recipient, &msg, &mode, &sender, &wrapped, id)
            .await
            .map_err(|e| {
                error!(site = "send_private", message_id = %id, error = %e, "failed to send a private message");
                e
            })?;

        Ok(id)
    }

    /// Send one logical message to every member of a private group.
    /// Every recipient gets the same message id.
    pub async fn send_group(
        &self,
        recipients: &[PublicKey],
        mut msg: LogicalMessage,
    ) -> Result<MessageId> {
        debug!(site = "send_group", recipients = recipients.len(), "sending a private group message");

        let modes = self.resolve_private_modes(&msg, recipients)?;
        let (sender, wrapped, id) = self.prepare(&mut msg)?;
        msg.run_before_dispatch().map_err(DispatchError::Hook)?;

        for (recipient, mode) in recipients.iter().zip(&modes) {
            self.notify_scheduled(Some(*recipient), &msg);
            self.dispatch_private(recipient, &msg, mode, &sender, &wrapped, id)
                .await?;
        }

        Ok(id)
    }

    /// Send a community's protected topic key to each listed recipient.
    pub async fn send_pubsub_topic_key(&self, mut msg: LogicalMessage) -> Result<MessageId> {
        debug!(
            site = "send_pubsub_topic_key",
            community = ?msg.community_id,
            "sending the protected topic key for a community"
        );

        msg.sender = None;
        let recipients = msg.recipients.clone();
        let modes = self.resolve_private_modes(&msg, &recipients)?;
        let (sender, wrapped, id) = self.prepare(&mut msg)?;
        msg.run_before_dispatch().map_err(DispatchError::Hook)?;
        self.notify_scheduled(None, &msg);

        for (recipient, mode) in recipients.iter().zip(&modes) {
            self.dispatch_private(recipient, &msg, mode, &sender, &wrapped, id)
                .await?;
        }

        Ok(id)
    }

    /// Send on a public chat topic.
    pub async fn send_public(&self, chat_name: &str, mut msg: LogicalMessage) -> Result<MessageId> {
        debug!(site = "send_public", chat = chat_name, "sending a public message");

        let mode = DeliveryMode::for_public(&msg);
        let (_, wrapped, id) = self.prepare(&mut msg)?;
        msg.run_before_dispatch().map_err(DispatchError::Hook)?;
        self.notify_scheduled(None, &msg);

        let payload = match &mode {
            DeliveryMode::Public { group: Some(group), .. } => {
                debug!(group = %group, "encrypting public message with group key");
                self.encryption
                    .encrypt_group(&self.identity, &msg.recipients, group, &wrapped, false)
                    .await
                    .map_err(DispatchError::Encryption)?
                    .payload
            }
            DeliveryMode::Public { encrypted: true, .. } => {
                self.encryption
                    .encrypt_public(&self.identity, &wrapped)
                    .await
                    .map_err(|e| {
                        error!(error = %e, "failed to wrap a public message in the encryption layer");
                        DispatchError::Encryption(e)
                    })?
                    .payload
            }
            _ => wrapped,
        };

        let mut frame = NewMessage::new(payload).with_pubsub_topic(msg.pubsub_topic.clone());
        frame.ephemeral = msg.ephemeral;

        let frames = self.codec.segment(frame)?;
        let destination = Destination::Public {
            chat_name: chat_name.to_string(),
        };
        let hashes = self.emit(&frames, &destination).await?;

        self.notify_sent(None, vec![id], Some(&msg));
        debug!(message_id = %id, frames = hashes.len(), "sent public message");
        self.transport.track(&id, &hashes, &frames);

        Ok(id)
    }

    /// Send within a community. Chat-like message types go through the
    /// hash ratchet on the chat topic; everything else goes to the
    /// community topic. A key exchange, if requested, precedes the payload.
    pub async fn send_community(&self, mut msg: LogicalMessage) -> Result<MessageId> {
        debug!(site = "send_community", community = ?msg.community_id, "sending a community message");

        let (community_id, group, rekey, encrypted) = match DeliveryMode::for_community(&msg)? {
            DeliveryMode::Community {
                community_id,
                group,
                rekey,
                encrypted,
            } => (community_id, group, rekey, encrypted),
            other => {
                return Err(DispatchError::Configuration(format!(
                    "unexpected community mode {other:?}"
                )))
            }
        };

        msg.sender = None;
        let (_, wrapped, id) = self.prepare(&mut msg)?;
        msg.run_before_dispatch().map_err(DispatchError::Hook)?;
        self.notify_scheduled(None, &msg);

        if msg.community_key_exchange != CommunityKeyExchange::None {
            if let Some(group) = &group {
                let specs = self
                    .encryption
                    .key_exchange_specs(group, &self.identity, &msg.recipients, rekey)
                    .await
                    .map_err(DispatchError::Encryption)?;

                if specs.len() != msg.recipients.len() {
                    warn!(
                        specs = specs.len(),
                        recipients = msg.recipients.len(),
                        "key exchange produced a different number of specs than recipients"
                    );
                }

                for (spec, recipient) in specs.iter().zip(&msg.recipients) {
                    self.send_spec(recipient, spec, &[id], Some(&msg)).await?;
                }
            }
        }

        let (frames, destination) = if encrypted {
            let group = group.as_ref().ok_or_else(|| {
                DispatchError::Configuration("community message requires a group id".into())
            })?;
            let spec = self
                .encryption
                .encrypt_group(&self.identity, &msg.recipients, group, &wrapped, rekey)
                .await
                .map_err(DispatchError::Encryption)?;
            let frame = NewMessage::new(spec.payload).with_pubsub_topic(msg.pubsub_topic.clone());
            (
                self.codec.segment(frame)?,
                Destination::Public {
                    chat_name: msg.local_chat_id.clone(),
                },
            )
        } else {
            let community = community_id.ok_or_else(|| {
                DispatchError::Configuration("community message requires a community id".into())
            })?;
            let payload = match (&group, rekey) {
                (Some(group), true) => {
                    debug!(group = %group, "rekeying community topic message");
                    self.encryption
                        .encrypt_group(&self.identity, &msg.recipients, group, &wrapped, true)
                        .await
                        .map_err(DispatchError::Encryption)?
                        .payload
                }
                _ => wrapped,
            };
            let frame = NewMessage::new(payload).with_pubsub_topic(msg.pubsub_topic.clone());
            (self.codec.segment(frame)?, Destination::Community(community))
        };

        let hashes = self.emit(&frames, &destination).await.map_err(|e| {
            error!(site = "send_community", error = %e, "failed to send a community message");
            e
        })?;

        self.notify_sent(None, vec![id], Some(&msg));
        debug!(message_id = %id, frames = hashes.len(), "sent community message");
        self.transport.track(&id, &hashes, &frames);

        Ok(id)
    }

    /// Send to one of our own devices using static DH encryption.
    pub async fn send_pair_installation(
        &self,
        recipient: &PublicKey,
        mut msg: LogicalMessage,
    ) -> Result<MessageId> {
        debug!(site = "send_pair_installation", recipient = %recipient.short(), "sending pair installation");

        msg.sender = None;
        let (_, wrapped, id) = self.prepare(&mut msg)?;
        msg.run_before_dispatch().map_err(DispatchError::Hook)?;
        self.notify_scheduled(Some(*recipient), &msg);

        let spec = self
            .encryption
            .encrypt_dh(&self.identity, recipient, &wrapped)
            .await
            .map_err(DispatchError::Encryption)?;
        let dispatched = self.send_spec(recipient, &spec, &[id], Some(&msg)).await?;
        self.transport.track(&id, &dispatched.hashes, &dispatched.frames);

        Ok(id)
    }

    /// Send a spec built by the encryption layer outside a logical message.
    pub async fn send_message_spec(
        &self,
        recipient: &PublicKey,
        spec: &ProtocolMessageSpec,
        message_ids: &[MessageId],
    ) -> Result<Dispatched> {
        self.send_spec(recipient, spec, message_ids, None).await
    }

    // -----------------------------------------------------------------------
    // Registries, persistence and lifecycle
    // -----------------------------------------------------------------------

    pub fn subscribe_to_message_events(&self) -> mpsc::Receiver<MessageEvent> {
        self.events.subscribe()
    }

    /// Decrypt frames addressed to `identity` from now on.
    pub async fn add_ephemeral_key(&self, identity: Identity) -> Result<()> {
        let identity = Arc::new(identity);
        self.ephemeral_keys.insert(identity.clone());
        self.transport
            .load_key_filters(&identity)
            .await
            .map_err(DispatchError::Transport)
    }

    pub fn set_shared_secret_handler<F>(&self, handler: F)
    where
        F: Fn(&[SharedSecret]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut slot = self
            .shared_secret_handler
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(Arc::new(handler));
    }

    pub fn save_raw_message(&self, record: &RawMessageRecord) -> Result<()> {
        self.with_db(|db| db.save_raw_message(record))
    }

    pub fn raw_message(&self, id: &MessageId) -> Result<RawMessageRecord> {
        self.with_db(|db| db.raw_message_by_id(id))
    }

    /// Record the datasync acks and return the message ids whose quorum is
    /// now met. Each id is reported once per call.
    pub fn confirm_datasync_acks(
        &self,
        acks: &[DataSyncId],
        at_least_one: bool,
    ) -> Result<Vec<MessageId>> {
        if acks.is_empty() {
            return Ok(Vec::new());
        }

        let now = chrono::Utc::now().timestamp();
        let mut confirmed = Vec::new();
        for ack in acks {
            if let Some(id) = self.with_db(|db| db.mark_as_confirmed(ack, at_least_one, now))? {
                if !confirmed.contains(&id) {
                    debug!(message_id = %id, datasync_id = %ack, "message confirmed");
                    confirmed.push(id);
                }
            }
        }
        Ok(confirmed)
    }

    /// Prune stale segments and completed tombstones.
    pub fn cleanup_segments(&self) -> Result<()> {
        cleanup(&self.db, &self.config)
    }

    /// Run [`cleanup_segments`](Self::cleanup_segments) every `interval` on
    /// the current runtime until [`stop`](Self::stop).
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn spawn_segment_cleanup(&self, interval: Duration) {
        let db = self.db.clone();
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = cleanup(&db, &config) {
                    warn!(error = %e, "segment cleanup failed");
                }
            }
        });

        let mut slot = self
            .cleanup_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Close all event subscriptions and stop background work.
    pub fn stop(&self) {
        self.events.stop();
        let task = self
            .cleanup_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
        info!("message dispatcher stopped");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    pub(crate) fn with_db<T>(
        &self,
        f: impl FnOnce(&mut Database) -> courier_store::Result<T>,
    ) -> Result<T> {
        let mut db = self.db.lock().map_err(|_| DispatchError::LockPoisoned)?;
        Ok(f(&mut db)?)
    }

    pub(crate) fn datasync_enabled(&self) -> Option<&Arc<dyn Datasync>> {
        if self.config.datasync {
            self.datasync.as_ref()
        } else {
            None
        }
    }

    fn resolve_private_modes(
        &self,
        msg: &LogicalMessage,
        recipients: &[PublicKey],
    ) -> Result<Vec<DeliveryMode>> {
        let local = self.public_key();
        let datasync = self.datasync_enabled().is_some();
        recipients
            .iter()
            .map(|recipient| DeliveryMode::for_private(msg, datasync, &local, recipient))
            .collect()
    }

    /// Wrap the payload (unless told not to) and assign the message id.
    fn prepare(&self, msg: &mut LogicalMessage) -> Result<(Arc<Identity>, Vec<u8>, MessageId)> {
        let sender = msg.sender.clone().unwrap_or_else(|| self.identity.clone());
        let wrapped = if msg.skip_application_wrap {
            msg.payload.clone()
        } else {
            protocol::wrap_message(&msg.payload, msg.message_type, &sender)?
        };

        let id = crypto::message_id(&sender.public_key(), &wrapped);
        msg.id = Some(id);
        Ok((sender, wrapped, id))
    }

    /// One 1:1 leg, after the hook and scheduled event.
    async fn dispatch_private(
        &self,
        recipient: &PublicKey,
        msg: &LogicalMessage,
        mode: &DeliveryMode,
        sender: &Identity,
        wrapped: &[u8],
        id: MessageId,
    ) -> Result<()> {
        match mode {
            DeliveryMode::Datasync { group_id } => {
                let datasync = self.datasync_enabled().ok_or_else(|| {
                    DispatchError::Configuration("datasync is not available".into())
                })?;

                datasync
                    .ensure_peer_in_group(group_id, recipient)
                    .await
                    .map_err(DispatchError::Datasync)?;
                let datasync_id = datasync
                    .append_message(group_id, wrapped)
                    .await
                    .map_err(DispatchError::Datasync)?;

                // Our own devices do not confirm.
                if *recipient != self.public_key() {
                    let confirmation = PendingConfirmation::new(datasync_id, id, *recipient);
                    self.with_db(|db| db.insert_pending_confirmation(&confirmation))?;
                }

                debug!(message_id = %id, datasync_id = %datasync_id, "handed message to datasync");
            }

            DeliveryMode::RawPassthrough {
                reuse_group_keys,
                personal_topic,
            } => {
                let payload = match reuse_group_keys {
                    Some(group) => self
                        .encryption
                        .key_exchange_with_payload(&self.identity, recipient, group, wrapped)
                        .await
                        .map_err(DispatchError::Encryption)?,
                    None => wrapped.to_vec(),
                };

                let frame = NewMessage::new(payload).with_pubsub_topic(msg.pubsub_topic.clone());
                let frames = self.codec.segment(frame)?;
                let destination = if *personal_topic {
                    Destination::PersonalTopic(*recipient)
                } else {
                    Destination::Partitioned(*recipient)
                };
                let hashes = self.emit(&frames, &destination).await?;

                self.notify_sent(Some(*recipient), vec![id], Some(msg));
                debug!(message_id = %id, frames = hashes.len(), "sent private message skipping encryption");
                self.transport.track(&id, &hashes, &frames);
            }

            DeliveryMode::OneToOne => {
                let spec = self
                    .encryption
                    .encrypt_one_to_one(sender, recipient, wrapped)
                    .await
                    .map_err(DispatchError::Encryption)?;
                let dispatched = self.send_spec(recipient, &spec, &[id], Some(msg)).await?;

                debug!(message_id = %id, frames = dispatched.hashes.len(), "sent private message without datasync");
                self.transport.track(&id, &dispatched.hashes, &dispatched.frames);
            }

            other => {
                return Err(DispatchError::Configuration(format!(
                    "{other:?} cannot be delivered to a single recipient"
                )))
            }
        }

        Ok(())
    }

    /// Frame, segment and emit an encrypted spec to one recipient, picking
    /// the shared-secret topic when both sides agreed on one.
    pub(crate) async fn send_spec(
        &self,
        recipient: &PublicKey,
        spec: &ProtocolMessageSpec,
        message_ids: &[MessageId],
        context: Option<&LogicalMessage>,
    ) -> Result<Dispatched> {
        let frames = self.codec.segment(NewMessage::new(spec.payload.clone()))?;

        let destination = match (&spec.shared_secret, spec.agreed_secret) {
            (Some(secret), true) => {
                debug!("sending using shared secret");
                Destination::SharedSecret {
                    recipient: *recipient,
                    key: secret.key.clone(),
                }
            }
            (None, true) => {
                warn!(recipient = %recipient, "agreed secret without a shared secret, using partitioned topic");
                Destination::Partitioned(*recipient)
            }
            _ => {
                debug!("sending partitioned topic");
                Destination::Partitioned(*recipient)
            }
        };

        let mut hashes = Vec::with_capacity(frames.len());
        for frame in &frames {
            // The topic must exist before a reply can arrive on it.
            if let Some(secret) = &spec.shared_secret {
                self.handle_shared_secret(secret)?;
            }
            hashes.push(self.send_frame(frame, &destination).await?);
        }

        self.notify_sent(Some(*recipient), message_ids.to_vec(), context);

        Ok(Dispatched { hashes, frames })
    }

    fn handle_shared_secret(&self, secret: &SharedSecret) -> Result<()> {
        let handler = self
            .shared_secret_handler
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        match handler {
            Some(handler) => {
                handler(std::slice::from_ref(secret)).map_err(DispatchError::SharedSecret)
            }
            None => Ok(()),
        }
    }

    /// Emit frames in index order. The first failure aborts; frames already
    /// sent are not recalled.
    async fn emit(&self, frames: &[NewMessage], destination: &Destination) -> Result<Vec<FrameHash>> {
        let mut hashes = Vec::with_capacity(frames.len());
        for frame in frames {
            hashes.push(self.send_frame(frame, destination).await?);
        }
        Ok(hashes)
    }

    async fn send_frame(&self, frame: &NewMessage, destination: &Destination) -> Result<FrameHash> {
        let send = self.transport.send(frame, destination);
        let sent = match self.config.send_timeout {
            Some(limit) => tokio::time::timeout(limit, send)
                .await
                .map_err(|_| DispatchError::Timeout(limit))?,
            None => send.await,
        };
        sent.map_err(DispatchError::Transport)
    }

    fn notify_scheduled(&self, recipient: Option<PublicKey>, msg: &LogicalMessage) {
        self.events.publish(MessageEvent {
            kind: MessageEventKind::Scheduled,
            recipient,
            message_ids: msg.id.into_iter().collect(),
            local_chat_id: msg.local_chat_id.clone(),
            message_type: Some(msg.message_type),
        });
    }

    fn notify_sent(
        &self,
        recipient: Option<PublicKey>,
        message_ids: Vec<MessageId>,
        context: Option<&LogicalMessage>,
    ) {
        let (local_chat_id, message_type): (String, Option<MessageType>) = match context {
            Some(msg) => (msg.local_chat_id.clone(), Some(msg.message_type)),
            None => (String::new(), None),
        };

        self.events.publish(MessageEvent {
            kind: MessageEventKind::Sent,
            recipient,
            message_ids,
            local_chat_id,
            message_type,
        });
    }
}

impl Drop for MessageDispatcher {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.cleanup_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}

fn cleanup(db: &Mutex<Database>, config: &DispatcherConfig) -> Result<()> {
    const DAY_SECS: i64 = 24 * 60 * 60;

    let now = chrono::Utc::now().timestamp();
    let db = db.lock().map_err(|_| DispatchError::LockPoisoned)?;

    let segments =
        db.remove_message_segments_older_than(now - config.segment_retention_days * DAY_SECS)?;
    let completed = db.remove_message_segments_completed_older_than(
        now - config.completed_retention_days * DAY_SECS,
    )?;

    info!(segments, completed, "pruned stale segments");
    Ok(())
}
