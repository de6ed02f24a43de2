//! Receive side of the message dispatcher.
//!
//! transport unwrap -> reassembly -> decrypt -> datasync unwrap -> application decode

use futures::future::join_all;
use tracing::{debug, error, warn};

use courier_shared::protocol::{
    self, ApplicationLayer, ReceivedFrame, SegmentMessage, TransportLayer,
};
use courier_shared::{DataSyncId, FrameHash, GroupId, HashRatchetInfo, KeyId, MessageId, PublicKey};
use courier_store::SegmentOutcome;

use crate::datasync::DatasyncOffer;
use crate::dispatcher::MessageDispatcher;
use crate::encryption::DecryptError;
use crate::error::{DispatchError, Result};

/// One logical message recovered from a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub hash: FrameHash,
    pub transport_sig_pub_key: PublicKey,
    pub timestamp: u32,
    /// Decrypted body, before application decoding.
    pub payload: Vec<u8>,
    /// `None` when the body is not a valid application envelope.
    pub application: Option<ApplicationLayer>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleMessageResponse {
    pub hash: FrameHash,
    pub messages: Vec<ReceivedMessage>,
    pub hash_ratchet_info: Vec<HashRatchetInfo>,
    pub datasync_sender: Option<PublicKey>,
    pub datasync_acks: Vec<DataSyncId>,
    pub datasync_offers: Vec<DatasyncOffer>,
    pub datasync_requests: Vec<DataSyncId>,
    /// Logical messages whose confirmation quorum the acks completed.
    pub confirmed_message_ids: Vec<MessageId>,
    /// Queued frames this message's keys unlocked.
    pub replayed: Vec<HandleMessageResponse>,
}

impl HandleMessageResponse {
    fn new(hash: FrameHash) -> Self {
        Self {
            hash,
            messages: Vec::new(),
            hash_ratchet_info: Vec::new(),
            datasync_sender: None,
            datasync_acks: Vec::new(),
            datasync_offers: Vec::new(),
            datasync_requests: Vec::new(),
            confirmed_message_ids: Vec::new(),
            replayed: Vec::new(),
        }
    }
}

/// What became of one inbound frame. Everything but `Processed` is a
/// protocol signal, not a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Processed(HandleMessageResponse),
    /// A chunk was stored; the rest of its job has not arrived.
    Incomplete,
    /// The chunk belongs to a job that already finished.
    AlreadyCompleted,
    /// Saved until the hash-ratchet key arrives.
    Queued { group_id: GroupId, key_id: KeyId },
    /// No session with the sender. A bundle may have been advertised.
    DeviceNotFound,
}

impl MessageDispatcher {
    /// Run one frame through the receive pipeline.
    pub async fn handle_messages(&self, frame: &ReceivedFrame) -> Result<HandleOutcome> {
        let mut response = match self.process_frame(frame).await? {
            HandleOutcome::Processed(response) => response,
            signal => return Ok(signal),
        };

        if !response.hash_ratchet_info.is_empty() {
            response.replayed = self.replay_queued(&response.hash_ratchet_info).await;
        }

        let at_least_one = self.config.confirmation_quorum.at_least_one();
        response.confirmed_message_ids =
            self.confirm_datasync_acks(&response.datasync_acks, at_least_one)?;
        for replayed in &mut response.replayed {
            replayed.confirmed_message_ids =
                self.confirm_datasync_acks(&replayed.datasync_acks, at_least_one)?;
        }

        Ok(HandleOutcome::Processed(response))
    }

    /// Handle frames concurrently. Failing frames are logged and left out.
    pub async fn handle_batch(&self, frames: &[ReceivedFrame]) -> Vec<(FrameHash, HandleOutcome)> {
        let results = join_all(frames.iter().map(|frame| async move {
            (frame.hash, self.handle_messages(frame).await)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(hash, result)| match result {
                Ok(outcome) => Some((hash, outcome)),
                Err(e) => {
                    error!(hash = %hash, error = %e, "failed to handle an incoming message");
                    None
                }
            })
            .collect()
    }

    async fn process_frame(&self, frame: &ReceivedFrame) -> Result<HandleOutcome> {
        let layer = TransportLayer::unwrap(frame).map_err(|e| {
            error!(hash = %frame.hash, error = %e, "failed to handle transport layer message");
            e
        })?;
        let sender = layer.sig_pub_key;
        let mut payload = layer.payload;

        // Segmentation
        if let Some(segment) = SegmentMessage::decode(&payload)? {
            let now = chrono::Utc::now().timestamp();
            match self.with_db(|db| db.accept_segment(&segment, &sender, now))? {
                SegmentOutcome::AlreadyCompleted => {
                    debug!(hash = %frame.hash, "segmented message already completed");
                    return Ok(HandleOutcome::AlreadyCompleted);
                }
                SegmentOutcome::Incomplete { received, expected } => {
                    debug!(hash = %frame.hash, received, expected, "segmented message incomplete");
                    return Ok(HandleOutcome::Incomplete);
                }
                SegmentOutcome::Completed(joined) => {
                    debug!(hash = %frame.hash, len = joined.len(), "segmented message reassembled");
                    payload = joined;
                }
            }
        }

        // Encryption
        let (key, is_ephemeral) = self
            .ephemeral_keys
            .fetch_decryption_key(layer.dst.as_ref(), &self.identity);
        let mut hash_ratchet_info = Vec::new();

        match self
            .encryption
            .decrypt(&key, &sender, &payload, is_ephemeral)
            .await
        {
            Ok(decrypted) => {
                payload = decrypted.payload;
                hash_ratchet_info = decrypted.hash_ratchet_info;
            }
            Err(DecryptError::NotEncrypted) => {
                debug!(hash = %frame.hash, "not an encrypted message, using payload as is");
            }
            Err(DecryptError::DeviceNotFound) => {
                if !is_ephemeral {
                    if let Err(e) = self.handle_device_not_found(&sender).await {
                        error!(peer = %sender, error = %e, "failed to advertise bundle");
                    }
                }
                return Ok(HandleOutcome::DeviceNotFound);
            }
            Err(DecryptError::GroupKeyNotFound { group_id, key_id }) => {
                // The reassembled payload is queued, not the last chunk.
                let queued = ReceivedFrame {
                    payload,
                    ..frame.clone()
                };
                self.with_db(|db| db.save_hash_ratchet_message(&group_id, &key_id, &queued))?;
                debug!(hash = %frame.hash, group = %group_id, key = %key_id, "queued message until hash ratchet key arrives");
                return Ok(HandleOutcome::Queued { group_id, key_id });
            }
            Err(DecryptError::Other(e)) => {
                error!(hash = %frame.hash, error = %e, "failed to handle encryption layer message");
                return Err(DispatchError::Encryption(e));
            }
        }

        let mut response = HandleMessageResponse::new(frame.hash);
        response.hash_ratchet_info = hash_ratchet_info;

        // Datasync
        let mut bodies = vec![payload];
        if let Some(datasync) = self.datasync_enabled() {
            match datasync.unwrap(&sender, &bodies[0]) {
                Ok(envelope) => {
                    response.datasync_sender = Some(sender);
                    response.datasync_acks = envelope.acks;
                    response.datasync_requests = envelope.requests;
                    response.datasync_offers = envelope.offers;
                    bodies = envelope.messages;
                }
                Err(e) => {
                    debug!(hash = %frame.hash, error = %e, "not a datasync message");
                }
            }
        }

        // Application
        response.messages = bodies
            .into_iter()
            .map(|body| {
                let application = match protocol::decode_application_layer(&body) {
                    Ok(application) => Some(application),
                    Err(e) => {
                        warn!(hash = %frame.hash, error = %e, "failed to decode application layer");
                        None
                    }
                };
                ReceivedMessage {
                    hash: frame.hash,
                    transport_sig_pub_key: sender,
                    timestamp: layer.timestamp,
                    payload: body,
                    application,
                }
            })
            .collect();

        Ok(HandleOutcome::Processed(response))
    }

    /// Reprocess frames waiting for the keys in `infos`. Frames that fail
    /// again stay queued. Store failures are logged, never returned: the
    /// frame that carried the keys has already been processed.
    async fn replay_queued(&self, infos: &[HashRatchetInfo]) -> Vec<HandleMessageResponse> {
        let mut replayed = Vec::new();
        let mut processed: Vec<FrameHash> = Vec::new();

        for info in infos {
            let queued = match self.with_db(|db| db.get_hash_ratchet_messages(&info.key_id)) {
                Ok(queued) => queued,
                Err(e) => {
                    warn!(key_id = ?info.key_id, error = %e, "failed to load queued hash ratchet messages");
                    continue;
                }
            };
            for entry in queued {
                match self.process_frame(&entry.frame).await {
                    Ok(HandleOutcome::Processed(response)) => {
                        processed.push(entry.frame.hash);
                        replayed.push(response);
                    }
                    Ok(signal) => {
                        debug!(hash = %entry.frame.hash, outcome = ?signal, "queued message still not processable");
                    }
                    Err(e) => {
                        warn!(hash = %entry.frame.hash, error = %e, "failed to replay queued message");
                    }
                }
            }
        }

        if !processed.is_empty() {
            match self.with_db(|db| db.delete_hash_ratchet_messages(&processed)) {
                Ok(deleted) => debug!(deleted, "removed replayed hash ratchet messages"),
                Err(e) => warn!(error = %e, "failed to remove replayed hash ratchet messages"),
            }
        }

        replayed
    }

    async fn handle_device_not_found(&self, peer: &PublicKey) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let due = self
            .encryption
            .should_advertise_bundle(peer, now)
            .await
            .map_err(DispatchError::Encryption)?;
        if !due {
            return Ok(());
        }

        debug!(peer = %peer.short(), "device not found, advertising bundle");
        let spec = self
            .encryption
            .bundle_advertise_spec(&self.identity, peer)
            .await
            .map_err(DispatchError::Encryption)?;

        let limit = self.config.advertise_timeout;
        tokio::time::timeout(limit, self.send_spec(peer, &spec, &[], None))
            .await
            .map_err(|_| DispatchError::Timeout(limit))??;

        self.encryption.confirm_bundle_advertisement(peer, now).await;
        Ok(())
    }
}
