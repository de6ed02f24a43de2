//! In-memory collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

use courier_dispatch::{
    DatasyncPayload, DecryptError, DecryptedMessage, Destination, DispatcherConfig,
    EncryptionLayer, MessageDispatcher, ProtocolMessageSpec, SharedSecret, Transport,
};
use courier_dispatch::datasync::Datasync;
use courier_shared::crypto;
use courier_shared::protocol::{NewMessage, ReceivedFrame};
use courier_shared::{
    DataSyncId, FrameHash, GroupId, HashRatchetInfo, Identity, KeyId, MessageId, PublicKey,
};
use courier_store::Database;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SentFrame {
    pub hash: FrameHash,
    pub message: NewMessage,
    pub destination: Destination,
}

pub struct FakeTransport {
    max_message_size: usize,
    counter: AtomicU64,
    pub fail: AtomicBool,
    /// Each send sleeps this long before recording the frame.
    pub delay: Mutex<Option<Duration>>,
    pub sent: Mutex<Vec<SentFrame>>,
    pub tracked: Mutex<Vec<(MessageId, Vec<FrameHash>)>>,
    pub filters: Mutex<Vec<PublicKey>>,
}

impl FakeTransport {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            counter: AtomicU64::new(0),
            fail: AtomicBool::new(false),
            delay: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            tracked: Mutex::new(Vec::new()),
            filters: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Every emitted frame, as the recipient's transport would deliver it.
    pub fn delivered(&self, sender: PublicKey) -> Vec<ReceivedFrame> {
        self.sent()
            .into_iter()
            .map(|frame| received(sender, &frame))
            .collect()
    }
}

pub fn received(sender: PublicKey, frame: &SentFrame) -> ReceivedFrame {
    let dst = match &frame.destination {
        Destination::Partitioned(pk) | Destination::PersonalTopic(pk) => Some(*pk),
        Destination::SharedSecret { recipient, .. } => Some(*recipient),
        Destination::Public { .. } | Destination::Community(_) => None,
    };
    ReceivedFrame {
        hash: frame.hash,
        sig_pub_key: Some(sender),
        dst,
        payload: frame.message.payload.clone(),
        timestamp: 1_700_000_000,
        topic: "test-topic".to_string(),
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    async fn send(&self, message: &NewMessage, destination: &Destination) -> anyhow::Result<FrameHash> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("transport offline");
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let mut input = n.to_be_bytes().to_vec();
        input.extend_from_slice(&message.payload);
        let hash = FrameHash(crypto::hash(&input));

        self.sent.lock().unwrap().push(SentFrame {
            hash,
            message: message.clone(),
            destination: destination.clone(),
        });
        Ok(hash)
    }

    fn track(&self, message_id: &MessageId, hashes: &[FrameHash], _frames: &[NewMessage]) {
        self.tracked
            .lock()
            .unwrap()
            .push((*message_id, hashes.to_vec()));
    }

    async fn load_key_filters(&self, identity: &Identity) -> anyhow::Result<()> {
        self.filters.lock().unwrap().push(identity.public_key());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

const ENCRYPTED: &[u8] = b"FAKE";

/// Tagged passthrough "encryption". After the `FAKE` prefix:
/// `E` 1:1 / public / DH, `G<key>` hash-ratchet group, `K<key>` key exchange,
/// `B` bundle advertisement. Payloads without the prefix are not encrypted.
pub struct FakeEncryption {
    pub group_id: GroupId,
    pub current_key: Mutex<u8>,
    pub known_keys: Mutex<HashSet<u8>>,
    pub unknown_devices: Mutex<HashSet<PublicKey>>,
    pub shared_secret: Mutex<Option<SharedSecret>>,
    pub advertise_due: AtomicBool,
    pub advertised: Mutex<Vec<PublicKey>>,
    pub decrypt_calls: Mutex<Vec<(PublicKey, bool)>>,
    pub fail_encrypt: AtomicBool,
}

impl FakeEncryption {
    pub fn new() -> Self {
        Self {
            group_id: GroupId(vec![0xaa]),
            current_key: Mutex::new(1),
            known_keys: Mutex::new(HashSet::new()),
            unknown_devices: Mutex::new(HashSet::new()),
            shared_secret: Mutex::new(None),
            advertise_due: AtomicBool::new(true),
            advertised: Mutex::new(Vec::new()),
            decrypt_calls: Mutex::new(Vec::new()),
            fail_encrypt: AtomicBool::new(false),
        }
    }

    fn tagged(&self, tag: u8, payload: &[u8]) -> anyhow::Result<ProtocolMessageSpec> {
        if self.fail_encrypt.load(Ordering::SeqCst) {
            anyhow::bail!("no session");
        }
        let mut spec = ProtocolMessageSpec::new(seal(&[tag], payload));
        if let Some(secret) = self.shared_secret.lock().unwrap().clone() {
            spec.shared_secret = Some(secret);
            spec.agreed_secret = true;
        }
        Ok(spec)
    }

    fn key(&self) -> u8 {
        *self.current_key.lock().unwrap()
    }
}

pub fn seal(tag: &[u8], payload: &[u8]) -> Vec<u8> {
    let mut out = ENCRYPTED.to_vec();
    out.extend_from_slice(tag);
    out.extend_from_slice(payload);
    out
}

#[async_trait]
impl EncryptionLayer for FakeEncryption {
    async fn encrypt_one_to_one(
        &self,
        _sender: &Identity,
        _recipient: &PublicKey,
        payload: &[u8],
    ) -> anyhow::Result<ProtocolMessageSpec> {
        self.tagged(b'E', payload)
    }

    async fn encrypt_public(&self, _sender: &Identity, payload: &[u8]) -> anyhow::Result<ProtocolMessageSpec> {
        self.tagged(b'E', payload)
    }

    async fn encrypt_group(
        &self,
        _sender: &Identity,
        _recipients: &[PublicKey],
        _group_id: &GroupId,
        payload: &[u8],
        _rekey: bool,
    ) -> anyhow::Result<ProtocolMessageSpec> {
        Ok(ProtocolMessageSpec::new(seal(&[b'G', self.key()], payload)))
    }

    async fn encrypt_dh(
        &self,
        _sender: &Identity,
        _recipient: &PublicKey,
        payload: &[u8],
    ) -> anyhow::Result<ProtocolMessageSpec> {
        self.tagged(b'E', payload)
    }

    async fn key_exchange_specs(
        &self,
        _group_id: &GroupId,
        _sender: &Identity,
        recipients: &[PublicKey],
        force_rekey: bool,
    ) -> anyhow::Result<Vec<ProtocolMessageSpec>> {
        if force_rekey {
            *self.current_key.lock().unwrap() += 1;
        }
        let key = self.key();
        Ok(recipients
            .iter()
            .map(|_| ProtocolMessageSpec::new(seal(&[b'K', key], &[])))
            .collect())
    }

    async fn key_exchange_with_payload(
        &self,
        _sender: &Identity,
        _recipient: &PublicKey,
        _group_id: &GroupId,
        payload: &[u8],
    ) -> anyhow::Result<Vec<u8>> {
        Ok(seal(&[b'K', self.key()], payload))
    }

    async fn decrypt(
        &self,
        recipient: &Identity,
        sender: &PublicKey,
        payload: &[u8],
        skip_negotiation: bool,
    ) -> Result<DecryptedMessage, DecryptError> {
        self.decrypt_calls
            .lock()
            .unwrap()
            .push((recipient.public_key(), skip_negotiation));

        if self.unknown_devices.lock().unwrap().contains(sender) {
            return Err(DecryptError::DeviceNotFound);
        }

        let Some(body) = payload.strip_prefix(ENCRYPTED) else {
            return Err(DecryptError::NotEncrypted);
        };

        match body {
            [b'E', rest @ ..] | [b'B', rest @ ..] => Ok(DecryptedMessage {
                payload: rest.to_vec(),
                hash_ratchet_info: Vec::new(),
            }),
            [b'K', key, rest @ ..] => {
                self.known_keys.lock().unwrap().insert(*key);
                Ok(DecryptedMessage {
                    payload: rest.to_vec(),
                    hash_ratchet_info: vec![HashRatchetInfo {
                        group_id: self.group_id.clone(),
                        key_id: KeyId(vec![*key]),
                    }],
                })
            }
            [b'G', key, rest @ ..] => {
                if self.known_keys.lock().unwrap().contains(key) {
                    Ok(DecryptedMessage {
                        payload: rest.to_vec(),
                        hash_ratchet_info: Vec::new(),
                    })
                } else {
                    Err(DecryptError::GroupKeyNotFound {
                        group_id: self.group_id.clone(),
                        key_id: KeyId(vec![*key]),
                    })
                }
            }
            _ => Err(DecryptError::Other(anyhow::anyhow!("unknown fake tag"))),
        }
    }

    async fn should_advertise_bundle(&self, _peer: &PublicKey, _now: i64) -> anyhow::Result<bool> {
        Ok(self.advertise_due.load(Ordering::SeqCst))
    }

    async fn bundle_advertise_spec(
        &self,
        _sender: &Identity,
        _peer: &PublicKey,
    ) -> anyhow::Result<ProtocolMessageSpec> {
        Ok(ProtocolMessageSpec::new(seal(b"B", &[])))
    }

    async fn confirm_bundle_advertisement(&self, peer: &PublicKey, _now: i64) {
        self.advertised.lock().unwrap().push(*peer);
        self.advertise_due.store(false, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Datasync
// ---------------------------------------------------------------------------

const ACK_TAG: &[u8] = b"SYNCACK";

/// Appends are stored, never delivered. `SYNCACK` followed by 32-byte ids is
/// the only envelope `unwrap` understands.
#[derive(Default)]
pub struct FakeDatasync {
    pub members: Mutex<Vec<(GroupId, PublicKey)>>,
    pub appended: Mutex<Vec<(GroupId, Vec<u8>, DataSyncId)>>,
}

impl FakeDatasync {
    pub fn ack_envelope(ids: &[DataSyncId]) -> Vec<u8> {
        let mut out = ACK_TAG.to_vec();
        for id in ids {
            out.extend_from_slice(id.as_bytes());
        }
        out
    }

    pub fn appended_ids(&self) -> Vec<DataSyncId> {
        self.appended
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, id)| *id)
            .collect()
    }
}

#[async_trait]
impl Datasync for FakeDatasync {
    async fn ensure_peer_in_group(&self, group_id: &GroupId, peer: &PublicKey) -> anyhow::Result<()> {
        let mut members = self.members.lock().unwrap();
        if !members.iter().any(|(g, p)| g == group_id && p == peer) {
            members.push((group_id.clone(), *peer));
        }
        Ok(())
    }

    async fn append_message(&self, group_id: &GroupId, payload: &[u8]) -> anyhow::Result<DataSyncId> {
        let mut appended = self.appended.lock().unwrap();
        let mut input = (appended.len() as u64).to_be_bytes().to_vec();
        input.extend_from_slice(payload);
        let id = DataSyncId(crypto::hash(&input));
        appended.push((group_id.clone(), payload.to_vec(), id));
        Ok(id)
    }

    fn unwrap(&self, _sender: &PublicKey, payload: &[u8]) -> anyhow::Result<DatasyncPayload> {
        let body = payload
            .strip_prefix(ACK_TAG)
            .ok_or_else(|| anyhow::anyhow!("not a datasync envelope"))?;
        let acks = body
            .chunks(32)
            .map(DataSyncId::from_slice)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DatasyncPayload {
            acks,
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dispatcher: MessageDispatcher,
    pub transport: Arc<FakeTransport>,
    pub encryption: Arc<FakeEncryption>,
    pub datasync: Arc<FakeDatasync>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(Identity::generate(), 100_000, DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        Self::with(Identity::generate(), 100_000, config)
    }

    pub fn with(identity: Identity, max_message_size: usize, config: DispatcherConfig) -> Self {
        Self::with_database(
            identity,
            max_message_size,
            config,
            Database::open_in_memory().unwrap(),
        )
    }

    pub fn with_database(
        identity: Identity,
        max_message_size: usize,
        config: DispatcherConfig,
        database: Database,
    ) -> Self {
        init_tracing();

        let transport = Arc::new(FakeTransport::new(max_message_size));
        let encryption = Arc::new(FakeEncryption::new());
        let datasync = Arc::new(FakeDatasync::default());

        let dispatcher = MessageDispatcher::new(
            identity,
            database,
            transport.clone(),
            encryption.clone(),
            Some(datasync.clone()),
            config,
        );

        Self {
            dispatcher,
            transport,
            encryption,
            datasync,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.dispatcher.public_key()
    }
}
