//! # courier-dispatch
//!
//! Outbound and inbound message pipeline: delivery mode selection,
//! segmentation, encryption and datasync hand-off, lifecycle events, and the
//! receive path that reverses it.
//!
//! Encryption, datasync and the wire transport are supplied by the caller
//! through the [`EncryptionLayer`], [`Datasync`] and [`Transport`] traits.

pub mod config;
pub mod datasync;
pub mod dispatcher;
pub mod encryption;
pub mod error;
pub mod events;
pub mod keys;
pub mod message;
pub mod mode;
pub mod receive;
pub mod segmentation;
pub mod transport;

pub use config::{ConfirmationQuorum, DispatcherConfig};
pub use datasync::{Datasync, DatasyncOffer, DatasyncPayload};
pub use dispatcher::{Dispatched, MessageDispatcher, SharedSecretHandler};
pub use encryption::{DecryptError, DecryptedMessage, EncryptionLayer, ProtocolMessageSpec, SharedSecret};
pub use error::{DispatchError, Result};
pub use events::{EventBus, MessageEvent, MessageEventKind};
pub use message::{BeforeDispatch, CommunityKeyExchange, LogicalMessage};
pub use mode::DeliveryMode;
pub use receive::{HandleMessageResponse, HandleOutcome, ReceivedMessage};
pub use segmentation::SegmentCodec;
pub use transport::{Destination, Transport};
