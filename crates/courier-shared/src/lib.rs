//! # courier-shared
//!
//! Identity, identifiers and wire codecs shared by the store and the
//! dispatcher.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;

pub use error::{IdentityError, WireError};
pub use identity::Identity;
pub use types::{DataSyncId, FrameHash, GroupId, HashRatchetInfo, KeyId, MessageId, PublicKey};
