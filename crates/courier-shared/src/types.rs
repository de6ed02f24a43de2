use serde::{Deserialize, Serialize};

use crate::error::WireError;

macro_rules! fixed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, WireError> {
                let bytes = hex::decode(s.trim_start_matches("0x"))?;
                Self::from_slice(&bytes)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, WireError> {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| WireError::InvalidLength {
                    expected: 32,
                    actual: bytes.len(),
                })?;
                Ok(Self(arr))
            }

            pub fn short(&self) -> String {
                self.to_hex()[..8].to_string()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "0x{}", self.to_hex())
            }
        }
    };
}

fixed_id!(
    /// Ed25519 public key of a peer. Doubles as the peer's identity.
    PublicKey
);

fixed_id!(
    /// Content-derived identity of a logical message.
    MessageId
);

fixed_id!(
    /// Hash assigned by the transport to one emitted or received frame.
    FrameHash
);

fixed_id!(
    /// Identifier the datasync subsystem assigns to an appended payload.
    DataSyncId
);

/// Hash-ratchet group (or datasync group) identifier. Variable length.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct GroupId(pub Vec<u8>);

impl GroupId {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// Identifier of one key within a hash-ratchet group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct KeyId(pub Vec<u8>);

impl KeyId {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

/// A `(group, key)` pair reported by the encryption layer for a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct HashRatchetInfo {
    pub group_id: GroupId,
    pub key_id: KeyId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip_accepts_prefix() {
        let key = PublicKey([7u8; 32]);
        let shown = key.to_string();
        assert!(shown.starts_with("0x"));
        assert_eq!(PublicKey::from_hex(&shown).unwrap(), key);
    }

    #[test]
    fn test_from_slice_rejects_wrong_length() {
        let err = MessageId::from_slice(&[1, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            WireError::InvalidLength {
                expected: 32,
                actual: 3
            }
        ));
    }

    #[test]
    fn test_short() {
        let id = MessageId([0xab; 32]);
        assert_eq!(id.short(), "abababab");
    }
}
