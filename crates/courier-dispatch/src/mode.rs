//! Delivery mode selection.
//!
//! A send's flags are resolved once, up front, into a [`DeliveryMode`].
//! Resolution is also where conflicting flags are rejected, so a
//! configuration error never has side effects.

use courier_shared::{crypto, GroupId, PublicKey};

use crate::error::{DispatchError, Result};
use crate::message::{CommunityKeyExchange, LogicalMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Hand the wrapped payload to datasync for reliable delivery.
    Datasync { group_id: GroupId },
    /// Bypass the encryption layer. With `reuse_group_keys` the payload is
    /// first bundled with the group's existing keys.
    RawPassthrough {
        reuse_group_keys: Option<GroupId>,
        personal_topic: bool,
    },
    /// Encrypt for one recipient.
    OneToOne,
    /// Public chat. Encrypted with the group key when `group` is set,
    /// wrapped by the public encryption layer when `encrypted`.
    Public {
        group: Option<GroupId>,
        encrypted: bool,
    },
    /// Community send. `encrypted` sends go through the hash ratchet on the
    /// chat topic; the rest go to the community topic.
    Community {
        community_id: Option<PublicKey>,
        group: Option<GroupId>,
        rekey: bool,
        encrypted: bool,
    },
}

impl DeliveryMode {
    /// Flags that datasync cannot carry.
    pub fn validate(msg: &LogicalMessage) -> Result<()> {
        if msg.resend_automatically
            && (msg.sender.is_some() || msg.skip_encryption_layer || msg.send_on_personal_topic)
        {
            return Err(DispatchError::Configuration(
                "setting identity, skip-encryption or personal topic and datasync not supported"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Mode of one 1:1 leg of a private, group or key-distribution send.
    pub fn for_private(
        msg: &LogicalMessage,
        datasync_enabled: bool,
        local: &PublicKey,
        recipient: &PublicKey,
    ) -> Result<Self> {
        Self::validate(msg)?;

        if datasync_enabled && msg.resend_automatically {
            let group_id = match &msg.community_id {
                Some(community) => crypto::community_group_id(community),
                None => crypto::one_to_one_group_id(local, recipient),
            };
            return Ok(Self::Datasync { group_id });
        }

        if msg.skip_encryption_layer {
            let reuse_group_keys = if msg.community_key_exchange == CommunityKeyExchange::Reuse {
                Some(msg.hash_ratchet_group_id.clone().ok_or_else(|| {
                    DispatchError::Configuration(
                        "key reuse requires a hash ratchet group id".into(),
                    )
                })?)
            } else {
                None
            };
            return Ok(Self::RawPassthrough {
                reuse_group_keys,
                personal_topic: msg.send_on_personal_topic,
            });
        }

        Ok(Self::OneToOne)
    }

    pub fn for_public(msg: &LogicalMessage) -> Self {
        Self::Public {
            group: msg
                .hash_ratchet_group_id
                .clone()
                .filter(|g| !g.is_empty()),
            encrypted: !msg.skip_encryption_layer,
        }
    }

    pub fn for_community(msg: &LogicalMessage) -> Result<Self> {
        let group = msg
            .hash_ratchet_group_id
            .clone()
            .filter(|g| !g.is_empty());
        let encrypted = msg.message_type.should_community_message_be_encrypted();

        if (encrypted || msg.community_key_exchange != CommunityKeyExchange::None)
            && group.is_none()
        {
            return Err(DispatchError::Configuration(
                "community message requires a hash ratchet group id".into(),
            ));
        }
        if !encrypted && msg.community_id.is_none() {
            return Err(DispatchError::Configuration(
                "community message requires a community id".into(),
            ));
        }

        Ok(Self::Community {
            community_id: msg.community_id,
            group,
            rekey: msg.community_key_exchange == CommunityKeyExchange::Rekey,
            encrypted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_shared::protocol::MessageType;
    use courier_shared::Identity;
    use std::sync::Arc;

    fn msg() -> LogicalMessage {
        LogicalMessage::new(b"x".to_vec(), MessageType::ChatMessage)
    }

    const LOCAL: PublicKey = PublicKey([1; 32]);
    const PEER: PublicKey = PublicKey([2; 32]);

    #[test]
    fn test_resend_conflicts_rejected() {
        let cases = [
            msg().resend_automatically().skip_encryption(),
            msg().resend_automatically().on_personal_topic(),
            msg()
                .resend_automatically()
                .with_sender(Arc::new(Identity::generate())),
        ];
        for m in &cases {
            let err = DeliveryMode::for_private(m, true, &LOCAL, &PEER).unwrap_err();
            assert!(err.is_configuration());
        }
    }

    #[test]
    fn test_datasync_group_is_order_independent() {
        let m = msg().resend_automatically();
        let a = DeliveryMode::for_private(&m, true, &LOCAL, &PEER).unwrap();
        let b = DeliveryMode::for_private(&m, true, &PEER, &LOCAL).unwrap();
        assert_eq!(a, b);
        assert!(matches!(a, DeliveryMode::Datasync { .. }));
    }

    #[test]
    fn test_datasync_disabled_falls_back_to_encrypted() {
        let m = msg().resend_automatically();
        assert_eq!(
            DeliveryMode::for_private(&m, false, &LOCAL, &PEER).unwrap(),
            DeliveryMode::OneToOne
        );
    }

    #[test]
    fn test_raw_passthrough_with_key_reuse() {
        let m = msg()
            .skip_encryption()
            .with_key_exchange(CommunityKeyExchange::Reuse)
            .with_group(GroupId(vec![7]));
        assert_eq!(
            DeliveryMode::for_private(&m, true, &LOCAL, &PEER).unwrap(),
            DeliveryMode::RawPassthrough {
                reuse_group_keys: Some(GroupId(vec![7])),
                personal_topic: false
            }
        );

        let missing_group = msg()
            .skip_encryption()
            .with_key_exchange(CommunityKeyExchange::Reuse);
        assert!(DeliveryMode::for_private(&missing_group, true, &LOCAL, &PEER).is_err());
    }

    #[test]
    fn test_community_requirements() {
        let chat = msg();
        assert!(DeliveryMode::for_community(&chat).is_err());

        let chat = msg().with_group(GroupId(vec![1]));
        assert!(matches!(
            DeliveryMode::for_community(&chat).unwrap(),
            DeliveryMode::Community { encrypted: true, rekey: false, .. }
        ));

        let description = LogicalMessage::new(vec![1], MessageType::CommunityDescription);
        assert!(DeliveryMode::for_community(&description).is_err());
        let description = description.with_community(PEER);
        assert!(matches!(
            DeliveryMode::for_community(&description).unwrap(),
            DeliveryMode::Community { encrypted: false, .. }
        ));
    }

    #[test]
    fn test_public_mode() {
        assert_eq!(
            DeliveryMode::for_public(&msg()),
            DeliveryMode::Public {
                group: None,
                encrypted: true
            }
        );
        assert_eq!(
            DeliveryMode::for_public(&msg().skip_encryption().with_group(GroupId(vec![]))),
            DeliveryMode::Public {
                group: None,
                encrypted: false
            }
        );
    }
}
