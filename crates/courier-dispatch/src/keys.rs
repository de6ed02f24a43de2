use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use courier_shared::{Identity, PublicKey};

/// Ephemeral identities we decrypt for, keyed by their public key.
///
/// Keys are never removed: topics are not recalculated on removal, and the
/// map does not survive a restart.
#[derive(Default)]
pub struct EphemeralKeys {
    keys: Mutex<HashMap<PublicKey, Arc<Identity>>>,
}

impl EphemeralKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: Arc<Identity>) {
        self.lock().insert(identity.public_key(), identity);
    }

    pub fn get(&self, public_key: &PublicKey) -> Option<Arc<Identity>> {
        self.lock().get(public_key).cloned()
    }

    /// Key to decrypt a frame addressed to `destination`, and whether it is
    /// ephemeral. Ephemeral keys skip session negotiation.
    pub fn fetch_decryption_key(
        &self,
        destination: Option<&PublicKey>,
        identity: &Arc<Identity>,
    ) -> (Arc<Identity>, bool) {
        match destination.and_then(|dst| self.get(dst)) {
            Some(ephemeral) => (ephemeral, true),
            None => (identity.clone(), false),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PublicKey, Arc<Identity>>> {
        self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_falls_back_to_identity() {
        let keys = EphemeralKeys::new();
        let identity = Arc::new(Identity::generate());
        let ephemeral = Arc::new(Identity::generate());
        keys.insert(ephemeral.clone());

        let (key, is_ephemeral) =
            keys.fetch_decryption_key(Some(&ephemeral.public_key()), &identity);
        assert!(is_ephemeral);
        assert_eq!(key.public_key(), ephemeral.public_key());

        let (key, is_ephemeral) = keys.fetch_decryption_key(Some(&PublicKey([0; 32])), &identity);
        assert!(!is_ephemeral);
        assert_eq!(key.public_key(), identity.public_key());

        let (_, is_ephemeral) = keys.fetch_decryption_key(None, &identity);
        assert!(!is_ephemeral);
        assert_eq!(keys.len(), 1);
    }
}
