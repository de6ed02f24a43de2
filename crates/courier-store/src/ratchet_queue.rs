//! Frames encrypted with a hash-ratchet key we do not have yet. They are
//! parked here and replayed once the key arrives.

use rusqlite::params;

use courier_shared::protocol::ReceivedFrame;
use courier_shared::{FrameHash, GroupId, KeyId, PublicKey};

use crate::database::Database;
use crate::error::Result;
use crate::models::QueuedFrame;
use crate::rows::{conversion_err, hex_bytes_at, hex_id_at};

impl Database {
    pub fn save_hash_ratchet_message(
        &self,
        group_id: &GroupId,
        key_id: &KeyId,
        frame: &ReceivedFrame,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO hash_ratchet_encrypted_messages
                 (hash, sig_pub_key, dst, timestamp, topic, payload, group_id, key_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                frame.hash.to_hex(),
                frame.sig_pub_key.map(|k| k.to_hex()),
                frame.dst.map(|k| k.to_hex()),
                frame.timestamp,
                frame.topic,
                frame.payload,
                group_id.to_hex(),
                key_id.to_hex(),
            ],
        )?;
        Ok(())
    }

    /// Frames waiting for `key_id`, oldest first.
    pub fn get_hash_ratchet_messages(&self, key_id: &KeyId) -> Result<Vec<QueuedFrame>> {
        let mut stmt = self.conn().prepare(
            "SELECT hash, sig_pub_key, dst, timestamp, topic, payload, group_id, key_id
             FROM hash_ratchet_encrypted_messages
             WHERE key_id = ?1
             ORDER BY timestamp ASC, hash ASC",
        )?;

        let rows = stmt.query_map(params![key_id.to_hex()], row_to_queued)?;

        let mut frames = Vec::new();
        for row in rows {
            frames.push(row?);
        }
        Ok(frames)
    }

    pub fn delete_hash_ratchet_messages(&mut self, hashes: &[FrameHash]) -> Result<usize> {
        if hashes.is_empty() {
            return Ok(0);
        }

        let tx = self.conn_mut().transaction()?;
        let mut affected = 0;
        {
            let mut stmt =
                tx.prepare("DELETE FROM hash_ratchet_encrypted_messages WHERE hash = ?1")?;
            for hash in hashes {
                affected += stmt.execute(params![hash.to_hex()])?;
            }
        }
        tx.commit()?;
        Ok(affected)
    }
}

fn optional_key_at(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<PublicKey>> {
    let value: Option<String> = row.get(idx)?;
    value
        .map(|s| PublicKey::from_hex(&s).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn row_to_queued(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueuedFrame> {
    Ok(QueuedFrame {
        group_id: GroupId(hex_bytes_at(row, 6)?),
        key_id: KeyId(hex_bytes_at(row, 7)?),
        frame: ReceivedFrame {
            hash: hex_id_at(row, 0, FrameHash::from_hex)?,
            sig_pub_key: optional_key_at(row, 1)?,
            dst: optional_key_at(row, 2)?,
            timestamp: row.get(3)?,
            topic: row.get(4)?,
            payload: row.get(5)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: u8, timestamp: u32) -> ReceivedFrame {
        ReceivedFrame {
            hash: FrameHash([n; 32]),
            sig_pub_key: Some(PublicKey([1; 32])),
            dst: None,
            payload: vec![n, n, n],
            timestamp,
            topic: "community".into(),
        }
    }

    #[test]
    fn test_queue_and_fetch_by_key() {
        let db = Database::open_in_memory().unwrap();
        let group = GroupId(vec![1, 2, 3]);
        let key = KeyId(vec![9]);
        let other_key = KeyId(vec![8]);

        db.save_hash_ratchet_message(&group, &key, &frame(2, 20)).unwrap();
        db.save_hash_ratchet_message(&group, &key, &frame(1, 10)).unwrap();
        db.save_hash_ratchet_message(&group, &other_key, &frame(3, 5)).unwrap();

        let queued = db.get_hash_ratchet_messages(&key).unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].frame, frame(1, 10));
        assert_eq!(queued[0].group_id, group);
        assert_eq!(queued[1].key_id, key);
    }

    #[test]
    fn test_delete_processed() {
        let mut db = Database::open_in_memory().unwrap();
        let group = GroupId(vec![1]);
        let key = KeyId(vec![1]);
        db.save_hash_ratchet_message(&group, &key, &frame(1, 1)).unwrap();
        db.save_hash_ratchet_message(&group, &key, &frame(2, 2)).unwrap();

        assert_eq!(db.delete_hash_ratchet_messages(&[FrameHash([1; 32])]).unwrap(), 1);
        assert_eq!(db.delete_hash_ratchet_messages(&[]).unwrap(), 0);

        let left = db.get_hash_ratchet_messages(&key).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].frame.hash, FrameHash([2; 32]));
    }
}
