//! Reassembly store for segmented payloads.
//!
//! A job is keyed by `(entire_message_hash, sig_pub_key)`. It is either in
//! progress (rows in `message_segments`) or done (a row in
//! `message_segments_completed`), never both: completion deletes the chunks
//! and writes the tombstone in one transaction.

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use courier_shared::crypto;
use courier_shared::protocol::SegmentMessage;
use courier_shared::PublicKey;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{MessageSegment, SegmentOutcome};
use crate::rows::{hash_at, hex_id_at};

impl Database {
    pub fn is_message_already_completed(
        &self,
        hash: &[u8; 32],
        sig_pub_key: &PublicKey,
    ) -> Result<bool> {
        is_completed(self.conn(), &hex::encode(hash), &sig_pub_key.to_hex())
    }

    /// Upsert one chunk, keyed by `(hash, index, sig_pub_key)`.
    pub fn save_message_segment(
        &self,
        segment: &SegmentMessage,
        sig_pub_key: &PublicKey,
        timestamp: i64,
    ) -> Result<()> {
        save_segment(self.conn(), segment, &sig_pub_key.to_hex(), timestamp)
    }

    /// Chunks of a job, ordered by index.
    pub fn get_message_segments(
        &self,
        hash: &[u8; 32],
        sig_pub_key: &PublicKey,
    ) -> Result<Vec<MessageSegment>> {
        load_segments(self.conn(), &hex::encode(hash), &sig_pub_key.to_hex())
    }

    /// Delete a job's chunks and write its tombstone atomically.
    pub fn complete_message_segments(
        &mut self,
        hash: &[u8; 32],
        sig_pub_key: &PublicKey,
        timestamp: i64,
    ) -> Result<()> {
        let tx = self.conn_mut().transaction()?;
        complete(&tx, &hex::encode(hash), &sig_pub_key.to_hex(), timestamp)?;
        tx.commit()?;
        Ok(())
    }

    /// Feed one received chunk through the reassembly state machine.
    ///
    /// Runs inside a single IMMEDIATE transaction, so concurrent arrivals of
    /// the last two chunks of a job cannot both observe "all present" and
    /// complete it twice.
    ///
    /// A hash mismatch keeps the stored chunks (a corrected retransmission
    /// replaces the bad one) and never writes a tombstone.
    pub fn accept_segment(
        &mut self,
        segment: &SegmentMessage,
        sig_pub_key: &PublicKey,
        now: i64,
    ) -> Result<SegmentOutcome> {
        let hash_hex = hex::encode(segment.entire_message_hash);
        let key_hex = sig_pub_key.to_hex();

        let tx = self
            .conn_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        if is_completed(&tx, &hash_hex, &key_hex)? {
            return Ok(SegmentOutcome::AlreadyCompleted);
        }

        if segment.segments_count < 2 {
            return Err(StoreError::InvalidSegmentCount {
                declared: segment.segments_count,
            });
        }
        if segment.index >= segment.segments_count {
            return Err(StoreError::InvalidSegmentIndex {
                index: segment.index,
                segments_count: segment.segments_count,
            });
        }

        let conflicting: Option<u32> = tx
            .query_row(
                "SELECT segments_count FROM message_segments
                 WHERE hash = ?1 AND sig_pub_key = ?2 AND segments_count != ?3
                 LIMIT 1",
                params![hash_hex, key_hex, segment.segments_count],
                |row| row.get(0),
            )
            .optional()?;
        if conflicting.is_some() {
            return Err(StoreError::InvalidSegmentCount {
                declared: segment.segments_count,
            });
        }

        save_segment(&tx, segment, &key_hex, now)?;

        let segments = load_segments(&tx, &hash_hex, &key_hex)?;
        let received = segments.len() as u32;
        if received < segment.segments_count {
            tx.commit()?;
            return Ok(SegmentOutcome::Incomplete {
                received,
                expected: segment.segments_count,
            });
        }

        let total: usize = segments.iter().map(|s| s.payload.len()).sum();
        let mut entire_payload = Vec::with_capacity(total);
        for s in &segments {
            entire_payload.extend_from_slice(&s.payload);
        }

        if crypto::hash(&entire_payload) != segment.entire_message_hash {
            tx.commit()?;
            return Err(StoreError::HashMismatch);
        }

        complete(&tx, &hash_hex, &key_hex, now)?;
        tx.commit()?;

        Ok(SegmentOutcome::Completed(entire_payload))
    }

    pub fn remove_message_segments_older_than(&self, timestamp: i64) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM message_segments WHERE timestamp < ?1",
            params![timestamp],
        )?;
        Ok(affected)
    }

    pub fn remove_message_segments_completed_older_than(&self, timestamp: i64) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM message_segments_completed WHERE timestamp < ?1",
            params![timestamp],
        )?;
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Helpers (usable on a plain connection or inside a transaction)
// ---------------------------------------------------------------------------

fn is_completed(conn: &Connection, hash_hex: &str, key_hex: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM message_segments_completed WHERE hash = ?1 AND sig_pub_key = ?2",
        params![hash_hex, key_hex],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn save_segment(
    conn: &Connection,
    segment: &SegmentMessage,
    key_hex: &str,
    timestamp: i64,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO message_segments
             (hash, segment_index, segments_count, sig_pub_key, payload, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            hex::encode(segment.entire_message_hash),
            segment.index,
            segment.segments_count,
            key_hex,
            segment.payload,
            timestamp,
        ],
    )?;
    Ok(())
}

fn load_segments(conn: &Connection, hash_hex: &str, key_hex: &str) -> Result<Vec<MessageSegment>> {
    let mut stmt = conn.prepare(
        "SELECT hash, segment_index, segments_count, sig_pub_key, payload, timestamp
         FROM message_segments
         WHERE hash = ?1 AND sig_pub_key = ?2
         ORDER BY segment_index ASC",
    )?;

    let rows = stmt.query_map(params![hash_hex, key_hex], row_to_segment)?;

    let mut segments = Vec::new();
    for row in rows {
        segments.push(row?);
    }
    Ok(segments)
}

fn complete(conn: &Connection, hash_hex: &str, key_hex: &str, timestamp: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM message_segments WHERE hash = ?1 AND sig_pub_key = ?2",
        params![hash_hex, key_hex],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO message_segments_completed (hash, sig_pub_key, timestamp)
         VALUES (?1, ?2, ?3)",
        params![hash_hex, key_hex, timestamp],
    )?;
    Ok(())
}

fn row_to_segment(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageSegment> {
    Ok(MessageSegment {
        entire_message_hash: hash_at(row, 0)?,
        index: row.get(1)?,
        segments_count: row.get(2)?,
        sig_pub_key: hex_id_at(row, 3, PublicKey::from_hex)?,
        payload: row.get(4)?,
        timestamp: row.get(5)?,
    })
}
