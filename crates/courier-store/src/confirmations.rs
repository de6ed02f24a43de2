//! Per-recipient delivery confirmations.
//!
//! Confirmation of a logical message is never stored directly. It is derived
//! from the rows sharing its `message_id`, each of which is confirmed by the
//! datasync id it was handed off under.

use rusqlite::{params, Connection, OptionalExtension};

use courier_shared::{DataSyncId, MessageId, PublicKey};

use crate::database::Database;
use crate::error::Result;
use crate::models::PendingConfirmation;
use crate::rows::hex_id_at;

impl Database {
    /// Record a pending confirmation. Re-inserting the same
    /// `(datasync_id, public_key)` pair is a no-op.
    pub fn insert_pending_confirmation(&self, confirmation: &PendingConfirmation) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO raw_message_confirmations
                 (datasync_id, message_id, public_key, confirmed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                confirmation.datasync_id.to_hex(),
                confirmation.message_id.to_hex(),
                confirmation.public_key.to_hex(),
                confirmation.confirmed_at,
            ],
        )?;
        Ok(())
    }

    /// Mark every unconfirmed row for `datasync_id` as confirmed at `now`.
    /// Returns the number of rows that changed state.
    pub fn record_delivery(&self, datasync_id: &DataSyncId, now: i64) -> Result<usize> {
        record(self.conn(), datasync_id, now)
    }

    /// Pull-based quorum check for the message behind `datasync_id`.
    ///
    /// With `at_least_one` the message id is returned once any sharing row is
    /// confirmed; otherwise only once all of them are. `None` means "not yet"
    /// (or an unknown datasync id).
    pub fn resolve_confirmation(
        &self,
        datasync_id: &DataSyncId,
        at_least_one: bool,
    ) -> Result<Option<MessageId>> {
        resolve(self.conn(), datasync_id, at_least_one)
    }

    /// [`record_delivery`](Self::record_delivery) followed by
    /// [`resolve_confirmation`](Self::resolve_confirmation), atomically.
    pub fn mark_as_confirmed(
        &mut self,
        datasync_id: &DataSyncId,
        at_least_one: bool,
        now: i64,
    ) -> Result<Option<MessageId>> {
        let tx = self.conn_mut().transaction()?;
        record(&tx, datasync_id, now)?;
        let resolved = resolve(&tx, datasync_id, at_least_one)?;
        tx.commit()?;
        Ok(resolved)
    }

    pub fn pending_confirmations_for_message(
        &self,
        message_id: &MessageId,
    ) -> Result<Vec<PendingConfirmation>> {
        let mut stmt = self.conn().prepare(
            "SELECT datasync_id, message_id, public_key, confirmed_at
             FROM raw_message_confirmations
             WHERE message_id = ?1
             ORDER BY public_key ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_hex()], row_to_confirmation)?;

        let mut confirmations = Vec::new();
        for row in rows {
            confirmations.push(row?);
        }
        Ok(confirmations)
    }
}

fn record(conn: &Connection, datasync_id: &DataSyncId, now: i64) -> Result<usize> {
    let affected = conn.execute(
        "UPDATE raw_message_confirmations SET confirmed_at = ?1
         WHERE datasync_id = ?2 AND confirmed_at = 0",
        params![now, datasync_id.to_hex()],
    )?;
    Ok(affected)
}

fn resolve(
    conn: &Connection,
    datasync_id: &DataSyncId,
    at_least_one: bool,
) -> Result<Option<MessageId>> {
    let message_hex: Option<String> = conn
        .query_row(
            "SELECT message_id FROM raw_message_confirmations WHERE datasync_id = ?1 LIMIT 1",
            params![datasync_id.to_hex()],
            |row| row.get(0),
        )
        .optional()?;

    let Some(message_hex) = message_hex else {
        return Ok(None);
    };

    let (confirmed, unconfirmed): (i64, i64) = conn.query_row(
        "SELECT
             COALESCE(SUM(CASE WHEN confirmed_at > 0 THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN confirmed_at = 0 THEN 1 ELSE 0 END), 0)
         FROM raw_message_confirmations
         WHERE message_id = ?1",
        params![message_hex],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let done = if at_least_one {
        confirmed > 0
    } else {
        unconfirmed == 0
    };

    if done {
        Ok(Some(MessageId::from_hex(&message_hex)?))
    } else {
        Ok(None)
    }
}

fn row_to_confirmation(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingConfirmation> {
    Ok(PendingConfirmation {
        datasync_id: hex_id_at(row, 0, DataSyncId::from_hex)?,
        message_id: hex_id_at(row, 1, MessageId::from_hex)?,
        public_key: hex_id_at(row, 2, PublicKey::from_hex)?,
        confirmed_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(db: &Database, message: MessageId, n: u8) -> Vec<DataSyncId> {
        (0..n)
            .map(|i| {
                let datasync_id = DataSyncId([i + 1; 32]);
                db.insert_pending_confirmation(&PendingConfirmation::new(
                    datasync_id,
                    message,
                    PublicKey([i + 100; 32]),
                ))
                .unwrap();
                datasync_id
            })
            .collect()
    }

    #[test]
    fn test_quorum_all_waits_for_every_recipient() {
        let mut db = Database::open_in_memory().unwrap();
        let message = MessageId([0xAA; 32]);
        let ids = seed(&db, message, 3);

        assert_eq!(db.mark_as_confirmed(&ids[0], false, 10).unwrap(), None);
        assert_eq!(db.mark_as_confirmed(&ids[1], false, 11).unwrap(), None);
        assert_eq!(db.mark_as_confirmed(&ids[2], false, 12).unwrap(), Some(message));
    }

    #[test]
    fn test_quorum_at_least_one_resolves_on_first() {
        let mut db = Database::open_in_memory().unwrap();
        let message = MessageId([0xBB; 32]);
        let ids = seed(&db, message, 3);

        assert_eq!(db.mark_as_confirmed(&ids[1], true, 10).unwrap(), Some(message));
        // The other rows are untouched.
        let pending = db.pending_confirmations_for_message(&message).unwrap();
        assert_eq!(pending.iter().filter(|p| p.is_confirmed()).count(), 1);
    }

    #[test]
    fn test_record_delivery_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let message = MessageId([0xCC; 32]);
        let ids = seed(&db, message, 1);

        assert_eq!(db.record_delivery(&ids[0], 50).unwrap(), 1);
        assert_eq!(db.record_delivery(&ids[0], 60).unwrap(), 0);

        let pending = db.pending_confirmations_for_message(&message).unwrap();
        assert_eq!(pending[0].confirmed_at, 50);
    }

    #[test]
    fn test_unknown_datasync_id_resolves_to_none() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(
            db.resolve_confirmation(&DataSyncId([9; 32]), true).unwrap(),
            None
        );
    }

    #[test]
    fn test_resolve_without_record_reports_state() {
        let db = Database::open_in_memory().unwrap();
        let message = MessageId([0xDD; 32]);
        let ids = seed(&db, message, 2);

        assert_eq!(db.resolve_confirmation(&ids[0], true).unwrap(), None);
        db.record_delivery(&ids[0], 1).unwrap();
        assert_eq!(db.resolve_confirmation(&ids[1], true).unwrap(), Some(message));
        assert_eq!(db.resolve_confirmation(&ids[1], false).unwrap(), None);
    }

    #[test]
    fn test_duplicate_insert_ignored() {
        let db = Database::open_in_memory().unwrap();
        let message = MessageId([0xEE; 32]);
        seed(&db, message, 1);
        seed(&db, message, 1);
        assert_eq!(db.pending_confirmations_for_message(&message).unwrap().len(), 1);
    }
}
