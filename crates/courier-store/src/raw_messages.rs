use rusqlite::{params, OptionalExtension};

use courier_shared::protocol::MessageType;
use courier_shared::{MessageId, PublicKey};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::RawMessageRecord;
use crate::rows::{conversion_err, hex_id_at};

impl Database {
    /// Insert or replace a raw message.
    ///
    /// A write with `sent == false` never downgrades a stored `sent == true`:
    /// the stored flag wins unless the incoming record is itself marked sent.
    pub fn save_raw_message(&mut self, record: &RawMessageRecord) -> Result<()> {
        let recipients: Vec<String> = record.recipients.iter().map(PublicKey::to_hex).collect();
        let recipients_json = serde_json::to_string(&recipients)?;
        let id_hex = record.id.to_hex();

        let tx = self.conn_mut().transaction()?;

        let mut sent = record.sent;
        if !sent {
            let stored: Option<bool> = tx
                .query_row(
                    "SELECT sent FROM raw_messages WHERE id = ?1",
                    params![id_hex],
                    |row| row.get(0),
                )
                .optional()?;
            sent = stored.unwrap_or(false);
        }

        tx.execute(
            "INSERT OR REPLACE INTO raw_messages
                 (id, local_chat_id, last_sent, send_count, sent, message_type,
                  resend_automatically, recipients, skip_encryption,
                  send_push_notification, skip_group_message_wrap,
                  send_on_personal_topic, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                id_hex,
                record.local_chat_id,
                record.last_sent,
                record.send_count,
                sent,
                record.message_type.as_u32(),
                record.resend_automatically,
                recipients_json,
                record.skip_encryption,
                record.send_push_notification,
                record.skip_group_message_wrap,
                record.send_on_personal_topic,
                record.payload,
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn raw_message_by_id(&self, id: &MessageId) -> Result<RawMessageRecord> {
        self.conn()
            .query_row(
                "SELECT id, local_chat_id, last_sent, send_count, sent, message_type,
                        resend_automatically, recipients, skip_encryption,
                        send_push_notification, skip_group_message_wrap,
                        send_on_personal_topic, payload
                 FROM raw_messages WHERE id = ?1",
                params![id.to_hex()],
                row_to_raw_message,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    pub fn raw_message_ids_by_type(&self, message_type: MessageType) -> Result<Vec<MessageId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM raw_messages WHERE message_type = ?1 ORDER BY id ASC")?;

        let rows = stmt.query_map(params![message_type.as_u32()], |row| {
            hex_id_at(row, 0, MessageId::from_hex)
        })?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Update resend bookkeeping without touching the payload.
    pub fn update_raw_message_sent(
        &self,
        id: &MessageId,
        sent: bool,
        last_sent: i64,
        send_count: u32,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE raw_messages SET sent = ?1, last_sent = ?2, send_count = ?3 WHERE id = ?4",
            params![sent, last_sent, send_count, id.to_hex()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_raw_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMessageRecord> {
    let recipients_json: String = row.get(7)?;
    let recipient_hexes: Vec<String> =
        serde_json::from_str(&recipients_json).map_err(|e| conversion_err(7, e))?;
    let recipients = recipient_hexes
        .iter()
        .map(|s| PublicKey::from_hex(s))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| conversion_err(7, e))?;

    Ok(RawMessageRecord {
        id: hex_id_at(row, 0, MessageId::from_hex)?,
        local_chat_id: row.get(1)?,
        last_sent: row.get(2)?,
        send_count: row.get(3)?,
        sent: row.get(4)?,
        message_type: MessageType::from_u32(row.get(5)?),
        resend_automatically: row.get(6)?,
        recipients,
        skip_encryption: row.get(8)?,
        send_push_notification: row.get(9)?,
        skip_group_message_wrap: row.get(10)?,
        send_on_personal_topic: row.get(11)?,
        payload: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u8, sent: bool) -> RawMessageRecord {
        RawMessageRecord {
            id: MessageId([id; 32]),
            local_chat_id: "chat-1".into(),
            last_sent: 100,
            send_count: 1,
            sent,
            message_type: MessageType::ChatMessage,
            resend_automatically: true,
            recipients: vec![PublicKey([1; 32]), PublicKey([2; 32])],
            skip_encryption: false,
            send_push_notification: true,
            skip_group_message_wrap: false,
            send_on_personal_topic: false,
            payload: b"payload".to_vec(),
        }
    }

    #[test]
    fn test_save_and_fetch() {
        let mut db = Database::open_in_memory().unwrap();
        let r = record(1, false);
        db.save_raw_message(&r).unwrap();
        assert_eq!(db.raw_message_by_id(&r.id).unwrap(), r);
    }

    #[test]
    fn test_unsent_write_keeps_sent_flag() {
        let mut db = Database::open_in_memory().unwrap();
        db.save_raw_message(&record(1, true)).unwrap();

        let mut stale = record(1, false);
        stale.send_count = 2;
        db.save_raw_message(&stale).unwrap();

        let stored = db.raw_message_by_id(&stale.id).unwrap();
        assert!(stored.sent);
        assert_eq!(stored.send_count, 2);
    }

    #[test]
    fn test_missing_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.raw_message_by_id(&MessageId([7; 32])),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_ids_by_type() {
        let mut db = Database::open_in_memory().unwrap();
        db.save_raw_message(&record(1, false)).unwrap();
        let mut other = record(2, false);
        other.message_type = MessageType::PinMessage;
        db.save_raw_message(&other).unwrap();

        assert_eq!(
            db.raw_message_ids_by_type(MessageType::PinMessage).unwrap(),
            vec![MessageId([2; 32])]
        );
    }

    #[test]
    fn test_update_sent() {
        let mut db = Database::open_in_memory().unwrap();
        let r = record(3, false);
        db.save_raw_message(&r).unwrap();
        db.update_raw_message_sent(&r.id, true, 500, 4).unwrap();

        let stored = db.raw_message_by_id(&r.id).unwrap();
        assert!(stored.sent);
        assert_eq!(stored.last_sent, 500);
        assert_eq!(stored.send_count, 4);

        assert!(matches!(
            db.update_raw_message_sent(&MessageId([0; 32]), true, 1, 1),
            Err(StoreError::NotFound)
        ));
    }
}
