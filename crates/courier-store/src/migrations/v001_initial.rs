//! v001 -- Initial schema creation.
//!
//! Creates the reassembly, confirmation and raw-message tables.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- In-flight segments of a split payload
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_segments (
    hash           TEXT NOT NULL,             -- hex hash of the entire payload
    segment_index  INTEGER NOT NULL,          -- 0-based
    segments_count INTEGER NOT NULL,
    sig_pub_key    TEXT NOT NULL,             -- hex-encoded signer pubkey
    payload        BLOB NOT NULL,
    timestamp      INTEGER NOT NULL,          -- unix seconds

    PRIMARY KEY (hash, segment_index, sig_pub_key)
);

CREATE INDEX IF NOT EXISTS idx_message_segments_job
    ON message_segments(hash, sig_pub_key);
CREATE INDEX IF NOT EXISTS idx_message_segments_timestamp
    ON message_segments(timestamp);

-- ----------------------------------------------------------------
-- Completed reassembly tombstones
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS message_segments_completed (
    hash        TEXT NOT NULL,
    sig_pub_key TEXT NOT NULL,
    timestamp   INTEGER NOT NULL,

    PRIMARY KEY (hash, sig_pub_key)
);

CREATE INDEX IF NOT EXISTS idx_message_segments_completed_timestamp
    ON message_segments_completed(timestamp);

-- ----------------------------------------------------------------
-- Per-recipient delivery confirmations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS raw_message_confirmations (
    datasync_id  TEXT NOT NULL,               -- hex datasync id
    message_id   TEXT NOT NULL,               -- hex message id
    public_key   TEXT NOT NULL,               -- hex recipient pubkey
    confirmed_at INTEGER NOT NULL DEFAULT 0,  -- unix seconds, 0 = pending

    PRIMARY KEY (datasync_id, public_key)
);

CREATE INDEX IF NOT EXISTS idx_raw_message_confirmations_message
    ON raw_message_confirmations(message_id);

-- ----------------------------------------------------------------
-- Durable copies of dispatched messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS raw_messages (
    id                      TEXT PRIMARY KEY NOT NULL,  -- hex message id
    local_chat_id           TEXT NOT NULL,
    last_sent               INTEGER NOT NULL DEFAULT 0,
    send_count              INTEGER NOT NULL DEFAULT 0,
    sent                    INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    message_type            INTEGER NOT NULL,
    resend_automatically    INTEGER NOT NULL DEFAULT 0,
    recipients              TEXT NOT NULL,              -- JSON array of hex pubkeys
    skip_encryption         INTEGER NOT NULL DEFAULT 0,
    send_push_notification  INTEGER NOT NULL DEFAULT 0,
    skip_group_message_wrap INTEGER NOT NULL DEFAULT 0,
    send_on_personal_topic  INTEGER NOT NULL DEFAULT 0,
    payload                 BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_raw_messages_type ON raw_messages(message_type);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
