use rusqlite::Connection;

// Frames that arrived before their hash-ratchet key, parked for replay.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS hash_ratchet_encrypted_messages (
    hash        TEXT PRIMARY KEY NOT NULL,    -- hex frame hash
    sig_pub_key TEXT,                         -- hex signer pubkey
    dst         TEXT,                         -- hex destination pubkey
    timestamp   INTEGER NOT NULL,
    topic       TEXT NOT NULL,
    payload     BLOB NOT NULL,
    group_id    TEXT NOT NULL,                -- hex group id
    key_id      TEXT NOT NULL                 -- hex key id
);

CREATE INDEX IF NOT EXISTS idx_hash_ratchet_key ON hash_ratchet_encrypted_messages(key_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
