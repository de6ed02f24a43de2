use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite / SQLCipher error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Hex decoding error.
    #[error("Hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    /// Recipients column could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Stored identifier has the wrong shape.
    #[error("Wire error: {0}")]
    Wire(#[from] courier_shared::WireError),

    /// A segment declared fewer than two segments, or disagrees with the
    /// count its job was started with.
    #[error("Invalid segments count: {declared}")]
    InvalidSegmentCount { declared: u32 },

    /// A segment index outside `0..segments_count`.
    #[error("Segment index {index} out of range for {segments_count} segments")]
    InvalidSegmentIndex { index: u32, segments_count: u32 },

    /// The reassembled payload does not hash to the advertised value.
    #[error("Hash of entire payload does not match")]
    HashMismatch,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
