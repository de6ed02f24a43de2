/// Protocol version tag carried in logs.
pub const PROTOCOL_VERSION: &str = "/courier/1.0.0";

/// Time-to-live of an outbound frame, in seconds
pub const FRAME_TTL_SECS: u32 = 15;

/// Default proof-of-work target for outbound frames
pub const DEFAULT_POW_TARGET: f64 = 0.002;

/// Lower proof-of-work target used for large payloads
pub const LARGE_PAYLOAD_POW_TARGET: f64 = 0.000002;

/// Payloads above this size (roughly 50 KB) use the lower PoW target
pub const LARGE_PAYLOAD_BYTES: usize = 50_000;

/// Time budget for proof-of-work computation, in seconds
pub const POW_TIME_SECS: u32 = 5;

/// Default transport frame limit (1 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Prefix identifying a segment frame on the wire
pub const SEGMENT_MAGIC: [u8; 4] = *b"CSG1";

/// Incomplete segments older than this are pruned
pub const SEGMENT_RETENTION_DAYS: i64 = 7;

/// Completed-reassembly tombstones older than this are pruned
pub const COMPLETED_RETENTION_DAYS: i64 = 30;

/// Bound of every message-event subscription channel
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_DB_KEY: &str = "courier-db-key-v1";
pub const KDF_CONTEXT_ONE_TO_ONE_GROUP: &str = "courier-one-to-one-group-v1";
pub const KDF_CONTEXT_COMMUNITY_GROUP: &str = "courier-community-group-v1";
