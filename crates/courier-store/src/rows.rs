//! Column decoding helpers shared by the table modules.

use rusqlite::types::Type;
use rusqlite::Row;

use courier_shared::WireError;

pub(crate) fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

/// Read a hex TEXT column and parse it with `parse`.
pub(crate) fn hex_id_at<T>(
    row: &Row<'_>,
    idx: usize,
    parse: fn(&str) -> Result<T, WireError>,
) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    parse(&s).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn hex_bytes_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<u8>> {
    let s: String = row.get(idx)?;
    hex::decode(s).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn hash_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; 32]> {
    let bytes = hex_bytes_at(row, idx)?;
    bytes.as_slice().try_into().map_err(|_| {
        conversion_err(
            idx,
            WireError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            },
        )
    })
}
