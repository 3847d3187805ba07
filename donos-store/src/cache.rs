use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use crate::{Error, Transaction};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRow {
    pub fingerprint: u32,
    pub created_at: i64,
    pub value: Vec<u8>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PackError {
    MissingField,
    InvalidFingerprint,
    InvalidCreatedAt,
    InvalidHex,
}

impl std::fmt::Display for PackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingField => write!(f, "packed cache value is missing a field"),
            Self::InvalidFingerprint => write!(f, "packed cache value has an invalid fingerprint"),
            Self::InvalidCreatedAt => write!(f, "packed cache value has an invalid created_at"),
            Self::InvalidHex => write!(f, "packed cache value has invalid hex content"),
        }
    }
}

impl std::error::Error for PackError {}

/// Packs a cache entry as `fingerprint created_at hex(wire_message)`, the
/// on-disk representation shared with the `cache` table's `value` column.
pub fn pack(fingerprint: u32, created_at: i64, wire: &[u8]) -> String {
    let mut hex = String::with_capacity(wire.len() * 2);
    for byte in wire {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("{fingerprint} {created_at} {hex}")
}

/// Parses a value produced by [`pack`], validating every field.
pub fn unpack(packed: &str) -> Result<(u32, i64, Vec<u8>), PackError> {
    let mut parts = packed.splitn(3, ' ');
    let fingerprint: u32 = parts
        .next()
        .ok_or(PackError::MissingField)?
        .parse()
        .map_err(|_| PackError::InvalidFingerprint)?;
    let created_at: i64 = parts
        .next()
        .ok_or(PackError::MissingField)?
        .parse()
        .map_err(|_| PackError::InvalidCreatedAt)?;
    let hex = parts.next().ok_or(PackError::MissingField)?;
    if hex.len() % 2 != 0 {
        return Err(PackError::InvalidHex);
    }
    let mut wire = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let byte = std::str::from_utf8(chunk)
            .ok()
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .ok_or(PackError::InvalidHex)?;
        wire.push(byte);
    }
    Ok((fingerprint, created_at, wire))
}

impl FromRow<'_, SqliteRow> for CacheRow {
    fn from_row(row: &SqliteRow) -> Result<Self, Error> {
        let fingerprint: i64 = row.try_get(0)?;
        let created_at: i64 = row.try_get(1)?;
        let value: String = row.try_get(2)?;
        let (_, _, wire) = unpack(&value).map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        Ok(Self {
            fingerprint: fingerprint as u32,
            created_at,
            value: wire,
        })
    }
}

pub async fn set<'t>(
    tx: &mut Transaction<'t>,
    fingerprint: u32,
    created_at: i64,
    wire: &[u8],
) -> Result<(), Error> {
    let packed = pack(fingerprint, created_at, wire);
    sqlx::query(
        r#"INSERT INTO cache (fingerprint, created_at, value)
VALUES ($1, $2, $3)
ON CONFLICT (fingerprint) DO UPDATE SET created_at = $2, value = $3"#,
    )
    .bind(fingerprint)
    .bind(created_at)
    .bind(packed)
    .execute(tx)
    .await?;
    Ok(())
}

pub async fn evict<'t>(tx: &mut Transaction<'t>, fingerprint: u32) -> Result<(), Error> {
    sqlx::query("DELETE FROM cache WHERE fingerprint = $1")
        .bind(fingerprint)
        .execute(tx)
        .await?;
    Ok(())
}

pub async fn reset<'t>(tx: &mut Transaction<'t>) -> Result<(), Error> {
    sqlx::query("DELETE FROM cache").execute(tx).await?;
    Ok(())
}

/// Reads the `n` most recently inserted rows, most recent first, used both
/// for hydrating the in-memory cache on startup and for the stats API.
pub async fn read_recent<'t>(tx: &mut Transaction<'t>, n: u32) -> Result<Vec<CacheRow>, Error> {
    sqlx::query_as("SELECT fingerprint, created_at, value FROM cache ORDER BY created_at DESC LIMIT $1")
        .bind(n)
        .fetch_all(tx)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_round_trip_pack_unpack() {
        let packed = pack(42, 1_700_000_000, &[0xDE, 0xAD, 0xBE, 0xEF]);
        let (fingerprint, created_at, wire) = unpack(&packed).unwrap();
        assert_eq!(fingerprint, 42);
        assert_eq!(created_at, 1_700_000_000);
        assert_eq!(wire, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn should_reject_odd_length_hex() {
        let error = unpack("1 2 abc").unwrap_err();
        assert_eq!(error, PackError::InvalidHex);
    }

    #[tokio::test]
    async fn should_set_evict_and_read_recent() {
        let pool = crate::Config::test_env().build().await.unwrap();
        crate::migrate(&pool).await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        set(&mut tx, 1, 100, b"one").await.unwrap();
        set(&mut tx, 2, 200, b"two").await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        let recent = read_recent(&mut tx, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].fingerprint, 2);

        evict(&mut tx, 2).await.unwrap();
        let recent = read_recent(&mut tx, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].fingerprint, 1);
    }
}
