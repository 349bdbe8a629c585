//! Cache entry operations.
//!
//! Entries map a request identity to a stored response snapshot. Only
//! status 200 responses are accepted; anything else is rejected before it
//! can overwrite a good entry.

use super::connection::CacheDb;
use super::generations::ensure_generation;
use super::hash::compute_cache_key;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// A stored response snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub key_hash: String,
    pub method: String,
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub stored_at: String,
}

impl CachedResponse {
    pub fn new(method: &str, url: &str, status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
        Self {
            key_hash: compute_cache_key(method, url),
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            status,
            headers,
            body,
            stored_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Entry metadata without the body, as returned by enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    pub key_hash: String,
    pub url: String,
    pub body_size: u64,
    pub stored_at: String,
}

impl CacheDb {
    /// Insert or overwrite an entry in `generation`, creating the generation if needed.
    ///
    /// The write refreshes the entry's position in eviction order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Uncacheable` for any status other than 200.
    pub async fn put_entry(&self, generation: &str, response: &CachedResponse) -> Result<(), Error> {
        if response.status != 200 {
            return Err(Error::Uncacheable(response.status));
        }

        let generation = generation.to_string();
        let response = response.clone();
        let headers_json = serde_json::to_string(&response.headers)
            .map_err(|e| Error::InvalidInput(format!("failed to encode headers: {e}")))?;

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                ensure_generation(&tx, &generation)?;
                tx.execute(
                    "INSERT INTO entries (
                        generation, key_hash, method, url, status, headers_json,
                        body, body_size, seq, stored_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
                              (SELECT COALESCE(MAX(seq), 0) + 1 FROM entries), ?9)
                    ON CONFLICT(generation, key_hash) DO UPDATE SET
                        method = excluded.method,
                        url = excluded.url,
                        status = excluded.status,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        body_size = excluded.body_size,
                        seq = excluded.seq,
                        stored_at = excluded.stored_at",
                    params![
                        &generation,
                        &response.key_hash,
                        &response.method,
                        &response.url,
                        response.status,
                        &headers_json,
                        &response.body,
                        response.body.len() as i64,
                        &response.stored_at,
                    ],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Look up an entry by key hash.
    ///
    /// Returns None if the generation or the entry does not exist.
    pub async fn match_entry(&self, generation: &str, key_hash: &str) -> Result<Option<CachedResponse>, Error> {
        let generation = generation.to_string();
        let key_hash = key_hash.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CachedResponse>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT key_hash, method, url, status, headers_json, body, stored_at
                     FROM entries WHERE generation = ?1 AND key_hash = ?2",
                )?;

                let result = stmt.query_row(params![generation, key_hash], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, u16>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Vec<u8>>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                });

                match result {
                    Ok((key_hash, method, url, status, headers_json, body, stored_at)) => {
                        let headers = serde_json::from_str(&headers_json)
                            .map_err(|e| Error::InvalidInput(format!("corrupt headers for {url}: {e}")))?;
                        Ok(Some(CachedResponse { key_hash, method, url, status, headers, body, stored_at }))
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Delete one entry. Returns false if it was not present.
    pub async fn delete_entry(&self, generation: &str, key_hash: &str) -> Result<bool, Error> {
        let generation = generation.to_string();
        let key_hash = key_hash.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute(
                    "DELETE FROM entries WHERE generation = ?1 AND key_hash = ?2",
                    params![generation, key_hash],
                )?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Entries of `generation`, least recently written first.
    pub async fn entry_keys(&self, generation: &str) -> Result<Vec<EntryMeta>, Error> {
        let generation = generation.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<EntryMeta>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT key_hash, url, body_size, stored_at FROM entries
                     WHERE generation = ?1 ORDER BY seq ASC",
                )?;
                let entries = stmt
                    .query_map(params![generation], |row| {
                        Ok(EntryMeta {
                            key_hash: row.get(0)?,
                            url: row.get(1)?,
                            body_size: row.get::<_, i64>(2)? as u64,
                            stored_at: row.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await
            .map_err(Error::from)
    }

    /// Sum of body sizes across every entry of every generation.
    pub async fn total_size(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let total: i64 =
                    conn.query_row("SELECT COALESCE(SUM(body_size), 0) FROM entries", [], |row| row.get(0))?;
                Ok(total as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete the `count` least recently written entries of `generation`.
    ///
    /// Returns the number of deleted entries.
    pub async fn evict_oldest(&self, generation: &str, count: usize) -> Result<u64, Error> {
        let generation = generation.to_string();
        let limit = count as i64;
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let deleted = conn.execute(
                    "DELETE FROM entries WHERE generation = ?1 AND key_hash IN (
                        SELECT key_hash FROM entries WHERE generation = ?1 ORDER BY seq ASC LIMIT ?2
                    )",
                    params![generation, limit],
                )?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}
