//! Generation management: open, enumerate, delete.
//!
//! A generation is created the first time it is opened (or written to) and
//! remembers its creation order, which is what "most recently created"
//! refers to when the quota rule prunes generations.

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::{params, rusqlite};

/// Summary of one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Generation {
    pub name: String,
    pub created_at: String,
    pub entries: u64,
    pub bytes: u64,
}

/// Create `name` if it does not exist. Usable inside other statements' closures.
pub(crate) fn ensure_generation(conn: &rusqlite::Connection, name: &str) -> Result<bool, rusqlite::Error> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO generations (name, seq, created_at)
         VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM generations), ?2)",
        params![name, chrono::Utc::now().to_rfc3339()],
    )?;
    Ok(inserted > 0)
}

impl CacheDb {
    /// Open (or create) a named generation.
    ///
    /// Returns true if the generation was created by this call.
    pub async fn open_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> { Ok(ensure_generation(conn, &name)?) })
            .await
            .map_err(Error::from)
    }

    pub async fn has_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM generations WHERE name = ?1)",
                    params![name],
                    |row| row.get(0),
                )?;
                Ok(exists)
            })
            .await
            .map_err(Error::from)
    }

    /// Generation names, oldest first.
    pub async fn generation_names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM generations ORDER BY seq ASC")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    /// Generations with entry counts and body bytes, oldest first.
    pub async fn generations(&self) -> Result<Vec<Generation>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<Generation>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT g.name, g.created_at, COUNT(e.key_hash), COALESCE(SUM(e.body_size), 0)
                     FROM generations g LEFT JOIN entries e ON e.generation = g.name
                     GROUP BY g.name ORDER BY g.seq ASC",
                )?;
                let generations = stmt
                    .query_map([], |row| {
                        Ok(Generation {
                            name: row.get(0)?,
                            created_at: row.get(1)?,
                            entries: row.get::<_, i64>(2)? as u64,
                            bytes: row.get::<_, i64>(3)? as u64,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(generations)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a generation and all of its entries.
    ///
    /// Returns false if no such generation existed.
    pub async fn delete_generation(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let deleted = conn.execute("DELETE FROM generations WHERE name = ?1", params![name])?;
                Ok(deleted > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete every generation. Returns how many were removed.
    pub async fn clear(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM entries", [])?;
                let deleted = tx.execute("DELETE FROM generations", [])?;
                tx.commit()?;
                Ok(deleted as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_once() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.open_generation("mylore-critical-v1").await.unwrap());
        assert!(!db.open_generation("mylore-critical-v1").await.unwrap());
        assert!(db.has_generation("mylore-critical-v1").await.unwrap());
        assert!(!db.has_generation("mylore-dynamic-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_names_in_creation_order() {
        let db = CacheDb::open_in_memory().await.unwrap();
        for name in ["c", "a", "b"] {
            db.open_generation(name).await.unwrap();
        }
        db.open_generation("a").await.unwrap();

        assert_eq!(db.generation_names().await.unwrap(), vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_delete_generation() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_generation("old").await.unwrap();
        db.open_generation("new").await.unwrap();

        assert!(db.delete_generation("old").await.unwrap());
        assert!(!db.delete_generation("old").await.unwrap());
        assert_eq!(db.generation_names().await.unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn test_clear_twice() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_generation("a").await.unwrap();
        db.open_generation("b").await.unwrap();

        assert_eq!(db.clear().await.unwrap(), 2);
        assert_eq!(db.clear().await.unwrap(), 0);
        assert!(db.generation_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generation_summaries_empty() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.open_generation("a").await.unwrap();

        let generations = db.generations().await.unwrap();
        assert_eq!(generations.len(), 1);
        assert_eq!(generations[0].name, "a");
        assert_eq!(generations[0].entries, 0);
        assert_eq!(generations[0].bytes, 0);
    }
}
