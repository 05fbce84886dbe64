//! SQLite-backed store.
//!
//! Each table keeps the queried fields as columns next to the full JSON
//! document. The expiry sweep is a single conditional `UPDATE`, so it is
//! atomic and safe to run from several callers at once.
//!
//! # Tables
//!
//! - `requests`: id, session_token (UNIQUE), provider_id, user_id, status,
//!   timer_end, created_at, body
//! - `proofs`: id, user_id, request_id, proof_type, created_at, body
//! - `users`: user_id (PRIMARY KEY), content_id, name, created_at, updated_at
//! - `content`: content_id (PRIMARY KEY), bytes

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::time::Duration;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use zkgps_core::{ProofId, RequestId};

use super::{
    content_id, ContentStore, ProofStore, RequestStore, StoreError, StoreResult, UserRecord,
    UserStore,
};
use crate::request::{
    OnChainVerification, PartyRole, ProofRecord, ProofType, RequestStatus, VerificationRequest,
};

/// [`Store`](super::Store) over a single SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn to_json<T: Serialize>(value: &T) -> StoreResult<String> {
    serde_json::to_string(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn from_json<T: DeserializeOwned>(body: &str) -> StoreResult<T> {
    serde_json::from_str(body).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl SqliteStore {
    /// Create or open a store at the specified path
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening verification store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // Other processes sharing the file wait for the write lock.
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                session_token TEXT UNIQUE,
                provider_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                timer_end INTEGER,
                created_at INTEGER NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_requests_user ON requests(user_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_requests_provider ON requests(provider_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_requests_expiry ON requests(status, timer_end);

            CREATE TABLE IF NOT EXISTS proofs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                request_id TEXT,
                proof_type TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_proofs_lookup
                ON proofs(user_id, request_id, proof_type, created_at);

            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                content_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS content (
                content_id TEXT PRIMARY KEY,
                bytes BLOB NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }

    fn collect_bodies<T: DeserializeOwned>(
        conn: &Connection,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> StoreResult<Vec<T>> {
        let mut stmt = conn.prepare(sql)?;
        let bodies = stmt
            .query_map(args, |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies.iter().map(|b| from_json(b)).collect()
    }
}

impl RequestStore for SqliteStore {
    fn insert_request(&self, request: &VerificationRequest) -> StoreResult<()> {
        let conn = self.conn()?;
        let result = conn.execute(
            "INSERT INTO requests (id, session_token, provider_id, user_id, status, timer_end, created_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                request.id.as_str(),
                request.session_token,
                request.provider_id,
                request.user_id,
                request.status.as_str(),
                request.timer_end.map(|t| t as i64),
                request.created_at as i64,
                to_json(request)?,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict(format!(
                "request {} or its session token already exists",
                request.id
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn get_request(&self, id: &RequestId) -> StoreResult<Option<VerificationRequest>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM requests WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| from_json(&b)).transpose()
    }

    fn replace_request_if(
        &self,
        request: &VerificationRequest,
        expected: RequestStatus,
    ) -> StoreResult<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE requests SET status = ?1, timer_end = ?2, body = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                request.status.as_str(),
                request.timer_end.map(|t| t as i64),
                to_json(request)?,
                request.id.as_str(),
                expected.as_str(),
            ],
        )?;
        if updated == 1 {
            return Ok(true);
        }

        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM requests WHERE id = ?1",
                params![request.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::NotFound(format!("request {}", request.id))),
        }
    }

    fn expire_accepted_before(&self, now_ms: u64) -> StoreResult<usize> {
        let conn = self.conn()?;
        let moved = conn.execute(
            "UPDATE requests
             SET status = ?1, body = json_set(body, '$.status', ?1)
             WHERE status = ?2 AND timer_end IS NOT NULL AND timer_end < ?3",
            params![
                RequestStatus::Expired.as_str(),
                RequestStatus::Accepted.as_str(),
                now_ms as i64,
            ],
        )?;
        if moved > 0 {
            debug!(moved, "Expired accepted requests");
        }
        Ok(moved)
    }

    fn list_requests(
        &self,
        party: &str,
        role: PartyRole,
        limit: usize,
    ) -> StoreResult<Vec<VerificationRequest>> {
        let filter = match role {
            PartyRole::User => "user_id = ?1",
            PartyRole::Provider => "provider_id = ?1",
            PartyRole::Any => "(user_id = ?1 OR provider_id = ?1)",
        };
        let sql = format!(
            "SELECT body FROM requests WHERE {} ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            filter
        );
        let conn = self.conn()?;
        Self::collect_bodies(&conn, &sql, &[&party, &(limit as i64)])
    }
}

impl ProofStore for SqliteStore {
    fn insert_proof(&self, record: &ProofRecord) -> StoreResult<()> {
        let conn = self.conn()?;
        let result = conn.execute(
            "INSERT INTO proofs (id, user_id, request_id, proof_type, created_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id.as_str(),
                record.user_id,
                record.request_id.as_ref().map(|r| r.as_str()),
                record.proof_type.as_str(),
                record.created_at as i64,
                to_json(record)?,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => {
                Err(StoreError::Conflict(format!("proof {} exists", record.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_proof(&self, id: &ProofId) -> StoreResult<Option<ProofRecord>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM proofs WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| from_json(&b)).transpose()
    }

    fn latest_proof(
        &self,
        user_id: &str,
        request_id: Option<&RequestId>,
        proof_type: ProofType,
    ) -> StoreResult<Option<ProofRecord>> {
        let conn = self.conn()?;
        // `IS` matches NULL request ids as well
        let body: Option<String> = conn
            .query_row(
                "SELECT body FROM proofs
                 WHERE user_id = ?1 AND request_id IS ?2 AND proof_type = ?3
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![
                    user_id,
                    request_id.map(|r| r.as_str()),
                    proof_type.as_str()
                ],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| from_json(&b)).transpose()
    }

    fn list_proofs(&self, user_id: &str, limit: usize) -> StoreResult<Vec<ProofRecord>> {
        let conn = self.conn()?;
        Self::collect_bodies(
            &conn,
            "SELECT body FROM proofs WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            &[&user_id, &(limit as i64)],
        )
    }

    fn attach_on_chain(&self, id: &ProofId, on_chain: &OnChainVerification) -> StoreResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let body: Option<String> = tx
            .query_row(
                "SELECT body FROM proofs WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let mut record: ProofRecord = match body {
            Some(b) => from_json(&b)?,
            None => return Err(StoreError::NotFound(format!("proof {}", id))),
        };
        record.on_chain = Some(on_chain.clone());
        tx.execute(
            "UPDATE proofs SET body = ?1 WHERE id = ?2",
            params![to_json(&record)?, id.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }
}

impl UserStore for SqliteStore {
    fn upsert_user(&self, record: &UserRecord) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (user_id, content_id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                content_id = excluded.content_id,
                name = excluded.name,
                updated_at = excluded.updated_at",
            params![
                record.user_id,
                record.content_id,
                record.name,
                record.created_at as i64,
                record.updated_at as i64,
            ],
        )?;
        Ok(())
    }

    fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT user_id, content_id, name, created_at, updated_at FROM users WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(UserRecord {
                        user_id: row.get(0)?,
                        content_id: row.get(1)?,
                        name: row.get(2)?,
                        created_at: row.get::<_, i64>(3)? as u64,
                        updated_at: row.get::<_, i64>(4)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

impl ContentStore for SqliteStore {
    fn put_content(&self, bytes: &[u8]) -> StoreResult<String> {
        let id = content_id(bytes);
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO content (content_id, bytes) VALUES (?1, ?2)",
            params![id, bytes],
        )?;
        Ok(id)
    }

    fn get_content(&self, content_id: &str) -> StoreResult<Vec<u8>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT bytes FROM content WHERE content_id = ?1",
            params![content_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StoreError::NotFound(format!("content {}", content_id)))
    }
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
