//! SQLite 检查点存储
//!
//! 单连接 + Mutex 串行化写入；阻塞调用放在 spawn_blocking 中。state 列存会话的 JSON。

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use crate::session::checkpoint::{Boundary, Checkpoint, CheckpointStore, StoreError};

const SCHEMA: &str = "BEGIN;
CREATE TABLE IF NOT EXISTS checkpoints(
    session_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    boundary TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    state TEXT NOT NULL,
    PRIMARY KEY(session_id, seq)
);
COMMIT;";

#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).map_err(backend)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Backend("connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

type Row = (String, u64, String, i64, String);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode((session_id, seq, boundary, created_at, state): Row) -> Result<Checkpoint, StoreError> {
    let boundary = Boundary::parse(&boundary)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown boundary {boundary}")))?;
    let state = serde_json::from_str(&state).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(Checkpoint {
        session_id,
        seq,
        boundary,
        created_at,
        state,
    })
}

const SELECT: &str = "SELECT session_id, seq, boundary, created_at, state FROM checkpoints";

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let state =
            serde_json::to_string(&checkpoint.state).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let cp = (
            checkpoint.session_id.clone(),
            checkpoint.seq,
            checkpoint.boundary.as_str(),
            checkpoint.created_at,
        );
        self.with_conn(move |conn| {
            let (session_id, seq, boundary, created_at) = cp;
            let tx = conn.transaction().map_err(backend)?;
            let last: u64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(seq), 0) FROM checkpoints WHERE session_id = ?1",
                    params![session_id],
                    |r| r.get(0),
                )
                .map_err(backend)?;
            if seq != last + 1 {
                return Err(StoreError::SequenceConflict {
                    session_id,
                    expected: last + 1,
                    got: seq,
                });
            }
            tx.execute(
                "INSERT INTO checkpoints(session_id, seq, boundary, created_at, state) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![session_id, seq, boundary, created_at, state],
            )
            .map_err(backend)?;
            tx.commit().map_err(backend)
        })
        .await
    }

    async fn load(&self, session_id: &str) -> Result<Checkpoint, StoreError> {
        let id = session_id.to_string();
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!("{SELECT} WHERE session_id = ?1 ORDER BY seq DESC LIMIT 1"),
                    params![id],
                    read_row,
                )
                .optional()
                .map_err(backend)
            })
            .await?;
        row.map(decode)
            .unwrap_or_else(|| Err(StoreError::NotFound(session_id.to_string())))
    }

    async fn load_at(&self, session_id: &str, seq: u64) -> Result<Checkpoint, StoreError> {
        let id = session_id.to_string();
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!("{SELECT} WHERE session_id = ?1 AND seq = ?2"),
                    params![id, seq],
                    read_row,
                )
                .optional()
                .map_err(backend)
            })
            .await?;
        row.map(decode)
            .unwrap_or_else(|| Err(StoreError::NotFound(format!("{session_id}@{seq}"))))
    }

    async fn next_after(&self, session_id: &str, seq: u64) -> Result<Option<Checkpoint>, StoreError> {
        let id = session_id.to_string();
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    &format!("{SELECT} WHERE session_id = ?1 AND seq > ?2 ORDER BY seq ASC LIMIT 1"),
                    params![id, seq],
                    read_row,
                )
                .optional()
                .map_err(backend)
            })
            .await?;
        row.map(decode).transpose()
    }

    async fn sessions(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT session_id FROM checkpoints ORDER BY session_id")
                .map_err(backend)?;
            let ids = stmt
                .query_map([], |r| r.get::<_, String>(0))
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            Ok(ids)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::HandlerKind;
    use crate::session::{ActionRequest, Message, Session};

    fn suspended_session() -> Session {
        let mut session = Session::new("s1");
        session.append(Message::user("change my flight"));
        session.delegation_stack.push(HandlerKind::UpdateFlight).unwrap();
        session.pending_action = Some(ActionRequest::from_json(
            "update_ticket_to_new_flight",
            serde_json::json!({"ticket_no": "7240005432906569", "new_flight_id": 19250}),
        ));
        session
    }

    #[tokio::test]
    async fn test_sqlite_round_trip() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let mut session = suspended_session();
        let cp = session.checkpoint(Boundary::Suspended);
        store.save(&cp).await.unwrap();
        let loaded = store.load("s1").await.unwrap();
        assert_eq!(loaded, cp);
        assert_eq!(loaded.state, session);
    }

    #[tokio::test]
    async fn test_sqlite_sequence_conflict() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let mut session = suspended_session();
        let cp1 = session.checkpoint(Boundary::Suspended);
        let cp2 = session.checkpoint(Boundary::TurnComplete);
        assert!(matches!(
            store.save(&cp2).await,
            Err(StoreError::SequenceConflict { expected: 1, got: 2, .. })
        ));
        store.save(&cp1).await.unwrap();
        store.save(&cp2).await.unwrap();
        assert_eq!(store.load("s1").await.unwrap().seq, 2);
        assert_eq!(store.load_at("s1", 1).await.unwrap().boundary, Boundary::Suspended);
    }

    #[tokio::test]
    async fn test_sqlite_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.sqlite");
        let mut session = suspended_session();
        {
            let store = SqliteCheckpointStore::open(&path).unwrap();
            store.save(&session.checkpoint(Boundary::Suspended)).await.unwrap();
        }
        let store = SqliteCheckpointStore::open(&path).unwrap();
        assert_eq!(store.load("s1").await.unwrap().state, session);
        assert_eq!(store.sessions().await.unwrap(), vec!["s1".to_string()]);
        assert!(store.next_after("s1", 1).await.unwrap().is_none());
    }
}
