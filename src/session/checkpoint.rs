//! 检查点：会话在挂起 / 一轮结束 / 回滚时的不可变快照
//!
//! 每个会话的检查点序号从 1 开始严格递增；存储实现内部串行化写入，
//! 拒绝非单调序号（SequenceConflict）。history() 返回按序号升序的惰性流，
//! 再次调用即从头开始。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::session::Session;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no checkpoint for session {0}")]
    NotFound(String),

    #[error("sequence conflict for session {session_id}: expected {expected}, got {got}")]
    SequenceConflict {
        session_id: String,
        expected: u64,
        got: u64,
    },

    #[error("corrupt checkpoint: {0}")]
    Corrupt(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// 检查点产生的边界
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// 敏感动作等待审批
    Suspended,
    /// 已批准的动作执行完毕、回到模型之前
    ActionApplied,
    TurnComplete,
    /// 回滚到旧检查点后追加的副本
    Restored,
}

impl Boundary {
    pub fn as_str(self) -> &'static str {
        match self {
            Boundary::Suspended => "suspended",
            Boundary::ActionApplied => "action_applied",
            Boundary::TurnComplete => "turn_complete",
            Boundary::Restored => "restored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "suspended" => Some(Boundary::Suspended),
            "action_applied" => Some(Boundary::ActionApplied),
            "turn_complete" => Some(Boundary::TurnComplete),
            "restored" => Some(Boundary::Restored),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub seq: u64,
    pub boundary: Boundary,
    /// Unix 毫秒
    pub created_at: i64,
    pub state: Session,
}

impl Checkpoint {
    pub fn new(seq: u64, boundary: Boundary, state: Session) -> Self {
        Self {
            session_id: state.session_id.clone(),
            seq,
            boundary,
            created_at: chrono::Utc::now().timestamp_millis(),
            state,
        }
    }
}

/// 检查点存储
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// 最新检查点
    async fn load(&self, session_id: &str) -> Result<Checkpoint, StoreError>;

    async fn load_at(&self, session_id: &str, seq: u64) -> Result<Checkpoint, StoreError>;

    /// 序号大于 seq 的第一个检查点
    async fn next_after(&self, session_id: &str, seq: u64) -> Result<Option<Checkpoint>, StoreError>;

    async fn sessions(&self) -> Result<Vec<String>, StoreError>;
}

/// 会话检查点历史，按序号升序惰性读取
pub fn history(
    store: Arc<dyn CheckpointStore>,
    session_id: impl Into<String>,
) -> BoxStream<'static, Result<Checkpoint, StoreError>> {
    let session_id = session_id.into();
    stream::unfold(Some(0u64), move |cursor| {
        let store = store.clone();
        let session_id = session_id.clone();
        async move {
            let after = cursor?;
            match store.next_after(&session_id, after).await {
                Ok(Some(cp)) => {
                    let seq = cp.seq;
                    Some((Ok(cp), Some(seq)))
                }
                Ok(None) => None,
                // 出错后结束流
                Err(e) => Some((Err(e), None)),
            }
        }
    })
    .boxed()
}

/// 内存存储（测试与单进程运行）
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    inner: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let list = inner.entry(checkpoint.session_id.clone()).or_default();
        let expected = list.last().map(|c| c.seq + 1).unwrap_or(1);
        if checkpoint.seq != expected {
            return Err(StoreError::SequenceConflict {
                session_id: checkpoint.session_id.clone(),
                expected,
                got: checkpoint.seq,
            });
        }
        list.push(checkpoint.clone());
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Checkpoint, StoreError> {
        self.inner
            .read()
            .await
            .get(session_id)
            .and_then(|l| l.last().cloned())
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))
    }

    async fn load_at(&self, session_id: &str, seq: u64) -> Result<Checkpoint, StoreError> {
        self.inner
            .read()
            .await
            .get(session_id)
            .and_then(|l| l.iter().find(|c| c.seq == seq).cloned())
            .ok_or_else(|| StoreError::NotFound(format!("{session_id}@{seq}")))
    }

    async fn next_after(&self, session_id: &str, seq: u64) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .get(session_id)
            .and_then(|l| l.iter().find(|c| c.seq > seq).cloned()))
    }

    async fn sessions(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.inner.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::TryStreamExt;

    use crate::session::Message;

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let store = InMemoryCheckpointStore::new();
        let mut session = Session::new("s1");
        session.append(Message::user("hi"));
        let cp = session.checkpoint(Boundary::TurnComplete);
        store.save(&cp).await.unwrap();
        let loaded = store.load("s1").await.unwrap();
        assert_eq!(loaded, cp);
        assert_eq!(loaded.state, session);
    }

    #[tokio::test]
    async fn test_load_missing_is_not_found() {
        let store = InMemoryCheckpointStore::new();
        assert!(matches!(store.load("nope").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_non_monotonic_seq() {
        let store = InMemoryCheckpointStore::new();
        let mut session = Session::new("s1");
        let first = session.checkpoint(Boundary::TurnComplete);
        store.save(&first).await.unwrap();
        let err = store.save(&first).await.unwrap_err();
        assert!(matches!(err, StoreError::SequenceConflict { expected: 2, got: 1, .. }));
    }

    #[tokio::test]
    async fn test_history_is_ordered_and_restartable() {
        let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let mut session = Session::new("s1");
        for _ in 0..3 {
            store.save(&session.checkpoint(Boundary::TurnComplete)).await.unwrap();
        }
        let seqs: Vec<u64> = history(store.clone(), "s1")
            .map_ok(|c| c.seq)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(seqs, vec![1, 2, 3]);
        let again: Vec<Checkpoint> = history(store, "s1").try_collect().await.unwrap();
        assert_eq!(again.len(), 3);
    }

    #[test]
    fn test_boundary_parse() {
        for b in [Boundary::Suspended, Boundary::ActionApplied, Boundary::TurnComplete, Boundary::Restored] {
            assert_eq!(Boundary::parse(b.as_str()), Some(b));
        }
    }
}
