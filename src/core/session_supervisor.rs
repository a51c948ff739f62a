//! 会话监管：每个会话同一时刻只允许一个在途调用，并可取消
//!
//! acquire(session_id) 返回 TurnLease（持有该轮的子 CancellationToken），Drop 时自动释放；
//! 同一会话已有在途调用时返回 SessionBusy。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::core::OrchestratorError;

type Leases = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// 会话级生命周期管理：根取消令牌与在途租约表
#[derive(Debug)]
pub struct SessionSupervisor {
    /// 进程退出时触发，所有子 token 随之取消
    cancel_token: CancellationToken,
    leases: Leases,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            cancel_token: CancellationToken::new(),
            leases: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 为一次调用占用会话；同一会话已被占用则 SessionBusy
    pub fn acquire(&self, session_id: &str) -> Result<TurnLease, OrchestratorError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| OrchestratorError::SessionBusy(session_id.to_string()))?;
        if leases.contains_key(session_id) {
            return Err(OrchestratorError::SessionBusy(session_id.to_string()));
        }
        let token = self.cancel_token.child_token();
        leases.insert(session_id.to_string(), token.clone());
        Ok(TurnLease {
            session_id: session_id.to_string(),
            token,
            leases: Arc::clone(&self.leases),
        })
    }

    /// 取消某会话的在途调用；无在途调用时返回 false
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.leases.lock() {
            Ok(leases) => match leases.get(session_id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// 取消全部会话（进程退出）
    pub fn cancel_all(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_busy(&self, session_id: &str) -> bool {
        self.leases
            .lock()
            .map(|leases| leases.contains_key(session_id))
            .unwrap_or(false)
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// 一次在途调用的占用凭证
#[derive(Debug)]
pub struct TurnLease {
    session_id: String,
    token: CancellationToken,
    leases: Leases,
}

impl TurnLease {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for TurnLease {
    fn drop(&mut self) {
        if let Ok(mut leases) = self.leases.lock() {
            leases.remove(&self.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_busy() {
        let sup = SessionSupervisor::new();
        let lease = sup.acquire("s1").unwrap();
        assert!(sup.is_busy("s1"));
        assert!(matches!(sup.acquire("s1"), Err(OrchestratorError::SessionBusy(_))));
        assert!(sup.acquire("s2").is_ok());
        drop(lease);
        assert!(!sup.is_busy("s1"));
        assert!(sup.acquire("s1").is_ok());
    }

    #[test]
    fn test_cancel_reaches_lease_token() {
        let sup = SessionSupervisor::new();
        let lease = sup.acquire("s1").unwrap();
        assert!(sup.cancel("s1"));
        assert!(lease.token().is_cancelled());
        assert!(!sup.cancel("other"));
    }

    #[test]
    fn test_cancel_all_propagates() {
        let sup = SessionSupervisor::new();
        let lease = sup.acquire("s1").unwrap();
        sup.cancel_all();
        assert!(lease.token().is_cancelled());
    }
}
