use thiserror::Error;

/// Ошибки на границе вызова [`RequestPool`](crate::RequestPool).
///
/// Паники внутри воркеров и агрегатора сюда не попадают: они логируются,
/// и упавшая задача завершается.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PoolError {
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    #[error("request queue full: capacity {capacity}")]
    QueueFull { capacity: usize },

    #[error("pool has been cancelled")]
    Cancelled,

    #[error("timed out waiting for completion")]
    Timeout,

    #[error("handler panicked: {0}")]
    Panic(String),

    #[error("task join failed: {0}")]
    JoinFailed(String),
}

impl PoolError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PoolError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout)
    }
}

/// Текст паники из `catch_unwind` или `JoinError`
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
