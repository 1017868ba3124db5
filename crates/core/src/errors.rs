use thiserror::Error;

/// 任务处理子系统错误类型定义
#[derive(Debug, Error)]
pub enum MealPrepError {
    #[error("存储不可用: {0}")]
    StoreUnavailable(String),

    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis错误: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("任务未找到: {id}")]
    NotFound { id: String },

    #[error("任务类型不匹配: {id} (期望 {expected}, 实际 {actual})")]
    TypeMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("非法状态转换: {id} {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("校验失败: {0}")]
    Validation(String),

    #[error("熔断器已打开: {component}")]
    CircuitOpen { component: String },

    #[error("max attempts exceeded: {id} ({attempts})")]
    MaxAttemptsExceeded { id: String, attempts: u32 },

    #[error("生成失败: {0}")]
    Generation(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl MealPrepError {
    /// Infrastructure failures that are worth retrying and that count against
    /// a circuit breaker. Domain rejections are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            MealPrepError::StoreUnavailable(_) => true,
            MealPrepError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Tls(_)
            ),
            MealPrepError::Redis(e) => {
                e.is_io_error() || e.is_connection_refusal() || e.is_timeout() || e.is_connection_dropped()
            }
            _ => false,
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        MealPrepError::NotFound { id: id.into() }
    }
}

impl From<serde_json::Error> for MealPrepError {
    fn from(e: serde_json::Error) -> Self {
        MealPrepError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type MealPrepResult<T> = std::result::Result<T, MealPrepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MealPrepError::StoreUnavailable("down".into()).is_transient());
        assert!(MealPrepError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!MealPrepError::Database(sqlx::Error::RowNotFound).is_transient());
        assert!(!MealPrepError::not_found("job-1").is_transient());
        assert!(!MealPrepError::Validation("servings".into()).is_transient());
        assert!(!MealPrepError::CircuitOpen {
            component: "jobs".into()
        }
        .is_transient());
    }

    #[test]
    fn test_max_attempts_message() {
        let err = MealPrepError::MaxAttemptsExceeded {
            id: "job-1".into(),
            attempts: 3,
        };
        assert!(err.to_string().starts_with("max attempts exceeded"));
    }
}
