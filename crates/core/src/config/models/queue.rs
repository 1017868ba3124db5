use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Queue backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Redis,
    Memory,
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub url: String,
    /// List key the recipe generation worker drains
    pub queue_name: String,
    pub connection_timeout_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Redis,
            url: "redis://localhost:6379".to_string(),
            queue_name: "recipe-generation:queue".to_string(),
            connection_timeout_seconds: 10,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue_name.trim().is_empty() {
            return Err(anyhow::anyhow!("队列名称不能为空"));
        }

        if self.backend == QueueBackend::Redis
            && !self.url.starts_with("redis://")
            && !self.url.starts_with("rediss://")
        {
            return Err(anyhow::anyhow!("Redis URL格式无效: {}", self.url));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_ignores_url() {
        let config = QueueConfig {
            backend: QueueBackend::Memory,
            url: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_queue_name_rejected() {
        let config = QueueConfig {
            queue_name: "  ".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
