use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Worker loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Defaults to `<hostname>-<pid>` when unset
    pub worker_id: Option<String>,
    /// Job type this worker is responsible for; other types are discarded
    pub job_type: String,
    pub poll_interval_seconds: u64,
    pub max_attempts: u32,
    pub shutdown_grace_seconds: u64,
    pub reconcile_enabled: bool,
    pub reconcile_interval_seconds: u64,
    pub stale_after_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            job_type: "recipe-generation".to_string(),
            poll_interval_seconds: 5,
            max_attempts: 3,
            shutdown_grace_seconds: 10,
            reconcile_enabled: true,
            reconcile_interval_seconds: 300,
            stale_after_seconds: 1800,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.job_type.trim().is_empty() {
            return Err(anyhow::anyhow!("Worker任务类型不能为空"));
        }

        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }

        if self.reconcile_enabled
            && (self.reconcile_interval_seconds == 0 || self.stale_after_seconds == 0)
        {
            return Err(anyhow::anyhow!("僵尸任务回收间隔和超时阈值必须大于0"));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_seconds)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }

    /// Configured id, or `<hostname>-<pid>`
    pub fn resolve_worker_id(&self) -> String {
        if let Some(id) = self.worker_id.as_ref().filter(|id| !id.is_empty()) {
            return id.clone();
        }
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        format!("{host}-{}", std::process::id())
    }
}
