use serde::{Deserialize, Serialize};
use std::time::Duration;

/// External recipe generation service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3000/api/recipes/generate".to_string(),
            api_key: None,
            timeout_seconds: 120,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(anyhow::anyhow!("生成服务地址格式无效: {}", self.endpoint));
        }

        if self.timeout_seconds == 0 {
            return Err(anyhow::anyhow!("生成服务超时时间必须大于0"));
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
