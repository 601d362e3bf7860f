use jobq_client::BrokerConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker identity used in logs (auto-generated if not provided)
    #[serde(default)]
    pub worker_id: Option<String>,

    /// Install process signal handlers when the worker starts. Embedders
    /// that drive shutdown themselves (and tests) turn this off.
    #[serde(default = "default_handle_signals")]
    pub handle_signals: bool,

    #[serde(default)]
    pub broker: BrokerConfig,
}

fn default_handle_signals() -> bool {
    true
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            worker_id: None,
            handle_signals: true,
            broker: BrokerConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn resolve_worker_id(&self) -> String {
        use std::process;
        use uuid::Uuid;

        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        let pid = process::id();
        let random = Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", host, pid, &random[..8])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert!(config.worker_id.is_none());
        assert!(config.handle_signals);
        assert_eq!(config.broker.port, 6379);
    }

    #[test]
    fn test_explicit_worker_id_wins() {
        let config = WorkerConfig {
            worker_id: Some("w-7".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_worker_id(), "w-7");
    }

    #[test]
    fn test_generated_worker_ids_differ() {
        let config = WorkerConfig::default();
        assert_ne!(config.resolve_worker_id(), config.resolve_worker_id());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "worker_id: w-1\nhandle_signals: false\nbroker:\n  host: broker.internal\n  port: 6380"
        )
        .unwrap();

        let config = WorkerConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.worker_id.as_deref(), Some("w-1"));
        assert!(!config.handle_signals);
        assert_eq!(config.broker.host, "broker.internal");
        assert_eq!(config.broker.port, 6380);
    }
}
