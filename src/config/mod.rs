// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load the backend list from a file (YAML or JSON)
pub async fn load_servers_config<P: AsRef<Path>>(path: P) -> Result<ServersConfig> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read servers file {}", path.display()))?;

    let config: ServersConfig = if path.extension().and_then(|s| s.to_str()) == Some("yaml")
        || path.extension().and_then(|s| s.to_str()) == Some("yml") {
        serde_yaml::from_str(&contents).context("Failed to parse YAML servers file")?
    } else {
        serde_json::from_str(&contents).context("Failed to parse JSON servers file")?
    };

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_load_json_servers() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"servers": ["tcp://10.0.0.1:5556", "tcp://10.0.0.2:5556"]}}"#).unwrap();

        let config = load_servers_config(file.path()).await.unwrap();
        assert_eq!(config.servers, ["tcp://10.0.0.1:5556", "tcp://10.0.0.2:5556"]);
    }

    #[tokio::test]
    async fn test_load_yaml_servers() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "servers:\n  - tcp://10.0.0.1:5556").unwrap();

        let config = load_servers_config(file.path()).await.unwrap();
        assert_eq!(config.servers, ["tcp://10.0.0.1:5556"]);
    }

    #[tokio::test]
    async fn test_rejects_invalid_endpoint() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"servers": ["http://10.0.0.1:5556"]}}"#).unwrap();

        assert!(load_servers_config(file.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = load_servers_config("/nonexistent/servers.json").await.unwrap_err();
        assert!(err.to_string().contains("Failed to read servers file"));
    }
}
