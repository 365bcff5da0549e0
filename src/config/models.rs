// src/config/models.rs
use crate::transport::parse_endpoint;
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServersConfig {
    pub servers: Vec<String>,
}

impl ServersConfig {
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            tracing::warn!("No backend servers configured, every request will fail");
        }

        for server in &self.servers {
            if let Err(e) = parse_endpoint(server) {
                bail!("Invalid backend server {:?}: {}", server, e);
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind_host: String,
    pub port: u16,
    pub workers: usize,
    pub heartbeat: Duration,
    pub deathtime: Duration,
    pub io_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 5555,
            workers: 10,
            heartbeat: Duration::from_millis(250),
            deathtime: Duration::from_secs(1),
            io_timeout: Duration::from_secs(1),
            queue_capacity: 1,
        }
    }
}

impl ProxyConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("worker count must be at least 1");
        }
        if self.heartbeat.is_zero() || self.deathtime.is_zero() || self.io_timeout.is_zero() {
            bail!("heartbeat, death timeout and I/O timeout must be non-zero");
        }
        if self.heartbeat >= self.deathtime {
            bail!(
                "heartbeat interval ({:?}) must be shorter than the death timeout ({:?})",
                self.heartbeat,
                self.deathtime
            );
        }
        if self.queue_capacity == 0 {
            bail!("hand-off queue capacity must be at least 1");
        }
        Ok(())
    }
}
