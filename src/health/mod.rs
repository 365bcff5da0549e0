// src/health/mod.rs
mod monitor;

pub use monitor::HealthMonitor;
