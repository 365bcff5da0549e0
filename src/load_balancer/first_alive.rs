// src/load_balancer/first_alive.rs
use crate::load_balancer::BackendSelector;
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct FirstAliveSelector;

impl FirstAliveSelector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BackendSelector for FirstAliveSelector {
    async fn candidates(&self, backends: &[Arc<Backend>]) -> Vec<Arc<Backend>> {
        let mut alive = Vec::with_capacity(backends.len());

        for backend in backends {
            if backend.is_alive().await {
                alive.push(backend.clone());
            }
        }

        alive
    }

    fn name(&self) -> &'static str {
        "first_alive"
    }
}
