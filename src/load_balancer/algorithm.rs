// src/load_balancer/algorithm.rs
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait BackendSelector: Send + Sync {
    // Best first. The router binds the first one that answers.
    async fn candidates(&self, backends: &[Arc<Backend>]) -> Vec<Arc<Backend>>;

    fn name(&self) -> &'static str;
}
