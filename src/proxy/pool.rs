// src/proxy/pool.rs
use super::backend::Backend;
use dashmap::DashMap;
use std::sync::Arc;

// Dead backends stay in the pool, only marked as not alive.
#[derive(Clone)]
pub struct BackendPool {
    ordered: Arc<Vec<Arc<Backend>>>,
    backends: Arc<DashMap<String, Arc<Backend>>>,
}

impl BackendPool {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backends = DashMap::new();
        let mut ordered = Vec::new();

        for address in addresses {
            let address = address.into();
            if backends.contains_key(&address) {
                tracing::warn!("Ignoring duplicate backend {:?}", address);
                continue;
            }

            let backend = Arc::new(Backend::new(address.clone(), ordered.len()));
            backends.insert(address, backend.clone());
            ordered.push(backend);
        }

        Self {
            ordered: Arc::new(ordered),
            backends: Arc::new(backends),
        }
    }

    pub fn get_backend(&self, address: &str) -> Option<Arc<Backend>> {
        self.backends.get(address).map(|b| b.clone())
    }

    pub fn all_backends(&self) -> Vec<Arc<Backend>> {
        self.ordered.as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}
