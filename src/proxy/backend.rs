// src/proxy/backend.rs
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct Liveness {
    alive: bool,
    last_pong: Instant,
    last_heartbeat_at: Option<DateTime<Utc>>,
}

// Only the health monitor writes the liveness fields. The lock is never held across I/O.
#[derive(Debug)]
pub struct Backend {
    pub address: String,
    pub weight: usize,

    liveness: Mutex<Liveness>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Revived,
    Died,
}

impl Backend {
    pub fn new(address: impl Into<String>, weight: usize) -> Self {
        Self {
            address: address.into(),
            weight,
            liveness: Mutex::new(Liveness {
                alive: false,
                last_pong: Instant::now(),
                last_heartbeat_at: None,
            }),
        }
    }

    pub async fn is_alive(&self) -> bool {
        self.liveness.lock().await.alive
    }

    pub async fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        self.liveness.lock().await.last_heartbeat_at
    }

    pub async fn record_heartbeat(&self) -> Transition {
        let mut liveness = self.liveness.lock().await;
        let was_alive = liveness.alive;

        liveness.last_pong = Instant::now();
        liveness.last_heartbeat_at = Some(Utc::now());
        liveness.alive = true;

        if was_alive {
            Transition::Unchanged
        } else {
            Transition::Revived
        }
    }

    pub async fn expire_if_silent(&self, deathtime: Duration) -> Transition {
        let mut liveness = self.liveness.lock().await;

        if liveness.alive && liveness.last_pong.elapsed() > deathtime {
            liveness.alive = false;
            Transition::Died
        } else {
            Transition::Unchanged
        }
    }
}
