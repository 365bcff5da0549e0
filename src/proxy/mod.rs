// src/proxy/mod.rs
mod backend;
mod connections;
mod frontend;
mod pool;
mod proxy;
mod reply;
mod shutdown;
mod worker;

pub use backend::{Backend, Transition};
pub use connections::{ClientConnection, ConnectionRouter, RoutedConnection};
pub use pool::BackendPool;
pub use proxy::{Proxy, ProxyError};
pub use shutdown::ShutdownCoordinator;
