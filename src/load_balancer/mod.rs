// src/load_balancer/mod.rs
mod algorithm;
mod first_alive;

pub use algorithm::BackendSelector; // trait
pub use first_alive::FirstAliveSelector;
