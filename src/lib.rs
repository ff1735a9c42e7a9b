// src/lib.rs
pub mod types;
pub mod config;
pub mod metrics;
pub mod providers;
pub mod collector;
pub mod server;
pub mod exporter;
