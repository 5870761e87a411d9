//! SQLite persistence for BloomUp: connection config, pool and migrations,
//! shared models, and query functions.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
