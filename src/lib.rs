pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod observability;
pub mod sql;
pub mod wal;
pub mod wire;
