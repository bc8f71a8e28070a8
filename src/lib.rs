pub mod auth;
pub mod catalog;
pub mod engine;
pub mod history;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod sql;
pub mod stores;
pub mod tls;
pub mod wal;
pub mod wire;
