pub mod config;
pub mod db;
pub mod gateway;
pub mod model;
pub mod outbox;
pub mod status;
pub mod store;
pub mod sync;
