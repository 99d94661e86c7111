pub mod config;
pub mod error;
pub mod event_store;
pub mod oracle_client;
pub mod storage;
