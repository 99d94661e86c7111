pub mod error;
pub mod models;
pub mod oracle_reply;
pub mod recurrence;
