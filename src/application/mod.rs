pub mod bootstrap;
pub mod commands;
pub mod schedule_import;
pub mod slot_finder;
