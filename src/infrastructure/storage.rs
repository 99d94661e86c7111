use crate::infrastructure::error::InfraError;
use rusqlite::Connection;
use std::path::Path;

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

pub fn initialize_database(path: &Path) -> Result<(), InfraError> {
    let connection = Connection::open(path)?;
    apply_schema(&connection)
}

pub fn apply_schema(connection: &Connection) -> Result<(), InfraError> {
    connection.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
