/// Database connection and table creation
pub mod database;

/// Operator identity resolution
pub mod operator;

/// Settings loading from config.toml
pub mod settings;
