//! Driver-backed implementations of the core collaborators: MySQL and
//! SQLite data access, the Ollama chat assistant and the export writers.

pub mod chat;
pub mod connector;
pub mod export;
pub mod mysql;
pub mod sqlite;
