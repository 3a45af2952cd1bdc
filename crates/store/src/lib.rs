pub mod connection;
pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use connection::{connect, connect_with_settings, ping, DbPool};
pub use memory::InMemoryTabularStore;
pub use sqlite::SqliteTabularStore;
