pub mod sqlite;

pub use sqlite::SqliteStatusStore;
